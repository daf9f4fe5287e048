use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod backend;
mod config;
mod db;
mod error;
mod features;
mod models;
mod replay;
mod report;
mod sadness;
mod scoring;
mod session;
mod sink;
mod window;

use config::{MonitorConfig, Pipeline};
use replay::{RecordedBackend, RecordedFrame, Recording};
use scoring::{HeuristicScorer, LandmarkScorer, Scorer, SevenClassScorer};
use session::{Session, SessionReport, StopSignal};
use sink::CsvLog;
use window::WallClock;

#[derive(Parser)]
#[command(name = "emotion-monitor")]
#[command(about = "Facial emotion monitor with windowed sadness tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a monitoring session over a recorded frame stream
    Monitor {
        #[arg(long, value_enum, default_value_t = Pipeline::SevenClass)]
        pipeline: Pipeline,
        /// JSON lines file, one frame per line
        #[arg(long)]
        recording: PathBuf,
        /// CSV log to append window summaries to
        #[arg(long)]
        log: Option<PathBuf>,
        #[arg(long, default_value_t = 30.0)]
        window_secs: f64,
        #[arg(long)]
        sample_interval_secs: Option<f64>,
        /// Severity band edges as LOW,HIGH
        #[arg(long)]
        band_thresholds: Option<String>,
        /// Write the partial window when the session ends
        #[arg(long)]
        flush_on_exit: bool,
        #[arg(long, default_value = "Custom CNN")]
        model_type: String,
        /// Score the landmark pipeline from the model alone
        #[arg(long)]
        no_landmarks: bool,
    },
    /// Create or upgrade the history database schema
    InitDb,
    /// Import a session CSV log into the history database
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// Generate a markdown report from the history database
    Report {
        #[arg(long)]
        session: Option<Uuid>,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[arg(long, default_value = "emotion_report.md")]
        out: PathBuf,
    },
}

fn default_log(pipeline: Pipeline) -> PathBuf {
    PathBuf::from(match pipeline {
        Pipeline::SevenClass => "therapy_emotion_log.csv",
        Pipeline::Landmark => "therapy_emotion_log_advanced.csv",
        Pipeline::Heuristic => "emotion_log_simple.csv",
    })
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set for history commands")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn run_monitor(
    config: MonitorConfig,
    recording: &Path,
    log: &Path,
    stop: &dyn StopSignal,
) -> anyhow::Result<SessionReport> {
    let source = Recording::open(recording)
        .with_context(|| format!("failed to open recording {}", recording.display()))?;
    let backend = RecordedBackend::new(recording.parent().unwrap_or(Path::new(".")));
    let sink = CsvLog::open(log, config.pipeline)
        .with_context(|| format!("failed to open log {}", log.display()))?;

    let scorer: Box<dyn Scorer<RecordedFrame>> = match config.pipeline {
        Pipeline::SevenClass => Box::new(SevenClassScorer::new(
            backend.clone(),
            config.bands.clone(),
            config.model_type.clone(),
        )),
        Pipeline::Landmark => Box::new(LandmarkScorer::new(
            backend.clone(),
            config.use_landmarks.then(|| backend.clone()),
            config.bands.clone(),
        )),
        Pipeline::Heuristic => Box::new(HeuristicScorer::new(backend.clone(), backend.clone())),
    };

    let mut session = Session::new(
        source,
        backend,
        scorer,
        sink,
        &config,
        WallClock::new(Utc::now()),
    );
    Ok(session.run(stop)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Monitor {
            pipeline,
            recording,
            log,
            window_secs,
            sample_interval_secs,
            band_thresholds,
            flush_on_exit,
            model_type,
            no_landmarks,
        } => {
            let mut config = MonitorConfig::for_pipeline(pipeline).with_window_secs(window_secs)?;
            if let Some(secs) = sample_interval_secs {
                config = config.with_sample_interval_secs(secs)?;
            }
            if let Some(thresholds) = band_thresholds.as_deref() {
                config = config.with_band_thresholds(thresholds)?;
            }
            config.flush_on_exit = flush_on_exit;
            config.model_type = model_type;
            config.use_landmarks = !no_landmarks;

            let (low, high) = config.bands.thresholds();
            info!(
                pipeline = pipeline.as_str(),
                window_secs,
                band_low = low,
                band_high = high,
                "monitor configured"
            );

            let log = log.unwrap_or_else(|| default_log(pipeline));
            let stop = Arc::new(AtomicBool::new(false));
            let interrupt = Arc::clone(&stop);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupt.store(true, Ordering::Relaxed);
                }
            });

            let session_log = log.clone();
            let report = tokio::task::spawn_blocking(move || {
                run_monitor(config, &recording, &session_log, stop.as_ref())
            })
            .await
            .context("monitor task panicked")??;

            println!(
                "Processed {} frames, {} samples ({} classifier failures).",
                report.frames, report.samples, report.classifier_failures
            );
            println!(
                "Wrote {} window summaries to {}.",
                report.windows_written,
                log.display()
            );
            if report.discarded_samples > 0 {
                println!(
                    "Discarded {} samples from the unfinished window.",
                    report.discarded_samples
                );
            }
        }
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { csv, session } => {
            let pool = connect().await?;
            let session_id = session.unwrap_or_else(Uuid::new_v4);
            let inserted = db::import_csv(&pool, &csv, session_id).await?;
            println!(
                "Inserted {inserted} windows from {} as session {session_id}.",
                csv.display()
            );
        }
        Commands::Report {
            session,
            since_days,
            out,
        } => {
            let pool = connect().await?;
            let since_date = report::cutoff_date(since_days);
            let records = db::fetch_history(&pool, since_date, session).await?;
            let scope = session.map(|id| format!("session {id}"));
            let report = report::build_report(scope.as_deref(), since_date, &records);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
