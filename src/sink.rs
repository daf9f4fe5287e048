//! Append-only CSV log of window summaries, one layout per pipeline.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::Pipeline;
use crate::error::Result;
use crate::models::WindowSummary;

pub const NOT_AVAILABLE: &str = "N/A";

pub trait SummarySink {
    fn append(&mut self, summary: &WindowSummary) -> Result<()>;
}

impl SummarySink for Vec<WindowSummary> {
    fn append(&mut self, summary: &WindowSummary) -> Result<()> {
        self.push(summary.clone());
        Ok(())
    }
}

impl<T: SummarySink + ?Sized> SummarySink for &mut T {
    fn append(&mut self, summary: &WindowSummary) -> Result<()> {
        (**self).append(summary)
    }
}

pub fn header(pipeline: Pipeline) -> &'static [&'static str] {
    match pipeline {
        Pipeline::SevenClass => &[
            "timestamp",
            "window_start",
            "window_end",
            "primary_emotion",
            "sadness_level",
            "sadness_intensity",
            "emotion_scores",
            "samples_collected",
            "model_type",
        ],
        Pipeline::Landmark => &[
            "timestamp",
            "window_start",
            "window_end",
            "primary_emotion",
            "sadness_level",
            "sadness_intensity",
            "happy_confidence",
            "sad_confidence",
            "samples_collected",
            "landmarks_used",
        ],
        Pipeline::Heuristic => &[
            "timestamp",
            "window_start",
            "window_end",
            "primary_emotion",
            "avg_confidence",
            "samples_collected",
        ],
    }
}

/// ISO-8601 UTC with microseconds and a trailing `Z`.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Label counts as a JSON object in first-seen order, e.g. `{"sad":3,"happy":1}`.
pub fn label_counts_json(summary: &WindowSummary) -> String {
    let mut counts = serde_json::Map::new();
    for (label, count) in &summary.label_counts {
        counts.insert(label.as_str().to_string(), serde_json::Value::from(*count));
    }
    serde_json::Value::Object(counts).to_string()
}

pub fn row(pipeline: Pipeline, summary: &WindowSummary, written_at: DateTime<Utc>) -> Vec<String> {
    let mut fields = vec![
        format_timestamp(&written_at),
        format_timestamp(&summary.window_start),
        format_timestamp(&summary.window_end),
        summary.dominant_emotion.to_string(),
    ];

    let level = summary
        .sadness
        .map(|s| s.label.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let intensity = summary
        .sadness
        .map(|s| format!("{:.2}", s.mean_intensity))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    match pipeline {
        Pipeline::SevenClass => {
            fields.push(level);
            fields.push(intensity);
            fields.push(label_counts_json(summary));
            fields.push(summary.sample_count.to_string());
            fields.push(summary.model_identifier.clone());
        }
        Pipeline::Landmark => {
            fields.push(level);
            fields.push(intensity);
            fields.push(format!("{:.2}", summary.mean_score("happy").unwrap_or(0.0)));
            fields.push(format!("{:.2}", summary.mean_score("sad").unwrap_or(0.0)));
            fields.push(summary.sample_count.to_string());
            fields.push(summary.model_identifier.clone());
        }
        Pipeline::Heuristic => {
            fields.push(format!("{:.2}", summary.mean_confidence));
            fields.push(summary.sample_count.to_string());
        }
    }

    fields
}

pub struct CsvLog {
    path: PathBuf,
    pipeline: Pipeline,
}

impl CsvLog {
    /// Writes the header if the file does not exist yet. Existing logs are
    /// appended to as-is.
    pub fn open(path: &Path, pipeline: Pipeline) -> Result<Self> {
        if !path.exists() {
            let mut writer = csv::Writer::from_path(path)?;
            writer.write_record(header(pipeline))?;
            writer.flush()?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            pipeline,
        })
    }
}

impl SummarySink for CsvLog {
    fn append(&mut self, summary: &WindowSummary) -> Result<()> {
        let file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(row(self.pipeline, summary, Utc::now()))?;
        writer.flush()?;
        Ok(())
    }
}
