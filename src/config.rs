use std::time::Duration;

use clap::ValueEnum;

use crate::error::{MonitorError, Result};
use crate::sadness::BandTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Pipeline {
    /// 7-class FER-2013 CNN with score-adjusted sadness levels
    SevenClass,
    /// Binary happy/sad CNN fused with facial landmark geometry
    Landmark,
    /// Smile cascade and mouth brightness/edge rules
    Heuristic,
}

impl Pipeline {
    pub fn as_str(self) -> &'static str {
        match self {
            Pipeline::SevenClass => "seven-class",
            Pipeline::Landmark => "landmark",
            Pipeline::Heuristic => "heuristic",
        }
    }

    pub fn default_sample_interval(self) -> Duration {
        match self {
            Pipeline::SevenClass | Pipeline::Landmark => Duration::from_millis(300),
            Pipeline::Heuristic => Duration::from_millis(500),
        }
    }

    pub fn default_bands(self) -> BandTable {
        match self {
            Pipeline::Landmark => BandTable::graded(),
            Pipeline::SevenClass | Pipeline::Heuristic => BandTable::clinical(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub pipeline: Pipeline,
    pub window_length: Duration,
    pub sample_interval: Duration,
    pub bands: BandTable,
    pub flush_on_exit: bool,
    pub model_type: String,
    pub use_landmarks: bool,
}

impl MonitorConfig {
    pub fn for_pipeline(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            window_length: Duration::from_secs(30),
            sample_interval: pipeline.default_sample_interval(),
            bands: pipeline.default_bands(),
            flush_on_exit: false,
            model_type: "Custom CNN".to_string(),
            use_landmarks: true,
        }
    }

    pub fn with_window_secs(mut self, secs: f64) -> Result<Self> {
        self.window_length = positive_secs("window length", secs)?;
        Ok(self)
    }

    pub fn with_sample_interval_secs(mut self, secs: f64) -> Result<Self> {
        self.sample_interval = positive_secs("sample interval", secs)?;
        Ok(self)
    }

    /// Accepts `LOW,HIGH`, e.g. `40,70`.
    pub fn with_band_thresholds(mut self, thresholds: &str) -> Result<Self> {
        let parts: Vec<&str> = thresholds.split(',').map(str::trim).collect();
        let [low, high] = parts.as_slice() else {
            return Err(MonitorError::InvalidConfig(format!(
                "expected LOW,HIGH thresholds, got {thresholds:?}"
            )));
        };
        let parse = |value: &str| {
            value.parse::<f64>().map_err(|_| {
                MonitorError::InvalidConfig(format!("invalid threshold {value:?}"))
            })
        };
        self.bands = self.bands.with_thresholds(parse(*low)?, parse(*high)?)?;
        Ok(self)
    }
}

fn positive_secs(name: &str, secs: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(MonitorError::InvalidConfig(format!(
            "{name} must be a positive number of seconds, got {secs}"
        ))),
    }
}
