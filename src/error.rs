use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("malformed recording at line {line}: {source}")]
    Recording {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Failure of one classifier invocation. The tick that produced it is skipped.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("backend produced no prediction for this face")]
    NoPrediction,

    #[error("malformed classifier output: {0}")]
    Malformed(String),

    #[error("expected {expected} output from the classifier")]
    UnexpectedOutput { expected: &'static str },

    #[error("face crop unavailable")]
    MissingFaceCrop,

    #[error("face crop could not be decoded: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
