use thiserror::Error;

/// Fatal errors that end the capture loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to open frame source: {0}")]
    SourceOpen(String),

    #[error("frame source failed mid-stream: {0}")]
    Stream(String),

    #[error("inference timestamps exhausted")]
    TimestampsExhausted,
}

/// Per-submission failures. The capture loop logs these and moves on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("inference queue is full, dropping timestamp {0}")]
    Busy(u64),

    #[error("timestamp {timestamp} is not after the last accepted timestamp {last}")]
    NonMonotonic { timestamp: u64, last: u64 },

    #[error("inference workers have shut down")]
    Closed,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("volume must be between 0 and 100, got {0}")]
    InvalidVolume(u8),

    #[error("device request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed status response: {0}")]
    MalformedStatus(String),
}
