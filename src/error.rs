use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Nothing has been captured or loaded yet.
    #[error("no trace data: capture a step or load a trace first")]
    NoData,

    #[error("trace capture is not available in this runtime")]
    CaptureUnavailable,

    #[error("runtime step failed: {0}")]
    Runtime(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
