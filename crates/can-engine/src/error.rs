//! Engine error types

use can_dsp::DspError;
use can_file::FileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// IR source missing or unreadable. The previous IR stays active.
    #[error("Failed to decode impulse response: {0}")]
    Decode(#[from] FileError),

    #[error("DSP error: {0}")]
    Dsp(#[from] DspError),

    #[error("Impulse response rejected by self-test: {0}")]
    SelfTestRejected(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
