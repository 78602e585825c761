//! File I/O error types

use can_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("WAV error: {0}")]
    WavError(String),

    #[error("Invalid audio data: {0}")]
    Buffer(#[from] CoreError),
}

pub type FileResult<T> = Result<T, FileError>;

impl From<hound::Error> for FileError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) if e.kind() == std::io::ErrorKind::NotFound => {
                FileError::NotFound(e.to_string())
            }
            other => FileError::WavError(other.to_string()),
        }
    }
}
