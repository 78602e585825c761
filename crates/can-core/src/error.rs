//! Error types for Can Damonium core types

use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Unsupported channel count: {0} (expected 1 or 2)")]
    UnsupportedChannelCount(usize),

    #[error("Channel length mismatch: channel 0 has {expected} samples, channel {channel} has {actual}")]
    ChannelLengthMismatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
