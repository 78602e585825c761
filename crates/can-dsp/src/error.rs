//! DSP error types

use can_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Invalid processing configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("Impulse response is empty")]
    EmptyImpulse,

    #[error("Impulse response contains non-finite samples")]
    NonFiniteImpulse,

    #[error("Convolution core is not prepared")]
    NotPrepared,

    #[error("Impulse response was partitioned for a different configuration")]
    LayoutMismatch,

    #[error(transparent)]
    Buffer(#[from] CoreError),
}

pub type DspResult<T> = Result<T, DspError>;
