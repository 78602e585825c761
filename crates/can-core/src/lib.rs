//! can-core: Shared types for Can Damonium
//!
//! This crate provides the foundational types used across all Can Damonium crates.

mod buffer;
mod error;

pub use buffer::*;
pub use error::*;

/// Type alias for audio samples (32-bit float, matching the host audio I/O)
pub type Sample = f32;

/// Two sample rates closer than this are treated as identical
pub const SAMPLE_RATE_TOLERANCE_HZ: f64 = 0.1;

/// Check whether two sample rates match within [`SAMPLE_RATE_TOLERANCE_HZ`]
#[inline]
pub fn rates_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= SAMPLE_RATE_TOLERANCE_HZ
}

/// Channel configuration of the live stream or of an impulse response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    /// Layout for a channel count, `None` for anything other than 1 or 2
    pub fn from_count(channels: usize) -> Option<Self> {
        match channels {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            _ => None,
        }
    }

    #[inline]
    pub fn count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self::Stereo
    }
}

/// RMS level of a block of samples (linear)
#[inline]
pub fn block_rms(samples: &[Sample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}
