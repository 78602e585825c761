//! can-dsp: DSP processors for Can Damonium
//!
//! ## Modules
//! - `convolution` - Zero-latency uniformly partitioned convolution core
//! - `resample` - Lagrange IR resampler
//! - `self_test` - Synthetic impulse check for candidate IRs

mod error;

pub mod convolution;
pub mod resample;

pub use convolution::{ConvolutionCore, PartitionLayout, PreparedIr, normalization_gain};
pub use error::*;
pub use resample::{resample, resampled_length};
pub use self_test::{SelfTest, SelfTestReport, Verdict};

/// Trait for all DSP processors
pub trait Processor: Send + Sync {
    /// Reset processor state
    fn reset(&mut self);

    /// Get latency in samples
    fn latency(&self) -> usize {
        0
    }
}
