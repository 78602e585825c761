//! Engine observability state
//!
//! Counters and levels written by the audio thread with relaxed atomics and
//! polled by the UI. Owned by one engine instance.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Lock-free f32 cell (bit pattern in an `AtomicU32`)
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Live counters and meters
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub callbacks: AtomicU64,
    pub prepare_calls: AtomicU64,
    pub workspace_rebuilds: AtomicU64,
    pub installs: AtomicU64,
    pub refused_installs: AtomicU64,
    pub numeric_faults: AtomicU64,
    pub input_rms: AtomicF32,
    pub wet_rms: AtomicF32,
    pub output_rms: AtomicF32,
    /// `f64` bits of the prepared sample rate
    prepared_rate_bits: AtomicU64,
    /// Prepared block size, 0 until the first `prepare`
    prepared_block_size: AtomicUsize,
}

impl Diagnostics {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the prepared format so metering never waits on the loader lock
    pub(crate) fn set_prepared(&self, sample_rate: f64, block_size: usize) {
        self.prepared_rate_bits
            .store(sample_rate.to_bits(), Ordering::Relaxed);
        self.prepared_block_size.store(block_size, Ordering::Release);
    }

    /// Prepared `(sample_rate, block_size)`, if any
    pub fn prepared(&self) -> Option<(f64, usize)> {
        let block_size = self.prepared_block_size.load(Ordering::Acquire);
        (block_size > 0).then(|| {
            let rate = f64::from_bits(self.prepared_rate_bits.load(Ordering::Relaxed));
            (rate, block_size)
        })
    }
}

/// Point-in-time copy of the engine's observable state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub ir_loaded: bool,
    pub bypassed: bool,
    pub test_tone: bool,
    pub prepared_sample_rate: Option<f64>,
    pub prepared_block_size: Option<usize>,
    pub callbacks: u64,
    pub prepare_calls: u64,
    pub workspace_rebuilds: u64,
    pub installs: u64,
    pub refused_installs: u64,
    pub contended_drains: u64,
    pub numeric_faults: u64,
    /// Linear RMS, 0..1 for full-scale signals
    pub input_rms: f32,
    /// Post-engine level, equal to `input_rms` while bypassed or without an IR
    pub wet_rms: f32,
    pub output_rms: f32,
}
