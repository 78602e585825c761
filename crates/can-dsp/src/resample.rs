//! IR Resampler
//!
//! 4-point, 3rd-order Lagrange interpolation, applied independently per
//! channel. Used to bring an impulse response recorded at one rate to the
//! live device rate before it is partitioned.

use can_core::{Sample, SampleBuffer};

use crate::{DspError, DspResult};

/// Output length for converting `len` samples from `source_rate` to `target_rate`.
///
/// Rounded to nearest so a there-and-back conversion lands within one sample
/// of the original length. Never zero for non-empty input.
pub fn resampled_length(len: usize, source_rate: f64, target_rate: f64) -> usize {
    if len == 0 {
        return 0;
    }
    let exact = len as f64 * target_rate / source_rate;
    (exact.round() as usize).max(1)
}

/// Resample a buffer to `target_rate`, returning a new buffer tagged with that rate.
///
/// The source buffer is left untouched.
pub fn resample(buffer: &SampleBuffer, target_rate: f64) -> DspResult<SampleBuffer> {
    if !(target_rate.is_finite() && target_rate > 0.0) {
        return Err(DspError::InvalidSampleRate(target_rate));
    }

    let source_rate = buffer.sample_rate();
    let out_len = resampled_length(buffer.num_samples(), source_rate, target_rate);
    let step = source_rate / target_rate;

    let channels = buffer
        .channels()
        .map(|input| {
            (0..out_len)
                .map(|i| interpolate(input, i as f64 * step))
                .collect::<Vec<Sample>>()
        })
        .collect();

    log::debug!(
        "[Resample] {} samples @ {} Hz -> {} samples @ {} Hz",
        buffer.num_samples(),
        source_rate,
        out_len,
        target_rate
    );

    Ok(SampleBuffer::new(channels, target_rate)?)
}

/// Lagrange interpolation at fractional `position` using nodes -1, 0, 1, 2.
///
/// Samples outside the buffer are treated as zero.
#[inline]
fn interpolate(input: &[Sample], position: f64) -> Sample {
    let base = position.floor();
    let t = position - base;
    let index = base as isize;

    let at = |offset: isize| -> f64 {
        let i = index + offset;
        if i < 0 || i as usize >= input.len() {
            0.0
        } else {
            input[i as usize] as f64
        }
    };

    let [c0, c1, c2, c3] = lagrange_coefficients(t);
    (c0 * at(-1) + c1 * at(0) + c2 * at(1) + c3 * at(2)) as Sample
}

#[inline]
fn lagrange_coefficients(t: f64) -> [f64; 4] {
    let tm1 = t - 1.0;
    let tm2 = t - 2.0;
    let tp1 = t + 1.0;
    [
        -t * tm1 * tm2 / 6.0,
        tp1 * tm1 * tm2 / 2.0,
        -tp1 * t * tm2 / 2.0,
        tp1 * t * tm1 / 6.0,
    ]
}
