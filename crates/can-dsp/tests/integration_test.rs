//! DSP Integration Tests
//!
//! Exercises the convolution core, resampler and self-test together.
//! Verifies:
//! - Mono IR broadcast to a stereo stream
//! - Normalisation bound on unit impulse output
//! - Resample round-trip length bookkeeping
//! - Signal integrity (no NaN/Inf) across odd block sizes

use can_core::SampleBuffer;
use can_dsp::{ConvolutionCore, SelfTest, Verdict, resample, resampled_length};

const SAMPLE_RATE: f64 = 48000.0;
const BLOCK_SIZE: usize = 512;

/// Exponentially decaying noise, the shape of a real enclosure IR
fn generate_ir(samples: usize, rate: f64) -> SampleBuffer {
    let mut state: u32 = 0x1234_5678;
    let tau = samples as f32 / 5.0;
    let ir = (0..samples)
        .map(|i| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let noise = state as f32 / u32::MAX as f32 * 2.0 - 1.0;
            noise * (-(i as f32) / tau).exp()
        })
        .collect();
    SampleBuffer::mono(ir, rate).unwrap()
}

fn generate_sine(samples: usize, freq: f64) -> Vec<f32> {
    (0..samples)
        .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / SAMPLE_RATE).sin() as f32)
        .collect()
}

fn is_valid_signal(signal: &[f32]) -> bool {
    signal.iter().all(|x| x.is_finite())
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_mono_ir_broadcast_to_stereo() {
    let mut core = ConvolutionCore::new(1.0);
    core.prepare(SAMPLE_RATE, BLOCK_SIZE, 2).unwrap();
    core.load_impulse_response(generate_ir(4800, SAMPLE_RATE), true, true)
        .unwrap();

    let blocks = 4800usize.div_ceil(BLOCK_SIZE);
    let mut total_energy = 0.0f32;
    for block in 0..blocks {
        let mut left = vec![0.0; BLOCK_SIZE];
        let mut right = vec![0.0; BLOCK_SIZE];
        if block == 0 {
            left[0] = 1.0;
            right[0] = 1.0;
        }
        core.process(&mut [&mut left[..], &mut right[..]]);
        assert_eq!(left, right, "channels diverged in block {block}");
        total_energy += left.iter().map(|s| s * s).sum::<f32>();
    }
    assert!(total_energy > 0.5);
}

#[test]
fn test_normalized_impulse_peak_bounded() {
    for &gain in &[0.001f32, 1.0, 50.0] {
        let mut ir = generate_ir(6000, SAMPLE_RATE);
        ir.scale(gain);

        let mut core = ConvolutionCore::new(1.0);
        core.prepare(SAMPLE_RATE, BLOCK_SIZE, 1).unwrap();
        core.load_impulse_response(ir, false, true).unwrap();

        let mut peak = 0.0f32;
        for block in 0..16 {
            let mut buf = vec![0.0; BLOCK_SIZE];
            if block == 0 {
                buf[0] = 1.0;
            }
            core.process(&mut [&mut buf[..]]);
            peak = buf.iter().fold(peak, |m, s| m.max(s.abs()));
        }
        assert!(peak <= 1.0 + 1e-4, "gain {gain}: peak {peak}");
    }
}

#[test]
fn test_signal_integrity_odd_blocks() {
    let mut core = ConvolutionCore::new(2.0);
    core.prepare(SAMPLE_RATE, 480, 2).unwrap();
    core.load_impulse_response(generate_ir(48000, SAMPLE_RATE), true, true)
        .unwrap();

    let sine = generate_sine(48000, 440.0);
    let mut offset = 0;
    for &n in [480usize, 13, 1, 479, 200].iter().cycle() {
        if offset + n > sine.len() {
            break;
        }
        let mut left = sine[offset..offset + n].to_vec();
        let mut right = left.clone();
        core.process(&mut [&mut left[..], &mut right[..]]);
        assert!(is_valid_signal(&left));
        assert!(is_valid_signal(&right));
        offset += n;
    }
    assert_eq!(core.numeric_faults(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESAMPLER
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_resample_roundtrip_length() {
    let source = generate_ir(4800, 48000.0);
    let down = resample(&source, 44100.0).unwrap();
    let up = resample(&down, 48000.0).unwrap();
    assert_eq!(down.num_samples(), resampled_length(4800, 48000.0, 44100.0));
    assert!(up.num_samples().abs_diff(4800) <= 1);
    assert_eq!(up.sample_rate(), 48000.0);
}

#[test]
fn test_resampled_ir_passes_self_test() {
    let ir = generate_ir(4410, 44100.0);
    let resampled = resample(&ir, SAMPLE_RATE).unwrap();
    let report = SelfTest::new(SAMPLE_RATE, BLOCK_SIZE, 2, 8)
        .run(&resampled, true)
        .unwrap();
    assert_eq!(report.verdict, Verdict::Healthy);
}
