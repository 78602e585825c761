//! Engine Integration Tests
//!
//! Drives the engine the way an audio host does: prepare, then blocks,
//! with loads issued from the control handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use can_core::SampleBuffer;
use can_engine::{
    ConvolutionEngine, EngineConfig, EngineError, EngineHandle, IrDecoder, IrSource, LoadOutcome,
    SelfTestPolicy,
};
use can_file::{BitDepth, FileError, FileResult, write_wav};

const SAMPLE_RATE: f64 = 48000.0;
const BLOCK_SIZE: usize = 512;

/// In-memory decoder: every name maps to a spike of a distinct gain
struct MapDecoder {
    rate: f64,
    decodes: AtomicUsize,
}

impl MapDecoder {
    fn new(rate: f64) -> Arc<Self> {
        Arc::new(Self {
            rate,
            decodes: AtomicUsize::new(0),
        })
    }

    fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl IrDecoder for MapDecoder {
    fn decode(&self, source: &IrSource) -> FileResult<SampleBuffer> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        let samples = match source.to_string().as_str() {
            "a.wav" => vec![0.5],
            "b.wav" => vec![-0.25],
            "silent.wav" => vec![0.0; 256],
            "long.wav" => decaying(4800),
            other => return Err(FileError::NotFound(other.to_string())),
        };
        Ok(SampleBuffer::mono(samples, self.rate)?)
    }
}

fn decaying(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| ((i as f32) * 0.61).sin() * (-(i as f32) / (len as f32 / 4.0)).exp())
        .collect()
}

fn raw_config() -> EngineConfig {
    EngineConfig {
        normalize: false,
        self_test: SelfTestPolicy::Off,
        max_ir_seconds: 1.0,
        ..Default::default()
    }
}

fn setup(config: EngineConfig, decoder: Arc<MapDecoder>) -> (ConvolutionEngine, EngineHandle) {
    let (mut engine, handle) = ConvolutionEngine::with_decoder(config, decoder).unwrap();
    engine.prepare(SAMPLE_RATE, BLOCK_SIZE).unwrap();
    (engine, handle)
}

fn noise(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as f32 / u32::MAX as f32 * 2.0 - 1.0
        })
        .collect()
}

fn process_stereo(engine: &mut ConvolutionEngine, left: &mut [f32], right: &mut [f32]) {
    engine.process(&mut [left, right]);
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASSTHROUGH
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_no_ir_passthrough_bit_exact() {
    let (mut engine, _handle) = setup(raw_config(), MapDecoder::new(SAMPLE_RATE));
    for seed in 1..20 {
        let input = noise(BLOCK_SIZE, seed);
        let (mut l, mut r) = (input.clone(), input.clone());
        process_stereo(&mut engine, &mut l, &mut r);
        assert_eq!(l, input);
        assert_eq!(r, input);
    }
}

#[test]
fn test_process_before_prepare_passthrough() {
    let (mut engine, handle) =
        ConvolutionEngine::with_decoder(raw_config(), MapDecoder::new(SAMPLE_RATE)).unwrap();
    let input = noise(256, 7);
    let (mut l, mut r) = (input.clone(), input.clone());
    process_stereo(&mut engine, &mut l, &mut r);
    assert_eq!(l, input);
    assert!(!engine.is_prepared());
    assert_eq!(handle.diagnostics().callbacks, 1);
}

#[test]
fn test_bypass_bit_exact_with_ir() {
    let (mut engine, handle) = setup(raw_config(), MapDecoder::new(SAMPLE_RATE));
    handle.request_load(IrSource::file("long.wav")).unwrap();
    handle.set_bypass(true);

    // Odd block sizes up to the declared maximum
    for (seed, len) in [(3, 512), (4, 17), (5, 1), (6, 300)] {
        let input = noise(len, seed);
        let (mut l, mut r) = (input.clone(), input.clone());
        process_stereo(&mut engine, &mut l, &mut r);
        assert_eq!(l, input);
        assert_eq!(r, input);
    }
    assert!(handle.is_ir_loaded());
    assert!(handle.is_bypassed());
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDOFF
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_latest_wins() {
    let (mut engine, handle) = setup(raw_config(), MapDecoder::new(SAMPLE_RATE));
    assert_eq!(handle.load_file("a.wav").unwrap(), LoadOutcome::Queued);
    assert_eq!(handle.load_file("b.wav").unwrap(), LoadOutcome::Queued);

    let (mut l, mut r) = (vec![1.0; BLOCK_SIZE], vec![1.0; BLOCK_SIZE]);
    process_stereo(&mut engine, &mut l, &mut r);

    // Only B (gain -0.25) is ever heard
    assert!(l.iter().all(|&s| (s + 0.25).abs() < 1e-5));
    assert_eq!(handle.diagnostics().installs, 1);
}

#[test]
fn test_load_from_another_thread() {
    let (mut engine, handle) = setup(raw_config(), MapDecoder::new(SAMPLE_RATE));

    let loader = {
        let handle = handle.clone();
        std::thread::spawn(move || handle.load_file("a.wav").unwrap())
    };
    assert_eq!(loader.join().unwrap(), LoadOutcome::Queued);

    let mut installed = false;
    for _ in 0..4 {
        let (mut l, mut r) = (vec![1.0; 64], vec![1.0; 64]);
        process_stereo(&mut engine, &mut l, &mut r);
        installed |= (l[0] - 0.5).abs() < 1e-5;
    }
    assert!(installed);
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOAD PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_redundant_load_decoded_once() {
    let decoder = MapDecoder::new(SAMPLE_RATE);
    let (mut engine, handle) = setup(raw_config(), decoder.clone());

    assert_eq!(handle.load_file("long.wav").unwrap(), LoadOutcome::Queued);
    let (mut l, mut r) = (vec![0.0; 64], vec![0.0; 64]);
    process_stereo(&mut engine, &mut l, &mut r);
    assert_eq!(handle.load_file("long.wav").unwrap(), LoadOutcome::Skipped);

    assert_eq!(decoder.decodes(), 1);
}

#[test]
fn test_rate_mismatch_without_resample_still_loads() {
    let decoder = MapDecoder::new(44100.0);
    let config = EngineConfig {
        resample_ir_on_load: false,
        ..raw_config()
    };
    let (mut engine, handle) = setup(config, decoder);

    handle.load_file("long.wav").unwrap();
    let (mut l, mut r) = (vec![0.0; BLOCK_SIZE], vec![0.0; BLOCK_SIZE]);
    l[0] = 1.0;
    r[0] = 1.0;
    process_stereo(&mut engine, &mut l, &mut r);

    assert!(handle.is_ir_loaded());
    // Played at the source length, not stretched
    let expected = decaying(4800);
    assert!((l[10] - expected[10]).abs() < 1e-4);
}

#[test]
fn test_rate_mismatch_resampled() {
    let decoder = MapDecoder::new(24000.0);
    let (mut engine, handle) = setup(raw_config(), decoder);
    handle.load_file("a.wav").unwrap();

    let (mut l, mut r) = (vec![0.0; 8], vec![0.0; 8]);
    l[0] = 1.0;
    r[0] = 1.0;
    process_stereo(&mut engine, &mut l, &mut r);
    assert!(handle.is_ir_loaded());
    // One sample at 24 kHz becomes two at 48 kHz
    assert!((l[0] - 0.5).abs() < 1e-4);
}

#[test]
fn test_decode_failure_keeps_previous_ir() {
    let (mut engine, handle) = setup(raw_config(), MapDecoder::new(SAMPLE_RATE));
    handle.load_file("a.wav").unwrap();

    let err = handle.load_file("missing.wav").unwrap_err();
    assert!(matches!(err, EngineError::Decode(_)));

    let (mut l, mut r) = (vec![1.0; 64], vec![1.0; 64]);
    process_stereo(&mut engine, &mut l, &mut r);
    assert!((l[0] - 0.5).abs() < 1e-5);
    assert_eq!(handle.current_source(), Some(IrSource::file("a.wav")));
}

#[test]
fn test_self_test_reject_silent() {
    let config = EngineConfig {
        self_test: SelfTestPolicy::Reject,
        ..raw_config()
    };
    let (_engine, handle) = setup(config, MapDecoder::new(SAMPLE_RATE));

    assert!(matches!(
        handle.load_file("silent.wav"),
        Err(EngineError::SelfTestRejected(_))
    ));
    assert!(handle.last_self_test().unwrap().is_silent());
    assert!(handle.current_source().is_none());
}

#[test]
fn test_self_test_diagnostic_only() {
    let config = EngineConfig {
        self_test: SelfTestPolicy::Diagnostic,
        ..raw_config()
    };
    let (mut engine, handle) = setup(config, MapDecoder::new(SAMPLE_RATE));

    assert_eq!(handle.load_file("silent.wav").unwrap(), LoadOutcome::Queued);
    assert!(handle.last_self_test().unwrap().is_silent());

    handle.load_file("long.wav").unwrap();
    let report = handle.last_self_test().unwrap();
    assert_eq!(report.verdict, can_dsp::Verdict::Healthy);

    let (mut l, mut r) = (vec![0.0; 64], vec![0.0; 64]);
    process_stereo(&mut engine, &mut l, &mut r);
    assert!(handle.is_ir_loaded());
}

// ═══════════════════════════════════════════════════════════════════════════════
// PREPARE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_idempotent_prepare() {
    let decoder = MapDecoder::new(SAMPLE_RATE);
    let (mut engine, handle) = setup(raw_config(), decoder.clone());
    handle.load_file("a.wav").unwrap();

    let input = noise(BLOCK_SIZE, 11);
    let (mut l1, mut r1) = (input.clone(), input.clone());
    process_stereo(&mut engine, &mut l1, &mut r1);

    engine.prepare(SAMPLE_RATE, BLOCK_SIZE).unwrap();
    engine.prepare(SAMPLE_RATE, BLOCK_SIZE).unwrap();

    let snapshot = handle.diagnostics();
    assert_eq!(snapshot.prepare_calls, 3);
    assert_eq!(snapshot.workspace_rebuilds, 1);
    assert_eq!(decoder.decodes(), 1);
    assert!(handle.is_ir_loaded());

    let (mut l2, mut r2) = (input.clone(), input.clone());
    process_stereo(&mut engine, &mut l2, &mut r2);
    for (a, b) in l2.iter().zip(&input) {
        assert!((a - 0.5 * b).abs() < 1e-5);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_mono_broadcast_scenario() {
    let config = EngineConfig {
        normalize: true,
        ..raw_config()
    };
    let (mut engine, handle) = setup(config, MapDecoder::new(SAMPLE_RATE));
    handle.load_file("long.wav").unwrap();

    let mut peak = 0.0f32;
    for block in 0..4800usize.div_ceil(BLOCK_SIZE) {
        let (mut l, mut r) = (vec![0.0; BLOCK_SIZE], vec![0.0; BLOCK_SIZE]);
        if block == 0 {
            l[0] = 1.0;
            r[0] = 1.0;
        }
        process_stereo(&mut engine, &mut l, &mut r);
        assert_eq!(l, r);
        peak = l.iter().fold(peak, |m, s| m.max(s.abs()));
    }
    // Normalisation keeps the impulse response bounded
    assert!(peak <= 1.0 + 1e-4);
    assert!(peak > 0.0);
}

#[test]
fn test_wav_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("can.wav");
    let ir = SampleBuffer::stereo(vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0], 44100.0).unwrap();
    write_wav(&path, &ir, BitDepth::Float32).unwrap();

    let (mut engine, handle) = ConvolutionEngine::new(EngineConfig {
        max_ir_seconds: 1.0,
        ..Default::default()
    })
    .unwrap();
    engine.prepare(44100.0, 256).unwrap();
    assert_eq!(handle.load_file(&path).unwrap(), LoadOutcome::Queued);

    let (mut l, mut r) = (vec![0.0; 256], vec![0.0; 256]);
    l[0] = 1.0;
    r[0] = 1.0;
    process_stereo(&mut engine, &mut l, &mut r);

    // Left: delta, right: one-sample delay; both unit energy so gain stays 1
    assert!((l[0] - 1.0).abs() < 1e-4);
    assert!(r[0].abs() < 1e-4);
    assert!((r[1] - 1.0).abs() < 1e-4);

    let snapshot = handle.diagnostics();
    assert!(snapshot.ir_loaded);
    assert!(snapshot.output_rms > 0.0);
    assert!(handle.last_self_test().is_some());
}

#[test]
fn test_embedded_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("factory.wav");
    write_wav(&path, &SampleBuffer::mono(decaying(1000), 48000.0).unwrap(), BitDepth::Int24).unwrap();
    let bytes = std::fs::read(&path).unwrap();

    let (mut engine, handle) = ConvolutionEngine::new(EngineConfig::default()).unwrap();
    engine.prepare(SAMPLE_RATE, BLOCK_SIZE).unwrap();

    let source = IrSource::embedded("factory", bytes);
    assert_eq!(handle.request_load(source.clone()).unwrap(), LoadOutcome::Queued);
    assert_eq!(handle.request_load(source).unwrap(), LoadOutcome::Skipped);
}

#[test]
fn test_numeric_fault_zeroes_block_and_recovers() {
    let (mut engine, handle) = setup(raw_config(), MapDecoder::new(SAMPLE_RATE));
    handle.load_file("long.wav").unwrap();

    let mut left = noise(BLOCK_SIZE, 11);
    let mut right = noise(BLOCK_SIZE, 12);
    process_stereo(&mut engine, &mut left, &mut right);
    assert_eq!(handle.diagnostics().numeric_faults, 0);

    let mut left = noise(BLOCK_SIZE, 13);
    let mut right = noise(BLOCK_SIZE, 14);
    left[5] = f32::NAN;
    process_stereo(&mut engine, &mut left, &mut right);
    assert!(left.iter().all(|&s| s == 0.0));
    assert!(right.iter().all(|&s| s == 0.0));
    assert_eq!(handle.diagnostics().numeric_faults, 1);

    let mut left = noise(BLOCK_SIZE, 15);
    let mut right = noise(BLOCK_SIZE, 16);
    process_stereo(&mut engine, &mut left, &mut right);
    assert!(left.iter().chain(right.iter()).all(|s| s.is_finite()));
    assert!(left.iter().any(|&s| s != 0.0));
    assert_eq!(handle.diagnostics().numeric_faults, 1);
}

#[test]
fn test_mono_blocks_on_stereo_engine_keep_channels_in_step() {
    let config = EngineConfig {
        normalize: true,
        ..raw_config()
    };
    let (mut engine, handle) = ConvolutionEngine::with_decoder(config, MapDecoder::new(SAMPLE_RATE)).unwrap();
    engine.prepare(SAMPLE_RATE, 128).unwrap();
    handle.load_file("long.wav").unwrap();

    for _ in 0..3 {
        let (mut left, mut right) = (vec![1.0; 128], vec![1.0; 128]);
        process_stereo(&mut engine, &mut left, &mut right);
    }
    // Well past the IR length
    for _ in 0..60 {
        let mut mono = vec![0.0; 128];
        engine.process(&mut [&mut mono[..]]);
    }

    let (mut left, mut right) = (vec![0.0; 128], vec![0.0; 128]);
    process_stereo(&mut engine, &mut left, &mut right);
    assert!(left.iter().all(|s| s.abs() < 1e-4));
    assert!(right.iter().all(|s| s.abs() < 1e-4));
}
