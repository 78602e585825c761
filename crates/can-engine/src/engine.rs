//! Convolution Engine
//!
//! Split into two halves sharing one [`EngineShared`]:
//! - [`ConvolutionEngine`]: audio side. Owns the convolution core, prepares
//!   it and processes blocks. `process` never blocks, allocates or logs.
//! - [`EngineHandle`]: control side (Clone + Send + Sync). Loads IRs, flips
//!   flags and reads diagnostics.
//!
//! Load pipeline (control thread): decode → resample to device rate →
//! self-test → partition + FFT → queue into the handoff. The audio thread
//! picks the result up at the start of a later `process` call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use can_core::{Sample, SampleBuffer, block_rms, rates_match};
use can_dsp::{ConvolutionCore, PartitionLayout, PreparedIr, SelfTest, SelfTestReport, Verdict, resample};
use parking_lot::Mutex;

use crate::config::{EngineConfig, SelfTestPolicy};
use crate::decoder::{FileDecoder, IrDecoder, IrSource};
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::handoff::{Drain, IrHandoff};
use crate::tone::{TEST_TONE_FREQUENCY, TestTone};
use crate::{EngineError, EngineResult};

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// What `request_load` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Engine not prepared yet; the request runs on the next `prepare`
    Deferred,
    /// Same source as the current IR; nothing decoded
    Skipped,
    /// Decoded and handed to the audio thread
    Queued,
}

/// Rate and block size the workspace was last built for
#[derive(Debug, Clone, Copy, PartialEq)]
struct PreparedFormat {
    sample_rate: f64,
    block_size: usize,
    layout: PartitionLayout,
}

/// Control-side bookkeeping, serialised by one mutex the audio thread never touches
#[derive(Debug, Default)]
struct LoaderState {
    prepared: Option<PreparedFormat>,
    /// Source of the IR queued or installed under the current preparation
    current: Option<IrSource>,
    /// Request captured before the first `prepare`
    deferred: Option<IrSource>,
    last_self_test: Option<SelfTestReport>,
    self_test: SelfTestPolicy,
}

struct EngineShared {
    config: EngineConfig,
    decoder: Arc<dyn IrDecoder>,
    handoff: IrHandoff<PreparedIr>,
    bypass: AtomicBool,
    resample_ir_on_load: AtomicBool,
    test_tone: AtomicBool,
    ir_loaded: AtomicBool,
    diagnostics: Diagnostics,
    loader: Mutex<LoaderState>,
}

impl EngineShared {
    /// Run the load pipeline under the loader lock
    fn load(&self, loader: &mut LoaderState, source: IrSource) -> EngineResult<LoadOutcome> {
        let Some(format) = loader.prepared else {
            log::info!("[Engine] Not prepared, deferring load of {}", source);
            loader.deferred = Some(source);
            return Ok(LoadOutcome::Deferred);
        };

        if loader.current.as_ref() == Some(&source) {
            log::debug!("[Engine] {} already loaded, skipping", source);
            return Ok(LoadOutcome::Skipped);
        }

        let mut buffer = self.decoder.decode(&source)?;

        if !rates_match(buffer.sample_rate(), format.sample_rate) {
            if self.resample_ir_on_load.load(Ordering::Relaxed) {
                log::info!(
                    "[IR] Resampling {} from {} Hz to {} Hz",
                    source,
                    buffer.sample_rate(),
                    format.sample_rate
                );
                buffer = resample(&buffer, format.sample_rate)?;
            } else {
                log::warn!(
                    "[IR] {} is {} Hz but device runs at {} Hz; resampling disabled, playing as-is",
                    source,
                    buffer.sample_rate(),
                    format.sample_rate
                );
            }
        }

        self.run_self_test(loader, &format, &buffer, &source)?;

        let stereo = self.config.channels == 2;
        let ir = PreparedIr::build(buffer, format.layout, stereo, self.config.normalize)?;
        log::info!(
            "[IR] Queued {} ({} ch, {} samples, {} partitions, gain {:.4})",
            source,
            ir.num_channels(),
            ir.len(),
            ir.num_segments(),
            ir.gain()
        );

        if self.handoff.queue(ir) {
            log::debug!("[Engine] Superseded an IR that was never installed");
        }
        loader.current = Some(source);
        Ok(LoadOutcome::Queued)
    }

    fn run_self_test(
        &self,
        loader: &mut LoaderState,
        format: &PreparedFormat,
        candidate: &SampleBuffer,
        source: &IrSource,
    ) -> EngineResult<()> {
        if loader.self_test == SelfTestPolicy::Off {
            return Ok(());
        }

        let report = SelfTest::new(
            format.sample_rate,
            format.block_size,
            self.config.channels,
            self.config.self_test_blocks,
        )
        .with_max_ir_seconds(self.config.max_ir_seconds)
        .run(candidate, self.config.normalize)?;

        match report.verdict {
            Verdict::Healthy => log::info!(
                "[SelfTest] {}: decay over {} of {} blocks",
                source,
                report.active_blocks(),
                report.block_rms.len()
            ),
            Verdict::NoTail => log::warn!("[SelfTest] {}: no tail beyond the first block", source),
            Verdict::Silent => log::warn!("[SelfTest] {}: IR produces no output", source),
        }

        let silent = report.is_silent();
        loader.last_self_test = Some(report);

        if silent && loader.self_test == SelfTestPolicy::Reject {
            return Err(EngineError::SelfTestRejected(format!("{source} is silent")));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO SIDE
// ═══════════════════════════════════════════════════════════════════════════════

/// Audio-thread half of the engine
pub struct ConvolutionEngine {
    shared: Arc<EngineShared>,
    core: ConvolutionCore,
    tone: TestTone,
    /// Deinterleave workspace for `process_interleaved`
    planes: Vec<Vec<Sample>>,
}

impl ConvolutionEngine {
    /// Create an engine with the default file decoder
    pub fn new(config: EngineConfig) -> EngineResult<(Self, EngineHandle)> {
        Self::with_decoder(config, Arc::new(FileDecoder))
    }

    /// Create an engine with a custom decoding collaborator
    pub fn with_decoder(
        config: EngineConfig,
        decoder: Arc<dyn IrDecoder>,
    ) -> EngineResult<(Self, EngineHandle)> {
        config.validate()?;

        let shared = Arc::new(EngineShared {
            decoder,
            handoff: IrHandoff::new(),
            bypass: AtomicBool::new(config.bypass),
            resample_ir_on_load: AtomicBool::new(config.resample_ir_on_load),
            test_tone: AtomicBool::new(config.test_tone),
            ir_loaded: AtomicBool::new(false),
            diagnostics: Diagnostics::default(),
            loader: Mutex::new(LoaderState {
                self_test: config.self_test,
                ..Default::default()
            }),
            config,
        });

        let engine = Self {
            core: ConvolutionCore::new(shared.config.max_ir_seconds),
            tone: TestTone::default(),
            planes: Vec::new(),
            shared: Arc::clone(&shared),
        };
        Ok((engine, EngineHandle { shared }))
    }

    /// Build (or re-affirm) the workspace for a device rate and maximum block size.
    ///
    /// Not real-time safe. Identical parameters are a no-op. A change rebuilds
    /// the workspace, then runs the deferred request if there is one, or
    /// reloads the previous source for the new rate.
    pub fn prepare(&mut self, sample_rate: f64, block_size: usize) -> EngineResult<()> {
        let shared = Arc::clone(&self.shared);
        Diagnostics::bump(&shared.diagnostics.prepare_calls);

        let rebuilds_before = self.core.workspace_allocations();
        self.core
            .prepare(sample_rate, block_size, shared.config.channels)?;
        if self.core.workspace_allocations() == rebuilds_before {
            log::debug!("[Engine] prepare({}, {}) unchanged", sample_rate, block_size);
            return Ok(());
        }

        Diagnostics::bump(&shared.diagnostics.workspace_rebuilds);
        shared.ir_loaded.store(false, Ordering::Relaxed);
        // Anything queued was partitioned for the old layout
        shared.handoff.clear();

        self.tone.set_sample_rate(sample_rate);
        self.planes = vec![vec![0.0; block_size]; shared.config.channels];

        let layout = self.core.layout().ok_or(EngineError::Dsp(can_dsp::DspError::NotPrepared))?;
        log::info!(
            "[Engine] Prepared {} Hz, block {}, partition {}, {} ch",
            sample_rate,
            block_size,
            layout.partition_size,
            shared.config.channels
        );

        shared.diagnostics.set_prepared(sample_rate, block_size);
        let mut loader = shared.loader.lock();
        loader.prepared = Some(PreparedFormat {
            sample_rate,
            block_size,
            layout,
        });

        let previous = loader.current.take();
        let pending = loader.deferred.take().or(previous);
        if let Some(source) = pending {
            if let Err(e) = shared.load(&mut loader, source) {
                log::warn!("[Engine] Load after prepare failed: {}", e);
            }
        }
        drop(loader);

        // Still off the audio thread: install right away
        self.drain_handoff();
        Ok(())
    }

    /// Process one block of planar audio in place (real-time safe)
    pub fn process(&mut self, block: &mut [&mut [Sample]]) {
        let shared = &*self.shared;
        Diagnostics::bump(&shared.diagnostics.callbacks);

        drain(&shared.handoff, &mut self.core, shared);

        if shared.test_tone.load(Ordering::Relaxed) {
            self.tone.fill(block);
        }

        let input_rms = max_rms(block);
        shared.diagnostics.input_rms.store(input_rms);

        if shared.bypass.load(Ordering::Relaxed) || !self.core.has_ir() {
            shared.diagnostics.wet_rms.store(input_rms);
            shared.diagnostics.output_rms.store(input_rms);
            return;
        }

        self.core.process(block);

        let wet = max_rms(block);
        shared.diagnostics.wet_rms.store(wet);
        shared.diagnostics.output_rms.store(wet);
        shared
            .diagnostics
            .numeric_faults
            .store(self.core.numeric_faults(), Ordering::Relaxed);
    }

    /// Process interleaved audio in place (real-time safe after `prepare`).
    ///
    /// Interleaved channels beyond the engine's channel count pass through.
    pub fn process_interleaved(&mut self, data: &mut [Sample], channels: usize) {
        if channels == 0 || self.planes.is_empty() {
            return;
        }

        let mut planes = std::mem::take(&mut self.planes);
        let active = channels.min(planes.len());
        let chunk_frames = planes[0].len();

        for chunk in data.chunks_mut(chunk_frames * channels) {
            let frames = chunk.len() / channels;

            for (ch, plane) in planes.iter_mut().take(active).enumerate() {
                for (i, sample) in plane[..frames].iter_mut().enumerate() {
                    *sample = chunk[i * channels + ch];
                }
            }

            match &mut planes[..active] {
                [mono] => self.process(&mut [&mut mono[..frames]]),
                [left, right] => self.process(&mut [&mut left[..frames], &mut right[..frames]]),
                _ => {}
            }

            for (ch, plane) in planes.iter().take(active).enumerate() {
                for (i, &sample) in plane[..frames].iter().enumerate() {
                    chunk[i * channels + ch] = sample;
                }
            }
        }

        self.planes = planes;
    }

    /// Install any pending IR now (control side, e.g. before the stream starts)
    pub fn drain_handoff(&mut self) -> Drain {
        let shared = Arc::clone(&self.shared);
        drain(&shared.handoff, &mut self.core, &shared)
    }

    pub fn is_prepared(&self) -> bool {
        self.core.is_prepared()
    }

    /// Control handle for this engine
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Non-blocking install of whatever the loader queued
#[inline]
fn drain(handoff: &IrHandoff<PreparedIr>, core: &mut ConvolutionCore, shared: &EngineShared) -> Drain {
    handoff.try_consume(|ir| match core.install(ir) {
        Ok(previous) => {
            Diagnostics::bump(&shared.diagnostics.installs);
            shared.ir_loaded.store(true, Ordering::Relaxed);
            previous
        }
        Err(refused) => {
            Diagnostics::bump(&shared.diagnostics.refused_installs);
            Some(refused)
        }
    })
}

#[inline]
fn max_rms(block: &[&mut [Sample]]) -> f32 {
    block.iter().map(|c| block_rms(c)).fold(0.0, f32::max)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROL SIDE
// ═══════════════════════════════════════════════════════════════════════════════

/// Control-thread handle (UI, file loading, metering)
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl EngineHandle {
    /// Load an IR. Blocks while decoding, resampling and self-testing.
    ///
    /// On error the previously active IR stays in effect.
    pub fn request_load(&self, source: IrSource) -> EngineResult<LoadOutcome> {
        let mut loader = self.shared.loader.lock();
        self.shared.load(&mut loader, source)
    }

    /// Load an IR file from disk
    pub fn load_file<P: Into<std::path::PathBuf>>(&self, path: P) -> EngineResult<LoadOutcome> {
        self.request_load(IrSource::file(path))
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.shared.bypass.store(bypass, Ordering::Relaxed);
        log::info!("[Engine] Bypass {}", if bypass { "on" } else { "off" });
    }

    pub fn set_resample_ir_on_load(&self, enabled: bool) {
        self.shared.resample_ir_on_load.store(enabled, Ordering::Relaxed);
    }

    pub fn set_test_tone(&self, enabled: bool) {
        self.shared.test_tone.store(enabled, Ordering::Relaxed);
        if enabled {
            log::info!("[Engine] Test tone on ({} Hz)", TEST_TONE_FREQUENCY);
        }
    }

    pub fn set_self_test_policy(&self, policy: SelfTestPolicy) {
        self.shared.loader.lock().self_test = policy;
    }

    pub fn is_ir_loaded(&self) -> bool {
        self.shared.ir_loaded.load(Ordering::Relaxed)
    }

    pub fn is_bypassed(&self) -> bool {
        self.shared.bypass.load(Ordering::Relaxed)
    }

    pub fn is_resample_ir_on_load(&self) -> bool {
        self.shared.resample_ir_on_load.load(Ordering::Relaxed)
    }

    pub fn is_test_tone(&self) -> bool {
        self.shared.test_tone.load(Ordering::Relaxed)
    }

    /// Source of the IR queued or installed under the current preparation
    pub fn current_source(&self) -> Option<IrSource> {
        self.shared.loader.lock().current.clone()
    }

    pub fn has_deferred_load(&self) -> bool {
        self.shared.loader.lock().deferred.is_some()
    }

    pub fn last_self_test(&self) -> Option<SelfTestReport> {
        self.shared.loader.lock().last_self_test.clone()
    }

    /// Free an IR the audio thread displaced (also happens on the next load)
    pub fn collect_garbage(&self) -> bool {
        self.shared.handoff.collect_garbage()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        let d = &self.shared.diagnostics;
        let prepared = d.prepared();
        DiagnosticsSnapshot {
            ir_loaded: self.is_ir_loaded(),
            bypassed: self.is_bypassed(),
            test_tone: self.is_test_tone(),
            prepared_sample_rate: prepared.map(|(rate, _)| rate),
            prepared_block_size: prepared.map(|(_, block)| block),
            callbacks: d.callbacks.load(Ordering::Relaxed),
            prepare_calls: d.prepare_calls.load(Ordering::Relaxed),
            workspace_rebuilds: d.workspace_rebuilds.load(Ordering::Relaxed),
            installs: d.installs.load(Ordering::Relaxed),
            refused_installs: d.refused_installs.load(Ordering::Relaxed),
            contended_drains: self.shared.handoff.contended_count(),
            numeric_faults: d.numeric_faults.load(Ordering::Relaxed),
            input_rms: d.input_rms.load(),
            wet_rms: d.wet_rms.load(),
            output_rms: d.output_rms.load(),
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("ir_loaded", &self.is_ir_loaded())
            .field("bypassed", &self.is_bypassed())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
