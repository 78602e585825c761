//! Partitioned Convolution Core
//!
//! Uniformly partitioned overlap-add convolution:
//! - RealFFT for 2x efficiency over complex FFT
//! - Frequency-domain delay line (FDL) holding past input segments
//! - Zero added latency: the partially filled input segment is transformed
//!   on every call, so any host block length up to the prepared maximum works
//! - IR preparation (normalisation, partitioning, FFT) happens off the audio
//!   thread in [`PreparedIr::build`]; installing the result never allocates

use std::sync::Arc;

use can_core::{Sample, SampleBuffer};
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use crate::{DspError, DspResult, Processor};

// ============ Constants ============

/// Minimum partition size
const MIN_PARTITION_SIZE: usize = 64;

/// Maximum partition size
const MAX_PARTITION_SIZE: usize = 8192;

/// Default upper bound for IR length used to size the workspace
pub const DEFAULT_MAX_IR_SECONDS: f64 = 10.0;

/// IRs with less total energy than this are left unnormalised
const NORMALIZE_ENERGY_FLOOR: f64 = 1e-20;

const ZERO: Complex<f32> = Complex { re: 0.0, im: 0.0 };

// ============ Partition Layout ============

/// Workspace geometry shared by the core and every IR built for it.
///
/// An IR is only installable into a core prepared with an identical layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionLayout {
    /// Samples per partition (power of two)
    pub partition_size: usize,
    /// FDL capacity in partitions (longest installable IR)
    pub max_segments: usize,
    /// Sample rate the workspace was prepared for
    pub sample_rate: f64,
}

impl PartitionLayout {
    /// Derive a layout for a host block size and a maximum IR length in seconds
    pub fn new(sample_rate: f64, block_size: usize, max_ir_seconds: f64) -> Self {
        let partition_size = block_size
            .max(1)
            .next_power_of_two()
            .clamp(MIN_PARTITION_SIZE, MAX_PARTITION_SIZE);
        let max_ir_samples = (max_ir_seconds.max(0.0) * sample_rate).ceil() as usize;
        let max_segments = max_ir_samples.div_ceil(partition_size).max(1);

        Self {
            partition_size,
            max_segments,
            sample_rate,
        }
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.partition_size * 2
    }

    #[inline]
    pub fn spectrum_len(&self) -> usize {
        self.partition_size + 1
    }

    /// Longest IR (in samples) the workspace can hold
    #[inline]
    pub fn max_ir_samples(&self) -> usize {
        self.partition_size * self.max_segments
    }
}

// ============ Prepared IR ============

/// Impulse response partitioned and transformed for one [`PartitionLayout`].
///
/// This is the artifact handed from the loader thread to the audio thread.
pub struct PreparedIr {
    layout: PartitionLayout,
    /// Spectra indexed `[channel][segment]`, pre-scaled by `1 / fft_size`
    segments: Vec<Vec<Vec<Complex<f32>>>>,
    source_rate: f64,
    length: usize,
    truncated_from: Option<usize>,
    gain: f32,
}

impl PreparedIr {
    /// Normalise, partition and transform an impulse response.
    ///
    /// Takes ownership of `buffer`. When `stereo` is false (or the buffer is
    /// mono) only the first channel is used and it is later broadcast to every
    /// live channel. IRs longer than the layout allows are truncated.
    pub fn build(
        buffer: SampleBuffer,
        layout: PartitionLayout,
        stereo: bool,
        normalize: bool,
    ) -> DspResult<Self> {
        if buffer.is_empty() {
            return Err(DspError::EmptyImpulse);
        }
        if buffer.channels().any(|c| c.iter().any(|s| !s.is_finite())) {
            return Err(DspError::NonFiniteImpulse);
        }

        let source_rate = buffer.sample_rate();
        let mut buffer = buffer;

        let original_len = buffer.num_samples();
        let truncated_from = if original_len > layout.max_ir_samples() {
            log::warn!(
                "[IR] Truncating impulse response from {} to {} samples",
                original_len,
                layout.max_ir_samples()
            );
            buffer.truncate(layout.max_ir_samples());
            Some(original_len)
        } else {
            None
        };

        let gain = if normalize {
            normalization_gain(&buffer)
        } else {
            1.0
        };

        let use_stereo = stereo && buffer.num_channels() == 2;
        let length = buffer.num_samples();
        let num_segments = length.div_ceil(layout.partition_size).max(1);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(layout.fft_size());
        let mut scratch = fft.make_scratch_vec();
        let mut padded = vec![0.0; layout.fft_size()];

        // Fold the inverse FFT normalisation into the IR spectra
        let scale = gain / layout.fft_size() as f32;

        let channel_count = if use_stereo { 2 } else { 1 };
        let mut segments = Vec::with_capacity(channel_count);

        for ir in buffer.channels().take(channel_count) {
            let mut channel_segments = Vec::with_capacity(num_segments);
            for seg in 0..num_segments {
                let start = seg * layout.partition_size;
                let end = (start + layout.partition_size).min(ir.len());

                padded.fill(0.0);
                padded[..end - start].copy_from_slice(&ir[start..end]);

                let mut spectrum = vec![ZERO; layout.spectrum_len()];
                fft.process_with_scratch(&mut padded, &mut spectrum, &mut scratch)
                    .map_err(|e| DspError::InvalidConfig(e.to_string()))?;
                for bin in spectrum.iter_mut() {
                    *bin *= scale;
                }
                channel_segments.push(spectrum);
            }
            segments.push(channel_segments);
        }

        Ok(Self {
            layout,
            segments,
            source_rate,
            length,
            truncated_from,
            gain,
        })
    }

    #[inline]
    pub fn layout(&self) -> PartitionLayout {
        self.layout
    }

    /// Number of IR channels (1 = broadcast to all live channels)
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn num_segments(&self) -> usize {
        self.segments.first().map(Vec::len).unwrap_or(0)
    }

    /// Rate the IR samples were recorded (or resampled) at
    #[inline]
    pub fn source_rate(&self) -> f64 {
        self.source_rate
    }

    /// IR length in samples after any truncation
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Original length if the IR had to be shortened to fit the workspace
    #[inline]
    pub fn truncated_from(&self) -> Option<usize> {
        self.truncated_from
    }

    /// Linear gain applied by normalisation (1.0 when disabled)
    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl std::fmt::Debug for PreparedIr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedIr")
            .field("layout", &self.layout)
            .field("channels", &self.num_channels())
            .field("segments", &self.num_segments())
            .field("source_rate", &self.source_rate)
            .field("length", &self.length)
            .field("gain", &self.gain)
            .finish()
    }
}

/// Gain that maps the loudest channel's energy to unity.
///
/// After scaling, every IR sample is bounded by 1.0, so a unit impulse can
/// never produce an output peak above 1.0.
pub fn normalization_gain(buffer: &SampleBuffer) -> f32 {
    let energy = buffer.max_channel_energy();
    if energy <= NORMALIZE_ENERGY_FLOOR {
        return 1.0;
    }
    (1.0 / energy.sqrt()) as f32
}

// ============ Convolution Channel ============

/// Per-channel convolution state
struct ConvolutionChannel {
    /// Current (partial) input segment, time domain
    input: Vec<f32>,
    /// Zero-padded FFT input (clobbered by the transform)
    fft_in: Vec<f32>,
    /// Input spectra of the current and past segments
    fdl: Vec<Vec<Complex<f32>>>,
    /// Sum of past segments x IR segments 1.., computed once per segment
    tail: Vec<Complex<f32>>,
    /// Working spectrum for the inverse transform
    spectrum: Vec<Complex<f32>>,
    /// Inverse transform output (2 x partition)
    output: Vec<f32>,
    /// Second half of the previous segment's output
    overlap: Vec<f32>,
    forward_scratch: Vec<Complex<f32>>,
    inverse_scratch: Vec<Complex<f32>>,
}

impl ConvolutionChannel {
    fn new(
        layout: &PartitionLayout,
        forward: &Arc<dyn RealToComplex<f32>>,
        inverse: &Arc<dyn ComplexToReal<f32>>,
    ) -> Self {
        let b = layout.partition_size;
        Self {
            input: vec![0.0; b],
            fft_in: vec![0.0; b * 2],
            fdl: (0..layout.max_segments)
                .map(|_| vec![ZERO; b + 1])
                .collect(),
            tail: vec![ZERO; b + 1],
            spectrum: vec![ZERO; b + 1],
            output: vec![0.0; b * 2],
            overlap: vec![0.0; b],
            forward_scratch: forward.make_scratch_vec(),
            inverse_scratch: inverse.make_scratch_vec(),
        }
    }

    /// Convolve `block` (at `pos` inside the current segment) in place
    #[allow(clippy::too_many_arguments)]
    fn process_chunk(
        &mut self,
        block: &mut [f32],
        pos: usize,
        current: usize,
        refresh_tail: bool,
        ir: &[Vec<Complex<f32>>],
        forward: &Arc<dyn RealToComplex<f32>>,
        inverse: &Arc<dyn ComplexToReal<f32>>,
    ) -> bool {
        let b = self.input.len();
        let n = block.len();
        let segments = self.fdl.len();

        self.input[pos..pos + n].copy_from_slice(block);
        self.fft_in[..b].copy_from_slice(&self.input);
        self.fft_in[b..].fill(0.0);

        if forward
            .process_with_scratch(&mut self.fft_in, &mut self.fdl[current], &mut self.forward_scratch)
            .is_err()
        {
            return false;
        }

        // Contributions of past segments only change at segment boundaries
        if refresh_tail {
            self.tail.fill(ZERO);
            for (i, h) in ir.iter().enumerate().skip(1) {
                let x = &self.fdl[(current + i) % segments];
                multiply_accumulate(&mut self.tail, x, h);
            }
        }

        self.spectrum.copy_from_slice(&self.tail);
        if let Some(h0) = ir.first() {
            multiply_accumulate(&mut self.spectrum, &self.fdl[current], h0);
        }
        self.spectrum[0].im = 0.0;
        self.spectrum[b].im = 0.0;

        if inverse
            .process_with_scratch(&mut self.spectrum, &mut self.output, &mut self.inverse_scratch)
            .is_err()
        {
            return false;
        }

        let mut finite = true;
        for (i, sample) in block.iter_mut().enumerate() {
            let y = self.output[pos + i] + self.overlap[pos + i];
            finite &= y.is_finite();
            *sample = y;
        }
        finite
    }

    /// Called once the current segment is full
    fn finish_segment(&mut self) {
        let b = self.input.len();
        self.input.fill(0.0);
        self.overlap.copy_from_slice(&self.output[b..]);
    }

    fn reset(&mut self) {
        self.input.fill(0.0);
        self.fft_in.fill(0.0);
        for slot in &mut self.fdl {
            slot.fill(ZERO);
        }
        self.tail.fill(ZERO);
        self.spectrum.fill(ZERO);
        self.output.fill(0.0);
        self.overlap.fill(0.0);
    }
}

#[inline]
fn multiply_accumulate(acc: &mut [Complex<f32>], x: &[Complex<f32>], h: &[Complex<f32>]) {
    for ((a, &x), &h) in acc.iter_mut().zip(x).zip(h) {
        *a += x * h;
    }
}

// ============ Convolution Core ============

/// Real-time convolution processor.
///
/// `prepare` and `load_impulse_response` allocate and must run off the audio
/// thread. `install` and `process` never allocate.
pub struct ConvolutionCore {
    max_ir_seconds: f64,
    layout: Option<PartitionLayout>,
    block_size: usize,
    channels: Vec<ConvolutionChannel>,
    fft_forward: Option<Arc<dyn RealToComplex<f32>>>,
    fft_inverse: Option<Arc<dyn ComplexToReal<f32>>>,
    ir: Option<PreparedIr>,
    /// Write position inside the current segment
    input_pos: usize,
    /// FDL slot of the current segment
    current_segment: usize,
    /// Set by `install` so a mid-segment swap rebuilds the tail with the new IR
    tail_stale: bool,
    /// Stand-in input (one partition) for channels a block is missing or too short on
    staging: Vec<f32>,
    workspace_allocations: u64,
    numeric_faults: u64,
}

impl ConvolutionCore {
    /// Create an unprepared core whose workspace will hold IRs up to `max_ir_seconds`
    pub fn new(max_ir_seconds: f64) -> Self {
        Self {
            max_ir_seconds,
            layout: None,
            block_size: 0,
            channels: Vec::new(),
            fft_forward: None,
            fft_inverse: None,
            ir: None,
            input_pos: 0,
            current_segment: 0,
            tail_stale: false,
            staging: Vec::new(),
            workspace_allocations: 0,
            numeric_faults: 0,
        }
    }

    /// Allocate the workspace for a sample rate, maximum block size and channel count.
    ///
    /// Calling again with identical parameters is a no-op. Any change rebuilds
    /// the whole workspace and drops the installed IR, whose partitioning is no
    /// longer valid.
    pub fn prepare(&mut self, sample_rate: f64, block_size: usize, channels: usize) -> DspResult<()> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        if block_size == 0 {
            return Err(DspError::InvalidConfig("block size must be > 0".into()));
        }
        if !(1..=2).contains(&channels) {
            return Err(DspError::InvalidConfig(format!(
                "unsupported channel count {channels}"
            )));
        }

        let layout = PartitionLayout::new(sample_rate, block_size, self.max_ir_seconds);
        if self.layout == Some(layout)
            && self.block_size == block_size
            && self.channels.len() == channels
        {
            return Ok(());
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(layout.fft_size());
        let inverse = planner.plan_fft_inverse(layout.fft_size());

        self.channels = (0..channels)
            .map(|_| ConvolutionChannel::new(&layout, &forward, &inverse))
            .collect();
        self.fft_forward = Some(forward);
        self.fft_inverse = Some(inverse);
        self.staging = vec![0.0; layout.partition_size];
        self.layout = Some(layout);
        self.block_size = block_size;
        self.ir = None;
        self.input_pos = 0;
        self.current_segment = 0;
        self.workspace_allocations += 1;

        log::debug!(
            "[Convolution] Prepared {} Hz, block {}, partition {}, {} segments, {} ch",
            sample_rate,
            block_size,
            layout.partition_size,
            layout.max_segments,
            channels
        );
        Ok(())
    }

    /// Prepare and install an IR in one step (allocates; not for the audio thread)
    pub fn load_impulse_response(
        &mut self,
        buffer: SampleBuffer,
        stereo: bool,
        normalize: bool,
    ) -> DspResult<()> {
        let layout = self.layout.ok_or(DspError::NotPrepared)?;
        let ir = PreparedIr::build(buffer, layout, stereo, normalize)?;
        self.install(ir).map(drop).map_err(|_| DspError::LayoutMismatch)
    }

    /// Swap in a prepared IR without allocating.
    ///
    /// Returns the previously installed IR (so the caller can free it off the
    /// audio thread), or gives `ir` back if it was built for another layout.
    pub fn install(&mut self, ir: PreparedIr) -> Result<Option<PreparedIr>, PreparedIr> {
        match self.layout {
            Some(layout) if ir.layout == layout && ir.num_segments() <= layout.max_segments => {
                self.tail_stale = true;
                Ok(self.ir.replace(ir))
            }
            _ => Err(ir),
        }
    }

    /// Convolve one block of planar audio in place.
    ///
    /// Passthrough when unprepared or without an IR. Block channels beyond the
    /// prepared count are left untouched. Every prepared channel advances by the
    /// longest block channel: missing channels and the tails of shorter ones are
    /// convolved as silence. A numeric fault zeroes the block.
    pub fn process(&mut self, block: &mut [&mut [Sample]]) {
        let (Some(ir), Some(forward), Some(inverse)) =
            (&self.ir, &self.fft_forward, &self.fft_inverse)
        else {
            return;
        };

        let active = block.len().min(self.channels.len());
        if active == 0 {
            return;
        }
        let num_samples = block[..active].iter().map(|c| c.len()).max().unwrap_or(0);
        let b = ir.layout.partition_size;
        let segments = ir.layout.max_segments;

        let mut ok = true;
        let mut offset = 0;
        while offset < num_samples {
            let n = (num_samples - offset).min(b - self.input_pos);
            let end = offset + n;
            let refresh_tail = self.input_pos == 0 || self.tail_stale;

            for (ch, state) in self.channels.iter_mut().enumerate() {
                let ir_channel = &ir.segments[ch.min(ir.segments.len() - 1)];
                let available = if ch < active {
                    block[ch].len().clamp(offset, end) - offset
                } else {
                    0
                };

                if available == n {
                    ok &= state.process_chunk(
                        &mut block[ch][offset..end],
                        self.input_pos,
                        self.current_segment,
                        refresh_tail,
                        ir_channel,
                        forward,
                        inverse,
                    );
                    continue;
                }

                let staging = &mut self.staging[..n];
                staging.fill(0.0);
                if available > 0 {
                    staging[..available].copy_from_slice(&block[ch][offset..offset + available]);
                }
                ok &= state.process_chunk(
                    staging,
                    self.input_pos,
                    self.current_segment,
                    refresh_tail,
                    ir_channel,
                    forward,
                    inverse,
                );
                if available > 0 {
                    block[ch][offset..offset + available].copy_from_slice(&staging[..available]);
                }
            }

            self.tail_stale = false;
            self.input_pos += n;
            if self.input_pos == b {
                for state in &mut self.channels {
                    state.finish_segment();
                }
                self.input_pos = 0;
                self.current_segment = if self.current_segment > 0 {
                    self.current_segment - 1
                } else {
                    segments - 1
                };
            }
            offset = end;
        }

        if !ok {
            self.numeric_faults += 1;
            for channel in block.iter_mut().take(active) {
                channel.fill(0.0);
            }
            self.reset();
        }
    }

    #[inline]
    pub fn is_prepared(&self) -> bool {
        self.layout.is_some()
    }

    #[inline]
    pub fn has_ir(&self) -> bool {
        self.ir.is_some()
    }

    #[inline]
    pub fn layout(&self) -> Option<PartitionLayout> {
        self.layout
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Installed IR, if any
    #[inline]
    pub fn ir(&self) -> Option<&PreparedIr> {
        self.ir.as_ref()
    }

    /// Number of times `prepare` rebuilt the workspace
    #[inline]
    pub fn workspace_allocations(&self) -> u64 {
        self.workspace_allocations
    }

    /// Number of blocks zeroed because of a numeric fault
    #[inline]
    pub fn numeric_faults(&self) -> u64 {
        self.numeric_faults
    }
}

impl Default for ConvolutionCore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IR_SECONDS)
    }
}

impl Processor for ConvolutionCore {
    fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
        self.input_pos = 0;
        self.current_segment = 0;
    }
}

// ============ Tests ============
