//! Audio file reading and writing
//!
//! Supports:
//! - WAV (8/16/24/32-bit int, 32-bit float)
//! - FLAC (lossless)
//! - AIFF

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use can_core::{Sample, SampleBuffer};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{FileError, FileResult};

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO FILE METADATA
// ═══════════════════════════════════════════════════════════════════════════════

/// Audio file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Flac,
    Aiff,
    Unknown,
}

impl AudioFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "wav" | "wave" => Self::Wav,
            "flac" => Self::Flac,
            "aif" | "aiff" | "aifc" => Self::Aiff,
            _ => Self::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }
}

/// Bit depth of audio samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Int8,
    Int16,
    Int24,
    Int32,
    Float32,
}

impl BitDepth {
    pub fn bits(&self) -> u32 {
        match self {
            Self::Int8 => 8,
            Self::Int16 => 16,
            Self::Int24 => 24,
            Self::Int32 => 32,
            Self::Float32 => 32,
        }
    }

    fn from_wav_spec(spec: &hound::WavSpec) -> Self {
        match (spec.bits_per_sample, spec.sample_format) {
            (8, _) => Self::Int8,
            (16, _) => Self::Int16,
            (24, _) => Self::Int24,
            (32, hound::SampleFormat::Int) => Self::Int32,
            (32, hound::SampleFormat::Float) => Self::Float32,
            _ => Self::Int16,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO DATA CONTAINER
// ═══════════════════════════════════════════════════════════════════════════════

/// Decoded audio, any channel count
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Audio samples (deinterleaved, one Vec per channel)
    pub channels: Vec<Vec<Sample>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Original bit depth
    pub bit_depth: BitDepth,
    /// Original format
    pub format: AudioFormat,
}

impl AudioData {
    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of sample frames
    pub fn num_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    /// Create from interleaved samples
    pub fn from_interleaved(samples: &[Sample], num_channels: usize, sample_rate: u32) -> Self {
        Self {
            channels: deinterleave(samples, num_channels),
            sample_rate,
            bit_depth: BitDepth::Float32,
            format: AudioFormat::Unknown,
        }
    }

    /// Convert to a mono/stereo [`SampleBuffer`], keeping the first two channels.
    ///
    /// Channels are padded to the longest one (symphonia may deliver ragged
    /// tails for damaged files).
    pub fn into_sample_buffer(self) -> FileResult<SampleBuffer> {
        if self.channels.is_empty() {
            return Err(FileError::InvalidFile("no audio channels".to_string()));
        }

        let total = self.channels.len();
        let mut channels = self.channels;
        if total > 2 {
            log::warn!("[File] {} channels found, keeping the first two", total);
            channels.truncate(2);
        }

        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        for channel in channels.iter_mut() {
            channel.resize(frames, 0.0);
        }

        Ok(SampleBuffer::new(channels, self.sample_rate as f64)?)
    }
}

fn deinterleave(samples: &[Sample], num_channels: usize) -> Vec<Vec<Sample>> {
    let num_channels = num_channels.max(1);
    let num_frames = samples.len() / num_channels;
    let mut channels = vec![vec![0.0; num_frames]; num_channels];

    for (i, chunk) in samples.chunks_exact(num_channels).enumerate() {
        for (ch, &sample) in chunk.iter().enumerate() {
            channels[ch][i] = sample;
        }
    }
    channels
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAV READING (hound)
// ═══════════════════════════════════════════════════════════════════════════════

/// Read WAV file using hound
pub fn read_wav<P: AsRef<Path>>(path: P) -> FileResult<AudioData> {
    let path = path.as_ref();
    let reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
            FileError::NotFound(path.display().to_string())
        }
        other => other.into(),
    })?;
    decode_wav_reader(reader)
}

/// Read WAV data from any byte source (e.g. an in-memory asset)
pub fn read_wav_from<R: Read>(source: R) -> FileResult<AudioData> {
    decode_wav_reader(hound::WavReader::new(source)?)
}

fn decode_wav_reader<R: Read>(reader: hound::WavReader<R>) -> FileResult<AudioData> {
    let spec = reader.spec();
    let num_channels = spec.channels as usize;
    let bit_depth = BitDepth::from_wav_spec(&spec);

    if num_channels == 0 {
        return Err(FileError::InvalidFile("WAV declares zero channels".to_string()));
    }

    let samples: Vec<Sample> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(AudioData {
        channels: deinterleave(&samples, num_channels),
        sample_rate: spec.sample_rate,
        bit_depth,
        format: AudioFormat::Wav,
    })
}

/// Write a buffer as a WAV file using hound
pub fn write_wav<P: AsRef<Path>>(path: P, buffer: &SampleBuffer, bit_depth: BitDepth) -> FileResult<()> {
    let spec = hound::WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate: buffer.sample_rate().round() as u32,
        bits_per_sample: bit_depth.bits() as u16,
        sample_format: match bit_depth {
            BitDepth::Float32 => hound::SampleFormat::Float,
            _ => hound::SampleFormat::Int,
        },
    };

    let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;

    // Interleave and write
    for i in 0..buffer.num_samples() {
        for ch in buffer.channels() {
            let s = ch[i];
            match bit_depth {
                BitDepth::Float32 => writer.write_sample(s)?,
                BitDepth::Int8 => writer.write_sample((s.clamp(-1.0, 1.0) * 127.0) as i8)?,
                BitDepth::Int16 => writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)?,
                BitDepth::Int24 => writer.write_sample((s.clamp(-1.0, 1.0) * 8388607.0) as i32)?,
                BitDepth::Int32 => {
                    writer.write_sample((s.clamp(-1.0, 1.0) as f64 * 2147483647.0) as i32)?
                }
            }
        }
    }

    writer.finalize()?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYMPHONIA READING (FLAC, AIFF)
// ═══════════════════════════════════════════════════════════════════════════════

/// Read audio file (WAV via hound, everything else via symphonia)
pub fn read_audio<P: AsRef<Path>>(path: P) -> FileResult<AudioData> {
    let path = path.as_ref();
    let format = AudioFormat::from_path(path);

    // For WAV, use hound (faster)
    if format == AudioFormat::Wav {
        return read_wav(path);
    }

    let file = File::open(path).map_err(|_| FileError::NotFound(path.display().to_string()))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mut data = read_symphonia(Box::new(file), hint)?;
    data.format = format;
    Ok(data)
}

/// Decode in-memory audio of any supported container
pub fn read_audio_bytes(bytes: &[u8]) -> FileResult<AudioData> {
    match read_wav_from(Cursor::new(bytes)) {
        Ok(data) => Ok(data),
        Err(FileError::WavError(_)) => {
            read_symphonia(Box::new(Cursor::new(bytes.to_vec())), Hint::new())
        }
        Err(e) => Err(e),
    }
}

fn read_symphonia(source: Box<dyn MediaSource>, hint: Hint) -> FileResult<AudioData> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| FileError::UnsupportedFormat(e.to_string()))?;

    let mut format_reader = probed.format;

    // Get default track
    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| FileError::InvalidFile("No audio track found".to_string()))?;

    let track_id = track.id;
    let num_channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| FileError::InvalidFile("No sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    let mut all_samples: Vec<Vec<Sample>> = vec![Vec::new(); num_channels];

    loop {
        match format_reader.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }

                match decoder.decode(&packet) {
                    Ok(decoded) => copy_audio_buffer(&decoded, &mut all_samples),
                    Err(symphonia::core::errors::Error::DecodeError(e)) => {
                        log::warn!("[File] Skipping corrupt packet: {}", e);
                        continue;
                    }
                    Err(e) => return Err(FileError::DecodeError(e.to_string())),
                }
            }
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(FileError::DecodeError(e.to_string())),
        }
    }

    Ok(AudioData {
        channels: all_samples,
        sample_rate,
        bit_depth: BitDepth::Float32,
        format: AudioFormat::Unknown,
    })
}

/// Append one decoded packet to the per-channel output
fn copy_audio_buffer(buffer: &AudioBufferRef, output: &mut [Vec<Sample>]) {
    fn extend<S: symphonia::core::sample::Sample>(
        buf: &symphonia::core::audio::AudioBuffer<S>,
        output: &mut [Vec<Sample>],
        convert: impl Fn(S) -> Sample,
    ) {
        let available = buf.spec().channels.count();
        for (ch, out_ch) in output.iter_mut().enumerate().take(available) {
            out_ch.extend(buf.chan(ch).iter().map(|&s| convert(s)));
        }
    }

    match buffer {
        AudioBufferRef::F32(buf) => extend(&**buf, output, |s| s),
        AudioBufferRef::F64(buf) => extend(&**buf, output, |s| s as Sample),
        AudioBufferRef::S8(buf) => extend(&**buf, output, |s| s as Sample / 128.0),
        AudioBufferRef::S16(buf) => extend(&**buf, output, |s| s as Sample / 32768.0),
        AudioBufferRef::S24(buf) => extend(&**buf, output, |s| s.0 as Sample / 8388608.0),
        AudioBufferRef::S32(buf) => extend(&**buf, output, |s| (s as f64 / 2147483648.0) as Sample),
        AudioBufferRef::U8(buf) => extend(&**buf, output, |s| (s as Sample - 128.0) / 128.0),
        AudioBufferRef::U16(buf) => extend(&**buf, output, |s| (s as Sample - 32768.0) / 32768.0),
        AudioBufferRef::U24(buf) => {
            extend(&**buf, output, |s| (s.0 as Sample - 8388608.0) / 8388608.0)
        }
        AudioBufferRef::U32(buf) => {
            extend(&**buf, output, |s| ((s as f64 - 2147483648.0) / 2147483648.0) as Sample)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
