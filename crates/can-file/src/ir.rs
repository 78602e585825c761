//! Impulse response decoding
//!
//! Turns an IR asset (file or embedded bytes) into a mono or stereo
//! [`SampleBuffer`] at the asset's native rate. Rate conversion is left to
//! the engine, which knows the live device rate.

use std::path::Path;

use can_core::SampleBuffer;

use crate::{FileError, FileResult, read_audio, read_audio_bytes};

/// Decode an IR file from disk
pub fn decode_ir<P: AsRef<Path>>(path: P) -> FileResult<SampleBuffer> {
    let path = path.as_ref();
    let data = read_audio(path)?;
    let buffer = finish(data.into_sample_buffer()?)?;

    log::info!(
        "[IR] Decoded {} ({} ch, {} samples @ {} Hz)",
        path.display(),
        buffer.num_channels(),
        buffer.num_samples(),
        buffer.sample_rate()
    );
    Ok(buffer)
}

/// Decode an IR held in memory (WAV, FLAC or AIFF bytes)
pub fn decode_ir_bytes(bytes: &[u8]) -> FileResult<SampleBuffer> {
    let buffer = finish(read_audio_bytes(bytes)?.into_sample_buffer()?)?;

    log::info!(
        "[IR] Decoded embedded IR ({} ch, {} samples @ {} Hz)",
        buffer.num_channels(),
        buffer.num_samples(),
        buffer.sample_rate()
    );
    Ok(buffer)
}

fn finish(buffer: SampleBuffer) -> FileResult<SampleBuffer> {
    if buffer.is_empty() {
        return Err(FileError::InvalidFile("impulse response has no samples".to_string()));
    }
    Ok(buffer)
}
