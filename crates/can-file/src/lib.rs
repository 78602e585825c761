//! can-file: Audio File I/O
//!
//! Decodes impulse responses and reads/writes program audio:
//! - WAV (via hound) - native, lossless
//! - FLAC, AIFF (via symphonia)
//!
//! Also handles:
//! - Embedded IRs decoded from memory

mod audio_file;
mod error;
mod ir;

pub use audio_file::*;
pub use error::*;
pub use ir::*;
