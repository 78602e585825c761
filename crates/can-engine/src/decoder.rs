//! IR sources and the decoding collaborator

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use can_core::SampleBuffer;
use can_file::{FileResult, decode_ir, decode_ir_bytes};

/// Where an impulse response comes from.
///
/// Equality is the identity used for redundant-load suppression: the path
/// for files, the name for embedded assets.
#[derive(Clone)]
pub enum IrSource {
    File(PathBuf),
    Embedded { name: String, data: Arc<[u8]> },
}

impl IrSource {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self::File(path.into())
    }

    pub fn embedded<N: Into<String>>(name: N, data: impl Into<Arc<[u8]>>) -> Self {
        Self::Embedded {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl PartialEq for IrSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::File(a), Self::File(b)) => a == b,
            (Self::Embedded { name: a, .. }, Self::Embedded { name: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for IrSource {}

impl fmt::Debug for IrSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Embedded { name, data } => f
                .debug_struct("Embedded")
                .field("name", name)
                .field("bytes", &data.len())
                .finish(),
        }
    }
}

impl fmt::Display for IrSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Embedded { name, .. } => write!(f, "embedded:{name}"),
        }
    }
}

/// Turns an [`IrSource`] into PCM. Runs on the loader thread only.
pub trait IrDecoder: Send + Sync {
    fn decode(&self, source: &IrSource) -> FileResult<SampleBuffer>;
}

/// Default decoder backed by `can-file`
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDecoder;

impl IrDecoder for FileDecoder {
    fn decode(&self, source: &IrSource) -> FileResult<SampleBuffer> {
        match source {
            IrSource::File(path) => decode_ir(path),
            IrSource::Embedded { data, .. } => decode_ir_bytes(data),
        }
    }
}
