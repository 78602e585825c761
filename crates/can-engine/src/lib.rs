//! can-engine: Real-time convolution engine with IR hot-swap
//!
//! ## Modules
//! - `engine` - Audio-side engine and control handle
//! - `handoff` - Single-slot try-lock mailbox between loader and audio thread
//! - `decoder` - IR sources and the decoding collaborator
//! - `config` - JSON engine configuration
//! - `diagnostics` - Counters and meters polled by the UI
//! - `host` - Optional standalone host services
//! - `tone` - 440 Hz debug tone

mod error;

pub mod config;
pub mod decoder;
pub mod diagnostics;
pub mod engine;
pub mod handoff;
pub mod host;
pub mod tone;

pub use config::{EngineConfig, SelfTestPolicy};
pub use decoder::{FileDecoder, IrDecoder, IrSource};
pub use diagnostics::DiagnosticsSnapshot;
pub use engine::{ConvolutionEngine, EngineHandle, LoadOutcome};
pub use error::*;
pub use handoff::{Drain, IrHandoff};
pub use host::{HostCapability, HostServices};
