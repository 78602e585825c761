//! Engine configuration
//!
//! Loaded from JSON by the application; every field has a default so a
//! partial file (or `{}`) is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{EngineError, EngineResult};

/// What to do with the self-test verdict on load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelfTestPolicy {
    /// Skip the self-test entirely
    Off,
    /// Run the self-test, log and keep the report
    Diagnostic,
    /// Run the self-test and fail the load when the IR is silent
    Reject,
}

impl Default for SelfTestPolicy {
    fn default() -> Self {
        Self::Diagnostic
    }
}

impl std::str::FromStr for SelfTestPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "diagnostic" => Ok(Self::Diagnostic),
            "reject" => Ok(Self::Reject),
            other => Err(EngineError::Config(format!("unknown self-test policy '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Force passthrough regardless of IR state
    pub bypass: bool,
    /// Resample IRs to the device rate on load
    pub resample_ir_on_load: bool,
    /// Scale IRs to unit energy on load
    pub normalize: bool,
    pub self_test: SelfTestPolicy,
    /// Self-test length in blocks
    pub self_test_blocks: usize,
    /// Longest IR the workspace holds; longer IRs are truncated
    pub max_ir_seconds: f64,
    /// Live stream channel count (1 or 2)
    pub channels: usize,
    /// Replace the input with a 440 Hz tone
    pub test_tone: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bypass: false,
            resample_ir_on_load: true,
            normalize: true,
            self_test: SelfTestPolicy::default(),
            self_test_blocks: 8,
            max_ir_seconds: 10.0,
            channels: 2,
            test_tone: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&json)?;
        log::info!("[Config] Loaded {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(1..=2).contains(&self.channels) {
            return Err(EngineError::Config(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if !(self.max_ir_seconds.is_finite() && self.max_ir_seconds > 0.0 && self.max_ir_seconds <= 60.0) {
            return Err(EngineError::Config(format!(
                "max_ir_seconds must be in (0, 60], got {}",
                self.max_ir_seconds
            )));
        }
        if self.self_test_blocks == 0 {
            return Err(EngineError::Config("self_test_blocks must be > 0".into()));
        }
        Ok(())
    }
}
