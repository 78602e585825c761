//! Host capability
//!
//! A standalone host exposes device information to the UI; a plugin host
//! does not. The UI side asks the capability before using it.

use std::sync::Arc;

/// Services offered by a standalone audio host
pub trait HostServices: Send + Sync {
    /// Device name, rate, buffer size and channel counts
    fn audio_device_status(&self) -> String;

    /// Error from the last device initialisation, if any
    fn last_init_error(&self) -> Option<String>;

    /// Ask the host to present its audio settings
    fn show_audio_settings(&self);

    fn input_device_names(&self) -> Vec<String>;

    fn output_device_names(&self) -> Vec<String>;

    fn current_input_device(&self) -> Option<String>;

    fn current_output_device(&self) -> Option<String>;
}

/// Whether host services are available
#[derive(Clone, Default)]
pub enum HostCapability {
    Present(Arc<dyn HostServices>),
    #[default]
    Absent,
}

impl HostCapability {
    pub fn new(services: Arc<dyn HostServices>) -> Self {
        Self::Present(services)
    }

    #[inline]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn services(&self) -> Option<&dyn HostServices> {
        match self {
            Self::Present(services) => Some(services.as_ref()),
            Self::Absent => None,
        }
    }

    /// One-line device status for the UI
    pub fn status_line(&self) -> String {
        match self.services() {
            Some(host) => match host.last_init_error() {
                Some(err) => format!("Audio device error: {err}"),
                None => host.audio_device_status(),
            },
            None => "Audio device managed by host".to_string(),
        }
    }

    /// Returns false when there is no host to ask
    pub fn request_audio_settings(&self) -> bool {
        match self.services() {
            Some(host) => {
                host.show_audio_settings();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for HostCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Present(_) => f.write_str("HostCapability::Present"),
            Self::Absent => f.write_str("HostCapability::Absent"),
        }
    }
}
