//! Error types for the dispatch engine.

use thiserror::Error;

use crate::types::DeviceId;

pub type Result<T> = std::result::Result<T, Error>;

/// Closed error taxonomy surfaced to callers.
///
/// Probe failures inside the status monitor are absorbed locally and never
/// reach a caller's session; everything a session can terminate with is one
/// of these variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed script or speaker configuration. Raised before any device
    /// resource is touched; user-correctable.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Every configured device is unavailable, even after one re-probe.
    #[error("no device available: {0}")]
    NoDeviceAvailable(String),

    /// The worker raised during generation. Terminal for the session; a
    /// single delayed recovery probe is scheduled for the device.
    #[error("device {device} fault: {message}")]
    DeviceFault { device: DeviceId, message: String },

    /// User-initiated cancellation. Terminal, non-error outcome.
    #[error("generation stopped by caller")]
    Stopped,

    /// The engine finished without emitting a single chunk.
    #[error("engine produced no audio")]
    NoAudioProduced,

    /// Failure inside the generation engine or a device probe.
    #[error("engine error: {0}")]
    Engine(String),

    /// A bounded device probe failed or timed out.
    #[error("device probe failed: {0}")]
    Probe(String),
}

impl Error {
    /// Stable machine-readable kind, used in progress events and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::NoDeviceAvailable(_) => "no_device_available",
            Error::DeviceFault { .. } => "device_fault",
            Error::Stopped => "stopped",
            Error::NoAudioProduced => "no_audio_produced",
            Error::Engine(_) => "engine_error",
            Error::Probe(_) => "probe_failed",
        }
    }
}

/// Operator hint for well-known device fault messages.
pub fn fault_hint(message: &str) -> Option<&'static str> {
    let lower = message.to_ascii_lowercase();
    if lower.contains("out of memory") {
        Some("device memory exhausted; reduce concurrent requests or restart the service")
    } else if lower.contains("cuda") || lower.contains("driver") {
        Some("driver error; the device may need a reset")
    } else {
        None
    }
}
