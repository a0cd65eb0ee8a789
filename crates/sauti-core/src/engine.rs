//! External collaborator traits: the generation engine and device probes.
//!
//! The dispatch layer never looks inside the model. It drives an opaque
//! iterative decode loop through [`DecodeStream`] and observes devices
//! through [`DeviceBackend`].

use crate::error::Result;
use crate::voice::VoiceSample;

/// Input handed to a generation engine for one session.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    /// Formatted script with `Speaker N:` prefixes
    pub script: String,
    /// Reference waveform per speaker slot, in speaker order
    pub voices: Vec<VoiceSample>,
    /// Classifier-free guidance strength
    pub guidance_scale: f32,
}

/// An opaque iterative decode engine bound to one device.
///
/// Constructed once per device at startup; immutable thereafter.
pub trait GenerationEngine: Send + Sync {
    /// Start a decode loop for one request. The returned stream yields
    /// sample chunks lazily until the engine finishes.
    fn begin(&self, request: EngineRequest) -> Result<Box<dyn DecodeStream>>;
}

/// A lazy, finite, ordered sequence of sample chunks from one decode loop.
pub trait DecodeStream: Send {
    /// Run one decode step. `Ok(Some(samples))` yields the next chunk,
    /// `Ok(None)` means the stream ended naturally.
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>>;

    /// Release device-side buffers held by this stream. Called on natural
    /// end, cancellation, and error alike; must be safe to call repeatedly.
    fn release(&mut self);
}

/// Memory reading for one device, in gigabytes.
#[derive(Debug, Clone, Copy)]
pub struct MemoryReading {
    pub used_gb: f64,
    pub total_gb: f64,
}

/// Probe surface of one accelerator device.
///
/// All methods are blocking and bounded by the caller's probe timeout.
pub trait DeviceBackend: Send + Sync {
    /// Current memory usage of the device.
    fn memory_reading(&self) -> Result<MemoryReading>;

    /// Utilization percentage in [0, 100].
    fn utilization_probe(&self) -> Result<f64>;

    /// Small allocate/compute/release round trip proving the device works.
    fn liveness_probe(&self) -> Result<()>;

    /// Drop any cached device-side allocations.
    fn clear_cache(&self);
}
