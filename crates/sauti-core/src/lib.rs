//! Multi-device dispatch and streaming delivery for long-form audio
//! generation.
//!
//! The crate schedules generation sessions across a pool of accelerator
//! devices and streams the resulting audio back incrementally. A background
//! monitor keeps device readings fresh, a health manager owns availability
//! and fault recovery, and a per-session coordinator drives each request
//! from validation through exactly-once audio delivery.
//!
//! The model itself stays behind the [`engine::GenerationEngine`] and
//! [`engine::DeviceBackend`] traits; this crate only dispatches and streams.

pub mod config;
pub mod coordinator;
pub mod device;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod health;
pub mod monitor;
pub mod scheduler;
pub mod types;
pub mod voice;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{DispatchConfig, ServerConfig};
pub use device::{DeviceStatus, DeviceStatusSnapshot};
pub use dispatcher::{DeviceSetup, Dispatcher};
pub use engine::{DecodeStream, DeviceBackend, EngineRequest, GenerationEngine, MemoryReading};
pub use error::{Error, Result};
pub use types::{
    AudioChunk, DeviceId, GenerationRequest, ProgressEvent, SessionId, SessionState, MAX_SPEAKERS,
};
pub use voice::{StaticVoiceResolver, VoiceResolver, VoiceSample};
