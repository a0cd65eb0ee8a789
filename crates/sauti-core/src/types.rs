//! Request, chunk, and progress event types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Identifier of one accelerator device in the pool.
pub type DeviceId = u32;

/// Identifier of one generation session.
pub type SessionId = String;

/// Maximum number of speakers a script may reference.
pub const MAX_SPEAKERS: usize = 4;

/// A request for one end-to-end generation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Unique session ID
    #[serde(default = "generate_session_id")]
    pub id: SessionId,

    /// Dialogue script to synthesize
    pub script: String,

    /// Number of active speaker slots (1..=4)
    pub speaker_count: usize,

    /// Voice identity per speaker slot, in speaker order
    pub voice_ids: Vec<String>,

    /// Classifier-free guidance strength
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,
}

fn generate_session_id() -> SessionId {
    Uuid::new_v4().to_string()
}

fn default_guidance_scale() -> f32 {
    1.3
}

impl GenerationRequest {
    /// Create a request with one speaker slot per voice id.
    pub fn new(script: impl Into<String>, voice_ids: Vec<String>) -> Self {
        Self {
            id: generate_session_id(),
            script: script.into(),
            speaker_count: voice_ids.len(),
            voice_ids,
            guidance_scale: default_guidance_scale(),
        }
    }

    pub fn with_guidance_scale(mut self, scale: f32) -> Self {
        self.guidance_scale = scale;
        self
    }
}

/// One immutable segment of generated audio.
///
/// Produced once by a worker, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Position of this chunk within its session's stream
    pub sequence: usize,

    /// Audio samples (f32, mono)
    pub samples: Vec<f32>,

    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(sequence: usize, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            sequence,
            samples,
            sample_rate,
        }
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Progress event delivered to the caller over a session's event stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Incremental audio flushed by the buffering policy.
    PartialAudio {
        samples: Vec<f32>,
        sample_rate: u32,
        /// Total audio received for this session so far, in seconds
        cumulative_secs: f32,
    },
    /// Audio still buffered when the stream ended; closes the session's
    /// delivery so that every produced sample reaches the caller exactly once.
    FinalAudio { samples: Vec<f32>, sample_rate: u32 },
    /// Human-readable progress text.
    Status { message: String },
    /// Terminal failure, mapped onto the closed error taxonomy.
    Error { kind: String, message: String },
}

impl ProgressEvent {
    pub fn status(message: impl Into<String>) -> Self {
        ProgressEvent::Status {
            message: message.into(),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        ProgressEvent::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Validating,
    Queued,
    Streaming,
    Finalizing,
    Done,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Stopped | SessionState::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = GenerationRequest::new("Hello", vec!["alice".into(), "bob".into()]);
        assert_eq!(request.speaker_count, 2);
        assert!((request.guidance_scale - 1.3).abs() < f32::EPSILON);
        assert!(!request.id.is_empty());
    }

    #[test]
    fn test_chunk_duration() {
        let chunk = AudioChunk::new(0, vec![0.0; 12000], 24000);
        assert!((chunk.duration_secs() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Done.is_terminal());
        assert!(SessionState::Stopped.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Streaming.is_terminal());
    }
}
