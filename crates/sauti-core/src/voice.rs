//! Voice identity resolution.
//!
//! Resolution from preset files or catalogs lives outside this crate; the
//! dispatcher only needs a name to map to a reference waveform before any
//! device resource is touched.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Reference waveform for one voice identity.
#[derive(Debug, Clone)]
pub struct VoiceSample {
    pub name: String,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Maps a voice identity name to its reference waveform.
pub trait VoiceResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<VoiceSample>;

    /// Known voice names, sorted.
    fn available(&self) -> Vec<String>;
}

/// In-memory resolver over a fixed set of voices.
pub struct StaticVoiceResolver {
    voices: BTreeMap<String, VoiceSample>,
}

impl StaticVoiceResolver {
    pub fn new(voices: impl IntoIterator<Item = VoiceSample>) -> Self {
        Self {
            voices: voices
                .into_iter()
                .map(|voice| (voice.name.clone(), voice))
                .collect(),
        }
    }
}

impl VoiceResolver for StaticVoiceResolver {
    fn resolve(&self, name: &str) -> Result<VoiceSample> {
        self.voices.get(name).cloned().ok_or_else(|| {
            Error::Validation(format!(
                "unknown voice '{}'. available voices: {}",
                name,
                self.available().join(", ")
            ))
        })
    }

    fn available(&self) -> Vec<String> {
        self.voices.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_resolver() {
        let resolver = StaticVoiceResolver::new(vec![VoiceSample {
            name: "alice".into(),
            samples: vec![0.0; 100],
            sample_rate: 24000,
        }]);

        assert!(resolver.resolve("alice").is_ok());
        let err = resolver.resolve("nobody").expect_err("unknown voice");
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(resolver.available(), vec!["alice".to_string()]);
    }
}
