//! Configuration types for the dispatch engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for scheduling, monitoring, and streaming delivery.
///
/// The weights and thresholds are empirical defaults carried over as
/// configuration, not guaranteed-optimal constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Status monitor refresh cadence (seconds)
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: f64,

    /// Extended wait after a monitor probe error (seconds)
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: f64,

    /// Upper bound on any single device probe (seconds)
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: f64,

    /// Delay before the single recovery probe after a device fault (seconds)
    #[serde(default = "default_recovery_delay_secs")]
    pub recovery_delay_secs: f64,

    /// Grace period after dispatch before the first cancellation check (seconds)
    #[serde(default = "default_startup_grace_secs")]
    pub startup_grace_secs: f64,

    /// Bounded wait when joining a generation task (seconds)
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: f64,

    /// Minimum elapsed time between flushes once streaming has begun (seconds)
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: f64,

    /// Minimum buffered audio duration before a size-triggered flush (seconds)
    #[serde(default = "default_flush_min_secs")]
    pub flush_min_secs: f64,

    /// Sample rate of generated audio
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Scheduling weight for the pending-work count
    #[serde(default = "default_pending_weight")]
    pub pending_weight: f64,

    /// Scheduling weight for memory usage percentage
    #[serde(default = "default_memory_weight")]
    pub memory_weight: f64,

    /// Scheduling weight for device utilization percentage
    #[serde(default = "default_utilization_weight")]
    pub utilization_weight: f64,

    /// Capacity of the per-session chunk channel
    #[serde(default = "default_chunk_channel_capacity")]
    pub chunk_channel_capacity: usize,

    /// Capacity of the per-session progress event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            recovery_delay_secs: default_recovery_delay_secs(),
            startup_grace_secs: default_startup_grace_secs(),
            join_timeout_secs: default_join_timeout_secs(),
            flush_interval_secs: default_flush_interval_secs(),
            flush_min_secs: default_flush_min_secs(),
            sample_rate: default_sample_rate(),
            pending_weight: default_pending_weight(),
            memory_weight: default_memory_weight(),
            utilization_weight: default_utilization_weight(),
            chunk_channel_capacity: default_chunk_channel_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl DispatchConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(self.refresh_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.error_backoff_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.probe_timeout_secs)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_secs_f64(self.recovery_delay_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs_f64(self.startup_grace_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.join_timeout_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs_f64(self.flush_interval_secs)
    }

    /// Flush threshold expressed in samples.
    pub fn flush_min_samples(&self) -> usize {
        (self.flush_min_secs * self.sample_rate as f64) as usize
    }
}

fn default_refresh_interval_secs() -> f64 {
    5.0
}
fn default_error_backoff_secs() -> f64 {
    10.0
}
fn default_probe_timeout_secs() -> f64 {
    5.0
}
fn default_recovery_delay_secs() -> f64 {
    30.0
}
fn default_startup_grace_secs() -> f64 {
    1.0
}
fn default_join_timeout_secs() -> f64 {
    5.0
}
fn default_flush_interval_secs() -> f64 {
    15.0
}
fn default_flush_min_secs() -> f64 {
    30.0
}
fn default_sample_rate() -> u32 {
    24000
}
fn default_pending_weight() -> f64 {
    10.0
}
fn default_memory_weight() -> f64 {
    0.5
}
fn default_utilization_weight() -> f64 {
    0.3
}
fn default_chunk_channel_capacity() -> usize {
    32
}
fn default_event_channel_capacity() -> usize {
    32
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7860
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_constants() {
        let config = DispatchConfig::default();
        assert_eq!(config.refresh_interval(), Duration::from_secs(5));
        assert_eq!(config.recovery_delay(), Duration::from_secs(30));
        assert_eq!(config.flush_interval(), Duration::from_secs(15));
        assert_eq!(config.flush_min_samples(), 30 * 24000);
    }

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: DispatchConfig = serde_json::from_str("{}").expect("defaults");
        assert_eq!(config.sample_rate, 24000);
        assert!((config.pending_weight - 10.0).abs() < f64::EPSILON);
    }
}
