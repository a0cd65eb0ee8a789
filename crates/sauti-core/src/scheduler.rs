//! Least-loaded device selection.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::DispatchConfig;
use crate::device::DeviceRegistry;
use crate::error::{Error, Result};
use crate::health::HealthManager;
use crate::types::DeviceId;

/// Picks the least-loaded available device for a new session.
///
/// Memory and utilization come from the monitor's last reading and may be a
/// few seconds stale; the pending-work count is read live from its counter,
/// so back-to-back admissions spread across devices even between refreshes.
pub struct Scheduler {
    registry: Arc<DeviceRegistry>,
    health: Arc<HealthManager>,
    config: DispatchConfig,
}

impl Scheduler {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        health: Arc<HealthManager>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            health,
            config,
        }
    }

    /// Select the best available device, re-probing all devices once if none
    /// looks available from current status.
    pub async fn select_best(&self) -> Result<DeviceId> {
        if let Some(id) = self.pick().await {
            return Ok(id);
        }

        debug!("no device available from status; re-probing pool");
        self.health.probe_all().await;

        match self.pick().await {
            Some(id) => Ok(id),
            None => Err(Error::NoDeviceAvailable(format!(
                "all {} devices unavailable after re-probe",
                self.registry.len()
            ))),
        }
    }

    async fn pick(&self) -> Option<DeviceId> {
        let mut best: Option<(DeviceId, f64)> = None;

        for status in self.registry.statuses().await {
            if !status.available {
                continue;
            }
            let pending = self.registry.pending_work(status.id);
            let score = pending as f64 * self.config.pending_weight
                + status.memory_usage_pct() * self.config.memory_weight
                + status.utilization_pct * self.config.utilization_weight;

            // Strict comparison over ascending ids keeps the lowest id on ties.
            let better = match best {
                Some((_, best_score)) => score < best_score,
                None => true,
            };
            if better {
                best = Some((status.id, score));
            }
        }

        if let Some((id, score)) = best {
            info!(device = id, score, "device selected");
        }
        best.map(|(id, _)| id)
    }
}
