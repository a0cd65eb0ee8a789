//! Device health probing and fault recovery.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::device::DeviceRegistry;
use crate::engine::DeviceBackend;
use crate::error::{fault_hint, Error, Result};
use crate::types::DeviceId;

/// Owns device availability.
///
/// The status monitor reports readings but never flips the available flag;
/// only probe outcomes and fault reports recorded here do. A faulted device
/// gets exactly one delayed recovery probe per fault, so repeated faults
/// cannot pile up probe tasks against a sick device.
pub struct HealthManager {
    registry: Arc<DeviceRegistry>,
    backends: BTreeMap<DeviceId, Arc<dyn DeviceBackend>>,
    config: DispatchConfig,
    /// Devices with a recovery probe already scheduled.
    recovering: Mutex<HashSet<DeviceId>>,
    shutdown: CancellationToken,
}

impl HealthManager {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        backends: BTreeMap<DeviceId, Arc<dyn DeviceBackend>>,
        config: DispatchConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            backends,
            config,
            recovering: Mutex::new(HashSet::new()),
            shutdown,
        }
    }

    /// Probe one device and update its availability from the outcome.
    ///
    /// Returns `Ok(true)` when the device passed, `Ok(false)` when the probe
    /// failed and the device was marked unavailable.
    pub async fn probe(&self, id: DeviceId) -> Result<bool> {
        let backend = self
            .backends
            .get(&id)
            .ok_or_else(|| Error::Probe(format!("unknown device {id}")))?;

        match self.run_liveness(backend).await {
            Ok(()) => {
                self.registry.set_available(id, true).await;
                Ok(true)
            }
            Err(err) => {
                warn!(device = id, error = %err, "liveness probe failed");
                backend.clear_cache();
                self.registry.set_available(id, false).await;
                Ok(false)
            }
        }
    }

    /// Re-probe every configured device. Used by the scheduler when no
    /// device looks available from stale status alone.
    pub async fn probe_all(&self) {
        for &id in self.backends.keys().collect::<Vec<_>>() {
            // Probe outcomes are recorded in the registry; nothing to bubble.
            let _ = self.probe(id).await;
        }
    }

    /// Record a generation fault on a device: mark it unavailable, clear its
    /// cache, and schedule a single delayed recovery probe.
    pub async fn handle_fault(self: &Arc<Self>, id: DeviceId, message: &str) {
        warn!(device = id, error = message, "device fault");
        if let Some(hint) = fault_hint(message) {
            warn!(device = id, hint, "fault diagnosis");
        }

        if let Some(backend) = self.backends.get(&id) {
            backend.clear_cache();
        }
        self.registry.set_available(id, false).await;

        {
            let mut recovering = lock_recovering(&self.recovering);
            if !recovering.insert(id) {
                // A recovery probe is already pending for this device.
                return;
            }
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = manager.shutdown.cancelled() => {}
                _ = tokio::time::sleep(manager.config.recovery_delay()) => {
                    match manager.probe(id).await {
                        Ok(true) => info!(device = id, "device recovered"),
                        Ok(false) => warn!(device = id, "device still unavailable after recovery probe"),
                        Err(err) => warn!(device = id, error = %err, "recovery probe error"),
                    }
                }
            }
            lock_recovering(&manager.recovering).remove(&id);
        });
    }

    async fn run_liveness(&self, backend: &Arc<dyn DeviceBackend>) -> Result<()> {
        let backend = Arc::clone(backend);
        let probe = tokio::task::spawn_blocking(move || backend.liveness_probe());

        match tokio::time::timeout(self.config.probe_timeout(), probe).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::Probe(format!("liveness probe panicked: {join}"))),
            Err(_) => Err(Error::Probe("liveness probe timed out".to_string())),
        }
    }
}

fn lock_recovering(set: &Mutex<HashSet<DeviceId>>) -> std::sync::MutexGuard<'_, HashSet<DeviceId>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}
