//! Background device status monitor.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::device::DeviceRegistry;
use crate::engine::DeviceBackend;
use crate::error::{Error, Result};
use crate::types::DeviceId;

/// Periodically refreshes the device registry with memory, utilization, and
/// pending-work readings.
///
/// The monitor absorbs every fault locally: a probe failure on one device is
/// logged, the next wait stretches to the error backoff, and the loop keeps
/// going. Monitoring failures must never cause generation failures, and the
/// loop ends only on shutdown.
pub struct StatusMonitor {
    registry: Arc<DeviceRegistry>,
    backends: BTreeMap<DeviceId, Arc<dyn DeviceBackend>>,
    config: DispatchConfig,
}

impl StatusMonitor {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        backends: BTreeMap<DeviceId, Arc<dyn DeviceBackend>>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            backends,
            config,
        }
    }

    /// Spawn the refresh loop. It runs until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) {
        debug!(devices = self.backends.len(), "status monitor started");

        loop {
            let mut had_error = false;

            for (&id, backend) in &self.backends {
                if let Err(err) = self.refresh_device(id, backend).await {
                    warn!(device = id, error = %err, "status refresh failed");
                    had_error = true;
                }
            }

            let wait = if had_error {
                self.config.error_backoff()
            } else {
                self.config.refresh_interval()
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        debug!("status monitor stopped");
    }

    /// Refresh one device's registry entry. Availability is left to the
    /// health manager.
    async fn refresh_device(&self, id: DeviceId, backend: &Arc<dyn DeviceBackend>) -> Result<()> {
        let memory = {
            let backend = Arc::clone(backend);
            self.bounded_probe("memory reading", move || backend.memory_reading())
                .await?
        };
        let utilization = {
            let backend = Arc::clone(backend);
            self.bounded_probe("utilization probe", move || backend.utilization_probe())
                .await?
        };
        let pending = self.registry.pending_work(id);

        self.registry
            .apply_reading(id, memory.used_gb, memory.total_gb, utilization, pending)
            .await;
        Ok(())
    }

    /// Run one blocking device probe off the runtime, bounded by the probe
    /// timeout. A device that hangs a probe must not stall the refresh loop
    /// for the rest of the pool.
    async fn bounded_probe<T, F>(&self, what: &str, probe: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(probe);

        match tokio::time::timeout(self.config.probe_timeout(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::Probe(format!("{what} panicked: {join}"))),
            Err(_) => Err(Error::Probe(format!("{what} timed out"))),
        }
    }
}
