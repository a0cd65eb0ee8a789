//! Top-level dispatch facade.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::coordinator::StreamingCoordinator;
use crate::device::{DeviceRegistry, DeviceStatus, DeviceStatusSnapshot};
use crate::engine::{DeviceBackend, GenerationEngine};
use crate::error::{Error, Result};
use crate::health::HealthManager;
use crate::monitor::StatusMonitor;
use crate::scheduler::Scheduler;
use crate::types::{DeviceId, GenerationRequest, ProgressEvent, SessionId};
use crate::voice::VoiceResolver;
use crate::worker::Worker;

/// One device's wiring at startup.
pub struct DeviceSetup {
    pub id: DeviceId,
    pub name: String,
    pub backend: Arc<dyn DeviceBackend>,
    pub engine: Arc<dyn GenerationEngine>,
}

/// Entry point for callers: owns the device pool, the background monitor,
/// and the set of active sessions.
///
/// Construction requires a running tokio runtime; the status monitor is
/// spawned immediately.
pub struct Dispatcher {
    config: DispatchConfig,
    registry: Arc<DeviceRegistry>,
    coordinator: Arc<StreamingCoordinator>,
    active: Arc<Mutex<HashMap<SessionId, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        devices: Vec<DeviceSetup>,
        voices: Arc<dyn VoiceResolver>,
    ) -> Result<Self> {
        if devices.is_empty() {
            return Err(Error::NoDeviceAvailable("no devices configured".to_string()));
        }

        let mut statuses = Vec::with_capacity(devices.len());
        let mut backends: BTreeMap<DeviceId, Arc<dyn DeviceBackend>> = BTreeMap::new();
        let mut workers: BTreeMap<DeviceId, Arc<Worker>> = BTreeMap::new();

        for setup in devices {
            let status = match setup.backend.memory_reading() {
                Ok(memory) => {
                    let mut status = DeviceStatus::new(setup.id, &setup.name, memory.total_gb);
                    status.memory_used_gb = memory.used_gb;
                    status
                }
                Err(err) => {
                    warn!(device = setup.id, error = %err, "device failed to initialize");
                    DeviceStatus::offline(setup.id, format!("{} (error)", setup.name))
                }
            };
            statuses.push(status);
            backends.insert(setup.id, setup.backend);
            workers.insert(
                setup.id,
                Arc::new(Worker::new(
                    setup.id,
                    setup.engine,
                    config.sample_rate,
                    config.chunk_channel_capacity,
                )),
            );
        }

        let registry = Arc::new(DeviceRegistry::new(statuses));
        let shutdown = CancellationToken::new();
        let health = Arc::new(HealthManager::new(
            registry.clone(),
            backends.clone(),
            config.clone(),
            shutdown.clone(),
        ));
        let scheduler = Scheduler::new(registry.clone(), health.clone(), config.clone());
        let coordinator = Arc::new(StreamingCoordinator::new(
            config.clone(),
            registry.clone(),
            scheduler,
            health,
            workers,
            voices,
        ));

        StatusMonitor::new(registry.clone(), backends, config.clone()).spawn(shutdown.clone());
        info!(devices = registry.len(), "dispatcher started");

        Ok(Self {
            config,
            registry,
            coordinator,
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        })
    }

    /// Start one generation session. Progress events arrive on the returned
    /// receiver; the channel closes when the session reaches a terminal
    /// state.
    pub fn generate(&self, request: GenerationRequest) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(self.config.event_channel_capacity);
        let session = request.id.clone();
        let cancel = self.shutdown.child_token();

        lock_active(&self.active).insert(session.clone(), cancel.clone());
        info!(session = %session, "session accepted");

        let coordinator = Arc::clone(&self.coordinator);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            let state = coordinator.run_session(request, cancel, tx).await;
            lock_active(&active).remove(&session);
            info!(session = %session, state = ?state, "session closed");
        });

        rx
    }

    /// Cancel every active session. Idempotent; safe to call with none
    /// active.
    pub fn stop(&self) {
        let active = lock_active(&self.active);
        info!(sessions = active.len(), "stop requested");
        for cancel in active.values() {
            cancel.cancel();
        }
    }

    pub fn active_sessions(&self) -> usize {
        lock_active(&self.active).len()
    }

    /// Snapshot of every device's status, in ascending id order.
    pub async fn status_summary(&self) -> Vec<DeviceStatusSnapshot> {
        self.registry.snapshot().await
    }

    /// Human-readable pool summary with usage bars, one line per device.
    pub async fn status_text(&self) -> String {
        let mut lines = Vec::new();
        for status in self.status_summary().await {
            let mem_pct = if status.memory_total_gb > 0.0 {
                (status.memory_used_gb / status.memory_total_gb * 100.0).clamp(0.0, 100.0)
            } else {
                0.0
            };
            lines.push(format!(
                "{} | mem {} {:.1}/{:.1} GB | util {} {:>3.0}% | pending {} | {}",
                status.name,
                render_bar(mem_pct, 10),
                status.memory_used_gb,
                status.memory_total_gb,
                render_bar(status.utilization_pct, 10),
                status.utilization_pct,
                status.pending_work,
                if status.available {
                    "available"
                } else {
                    "unavailable"
                },
            ));
        }
        lines.join("\n")
    }

    /// Stop all sessions and halt the background monitor and any pending
    /// recovery probes.
    pub fn shutdown(&self) {
        info!("dispatcher shutting down");
        self.stop();
        self.shutdown.cancel();
    }
}

fn lock_active(
    active: &Mutex<HashMap<SessionId, CancellationToken>>,
) -> std::sync::MutexGuard<'_, HashMap<SessionId, CancellationToken>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

/// Fixed-width usage bar, e.g. `[###-------]`.
fn render_bar(pct: f64, width: usize) -> String {
    let filled = ((pct / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
