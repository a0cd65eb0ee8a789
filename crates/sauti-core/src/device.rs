//! Device status registry and per-device pending-work accounting.
//!
//! One [`DeviceStatus`] exists per configured device for the life of the
//! process. Devices are never removed, only flagged unavailable. Status
//! fields are written by the status monitor and the health manager; the
//! pending-work counter is a scheduling signal owned by its own per-device
//! lock, never a global one.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::RwLock;

use crate::types::DeviceId;

/// Status of one accelerator device.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub id: DeviceId,
    pub name: String,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub utilization_pct: f64,
    pub pending_work: usize,
    pub available: bool,
    pub last_updated: Instant,
}

impl DeviceStatus {
    pub fn new(id: DeviceId, name: impl Into<String>, memory_total_gb: f64) -> Self {
        Self {
            id,
            name: name.into(),
            memory_used_gb: 0.0,
            memory_total_gb,
            utilization_pct: 0.0,
            pending_work: 0,
            available: true,
            last_updated: Instant::now(),
        }
    }

    /// Status for a device that failed to initialize.
    pub fn offline(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::new(id, name, 0.0)
        }
    }

    pub fn memory_free_gb(&self) -> f64 {
        (self.memory_total_gb - self.memory_used_gb).max(0.0)
    }

    /// Memory usage percentage, always within [0, 100]. Zero when the total
    /// is unknown.
    pub fn memory_usage_pct(&self) -> f64 {
        if self.memory_total_gb > 0.0 {
            (self.memory_used_gb / self.memory_total_gb * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

/// Read-only, serializable view of one device's status.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusSnapshot {
    pub id: DeviceId,
    pub name: String,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub utilization_pct: f64,
    pub pending_work: usize,
    pub available: bool,
    /// Age of the last monitor reading, in seconds
    pub reading_age_secs: f64,
}

struct DeviceEntry {
    status: RwLock<DeviceStatus>,
    /// Pending-work counter, guarded by its own lock. A scheduling signal,
    /// not a queue of work items.
    pending: Mutex<usize>,
}

/// Registry of all configured devices, keyed by device id.
pub struct DeviceRegistry {
    devices: BTreeMap<DeviceId, Arc<DeviceEntry>>,
}

impl DeviceRegistry {
    pub fn new(statuses: Vec<DeviceStatus>) -> Self {
        let devices = statuses
            .into_iter()
            .map(|status| {
                (
                    status.id,
                    Arc::new(DeviceEntry {
                        status: RwLock::new(status),
                        pending: Mutex::new(0),
                    }),
                )
            })
            .collect();
        Self { devices }
    }

    /// Device ids in ascending order.
    pub fn ids(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub async fn status(&self, id: DeviceId) -> Option<DeviceStatus> {
        match self.devices.get(&id) {
            Some(entry) => Some(entry.status.read().await.clone()),
            None => None,
        }
    }

    /// All device statuses in ascending id order.
    pub async fn statuses(&self) -> Vec<DeviceStatus> {
        let mut out = Vec::with_capacity(self.devices.len());
        for entry in self.devices.values() {
            out.push(entry.status.read().await.clone());
        }
        out
    }

    /// Serializable snapshot of the registry for status queries.
    pub async fn snapshot(&self) -> Vec<DeviceStatusSnapshot> {
        let mut out = Vec::with_capacity(self.devices.len());
        for entry in self.devices.values() {
            let status = entry.status.read().await;
            out.push(DeviceStatusSnapshot {
                id: status.id,
                name: status.name.clone(),
                memory_used_gb: status.memory_used_gb,
                memory_total_gb: status.memory_total_gb,
                utilization_pct: status.utilization_pct,
                pending_work: self.pending_work(status.id),
                available: status.available,
                reading_age_secs: status.last_updated.elapsed().as_secs_f64(),
            });
        }
        out
    }

    /// Overwrite one device's monitored fields and refresh its timestamp.
    /// Availability is owned by the health manager and left untouched.
    pub async fn apply_reading(
        &self,
        id: DeviceId,
        memory_used_gb: f64,
        memory_total_gb: f64,
        utilization_pct: f64,
        pending_work: usize,
    ) {
        if let Some(entry) = self.devices.get(&id) {
            let mut status = entry.status.write().await;
            status.memory_used_gb = memory_used_gb;
            status.memory_total_gb = memory_total_gb;
            status.utilization_pct = utilization_pct;
            status.pending_work = pending_work;
            status.last_updated = Instant::now();
        }
    }

    pub async fn set_available(&self, id: DeviceId, available: bool) {
        if let Some(entry) = self.devices.get(&id) {
            let mut status = entry.status.write().await;
            status.available = available;
            status.last_updated = Instant::now();
        }
    }

    /// Live pending-work count for one device.
    pub fn pending_work(&self, id: DeviceId) -> usize {
        match self.devices.get(&id) {
            Some(entry) => *lock_pending(&entry.pending),
            None => 0,
        }
    }

    /// Increment the device's pending-work counter under its own lock and
    /// return a guard that decrements it exactly once when dropped. The
    /// guard makes the release hold on every session exit path.
    pub fn begin_work(&self, id: DeviceId) -> Option<PendingWorkGuard> {
        let entry = self.devices.get(&id)?;
        *lock_pending(&entry.pending) += 1;
        Some(PendingWorkGuard {
            device: id,
            entry: Arc::clone(entry),
        })
    }
}

/// RAII guard for one unit of admitted work on a device.
pub struct PendingWorkGuard {
    device: DeviceId,
    entry: Arc<DeviceEntry>,
}

impl PendingWorkGuard {
    pub fn device(&self) -> DeviceId {
        self.device
    }
}

impl Drop for PendingWorkGuard {
    fn drop(&mut self) {
        let mut pending = lock_pending(&self.entry.pending);
        *pending = pending.saturating_sub(1);
    }
}

fn lock_pending(pending: &Mutex<usize>) -> std::sync::MutexGuard<'_, usize> {
    // A poisoned counter lock only means a panic elsewhere; the count itself
    // stays usable.
    pending.lock().unwrap_or_else(|e| e.into_inner())
}
