use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use crate::info::{normalize_mac, DeviceInfo};
use crate::lock;
use crate::messenger::DeviceMessenger;

#[derive(Default)]
struct KeepAliveEntry {
    device: Option<Arc<DeviceInfo>>,
    messenger: Option<Arc<DeviceMessenger>>,
    /// Attempt currently allowed to attach, if a connect is in flight.
    pending: Option<u64>,
}

/// A connection attempt handed out by [`KeepAliveTable::observe`].
///
/// Only the attempt its entry is waiting for may attach or report failure.
/// Attempts from before a `remove` are stale even if the device is requested
/// again.
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub device: Arc<DeviceInfo>,
    id: u64,
}

impl ConnectAttempt {
    pub fn mac(&self) -> &str {
        &self.device.mac
    }
}

/// Connection state of a requested device.
#[derive(Debug, Clone, Serialize)]
pub struct KeepAliveStatus {
    pub mac: String,
    /// Latest discovery details, if the device has answered yet.
    pub device: Option<DeviceInfo>,
    pub connected: bool,
    /// Messenger state, when one is attached.
    pub state: Option<String>,
}

/// Hardware addresses the user asked to keep connected, each with at most
/// one live messenger.
///
/// Every check-then-act on an entry happens under the single table lock.
#[derive(Default)]
pub struct KeepAliveTable {
    entries: Mutex<HashMap<String, KeepAliveEntry>>,
    next_attempt: AtomicU64,
}

impl KeepAliveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a device. Returns `false` if it was already requested.
    pub fn insert(&self, mac: &str) -> bool {
        let mut entries = lock(&self.entries);
        let mac = normalize_mac(mac);
        if entries.contains_key(&mac) {
            return false;
        }
        entries.insert(mac, KeepAliveEntry::default());
        true
    }

    /// Drop a request, handing back its messenger for the caller to kill.
    pub fn remove(&self, mac: &str) -> Option<Option<Arc<DeviceMessenger>>> {
        lock(&self.entries)
            .remove(&normalize_mac(mac))
            .map(|entry| entry.messenger)
    }

    pub fn contains(&self, mac: &str) -> bool {
        lock(&self.entries).contains_key(&normalize_mac(mac))
    }

    /// Live messenger for a device, if attached.
    pub fn messenger(&self, mac: &str) -> Option<Arc<DeviceMessenger>> {
        lock(&self.entries)
            .get(&normalize_mac(mac))
            .and_then(|entry| entry.messenger.clone())
    }

    /// Record the latest discovery details of a requested device.
    ///
    /// Returns a connection attempt when the device has neither a messenger
    /// nor an attempt in flight, so concurrent observations start at most one.
    pub fn observe(&self, device: &Arc<DeviceInfo>) -> Option<ConnectAttempt> {
        let mut entries = lock(&self.entries);
        let entry = entries.get_mut(&device.mac)?;
        if entry.device.as_deref() != Some(&**device) {
            entry.device = Some(Arc::clone(device));
        }
        if entry.messenger.is_some() || entry.pending.is_some() {
            return None;
        }
        let id = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        entry.pending = Some(id);
        Some(ConnectAttempt {
            device: Arc::clone(device),
            id,
        })
    }

    /// Release a failed attempt so the next observation may retry.
    ///
    /// Ignored unless `attempt` is the one the entry is waiting for.
    pub fn connect_failed(&self, attempt: &ConnectAttempt) {
        if let Some(entry) = lock(&self.entries).get_mut(attempt.mac()) {
            if entry.pending == Some(attempt.id) {
                entry.pending = None;
            }
        }
    }

    /// Install the messenger an attempt connected.
    ///
    /// Fails when the attempt is stale (the device was forgotten or
    /// re-requested in the meantime), the entry already holds a live
    /// messenger, or this one already died; the caller must then kill it.
    pub fn attach(&self, attempt: &ConnectAttempt, messenger: Arc<DeviceMessenger>) -> bool {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(attempt.mac()) else {
            return false;
        };
        if entry.pending != Some(attempt.id) {
            debug!(mac = attempt.mac(), "stale connection attempt");
            return false;
        }
        entry.pending = None;
        let occupied = entry
            .messenger
            .as_ref()
            .is_some_and(|current| !current.is_terminated());
        if occupied || messenger.is_terminated() {
            return false;
        }
        entry.messenger = Some(messenger);
        true
    }

    /// Remove `messenger` from its entry, if it is still the attached one.
    pub fn detach(&self, mac: &str, messenger: &DeviceMessenger) -> bool {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(mac) else {
            return false;
        };
        let attached = entry
            .messenger
            .as_ref()
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), messenger));
        if attached {
            entry.messenger = None;
            debug!(mac, "messenger detached");
        }
        attached
    }

    /// Status of every request, ordered by hardware address.
    pub fn snapshot(&self) -> Vec<KeepAliveStatus> {
        let mut statuses: Vec<KeepAliveStatus> = lock(&self.entries)
            .iter()
            .map(|(mac, entry)| KeepAliveStatus {
                mac: mac.clone(),
                device: entry.device.as_deref().cloned(),
                connected: entry.messenger.is_some(),
                state: entry
                    .messenger
                    .as_ref()
                    .map(|messenger| messenger.state().to_string()),
            })
            .collect();
        statuses.sort_by(|a, b| a.mac.cmp(&b.mac));
        statuses
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
