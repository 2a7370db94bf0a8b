use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::info::{normalize_mac, DeviceInfo};
use crate::lock;

/// Outcome of recording a discovery answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryUpdate {
    /// First answer for this hardware address.
    Inserted,
    /// Known address whose details changed; the old entry was replaced.
    Superseded,
    /// Known address, identical details.
    Unchanged,
}

/// Every receiver discovered since startup, keyed by hardware address.
///
/// Entries are never removed. A re-discovered device with different details
/// replaces its entry, so there is at most one entry per address.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, Arc<DeviceInfo>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovered device and return the current entry.
    pub fn record(&self, mut device: DeviceInfo) -> (Arc<DeviceInfo>, RegistryUpdate) {
        device.mac = normalize_mac(&device.mac);
        let mut devices = lock(&self.devices);
        match devices.get(&device.mac) {
            Some(existing) if **existing == device => {
                (Arc::clone(existing), RegistryUpdate::Unchanged)
            }
            Some(_) => {
                debug!(mac = %device.mac, addr = %device.control_addr(), "device details changed");
                let device = Arc::new(device);
                devices.insert(device.mac.clone(), Arc::clone(&device));
                (device, RegistryUpdate::Superseded)
            }
            None => {
                info!(model = %device.model, mac = %device.mac, addr = %device.control_addr(), "discovered device");
                let device = Arc::new(device);
                devices.insert(device.mac.clone(), Arc::clone(&device));
                (device, RegistryUpdate::Inserted)
            }
        }
    }

    /// Look up a device by hardware address (any case).
    pub fn get(&self, mac: &str) -> Option<Arc<DeviceInfo>> {
        lock(&self.devices).get(&normalize_mac(mac)).cloned()
    }

    /// Copy of every entry, ordered by hardware address.
    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<DeviceInfo> = lock(&self.devices)
            .values()
            .map(|device| DeviceInfo::clone(device))
            .collect();
        devices.sort_by(|a, b| a.mac.cmp(&b.mac));
        devices
    }

    pub fn len(&self) -> usize {
        lock(&self.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
