//! A fixed set of device providers, registered up front.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::traits::{DeviceActionProvider, DevicePool};

/// [`DevicePool`] over providers registered by the host. Keyed by
/// [`DeviceActionProvider::device_id`].
#[derive(Clone, Default)]
pub struct StaticDevicePool {
    devices: Arc<RwLock<BTreeMap<String, Arc<dyn DeviceActionProvider>>>>,
}

impl StaticDevicePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, device: Arc<dyn DeviceActionProvider>) {
        let id = device.device_id().to_string();
        self.devices.write().insert(id, device);
    }

    /// Drop a device, e.g. on disconnect. Runs already holding it keep it.
    pub fn remove(&self, device_id: &str) -> bool {
        self.devices.write().remove(device_id).is_some()
    }
}

impl DevicePool for StaticDevicePool {
    fn actions(&self, device_id: &str) -> Option<Arc<dyn DeviceActionProvider>> {
        self.devices.read().get(device_id).cloned()
    }

    fn device_ids(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }
}
