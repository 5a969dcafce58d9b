use log::{debug, info};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use crate::sdk::{CameraInfo, CameraSdk, DeviceId};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Identity of a discovered camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: DeviceId,
    pub camera_name: String,
    pub model_name: String,
    pub serial_number: String,
    pub firmware_version: String,
}

pub type DeviceRef = Arc<Device>;

impl From<CameraInfo> for Device {
    fn from(info: CameraInfo) -> Self {
        Self {
            id: info.unique_id,
            camera_name: info.camera_name,
            model_name: info.model_name,
            serial_number: info.serial_number,
            firmware_version: info.firmware_version,
        }
    }
}

/// Cached list of attached cameras.
///
/// The cache is replaced as a whole by [`DeviceRegistry::enumerate`], so a
/// reader never sees a partially filled list.
pub struct DeviceRegistry {
    sdk: Arc<dyn CameraSdk>,
    poll_interval: Duration,
    devices: RwLock<Option<Vec<DeviceRef>>>,
}

impl DeviceRegistry {
    pub fn new(sdk: Arc<dyn CameraSdk>) -> Self {
        Self {
            sdk,
            poll_interval: DEFAULT_POLL_INTERVAL,
            devices: RwLock::new(None),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Live number of attached cameras; may differ from the cached list.
    pub fn count(&self) -> usize {
        self.sdk.camera_count()
    }

    pub fn is_enumerated(&self) -> bool {
        self.devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Polls until a camera shows up or `timeout` elapses, then replaces the cache.
    ///
    /// An empty list is a valid result.
    pub fn enumerate(&self, timeout: Duration) -> Vec<DeviceRef> {
        let interval = self.poll_interval.max(Duration::from_millis(1));
        let iterations = (timeout.as_millis() / interval.as_millis()) as usize;
        for _ in 0..iterations {
            if self.sdk.camera_count() > 0 {
                break;
            }
            thread::sleep(interval);
        }

        let devices: Vec<DeviceRef> = self
            .sdk
            .camera_list()
            .into_iter()
            .map(|info| Arc::new(Device::from(info)))
            .collect();
        info!("Enumerated {} camera(s)", devices.len());
        for device in &devices {
            debug!(
                "  {} {} {} (serial {}, firmware {})",
                device.id,
                device.camera_name,
                device.model_name,
                device.serial_number,
                device.firmware_version
            );
        }

        *self
            .devices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(devices.clone());
        devices
    }

    /// Cached list, enumerated first when forced or never done before.
    pub fn list(&self, force_refresh: bool, timeout: Duration) -> Vec<DeviceRef> {
        if !force_refresh {
            let cached = self
                .devices
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(devices) = cached.as_ref() {
                return devices.clone();
            }
        }
        self.enumerate(timeout)
    }

    /// Looks `id` up in the cache, refreshing it once when the id is missing.
    pub fn find(&self, id: DeviceId, timeout: Duration) -> Option<DeviceRef> {
        let lookup = |devices: Vec<DeviceRef>| devices.into_iter().find(|d| d.id == id);
        lookup(self.list(false, timeout)).or_else(|| lookup(self.enumerate(timeout)))
    }

    pub fn first(&self, timeout: Duration) -> Option<DeviceRef> {
        self.list(false, timeout).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::{SimulatedDevice, SimulatedSdk};
    use std::time::Instant;

    fn registry(sdk: &SimulatedSdk) -> DeviceRegistry {
        sdk.initialize().unwrap();
        DeviceRegistry::new(Arc::new(sdk.clone())).with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_empty_list_is_not_an_error() {
        let sdk = SimulatedSdk::new();
        let registry = registry(&sdk);
        assert!(registry.enumerate(Duration::from_millis(20)).is_empty());
        assert!(registry.is_enumerated());
    }

    #[test]
    fn test_list_is_cached_until_forced() {
        let sdk = SimulatedSdk::new().with_device(SimulatedDevice::new(7, 64, 48));
        let registry = registry(&sdk);

        let devices = registry.list(false, Duration::ZERO);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, 7);
        assert_eq!(devices[0].camera_name, "SimCam 7");

        sdk.attach(SimulatedDevice::new(8, 64, 48));
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.list(false, Duration::ZERO).len(), 1);
        assert_eq!(registry.list(true, Duration::ZERO).len(), 2);
    }

    #[test]
    fn test_enumerate_returns_once_a_camera_appears() {
        let sdk = SimulatedSdk::new().with_device(SimulatedDevice::new(1, 8, 8));
        let registry = registry(&sdk);

        let started = Instant::now();
        assert_eq!(registry.enumerate(Duration::from_secs(5)).len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_find_refreshes_for_unknown_id() {
        let sdk = SimulatedSdk::new().with_device(SimulatedDevice::new(1, 8, 8));
        let registry = registry(&sdk);
        assert_eq!(registry.first(Duration::ZERO).map(|d| d.id), Some(1));

        sdk.attach(SimulatedDevice::new(2, 8, 8));
        assert_eq!(registry.find(2, Duration::ZERO).map(|d| d.id), Some(2));
        assert!(registry.find(3, Duration::ZERO).is_none());
    }
}
