use log::{info, warn};
use std::sync::Arc;

use super::config::CaptureConfig;
use super::hotplug::HotplugMonitor;
use super::registry::{DeviceRef, DeviceRegistry};
use super::session::CaptureSession;
use crate::error::{CaptureError, ErrorKind, SdkResultExt};
use crate::sdk::{CameraSdk, DeviceId};

/// Process-wide owner of the camera library.
///
/// Initialises the SDK, installs the hot-plug monitor and owns the device
/// registry. Dropping it unregisters the callbacks and shuts the SDK down, so
/// sessions should be dropped first.
pub struct CaptureSystem {
    sdk: Arc<dyn CameraSdk>,
    config: CaptureConfig,
    registry: DeviceRegistry,
    hotplug: Arc<HotplugMonitor>,
}

impl CaptureSystem {
    pub fn initialize(sdk: Arc<dyn CameraSdk>, config: CaptureConfig) -> Result<Self, CaptureError> {
        sdk.initialize()
            .raise(ErrorKind::Initialization, "initialize camera library")?;
        let hotplug = HotplugMonitor::install(Arc::clone(&sdk));
        let registry =
            DeviceRegistry::new(Arc::clone(&sdk)).with_poll_interval(config.discovery_poll_interval());
        info!("Camera library initialized");
        Ok(Self {
            sdk,
            config,
            registry,
            hotplug,
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn hotplug(&self) -> &Arc<HotplugMonitor> {
        &self.hotplug
    }

    /// Attached cameras, using the configured discovery timeout.
    pub fn devices(&self, force_refresh: bool) -> Vec<DeviceRef> {
        self.registry
            .list(force_refresh, self.config.discovery_timeout())
    }

    /// Resolves the camera to use: `id`, else the configured one, else the first discovered.
    pub fn find_device(&self, id: Option<DeviceId>) -> Result<DeviceRef, CaptureError> {
        let timeout = self.config.discovery_timeout();
        match id.or(self.config.device_id) {
            Some(id) => self
                .registry
                .find(id, timeout)
                .ok_or_else(|| CaptureError::device_not_found(format!("camera {}", id))),
            None => self
                .registry
                .first(timeout)
                .ok_or_else(|| CaptureError::device_not_found("no camera attached")),
        }
    }

    /// Creates a session for the resolved camera, follows its link events and opens it.
    pub fn open_session(&self, id: Option<DeviceId>) -> Result<Arc<CaptureSession>, CaptureError> {
        let device = self.find_device(id)?;
        let session = CaptureSession::new(
            Arc::clone(&self.sdk),
            device,
            self.config.clone(),
            Some(Arc::clone(&self.hotplug)),
        );
        session.open()?;
        Ok(session)
    }
}

impl Drop for CaptureSystem {
    fn drop(&mut self) {
        if Arc::strong_count(&self.hotplug) > 1 {
            warn!("Shutting down the camera library with sessions still alive");
        }
        self.hotplug.uninstall();
        self.sdk.uninitialize();
        info!("Camera library shut down");
    }
}
