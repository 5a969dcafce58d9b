//! Routing of link add/remove notifications to capture sessions.
//!
//! The SDK accepts a single callback per event kind for the whole process.
//! [`HotplugMonitor`] registers that pair once and keeps a table from device
//! id to the session bound to it, so any number of sessions can follow their
//! own camera.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::SdkResultExt;
use crate::sdk::{CameraSdk, DeviceId, LinkCallback, LinkEvent};

/// Receiver of link events for one device.
///
/// Called on the SDK's notification thread.
pub trait HotplugTarget: Send + Sync {
    fn device_added(&self, id: DeviceId);
    fn device_removed(&self, id: DeviceId);
}

type TargetTable = Mutex<HashMap<DeviceId, Weak<dyn HotplugTarget>>>;

pub struct HotplugMonitor {
    sdk: Arc<dyn CameraSdk>,
    targets: Arc<TargetTable>,
    installed: Mutex<bool>,
}

fn lock(table: &TargetTable) -> MutexGuard<'_, HashMap<DeviceId, Weak<dyn HotplugTarget>>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn dispatch(table: &TargetTable, event: LinkEvent, id: DeviceId) {
    info!("Camera {} {}", id, match event {
        LinkEvent::Add => "added",
        LinkEvent::Remove => "removed",
    });
    // The table lock is released before the target runs.
    let target = lock(table).get(&id).and_then(Weak::upgrade);
    match (target, event) {
        (Some(target), LinkEvent::Add) => target.device_added(id),
        (Some(target), LinkEvent::Remove) => target.device_removed(id),
        (None, _) => debug!("No session bound to camera {}", id),
    }
}

impl HotplugMonitor {
    /// Registers the process-wide add and remove callbacks.
    ///
    /// A failed registration is logged; the monitor then never sees events.
    pub fn install(sdk: Arc<dyn CameraSdk>) -> Arc<Self> {
        let targets: Arc<TargetTable> = Arc::new(Mutex::new(HashMap::new()));
        let mut installed = true;
        for event in [LinkEvent::Add, LinkEvent::Remove] {
            let table = Arc::downgrade(&targets);
            let callback: LinkCallback = Arc::new(move |event: LinkEvent, id: DeviceId| {
                if let Some(table) = table.upgrade() {
                    dispatch(&table, event, id);
                }
            });
            installed &= sdk
                .link_callback_register(event, callback)
                .check(&format!("register {:?} link callback", event))
                .is_some();
        }
        if !installed {
            warn!("Hot-plug monitoring unavailable");
        }
        Arc::new(Self {
            sdk,
            targets,
            installed: Mutex::new(installed),
        })
    }

    pub fn is_installed(&self) -> bool {
        *self.installed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Binds `target` to `id`, replacing any previous binding.
    pub fn register(&self, id: DeviceId, target: Weak<dyn HotplugTarget>) {
        if lock(&self.targets).insert(id, target).is_some() {
            warn!("Camera {} was already bound to a session, rebinding", id);
        }
        debug!("Camera {} bound for hot-plug events", id);
    }

    /// Removes the binding of `id` if it still points at `target`.
    pub fn unregister(&self, id: DeviceId, target: &Weak<dyn HotplugTarget>) {
        let mut targets = lock(&self.targets);
        if targets.get(&id).map_or(false, |bound| bound.ptr_eq(target)) {
            targets.remove(&id);
            debug!("Camera {} unbound from hot-plug events", id);
        }
    }

    pub fn is_registered(&self, id: DeviceId) -> bool {
        lock(&self.targets)
            .get(&id)
            .map_or(false, |target| target.strong_count() > 0)
    }

    /// Delivers an event as if it came from the SDK.
    pub fn dispatch(&self, event: LinkEvent, id: DeviceId) {
        dispatch(&self.targets, event, id);
    }

    /// Unregisters the SDK callbacks. Safe to call more than once.
    pub fn uninstall(&self) {
        let mut installed = self.installed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !*installed {
            return;
        }
        for event in [LinkEvent::Add, LinkEvent::Remove] {
            self.sdk
                .link_callback_unregister(event)
                .check(&format!("unregister {:?} link callback", event));
        }
        *installed = false;
        lock(&self.targets).clear();
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.uninstall();
    }
}
