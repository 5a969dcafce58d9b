//! Camera discovery, capture sessions and hot-plug handling.

mod attributes;
mod config;
mod hotplug;
mod registry;
mod session;
mod system;

pub use attributes::{bind_attributes, is_read_only, split_category, AttributeBinding, AttributeDescriptor};
pub use config::{CaptureConfig, DEFAULT_PACKET_SIZE};
pub use hotplug::{HotplugMonitor, HotplugTarget};
pub use registry::{Device, DeviceRef, DeviceRegistry, DEFAULT_POLL_INTERVAL};
pub use session::{CaptureSession, SessionState};
pub use system::CaptureSystem;
