use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::frame::{PixelFormat, DEFAULT_POOL_CAPACITY};
use crate::sdk::DeviceId;

/// Largest packet size the capture layer asks the link for.
pub const DEFAULT_PACKET_SIZE: u32 = 8228;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera to open; the first discovered one when unset.
    pub device_id: Option<DeviceId>,
    pub pool_capacity: usize,
    pub packet_size: u32,
    pub discovery_timeout_secs: f32,
    pub discovery_poll_ms: u64,
    /// Pixel formats tried in order before streaming starts.
    pub preferred_pixel_formats: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            packet_size: DEFAULT_PACKET_SIZE,
            discovery_timeout_secs: 1.0,
            discovery_poll_ms: 100,
            preferred_pixel_formats: Vec::new(),
        }
    }
}

impl CaptureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_id(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    pub fn with_discovery_timeout(mut self, seconds: f32) -> Self {
        self.discovery_timeout_secs = seconds;
        self
    }

    pub fn with_discovery_poll(mut self, millis: u64) -> Self {
        self.discovery_poll_ms = millis;
        self
    }

    pub fn with_preferred_pixel_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_pixel_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.discovery_timeout_secs.max(0.0))
    }

    pub fn discovery_poll_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_poll_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.pool_capacity == 0 {
            return Err("Pool capacity must be greater than 0".to_string());
        }
        if self.packet_size == 0 {
            return Err("Packet size must be greater than 0".to_string());
        }
        if !self.discovery_timeout_secs.is_finite() || self.discovery_timeout_secs < 0.0 {
            return Err("Discovery timeout must be a non-negative number of seconds".to_string());
        }
        if self.discovery_poll_ms == 0 {
            return Err("Discovery poll interval must be greater than 0".to_string());
        }
        if let Some(format) = self
            .preferred_pixel_formats
            .iter()
            .find(|f| !PixelFormat::from_sdk_name(f).is_supported())
        {
            return Err(format!("Pixel format {} has no conversion path", format));
        }
        Ok(())
    }
}
