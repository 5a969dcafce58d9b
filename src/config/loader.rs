use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::camera::CaptureConfig;
use crate::cli::CliArgs;
use crate::error::AppError;
use crate::sdk::{DeviceId, SimulatedDevice, SimulatedSdk};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub simulator: SimulatorConfig,
}

/// Cameras exposed by the in-process SDK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Interval of generated frames while acquisition runs; 0 disables the generator.
    pub frame_interval_ms: u64,
    pub devices: Vec<SimulatedCameraConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedCameraConfig {
    pub id: DeviceId,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    pub name: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub firmware: Option<String>,
}

fn default_pixel_format() -> String {
    "Mono8".to_string()
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 33,
            devices: vec![SimulatedCameraConfig {
                id: 7,
                width: 640,
                height: 480,
                pixel_format: default_pixel_format(),
                name: None,
                model: None,
                serial: None,
                firmware: None,
            }],
        }
    }
}

impl SimulatedCameraConfig {
    fn to_device(&self) -> SimulatedDevice {
        let mut device = SimulatedDevice::new(self.id, self.width, self.height)
            .with_pixel_format(self.pixel_format.clone());
        if let Some(name) = &self.name {
            device = device.with_name(name.clone());
        }
        if let Some(model) = &self.model {
            device = device.with_model(model.clone());
        }
        if let Some(serial) = &self.serial {
            device = device.with_serial(serial.clone());
        }
        if let Some(firmware) = &self.firmware {
            device = device.with_firmware(firmware.clone());
        }
        device
    }
}

impl SimulatorConfig {
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.frame_interval_ms > 0).then(|| Duration::from_millis(self.frame_interval_ms))
    }

    pub fn build(&self) -> SimulatedSdk {
        let mut sdk = self
            .devices
            .iter()
            .fold(SimulatedSdk::new(), |sdk, camera| sdk.with_device(camera.to_device()));
        if let Some(interval) = self.frame_interval() {
            sdk = sdk.with_frame_interval(interval);
        }
        sdk
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut ids = HashSet::new();
        for camera in &self.devices {
            if !ids.insert(camera.id) {
                return Err(format!("Simulated camera id {} is used twice", camera.id));
            }
            if camera.width == 0 || camera.height == 0 {
                return Err(format!("Simulated camera {} must have a non-empty sensor", camera.id));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Reads the TOML file named on the command line, if any, applies the
    /// command line overrides and validates the result.
    pub fn load(cli_args: &CliArgs) -> Result<Self> {
        let mut config = match cli_args.config.as_deref() {
            Some(path) => {
                info!("Loading configuration from {}", path);
                let config_str = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path))?;
                Self::from_toml(&config_str)
                    .with_context(|| format!("Failed to parse config file: {}", path))?
            }
            None => {
                info!("No configuration file given, using defaults");
                Self::default()
            }
        };

        config.override_with_cli_args(cli_args);
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(config_str: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(config_str)?)
    }

    fn override_with_cli_args(&mut self, args: &CliArgs) {
        if let Some(device_id) = args.device_id {
            self.capture.device_id = Some(device_id);
        }
        if let Some(pixel_format) = &args.pixel_format {
            self.capture.preferred_pixel_formats = vec![pixel_format.clone()];
        }
        if let Some(capacity) = args.pool_capacity {
            self.capture.pool_capacity = capacity;
        }
        if let Some(interval) = args.frame_interval_ms {
            self.simulator.frame_interval_ms = interval;
        }
    }

    fn validate(&self) -> Result<()> {
        self.capture
            .validate()
            .map_err(AppError::config)
            .context("Invalid capture configuration")?;
        self.simulator
            .validate()
            .map_err(AppError::config)
            .context("Invalid simulator configuration")?;
        Ok(())
    }
}
