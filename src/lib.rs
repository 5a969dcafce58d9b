//! Frame acquisition for machine-vision cameras.
//!
//! This library provides:
//! - Discovery of attached cameras and hot-plug handling
//! - Capture sessions streaming on a dedicated acquisition thread
//! - Pixel format conversion into recycled image buffers
//! - An in-process camera SDK for running without hardware

pub mod camera;
pub mod cli;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod sdk;

pub use camera::{
    bind_attributes, AttributeBinding, CaptureConfig, CaptureSession, CaptureSystem, Device,
    DeviceRegistry, HotplugMonitor, SessionState,
};
pub use config::Config;
pub use error::{AppError, CaptureError, Result};
pub use frame::{BufferPool, FrameProcessor, PixelFormat, PooledBuffer, Roi};
pub use sdk::{CameraSdk, SdkError, SimulatedDevice, SimulatedSdk};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging for an application using the library.
///
/// # Arguments
///
/// * `debug` - Whether to enable debug logging
/// * `log_file` - Optional path to a log file. If None, logs will only be output to stdout.
pub fn initialize(debug: bool, log_file: Option<&str>) -> anyhow::Result<()> {
    logging::setup_logging(debug as u8, log_file)?;
    logging::log_app_start(VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty(), "Version should not be empty");
    }
}
