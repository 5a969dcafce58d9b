use anyhow::Result;
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use log::{debug, info, LevelFilter};
use std::io;

use crate::camera::{CaptureSession, Device};
use crate::config::Config;
use crate::frame::PoolStats;

pub fn setup_logging(verbosity: u8, log_file: Option<&str>) -> Result<()> {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    let mut base_config = fern::Dispatch::new();

    base_config = match verbosity {
        0 => base_config.level(LevelFilter::Info),
        1 => base_config.level(LevelFilter::Debug),
        _ => base_config.level(LevelFilter::Trace),
    };

    // Separate file config so we can include year, month and day in file logs
    let file_config = fern::Dispatch::new().format(|out, message, record| {
        out.finish(format_args!(
            "{}[{}][{}] {}",
            Local::now().format("[%Y-%m-%d][%H:%M:%S%.3f]"),
            record.target(),
            record.level(),
            message
        ))
    });

    let stdout_config = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                Local::now().format("[%H:%M:%S%.3f]"),
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .chain(io::stdout());

    base_config = base_config.chain(stdout_config);

    if let Some(log_file) = log_file {
        base_config = base_config.chain(file_config.chain(fern::log_file(log_file)?));
    }

    base_config.apply()?;

    info!("Logging system initialized");
    debug!("Debug logging enabled");

    Ok(())
}

pub fn log_app_start(version: &str) {
    info!("Starting pv-capture v{}", version);
}

pub fn log_app_config(config: &Config) {
    let capture = &config.capture;
    info!("Application configured with:");
    info!("  Capture:");
    match capture.device_id {
        Some(id) => info!("    Device: {}", id),
        None => info!("    Device: first discovered"),
    }
    info!("    Pool capacity: {}", capture.pool_capacity);
    info!("    Packet size: {}", capture.packet_size);
    info!(
        "    Discovery: {:.1} s, polled every {} ms",
        capture.discovery_timeout_secs, capture.discovery_poll_ms
    );
    if !capture.preferred_pixel_formats.is_empty() {
        info!("    Pixel formats: {}", capture.preferred_pixel_formats.join(", "));
    }
    info!("  Simulator:");
    info!("    Frame interval: {} ms", config.simulator.frame_interval_ms);
    for camera in &config.simulator.devices {
        info!(
            "    Camera {}: {}x{} {}",
            camera.id, camera.width, camera.height, camera.pixel_format
        );
    }
}

pub fn log_device(device: &Device) {
    info!(
        "Using camera {} \"{}\" {} (serial {}, firmware {})",
        device.id, device.camera_name, device.model_name, device.serial_number, device.firmware_version
    );
}

pub fn log_session(session: &CaptureSession) {
    let (width, height) = session.size();
    info!(
        "Session {:?}: {}x{} ({:.3}), {}",
        session.state(),
        width,
        height,
        session.aspect_ratio(),
        session.pixel_format()
    );
}

pub fn log_pool_stats(name: &str, stats: &PoolStats) {
    info!(
        "Pool {}: {} of {} in use, {} checkouts, {} fallback allocations",
        name, stats.in_use, stats.capacity, stats.checkouts, stats.fallbacks
    );
}
