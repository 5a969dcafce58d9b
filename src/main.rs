use pv_capture::{
    camera::{CaptureSession, CaptureSystem, Device},
    cli::CliArgs,
    config::Config,
    frame::Channel8u,
    logging,
};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{after, select, tick};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the consumer loop looks for a new frame.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn main() -> Result<()> {
    // Parse command-line arguments
    let cli_args = CliArgs::parse();

    // Setup logging
    logging::setup_logging(cli_args.verbosity(), cli_args.log_file.as_deref())?;
    logging::log_app_start(env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(&cli_args)?;
    logging::log_app_config(&config);

    let sdk = Arc::new(config.simulator.build());
    let system = CaptureSystem::initialize(sdk, config.capture.clone())
        .context("Failed to initialize camera library")?;

    if cli_args.list {
        let devices = system.devices(true);
        let devices: Vec<&Device> = devices.iter().map(|d| d.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    let session = system.open_session(None).context("Failed to open camera")?;
    logging::log_device(session.device());

    if cli_args.attributes {
        let descriptors: Vec<_> = session
            .attributes()
            .context("Failed to read camera attributes")?
            .iter()
            .map(|binding| binding.describe())
            .collect();
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    session.start().context("Failed to start streaming")?;
    logging::log_session(&session);

    let duration = Duration::from_secs_f32(cli_args.duration_secs.max(0.0));
    info!("Streaming for {:.1} s", duration.as_secs_f32());
    let frames = consume_frames(&session, duration);

    session.stop();
    if let Some(pools) = session.pools() {
        logging::log_pool_stats("8u", &pools.channel8u.stats());
        logging::log_pool_stats("16u", &pools.channel16u.stats());
        logging::log_pool_stats("rgb", &pools.surface8u.stats());
    }
    session.close().context("Failed to close camera")?;

    info!("Received {} frames, application shutting down", frames);
    Ok(())
}

fn consume_frames(session: &CaptureSession, duration: Duration) -> u64 {
    let ticker = tick(POLL_INTERVAL);
    let deadline = after(duration);
    let started = Instant::now();
    let mut frames = 0u64;

    loop {
        select! {
            recv(ticker) -> _ => {
                if !session.check_new_frame() {
                    continue;
                }
                match session.get_channel() {
                    Some(channel) => {
                        frames += 1;
                        debug!(
                            "Frame {}: {}x{}, mean intensity {:.1}",
                            frames,
                            channel.width(),
                            channel.height(),
                            mean_intensity(&channel)
                        );
                    }
                    None => warn!("New frame in {} has no 8-bit view", session.pixel_format()),
                }
            }
            recv(deadline) -> _ => break,
        }
    }

    let elapsed = started.elapsed().as_secs_f32();
    if elapsed > 0.0 {
        info!("{:.1} frames per second", frames as f32 / elapsed);
    }
    frames
}

fn mean_intensity(channel: &Channel8u) -> f64 {
    let pixels = channel.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    pixels.iter().map(|&p| p as u64).sum::<u64>() as f64 / pixels.len() as f64
}
