use clap::Parser;

use crate::sdk::DeviceId;

/// Streams frames from a simulated machine-vision camera.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<String>,

    /// Camera to open instead of the first one found
    #[arg(long)]
    pub device_id: Option<DeviceId>,

    /// Pixel format to request before streaming
    #[arg(long)]
    pub pixel_format: Option<String>,

    #[arg(long)]
    pub pool_capacity: Option<usize>,

    /// Interval of simulated frames in milliseconds
    #[arg(long)]
    pub frame_interval_ms: Option<u64>,

    #[arg(long, default_value_t = 5.0)]
    pub duration_secs: f32,

    /// Print the attached cameras as JSON and exit
    #[arg(long)]
    pub list: bool,

    /// Print the camera's attributes as JSON and exit
    #[arg(long)]
    pub attributes: bool,

    #[arg(long, default_value_t = false)]
    pub debug: bool,

    #[arg(long)]
    pub log_file: Option<String>,
}

impl CliArgs {
    pub fn verbosity(&self) -> u8 {
        self.debug as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::parse_from(["pv-capture"]);
        assert_eq!(args.config, None);
        assert_eq!(args.device_id, None);
        assert_eq!(args.duration_secs, 5.0);
        assert!(!args.list);
        assert_eq!(args.verbosity(), 0);
    }

    #[test]
    fn test_flags() {
        let args = CliArgs::parse_from([
            "pv-capture",
            "--device-id",
            "7",
            "--attributes",
            "--debug",
            "--duration-secs",
            "0.5",
        ]);
        assert_eq!(args.device_id, Some(7));
        assert!(args.attributes);
        assert_eq!(args.verbosity(), 1);
        assert_eq!(args.duration_secs, 0.5);
    }
}
