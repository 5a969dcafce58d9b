mod loader;

pub use loader::{Config, SimulatedCameraConfig, SimulatorConfig};
