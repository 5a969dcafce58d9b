use image::{Luma, Rgb};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::pool::{BufferPool, PooledBuffer};

/// Raw pixel encoding the camera is currently configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PixelFormat {
    Mono8,
    Mono16,
    Mono12Packed,
    Rgb24,
    NotSupported,
}

impl PixelFormat {
    /// Maps the SDK's pixel format name. Anything unknown is `NotSupported`.
    pub fn from_sdk_name(name: &str) -> Self {
        match name {
            "Mono8" => PixelFormat::Mono8,
            "Mono16" => PixelFormat::Mono16,
            "Mono12Packed" => PixelFormat::Mono12Packed,
            "Rgb24" => PixelFormat::Rgb24,
            _ => PixelFormat::NotSupported,
        }
    }

    pub fn sdk_name(&self) -> Option<&'static str> {
        match self {
            PixelFormat::Mono8 => Some("Mono8"),
            PixelFormat::Mono16 => Some("Mono16"),
            PixelFormat::Mono12Packed => Some("Mono12Packed"),
            PixelFormat::Rgb24 => Some("Rgb24"),
            PixelFormat::NotSupported => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        *self != PixelFormat::NotSupported
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sdk_name().unwrap_or("NotSupported"))
    }
}

/// Capture rectangle in sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn full_sensor(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Width over height; 0.0 for an empty rectangle.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

pub type Channel8u = PooledBuffer<Luma<u8>>;
pub type Channel16u = PooledBuffer<Luma<u16>>;
pub type Surface8u = PooledBuffer<Rgb<u8>>;

pub type Channel8uRef = Arc<Channel8u>;
pub type Channel16uRef = Arc<Channel16u>;
pub type Surface8uRef = Arc<Surface8u>;

pub type ChannelPool8u = BufferPool<Luma<u8>>;
pub type ChannelPool16u = BufferPool<Luma<u16>>;
pub type SurfacePool8u = BufferPool<Rgb<u8>>;

/// The three pools a session converts into, all sized to the capture region.
#[derive(Clone)]
pub struct FramePools {
    pub channel8u: ChannelPool8u,
    pub channel16u: ChannelPool16u,
    pub surface8u: SurfacePool8u,
}

impl FramePools {
    pub fn new(width: u32, height: u32, capacity: usize) -> Self {
        Self {
            channel8u: BufferPool::new(width, height, capacity),
            channel16u: BufferPool::new(width, height, capacity),
            surface8u: BufferPool::new(width, height, capacity),
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.channel8u.resize(width, height);
        self.channel16u.resize(width, height);
        self.surface8u.resize(width, height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_names() {
        assert_eq!(PixelFormat::from_sdk_name("Mono8"), PixelFormat::Mono8);
        assert_eq!(PixelFormat::from_sdk_name("Mono12Packed"), PixelFormat::Mono12Packed);
        assert_eq!(PixelFormat::from_sdk_name("Rgb24"), PixelFormat::Rgb24);
        assert_eq!(PixelFormat::from_sdk_name("Bayer8"), PixelFormat::NotSupported);
        assert_eq!(PixelFormat::from_sdk_name(""), PixelFormat::NotSupported);
        assert_eq!(PixelFormat::Mono16.to_string(), "Mono16");
    }

    #[test]
    fn test_roi() {
        let roi = Roi::full_sensor(640, 480);
        assert_eq!(roi.size(), (640, 480));
        assert!((roi.aspect_ratio() - 4.0 / 3.0).abs() < f32::EPSILON);
        assert_eq!(Roi::default().aspect_ratio(), 0.0);
    }
}
