use image::buffer::ConvertBuffer;
use log::trace;

use super::types::{
    Channel16u, Channel8u, FramePools, PixelFormat, Surface8u,
};
use super::pool::PooledBuffer;

/// A raw frame after conversion into one of the pooled representations.
#[derive(Debug)]
pub enum ConvertedFrame {
    Channel8u(Channel8u),
    Channel16u(Channel16u),
    Surface8u(Surface8u),
}

/// Pixel format conversions from SDK frame bytes into pooled images.
pub struct FrameProcessor;

impl FrameProcessor {
    /// Converts `raw` according to `format` into a buffer checked out of `pools`.
    ///
    /// Returns `None` for formats without a conversion path.
    pub fn convert(format: PixelFormat, raw: &[u8], pools: &FramePools) -> Option<ConvertedFrame> {
        let converted = match format {
            PixelFormat::Mono8 => {
                let mut channel = pools.channel8u.checkout();
                Self::copy_mono8(raw, &mut channel);
                ConvertedFrame::Channel8u(channel)
            }
            PixelFormat::Mono16 => {
                let mut channel = pools.channel16u.checkout();
                Self::copy_mono16(raw, &mut channel);
                ConvertedFrame::Channel16u(channel)
            }
            PixelFormat::Mono12Packed => {
                let mut channel = pools.channel16u.checkout();
                Self::unpack_mono12_packed(raw, &mut channel);
                ConvertedFrame::Channel16u(channel)
            }
            PixelFormat::Rgb24 => {
                let mut surface = pools.surface8u.checkout();
                Self::copy_rgb24(raw, &mut surface);
                ConvertedFrame::Surface8u(surface)
            }
            PixelFormat::NotSupported => return None,
        };
        trace!("Converted {} byte {} frame", raw.len(), format);
        Some(converted)
    }

    pub fn copy_mono8(raw: &[u8], dst: &mut [u8]) {
        copy_bytes(raw, dst);
    }

    /// Little-endian 16-bit samples.
    pub fn copy_mono16(raw: &[u8], dst: &mut [u16]) {
        for (src, sample) in raw.chunks_exact(2).zip(dst.iter_mut()) {
            *sample = u16::from_le_bytes([src[0], src[1]]);
        }
    }

    /// Unpacks 12-bit samples stored as two pixels per three bytes.
    ///
    /// For bytes `b0 b1 b2` the pixels are `b0 << 4 | b1 >> 4` and
    /// `(b1 & 0xF) << 8 | b2`. A trailing odd pixel is left untouched.
    pub fn unpack_mono12_packed(raw: &[u8], dst: &mut [u16]) {
        for (src, pair) in raw.chunks_exact(3).zip(dst.chunks_exact_mut(2)) {
            let (b0, b1, b2) = (src[0] as u16, src[1] as u16, src[2] as u16);
            pair[0] = (b0 << 4) | (b1 >> 4);
            pair[1] = ((b1 & 0x0F) << 8) | b2;
        }
    }

    /// Interleaved 8-bit RGB.
    pub fn copy_rgb24(raw: &[u8], dst: &mut [u8]) {
        copy_bytes(raw, dst);
    }

    pub fn channel8u_to_channel16u(src: &Channel8u) -> Channel16u {
        PooledBuffer::detached(src.convert())
    }

    pub fn channel8u_to_surface8u(src: &Channel8u) -> Surface8u {
        PooledBuffer::detached(src.convert())
    }

    pub fn channel16u_to_channel8u(src: &Channel16u) -> Channel8u {
        PooledBuffer::detached(src.convert())
    }

    pub fn channel16u_to_surface8u(src: &Channel16u) -> Surface8u {
        PooledBuffer::detached(src.convert())
    }

    pub fn surface8u_to_channel8u(src: &Surface8u) -> Channel8u {
        PooledBuffer::detached(src.convert())
    }

    pub fn surface8u_to_channel16u(src: &Surface8u) -> Channel16u {
        PooledBuffer::detached(src.convert())
    }
}

fn copy_bytes(raw: &[u8], dst: &mut [u8]) {
    let len = raw.len().min(dst.len());
    dst[..len].copy_from_slice(&raw[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_mono12_packed_is_bit_exact() {
        let mut out = [0u16; 2];
        FrameProcessor::unpack_mono12_packed(&[0xAB, 0xCD, 0xEF], &mut out);
        assert_eq!(out, [0xABC, 0xDEF]);
    }

    #[test]
    fn test_mono12_packed_several_pairs() {
        let raw = [0xFF, 0xF0, 0x00, 0x00, 0x0F, 0xFF, 0x12, 0x34, 0x56];
        let mut out = [0u16; 7];
        FrameProcessor::unpack_mono12_packed(&raw, &mut out);
        assert_eq!(&out[..6], &[0xFFF, 0x000, 0x000, 0xFFF, 0x123, 0x456]);
        assert_eq!(out[6], 0);
    }

    #[test]
    fn test_mono16_is_little_endian() {
        let mut out = [0u16; 2];
        FrameProcessor::copy_mono16(&[0x34, 0x12, 0xFF, 0x00], &mut out);
        assert_eq!(out, [0x1234, 0x00FF]);
    }

    #[test]
    fn test_short_frame_copies_what_is_there() {
        let mut out = [9u8; 4];
        FrameProcessor::copy_mono8(&[1, 2], &mut out);
        assert_eq!(out, [1, 2, 9, 9]);
    }

    #[test]
    fn test_convert_uses_matching_pool() {
        let pools = FramePools::new(2, 2, 1);
        let mono8 = FrameProcessor::convert(PixelFormat::Mono8, &[1, 2, 3, 4], &pools);
        match mono8 {
            Some(ConvertedFrame::Channel8u(channel)) => {
                assert!(channel.is_pooled());
                assert_eq!(channel.get_pixel(1, 1), &Luma([4]));
            }
            other => panic!("unexpected {:?}", other),
        }

        let rgb = FrameProcessor::convert(PixelFormat::Rgb24, &[10; 12], &pools);
        match rgb {
            Some(ConvertedFrame::Surface8u(surface)) => {
                assert_eq!(surface.get_pixel(0, 1), &Rgb([10, 10, 10]));
            }
            other => panic!("unexpected {:?}", other),
        }

        let packed = FrameProcessor::convert(PixelFormat::Mono12Packed, &[0xAB, 0xCD, 0xEF], &pools);
        assert!(matches!(packed, Some(ConvertedFrame::Channel16u(_))));
        assert!(FrameProcessor::convert(PixelFormat::NotSupported, &[0; 4], &pools).is_none());
    }

    #[test]
    fn test_representation_conversions() {
        let pools = FramePools::new(1, 1, 1);
        let mut channel = pools.channel16u.checkout();
        channel.put_pixel(0, 0, Luma([u16::MAX]));

        let as8 = FrameProcessor::channel16u_to_channel8u(&channel);
        assert!(!as8.is_pooled());
        assert_eq!(as8.get_pixel(0, 0), &Luma([255]));

        let as_rgb = FrameProcessor::channel16u_to_surface8u(&channel);
        assert_eq!(as_rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));

        let back = FrameProcessor::channel8u_to_channel16u(&as8);
        assert_eq!(back.get_pixel(0, 0), &Luma([u16::MAX]));
    }
}
