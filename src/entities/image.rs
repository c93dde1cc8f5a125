//! Decoded images with multi-format pixel buffers (U8, F16, F32)
//!
//! **Why**: Readers decode into different precisions:
//! - 8-bit sources: `PixelBuffer::U8`, 4 bytes/pixel
//! - half-float sources: `PixelBuffer::F16`, 8 bytes/pixel
//! - float sources: `PixelBuffer::F32`, 16 bytes/pixel
//!
//! **Used by**: Media readers (producers), VideoData layers, cache byte budget
//!
//! Images are immutable once decoded. The pixel buffer sits behind an `Arc`
//! so the cache, the published current frame and the renderer share one
//! allocation.

use std::sync::Arc;

use half::f16 as F16;
use serde::{Deserialize, Serialize};

/// Pixel buffer format - stores different precision levels
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),   // LDR sources - 8-bit per channel
    F16(Vec<F16>), // HDR half-precision - 16-bit float per channel
    F32(Vec<f32>), // HDR full-precision - 32-bit float per channel
}

impl PixelBuffer {
    /// Number of channel values stored
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::F16(v) => v.len(),
            PixelBuffer::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes
    pub fn mem(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),      // 1 byte per u8
            PixelBuffer::F16(v) => v.len() * 2, // 2 bytes per f16
            PixelBuffer::F32(v) => v.len() * 4, // 4 bytes per f32
        }
    }

    pub fn format(&self) -> PixelFormat {
        match self {
            PixelBuffer::U8(_) => PixelFormat::Rgba8,
            PixelBuffer::F16(_) => PixelFormat::RgbaF16,
            PixelBuffer::F32(_) => PixelFormat::RgbaF32,
        }
    }
}

/// Pixel format type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PixelFormat {
    #[default]
    Rgba8, // 8-bit RGBA (LDR)
    RgbaF16, // 16-bit half-float RGBA (HDR)
    RgbaF32, // 32-bit float RGBA (HDR)
}

impl PixelFormat {
    pub const CHANNELS: usize = 4;

    pub fn bytes_per_channel(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 1,
            PixelFormat::RgbaF16 => 2,
            PixelFormat::RgbaF32 => 4,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_channel() * Self::CHANNELS
    }
}

/// Resolution and pixel format of one video layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
}

impl ImageInfo {
    pub fn new(width: usize, height: usize, format: PixelFormat) -> Self {
        Self { width, height, format }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Channel values needed for one image
    pub fn channel_count(&self) -> usize {
        self.width * self.height * PixelFormat::CHANNELS
    }

    /// Bytes needed for one decoded image (cache budget unit)
    pub fn byte_count(&self) -> usize {
        self.width * self.height * self.format.bytes_per_pixel()
    }
}

/// Decoded image
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    info: ImageInfo,
    buffer: Arc<PixelBuffer>,
}

impl Image {
    /// Wrap a decoded buffer. Returns `None` when the buffer does not match
    /// the declared resolution and format.
    pub fn new(info: ImageInfo, buffer: PixelBuffer) -> Option<Self> {
        if buffer.format() != info.format || buffer.len() != info.channel_count() {
            return None;
        }
        Some(Self {
            info,
            buffer: Arc::new(buffer),
        })
    }

    /// Image with every channel set to `value` (normalized 0..1 for float formats).
    pub fn filled(info: ImageInfo, value: u8) -> Self {
        let count = info.channel_count();
        let buffer = match info.format {
            PixelFormat::Rgba8 => PixelBuffer::U8(vec![value; count]),
            PixelFormat::RgbaF16 => {
                PixelBuffer::F16(vec![F16::from_f32(value as f32 / 255.0); count])
            }
            PixelFormat::RgbaF32 => PixelBuffer::F32(vec![value as f32 / 255.0; count]),
        };
        Self {
            info,
            buffer: Arc::new(buffer),
        }
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn width(&self) -> usize {
        self.info.width
    }

    pub fn height(&self) -> usize {
        self.info.height
    }

    pub fn pixel_buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Size in bytes
    pub fn mem(&self) -> usize {
        self.buffer.mem()
    }

    /// First channel of the first pixel as 0..255 (test-pattern probe)
    pub fn first_value(&self) -> Option<u8> {
        match self.buffer.as_ref() {
            PixelBuffer::U8(v) => v.first().copied(),
            PixelBuffer::F16(v) => v.first().map(|h| (h.to_f32() * 255.0).round() as u8),
            PixelBuffer::F32(v) => v.first().map(|f| (f * 255.0).round() as u8),
        }
    }

    pub fn same_buffer(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_count_matches_mem() {
        for format in [PixelFormat::Rgba8, PixelFormat::RgbaF16, PixelFormat::RgbaF32] {
            let info = ImageInfo::new(16, 8, format);
            let image = Image::filled(info, 128);
            assert_eq!(image.mem(), info.byte_count());
            assert_eq!(image.first_value(), Some(128));
        }
    }

    #[test]
    fn test_new_rejects_mismatched_buffer() {
        let info = ImageInfo::new(2, 2, PixelFormat::Rgba8);
        assert!(Image::new(info, PixelBuffer::U8(vec![0; 16])).is_some());
        assert!(Image::new(info, PixelBuffer::U8(vec![0; 15])).is_none());
        assert!(Image::new(info, PixelBuffer::F32(vec![0.0; 16])).is_none());
    }
}
