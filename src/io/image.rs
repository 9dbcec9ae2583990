//! Decoded images with multi-format pixel buffers (U8, F16, F32)
//!
//! Different sources need different pixel representations:
//! - JPG/PNG/TGA/BMP/TIFF: 8-bit RGBA (u8)
//! - EXR: 16-bit float (half::f16), enough for display and half the memory
//! - HDR: 32-bit float (f32)
//!
//! Images are immutable once decoded and shared as `Arc<Image>` between the
//! cache and its consumers.

use half::f16 as F16;
use image::{DynamicImage, ImageBuffer, ImageReader, Rgba};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{IoError, IoResult};

/// Pixel buffer format - stores different precision levels
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),   // LDR formats - 8-bit per channel
    F16(Vec<F16>), // EXR - 16-bit float per channel
    F32(Vec<f32>), // HDR - 32-bit float per channel
}

/// Pixel format type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    #[default]
    Rgba8,
    RgbaF16,
    RgbaF32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::RgbaF16 => 8,
            PixelFormat::RgbaF32 => 16,
        }
    }
}

/// Image dimensions and layout, known before decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl ImageInfo {
    pub fn byte_count(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    info: ImageInfo,
    buffer: PixelBuffer,
}

impl Image {
    /// Wrap a buffer. Fails when the buffer length does not match the
    /// dimensions or the buffer type does not match the format.
    pub fn from_buffer(width: u32, height: u32, buffer: PixelBuffer) -> IoResult<Self> {
        let pixels = width as usize * height as usize;
        let (format, len) = match &buffer {
            PixelBuffer::U8(v) => (PixelFormat::Rgba8, v.len()),
            PixelBuffer::F16(v) => (PixelFormat::RgbaF16, v.len()),
            PixelBuffer::F32(v) => (PixelFormat::RgbaF32, v.len()),
        };
        if len != pixels * 4 {
            return Err(IoError::Decode(format!(
                "Buffer size mismatch: {}x{} RGBA needs {} samples, got {}",
                width,
                height,
                pixels * 4,
                len
            )));
        }
        Ok(Self { info: ImageInfo { width, height, format }, buffer })
    }

    /// Solid 8-bit image.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let buffer = rgba.repeat(width as usize * height as usize);
        Self {
            info: ImageInfo { width, height, format: PixelFormat::Rgba8 },
            buffer: PixelBuffer::U8(buffer),
        }
    }

    pub fn info(&self) -> ImageInfo {
        self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.info.format
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Memory used by pixel data, in bytes.
    pub fn mem(&self) -> usize {
        match &self.buffer {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::F16(v) => v.len() * 2,
            PixelBuffer::F32(v) => v.len() * 4,
        }
    }

    /// Read dimensions without decoding pixels.
    pub fn read_info(path: &Path) -> IoResult<ImageInfo> {
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let (width, height) = reader.into_dimensions()?;
        Ok(ImageInfo { width, height, format: format_for_path(path) })
    }

    /// Decode a file.
    pub fn load(path: &Path) -> IoResult<Self> {
        debug!("Loading image: {}", path.display());
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        let (width, height) = (img.width(), img.height());

        let buffer = match format_for_path(path) {
            PixelFormat::RgbaF16 => {
                let pixels = img.to_rgba32f().into_raw();
                PixelBuffer::F16(pixels.into_iter().map(F16::from_f32).collect())
            }
            PixelFormat::RgbaF32 => PixelBuffer::F32(img.to_rgba32f().into_raw()),
            PixelFormat::Rgba8 => PixelBuffer::U8(img.to_rgba8().into_raw()),
        };
        Self::from_buffer(width, height, buffer)
    }

    /// Encode to a file; the format comes from the extension.
    pub fn save(&self, path: &Path) -> IoResult<()> {
        let (w, h) = (self.info.width, self.info.height);
        let float_target = matches!(format_for_path(path), PixelFormat::RgbaF16 | PixelFormat::RgbaF32);

        let dynamic = match &self.buffer {
            PixelBuffer::U8(v) => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageRgba8),
            PixelBuffer::F16(v) => {
                let f: Vec<f32> = v.iter().map(|x| x.to_f32()).collect();
                ImageBuffer::<Rgba<f32>, _>::from_raw(w, h, f).map(DynamicImage::ImageRgba32F)
            }
            PixelBuffer::F32(v) => ImageBuffer::<Rgba<f32>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageRgba32F),
        }
        .ok_or_else(|| IoError::Decode("Pixel buffer does not match dimensions".into()))?;

        let dynamic = match (float_target, dynamic) {
            (true, img @ DynamicImage::ImageRgba32F(_)) => img,
            (true, img) => DynamicImage::ImageRgba32F(img.to_rgba32f()),
            (false, img @ DynamicImage::ImageRgba8(_)) => img,
            (false, img) => DynamicImage::ImageRgba8(img.to_rgba8()),
        };
        dynamic.save(path)?;
        Ok(())
    }
}

/// Decoded pixel format for a file extension.
pub fn format_for_path(path: &Path) -> PixelFormat {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "exr" => PixelFormat::RgbaF16,
        "hdr" => PixelFormat::RgbaF32,
        _ => PixelFormat::Rgba8,
    }
}
