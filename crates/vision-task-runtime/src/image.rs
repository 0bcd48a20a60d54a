//! Image value type consumed and produced by vision tasks.
//!
//! An [`Image`] is an immutable pixel buffer. Cloning is cheap: the pixels are shared, so a task
//! can hold on to a submitted frame without copying it and without being able to mutate the
//! caller's data.

use crate::options::Rect;
use std::fmt::{Debug, Formatter};
#[cfg(feature = "image-io")]
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ImageFormat {
    Gray8,
    Rgb8,
    Rgba8,
}

impl ImageFormat {
    pub fn channels(self) -> usize {
        match self {
            ImageFormat::Gray8 => 1,
            ImageFormat::Rgb8 => 3,
            ImageFormat::Rgba8 => 4,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("Expected {expected} bytes for a {width}x{height} {format} image, got {actual}")]
    SizeMismatch {
        width: u32,
        height: u32,
        format: ImageFormat,
        expected: usize,
        actual: usize,
    },
    #[error("Image dimensions must be non-zero, got {width}x{height}")]
    EmptyImage { width: u32, height: u32 },
    #[cfg(feature = "image-io")]
    #[error("Failed to decode or encode image: {0}")]
    Codec(#[from] ::image::ImageError),
}

#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    format: ImageFormat,
    pixels: Arc<[u8]>,
}

impl Debug for Image {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl Image {
    /// Wraps tightly packed, row-major pixels.
    pub fn from_raw(
        width: u32,
        height: u32,
        format: ImageFormat,
        pixels: impl Into<Arc<[u8]>>,
    ) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::EmptyImage { width, height });
        }
        let pixels = pixels.into();
        let expected = width as usize * height as usize * format.channels();
        if pixels.len() != expected {
            return Err(ImageError::SizeMismatch {
                width,
                height,
                format,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            pixels,
        })
    }

    /// Decodes an image file. Grayscale, RGB and RGBA 8-bit layouts are kept, anything else is
    /// converted to RGB.
    #[cfg(feature = "image-io")]
    pub fn create_from_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let decoded = ::image::open(path.as_ref())?;
        let (width, height) = (decoded.width(), decoded.height());
        let (format, pixels) = match decoded {
            ::image::DynamicImage::ImageLuma8(buf) => (ImageFormat::Gray8, buf.into_raw()),
            ::image::DynamicImage::ImageRgba8(buf) => (ImageFormat::Rgba8, buf.into_raw()),
            other => (ImageFormat::Rgb8, other.into_rgb8().into_raw()),
        };
        Self::from_raw(width, height, format, pixels)
    }

    /// Encodes the image, the container format is picked from the file extension.
    #[cfg(feature = "image-io")]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ImageError> {
        let color = match self.format {
            ImageFormat::Gray8 => ::image::ExtendedColorType::L8,
            ImageFormat::Rgb8 => ::image::ExtendedColorType::Rgb8,
            ImageFormat::Rgba8 => ::image::ExtendedColorType::Rgba8,
        };
        ::image::save_buffer(path.as_ref(), &self.pixels, self.width, self.height, color)?;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Raw row-major pixel view.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Crops to a normalized region. The region is clamped to the image and always keeps at
    /// least one pixel in each direction.
    pub fn crop(&self, region: &Rect) -> Image {
        let scale = |v: f32, size: u32| ((v.clamp(0.0, 1.0) * size as f32).round() as u32).min(size);
        let x0 = scale(region.left, self.width).min(self.width - 1);
        let y0 = scale(region.top, self.height).min(self.height - 1);
        let x1 = scale(region.right, self.width).max(x0 + 1);
        let y1 = scale(region.bottom, self.height).max(y0 + 1);

        if (x0, y0, x1, y1) == (0, 0, self.width, self.height) {
            return self.clone();
        }

        let channels = self.format.channels();
        let row_len = self.width as usize * channels;
        let mut pixels = Vec::with_capacity((x1 - x0) as usize * (y1 - y0) as usize * channels);
        for y in y0..y1 {
            let start = y as usize * row_len + x0 as usize * channels;
            let end = y as usize * row_len + x1 as usize * channels;
            pixels.extend_from_slice(&self.pixels[start..end]);
        }
        Image {
            width: x1 - x0,
            height: y1 - y0,
            format: self.format,
            pixels: pixels.into(),
        }
    }

    /// Rotates clockwise. `degrees` must be a multiple of 90, negative values rotate
    /// counter-clockwise.
    pub fn rotate(&self, degrees: i32) -> Image {
        let quarter_turns = degrees.rem_euclid(360) / 90;
        if quarter_turns == 0 {
            return self.clone();
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let channels = self.format.channels();
        let (out_w, out_h) = if quarter_turns == 2 { (w, h) } else { (h, w) };
        let mut pixels = vec![0u8; self.pixels.len()];

        for y in 0..out_h {
            for x in 0..out_w {
                let (src_x, src_y) = match quarter_turns {
                    1 => (y, h - 1 - x),
                    2 => (w - 1 - x, h - 1 - y),
                    _ => (w - 1 - y, x),
                };
                let src = (src_y * w + src_x) * channels;
                let dst = (y * out_w + x) * channels;
                pixels[dst..dst + channels].copy_from_slice(&self.pixels[src..src + channels]);
            }
        }

        Image {
            width: out_w as u32,
            height: out_h as u32,
            format: self.format,
            pixels: pixels.into(),
        }
    }
}
