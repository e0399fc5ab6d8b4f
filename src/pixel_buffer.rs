use std::sync::Arc;

use image::{DynamicImage, RgbImage, RgbaImage};

use crate::errors::{Result, StyleError};

/// Channel layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Rgb,
    Rgba,
}

impl ChannelLayout {
    pub const fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }

    pub fn from_channels(channels: usize) -> Option<Self> {
        match channels {
            3 => Some(Self::Rgb),
            4 => Some(Self::Rgba),
            _ => None,
        }
    }
}

/// Immutable row-major RGB(A) raster, origin top-left.
///
/// The pixel storage is shared, so cloning a buffer (to hand the same camera
/// frame to the presenter and the codec) does not copy pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    layout: ChannelLayout,
    data: Arc<[u8]>,
}

impl PixelBuffer {
    /// `data.len()` must equal `width * height * layout.channels()`.
    pub fn new(width: u32, height: u32, layout: ChannelLayout, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(layout.channels()))
            .ok_or_else(|| StyleError::InvalidPixelBuffer {
                reason: format!("{}x{} overflows the addressable size", width, height),
            })?;

        if data.len() != expected {
            return Err(StyleError::InvalidPixelBuffer {
                reason: format!(
                    "{}x{} {:?} needs {} bytes, got {}",
                    width,
                    height,
                    layout,
                    expected,
                    data.len()
                ),
            });
        }

        Ok(Self {
            width,
            height,
            layout,
            data: data.into(),
        })
    }

    pub fn from_channels(width: u32, height: u32, channels: usize, data: Vec<u8>) -> Result<Self> {
        let layout =
            ChannelLayout::from_channels(channels).ok_or_else(|| StyleError::InvalidPixelBuffer {
                reason: format!("unsupported channel count {}", channels),
            })?;
        Self::new(width, height, layout, data)
    }

    /// A buffer where every pixel has the same value.
    pub fn filled(width: u32, height: u32, pixel: &[u8]) -> Result<Self> {
        let layout = ChannelLayout::from_channels(pixel.len()).ok_or_else(|| {
            StyleError::InvalidPixelBuffer {
                reason: format!("unsupported channel count {}", pixel.len()),
            }
        })?;
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * pixel.len())
            .collect();
        Self::new(width, height, layout, data)
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub const fn layout(&self) -> ChannelLayout {
        self.layout
    }

    pub const fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Channels of the pixel at `(x, y)`; `None` outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.channels();
        let start = (y as usize * self.width as usize + x as usize) * channels;
        Some(&self.data[start..start + channels])
    }

    /// Iterates pixels in row-major order.
    pub fn pixels(&self) -> std::slice::ChunksExact<'_, u8> {
        self.data.chunks_exact(self.channels())
    }

    pub fn to_rgba_image(&self) -> Result<RgbaImage> {
        let data = match self.layout {
            ChannelLayout::Rgba => self.data.to_vec(),
            ChannelLayout::Rgb => self
                .pixels()
                .flat_map(|p| [p[0], p[1], p[2], u8::MAX])
                .collect(),
        };
        RgbaImage::from_raw(self.width, self.height, data).ok_or_else(|| self.size_mismatch())
    }

    pub fn to_dynamic_image(&self) -> Result<DynamicImage> {
        match self.layout {
            ChannelLayout::Rgba => self.to_rgba_image().map(DynamicImage::ImageRgba8),
            ChannelLayout::Rgb => RgbImage::from_raw(self.width, self.height, self.data.to_vec())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| self.size_mismatch()),
        }
    }

    fn size_mismatch(&self) -> StyleError {
        StyleError::InvalidPixelBuffer {
            reason: format!(
                "{} bytes do not fill a {}x{} {:?} image",
                self.data.len(),
                self.width,
                self.height,
                self.layout
            ),
        }
    }
}

impl From<RgbImage> for PixelBuffer {
    fn from(image: RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            layout: ChannelLayout::Rgb,
            data: image.into_raw().into(),
        }
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(image: RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            layout: ChannelLayout::Rgba,
            data: image.into_raw().into(),
        }
    }
}

impl From<&DynamicImage> for PixelBuffer {
    fn from(image: &DynamicImage) -> Self {
        if image.color().has_alpha() {
            image.to_rgba8().into()
        } else {
            image.to_rgb8().into()
        }
    }
}

impl From<DynamicImage> for PixelBuffer {
    fn from(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageRgb8(rgb) => rgb.into(),
            DynamicImage::ImageRgba8(rgba) => rgba.into(),
            other => Self::from(&other),
        }
    }
}
