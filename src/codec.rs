//! Conversion between [`PixelBuffer`]s and the generator's NHWC tensor layout.
//!
//! Tensors are `[1, height, width, 3]`, RGB, normalized to `[-1, 1]`. Height
//! comes before width in both directions; swapping them silently transposes
//! non-square frames.

use ndarray::prelude::*;

use crate::errors::{Result, StyleError};
use crate::pixel_buffer::{ChannelLayout, PixelBuffer};

/// Model input/output tensor, `[batch, height, width, channels]`.
pub type Tensor = Array4<f32>;

pub const TENSOR_CHANNELS: usize = 3;

const HALF_RANGE: f32 = 127.5;

/// `byte / 127.5 - 1.0`: 0 maps to exactly -1.0, 255 to 1.0.
#[inline]
pub fn normalize(byte: u8) -> f32 {
    byte as f32 / HALF_RANGE - 1.0
}

/// Inverse of [`normalize`], clamped to the byte range. NaN maps to 0.
#[inline]
pub fn denormalize(value: f32) -> u8 {
    let scaled = (value.clamp(-1.0, 1.0) * HALF_RANGE + HALF_RANGE).round();
    // `as` saturates and sends NaN to 0
    scaled.clamp(0.0, 255.0) as u8
}

/// The tensor shape [`encode`] produces for a `width x height` frame.
pub const fn tensor_shape(width: u32, height: u32) -> [usize; 4] {
    [1, height as usize, width as usize, TENSOR_CHANNELS]
}

/// Checks that a tensor is `[1, H, W, 3]` with non-zero H and W.
pub fn validate_input_shape(shape: &[usize]) -> Result<()> {
    match shape {
        [1, h, w, TENSOR_CHANNELS] if *h > 0 && *w > 0 => Ok(()),
        _ => Err(StyleError::InvalidTensorShape {
            shape: shape.to_vec(),
        }),
    }
}

/// Encodes the RGB channels of `buffer` into a `[1, H, W, 3]` tensor. Alpha is dropped.
pub fn encode(buffer: &PixelBuffer) -> Result<Tensor> {
    let (width, height) = buffer.dimensions();
    if width == 0 || height == 0 {
        return Err(StyleError::InvalidDimensions { width, height });
    }

    let mut data = Vec::with_capacity(width as usize * height as usize * TENSOR_CHANNELS);
    for pixel in buffer.pixels() {
        data.extend(pixel[..TENSOR_CHANNELS].iter().map(|&c| normalize(c)));
    }

    Ok(Array4::from_shape_vec(tensor_shape(width, height), data)?)
}

/// Decodes the first image of an NHWC tensor into an opaque RGBA buffer.
///
/// Accepts any dimensionality so that raw backend outputs can be handed over
/// directly; anything other than `[N >= 1, H > 0, W > 0, 3]` is rejected.
pub fn decode<S, D>(tensor: &ArrayBase<S, D>) -> Result<PixelBuffer>
where
    S: ndarray::Data<Elem = f32>,
    D: Dimension,
{
    let invalid = || StyleError::InvalidTensorShape {
        shape: tensor.shape().to_vec(),
    };

    let view = tensor
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| invalid())?;
    let (batch, height, width, channels) = view.dim();
    if channels != TENSOR_CHANNELS || batch == 0 || height == 0 || width == 0 {
        return Err(invalid());
    }
    let (Ok(out_width), Ok(out_height)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(invalid());
    };

    let image = view.index_axis(Axis(0), 0);
    let mut data = Vec::with_capacity(width * height * ChannelLayout::Rgba.channels());
    for row in image.outer_iter() {
        for pixel in row.outer_iter() {
            data.extend([
                denormalize(pixel[0]),
                denormalize(pixel[1]),
                denormalize(pixel[2]),
                u8::MAX,
            ]);
        }
    }

    PixelBuffer::new(out_width, out_height, ChannelLayout::Rgba, data)
}
