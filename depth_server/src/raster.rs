//! Conversion of depth buffers into displayable grayscale images.
//!
use std::io::Cursor;

use image::{ImageOutputFormat, Rgba, RgbaImage};
use itertools::{Itertools, MinMaxResult};
use thiserror::Error;

/// Error raised when dimensions and depth values do not fit together.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RasterError {
    #[error("invalid dimensions: shape {shape:?} does not describe {len} depth values")]
    InvalidDimensions { shape: Vec<usize>, len: usize },
}

/// Row-major depth values of a `width` x `height` image.
///
/// Construction checks that the number of values matches the dimensions, so every
/// `DepthBuffer` in existence can be rasterized.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthBuffer {
    values: Vec<f32>,
    width: u32,
    height: u32,
}

impl DepthBuffer {
    /// Create a buffer from explicit dimensions.
    pub fn new(values: Vec<f32>, width: usize, height: usize) -> Result<Self, RasterError> {
        let len = values.len();
        let invalid = || RasterError::InvalidDimensions {
            shape: vec![height, width],
            len,
        };

        if width == 0 || height == 0 || width.checked_mul(height) != Some(len) {
            return Err(invalid());
        }
        let width = u32::try_from(width).map_err(|_| invalid())?;
        let height = u32::try_from(height).map_err(|_| invalid())?;

        Ok(Self {
            values,
            width,
            height,
        })
    }

    /// Create a buffer from a tensor shape such as `[1, h, w]`.
    ///
    /// Leading unit axes are stripped, the remainder has to be `[h, w]`.
    pub fn from_shape(shape: &[usize], values: Vec<f32>) -> Result<Self, RasterError> {
        let mut dims = shape;
        while dims.len() > 2 && dims[0] == 1 {
            dims = &dims[1..];
        }

        match dims {
            [height, width] => Self::new(values, *width, *height),
            _ => Err(RasterError::InvalidDimensions {
                shape: shape.to_vec(),
                len: values.len(),
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Linearly rescale depth values into opaque grayscale pixels.
///
/// The smallest depth maps to black, the largest to white. A flat depth field (zero range)
/// is rendered completely black. Non-finite values are left out of the min/max scan and
/// rendered black as well.
pub fn rasterize(depth: &DepthBuffer) -> RgbaImage {
    let (min_depth, range) = match depth.values.iter().filter(|v| v.is_finite()).minmax() {
        MinMaxResult::NoElements => (0.0, 0.0),
        MinMaxResult::OneElement(v) => (f64::from(*v), 0.0),
        MinMaxResult::MinMax(min, max) => (f64::from(*min), f64::from(*max) - f64::from(*min)),
    };

    let mut image = RgbaImage::new(depth.width, depth.height);
    for (pixel, value) in image.pixels_mut().zip(depth.values.iter()) {
        let level = grayscale(*value, min_depth, range);
        *pixel = Rgba([level, level, level, u8::MAX]);
    }

    image
}

/// Quantize a single depth value, truncating towards zero.
fn grayscale(value: f32, min_depth: f64, range: f64) -> u8 {
    if !value.is_finite() || range <= 0.0 {
        return 0;
    }
    let normalized = (f64::from(value) - min_depth) / range;

    // `as` saturates, the result stays within [0, 255]
    (normalized * 255.0).floor() as u8
}

/// Encode a raster as PNG.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageOutputFormat::Png)?;
    Ok(buf.into_inner())
}
