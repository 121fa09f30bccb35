//! Core raster types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest grayscale ceiling representable with one byte per sample.
pub const MAX_SAMPLE_CEILING: u32 = u8::MAX as u32;

/// Error types for raster construction, parsing and encoding.
#[derive(Debug, Error)]
pub enum RasterError {
    /// The magic token is not `P2`.
    #[error("Not a plain-text graymap: expected magic `P2`, found `{0}`")]
    InvalidMagic(String),

    /// The header ended early or held a non-numeric token.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// Width or height is zero.
    #[error("Invalid dimensions: width ({width}) and height ({height}) must be non-zero")]
    InvalidDimensions { width: u32, height: u32 },

    /// The grayscale ceiling is zero or needs more than one byte per sample.
    #[error("Unsupported maxval {0}: expected 1..=255")]
    UnsupportedMaxval(u32),

    /// A sample token is not an integer.
    #[error("Malformed sample at index {index}: `{token}`")]
    MalformedSample { index: usize, token: String },

    /// A sample is above the declared maxval.
    #[error("Sample at index {index} is {value}, above maxval {maxval}")]
    SampleOutOfRange { index: usize, value: u32, maxval: u32 },

    /// Pixel data length doesn't match the dimensions.
    #[error("Invalid pixel data: expected {expected} samples (width * height), got {actual}")]
    PixelCount { expected: usize, actual: usize },

    /// More tokens follow the last sample.
    #[error("Unexpected trailing data after {expected} samples")]
    TrailingData { expected: usize },

    /// PNG preview encoding failed.
    #[error("PNG encoding failed: {0}")]
    EncodingFailed(String),

    /// I/O error during file reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Width, height and grayscale ceiling of a raster.
///
/// This is the part of an image broadcast to workers ahead of its pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterHeader {
    pub width: u32,
    pub height: u32,
    pub maxval: u32,
}

impl RasterHeader {
    /// Validate dimensions and maxval.
    pub fn new(width: u32, height: u32, maxval: u32) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::InvalidDimensions { width, height });
        }
        if maxval == 0 || maxval > MAX_SAMPLE_CEILING {
            return Err(RasterError::UnsupportedMaxval(maxval));
        }
        Ok(Self {
            width,
            height,
            maxval,
        })
    }

    /// Number of samples a raster with this header holds.
    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A grayscale raster with one byte per sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Grayscale ceiling (typically 255).
    pub maxval: u32,
    /// Samples in row-major order: `pixels[y * width + x]`.
    /// Length is always width * height.
    pub pixels: Vec<u8>,
}

impl RasterImage {
    /// Create a raster, checking the pixel buffer against the header.
    pub fn new(header: RasterHeader, pixels: Vec<u8>) -> Result<Self, RasterError> {
        let header = RasterHeader::new(header.width, header.height, header.maxval)?;
        let expected = header.sample_count();
        if pixels.len() != expected {
            return Err(RasterError::PixelCount {
                expected,
                actual: pixels.len(),
            });
        }
        if let Some((index, &value)) = pixels
            .iter()
            .enumerate()
            .find(|&(_, &v)| u32::from(v) > header.maxval)
        {
            return Err(RasterError::SampleOutOfRange {
                index,
                value: u32::from(value),
                maxval: header.maxval,
            });
        }
        Ok(Self {
            width: header.width,
            height: header.height,
            maxval: header.maxval,
            pixels,
        })
    }

    /// Create a raster filled with a single value.
    pub fn filled(width: u32, height: u32, maxval: u32, value: u8) -> Result<Self, RasterError> {
        let header = RasterHeader::new(width, height, maxval)?;
        Self::new(header, vec![value; header.sample_count()])
    }

    /// Dimensions and maxval of this raster.
    pub fn header(&self) -> RasterHeader {
        RasterHeader {
            width: self.width,
            height: self.height,
            maxval: self.maxval,
        }
    }

    /// Sample at column `x`, row `y`, or `None` outside the raster.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x < self.width && y < self.height {
            Some(self.pixels[y as usize * self.width as usize + x as usize])
        } else {
            None
        }
    }

    /// One row of samples.
    pub fn row(&self, y: u32) -> &[u8] {
        let w = self.width as usize;
        let start = y as usize * w;
        &self.pixels[start..start + w]
    }

    /// Get the total number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }
}
