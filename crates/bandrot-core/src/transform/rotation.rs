//! Nearest-neighbor rotation by inverse mapping.
//!
//! For every destination pixel we compute which source pixel lands on it by
//! rotating the destination coordinate back about the image centers, then
//! copy that one sample. Destination pixels whose source falls outside the
//! source raster are background (`0`).
//!
//! # Algorithm
//!
//! With `(fx, fy)` the destination pixel relative to the destination center:
//! ```text
//! src_x = floor(fx * cos(θ) - fy * sin(θ) + src_w / 2)
//! src_y = floor(fx * sin(θ) + fy * cos(θ) + src_h / 2)
//! ```
//!
//! The destination canvas is the bounding box of the rotated source:
//! ```text
//! dst_w = floor(|src_w * cos(θ)| + |src_h * sin(θ)|)
//! dst_h = floor(|src_h * cos(θ)| + |src_w * sin(θ)|)
//! ```
//!
//! Positive angles rotate counter-clockwise on screen.

use serde::{Deserialize, Serialize};

use crate::partition::RowRange;
use crate::raster::RasterImage;

/// Background sample for destination pixels with no source pixel.
pub const BACKGROUND: u8 = 0;

/// How destination pixel positions are mapped into the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingConvention {
    /// Sample at pixel centers with real-valued image centers.
    ///
    /// 0° is the identity and 180° an exact double flip for any size.
    #[default]
    PixelCenter,
    /// Integer-truncated centers, row offset driving `src_x`, truncation
    /// toward zero.
    ///
    /// Reproduces the output of the original batch tool bit for bit,
    /// including its transposed result at 0°.
    Legacy,
}

/// Reduce an angle in degrees to `[0, 360)`.
#[inline]
pub fn normalize_degrees(angle_degrees: f64) -> f64 {
    let reduced = angle_degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if reduced >= 360.0 {
        0.0
    } else {
        reduced
    }
}

/// Compute the dimensions of the bounding box for a rotated image.
///
/// Both dimensions are floored and clamped to at least one pixel.
///
/// # Example
///
/// ```
/// use bandrot_core::transform::compute_rotated_bounds;
///
/// assert_eq!(compute_rotated_bounds(4, 4, 45.0), (5, 5));
/// assert_eq!(compute_rotated_bounds(100, 50, 90.0), (50, 100));
/// ```
pub fn compute_rotated_bounds(width: u32, height: u32, angle_degrees: f64) -> (u32, u32) {
    let angle_rad = normalize_degrees(angle_degrees).to_radians();
    bounds_for(width, height, angle_rad.cos(), angle_rad.sin())
}

fn bounds_for(width: u32, height: u32, cos: f64, sin: f64) -> (u32, u32) {
    let w = width as f64;
    let h = height as f64;

    let new_w = ((w * cos).abs() + (h * sin).abs()).floor() as u32;
    let new_h = ((h * cos).abs() + (w * sin).abs()).floor() as u32;

    (new_w.max(1), new_h.max(1))
}

/// Everything a worker needs to map destination pixels to source pixels.
///
/// Built from broadcast data only (source dimensions and the angle), so every
/// worker derives exactly the same values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationGeometry {
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    /// Angle reduced to `[0, 360)` degrees.
    pub angle_degrees: f64,
    pub cos: f64,
    pub sin: f64,
    pub convention: SamplingConvention,
}

impl RotationGeometry {
    pub fn new(
        src_width: u32,
        src_height: u32,
        angle_degrees: f64,
        convention: SamplingConvention,
    ) -> Self {
        let angle_degrees = normalize_degrees(angle_degrees);
        let angle_rad = angle_degrees.to_radians();
        let cos = angle_rad.cos();
        let sin = angle_rad.sin();
        let (dst_width, dst_height) = bounds_for(src_width, src_height, cos, sin);

        Self {
            src_width,
            src_height,
            dst_width,
            dst_height,
            angle_degrees,
            cos,
            sin,
            convention,
        }
    }

    /// Source `(x, y)` for the destination pixel at `row`, `col`, or `None`
    /// when it falls outside the source.
    #[inline]
    pub fn source_coords(&self, row: u32, col: u32) -> Option<(u32, u32)> {
        let (x, y) = match self.convention {
            SamplingConvention::PixelCenter => self.map_pixel_center(row, col),
            SamplingConvention::Legacy => self.map_legacy(row, col),
        };

        if x >= 0 && x < self.src_width as i64 && y >= 0 && y < self.src_height as i64 {
            Some((x as u32, y as u32))
        } else {
            None
        }
    }

    fn map_pixel_center(&self, row: u32, col: u32) -> (i64, i64) {
        let fx = col as f64 + 0.5 - self.dst_width as f64 / 2.0;
        let fy = row as f64 + 0.5 - self.dst_height as f64 / 2.0;

        let sx = fx * self.cos - fy * self.sin + self.src_width as f64 / 2.0;
        let sy = fx * self.sin + fy * self.cos + self.src_height as f64 / 2.0;

        (sx.floor() as i64, sy.floor() as i64)
    }

    fn map_legacy(&self, row: u32, col: u32) -> (i64, i64) {
        let dy = (row as i64 - (self.dst_height / 2) as i64) as f64;
        let dx = (col as i64 - (self.dst_width / 2) as i64) as f64;

        // `as` truncates toward zero
        let sx = (dy * self.cos - dx * self.sin) as i64 + (self.src_width / 2) as i64;
        let sy = (dy * self.sin + dx * self.cos) as i64 + (self.src_height / 2) as i64;

        (sx, sy)
    }
}

/// Rotate the rows `range` of the destination into a band buffer.
///
/// The buffer always holds `capacity_rows` full destination rows, so every
/// worker produces a band of the same size. Row `range.start` lands at the
/// start of the buffer; rows past `range.end` stay at background.
pub fn rotate_band(
    src: &RasterImage,
    geometry: &RotationGeometry,
    range: RowRange,
    capacity_rows: u32,
) -> Vec<u8> {
    debug_assert!(range.len() <= capacity_rows, "band exceeds its capacity");
    debug_assert_eq!(
        (src.width, src.height),
        (geometry.src_width, geometry.src_height),
        "geometry built for a different source"
    );

    let dst_w = geometry.dst_width as usize;
    let mut band = vec![BACKGROUND; dst_w * capacity_rows as usize];

    for (local_row, row) in range.rows().enumerate() {
        let line = &mut band[local_row * dst_w..(local_row + 1) * dst_w];
        for (col, out) in line.iter_mut().enumerate() {
            if let Some((x, y)) = geometry.source_coords(row, col as u32) {
                *out = src.pixels[y as usize * src.width as usize + x as usize];
            }
        }
    }

    band
}

/// Rotate a whole raster in a single pass.
///
/// The distributed path must produce exactly this output.
pub fn rotate_image(
    src: &RasterImage,
    angle_degrees: f64,
    convention: SamplingConvention,
) -> RasterImage {
    let geometry = RotationGeometry::new(src.width, src.height, angle_degrees, convention);
    let all_rows = RowRange {
        start: 0,
        end: geometry.dst_height,
    };
    let pixels = rotate_band(src, &geometry, all_rows, geometry.dst_height);

    RasterImage {
        width: geometry.dst_width,
        height: geometry.dst_height,
        maxval: src.maxval,
        pixels,
    }
}
