//! Grayscale rasters and their file formats.
//!
//! This module provides:
//! - `RasterImage`, a one-byte-per-sample grayscale raster in row-major order
//! - Reading and writing the plain-text graymap format (`P2`)
//! - PNG preview encoding
//!
//! # Examples
//!
//! ```ignore
//! use bandrot_core::raster::{read_pgm_file, write_pgm_file, derived_output_path};
//!
//! let image = read_pgm_file(Path::new("im.pgm"))?;
//! write_pgm_file(&derived_output_path(Path::new("im.pgm")), &image)?;
//! ```

mod atomic;
mod pgm;
mod png;
mod types;

pub use pgm::{
    derived_output_path, parse_pgm, read_pgm_file, to_pgm_string, write_pgm_file, OUTPUT_PREFIX,
};
pub use png::{encode_png, write_png_file};
pub use types::{RasterError, RasterHeader, RasterImage, MAX_SAMPLE_CEILING};
