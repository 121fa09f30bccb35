//! Bandrot Core - Distributed raster rotation
//!
//! This crate rotates grayscale rasters by arbitrary angles with the work
//! split across a fixed group of cooperating workers. Each worker rotates a
//! horizontal band of the output and the bands are gathered back into one
//! image at the coordinating worker.
//!
//! # Module Structure
//!
//! - `raster` - Grayscale raster type, plain-text graymap I/O, PNG previews
//! - `partition` - Deterministic split of output rows into bands
//! - `transform` - Nearest-neighbor rotation kernel
//! - `collective` - Worker groups with broadcast and gather
//! - `distribute` - The per-worker protocol: replicate, compute, collect
//! - `driver` - Configuration and end-to-end runs
//!
//! # Example
//!
//! ```ignore
//! use bandrot_core::driver::{run, RotateConfig};
//!
//! let mut config = RotateConfig::new(30.0);
//! config.workers = 4;
//! let report = run(&config)?;
//! println!("Execution time: {} seconds", report.elapsed_seconds);
//! ```

pub mod collective;
pub mod distribute;
pub mod driver;
pub mod error;
pub mod partition;
pub mod raster;
pub mod transform;

pub use distribute::{GatherMode, RotatedRaster, RotationParams};
pub use driver::{rotate_distributed, rotate_in_memory, run, RotateConfig, RotationReport};
pub use error::{Result, RotateError};
pub use partition::{range_for, BandPlan, RowRange};
pub use raster::{RasterError, RasterHeader, RasterImage};
pub use transform::{compute_rotated_bounds, rotate_image, SamplingConvention};
