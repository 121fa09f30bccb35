//! Crate-level error type.

use thiserror::Error;

use crate::collective::CollectiveError;
use crate::distribute::AssemblyError;
use crate::raster::RasterError;

/// Any failure of a rotation run.
#[derive(Debug, Error)]
pub enum RotateError {
    /// Reading, parsing or writing a raster failed.
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// A broadcast or gather could not complete.
    #[error(transparent)]
    Collective(#[from] CollectiveError),

    /// The gathered bands do not form a destination image.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// The coordinator failed before distributing the source and told every
    /// other worker to stop.
    #[error("Coordinator aborted the run: {0}")]
    Aborted(String),

    /// The run was configured with unusable settings.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, RotateError>;
