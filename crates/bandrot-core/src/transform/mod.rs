//! Image rotation.
//!
//! # Coordinate System
//!
//! - Rotation angles are in degrees, positive = counter-clockwise
//! - Any finite angle is accepted and reduced modulo 360
//! - Origin is the top-left corner, rows grow downward
//! - Destination rows can be computed independently, in any grouping

mod rotation;

pub use rotation::{
    compute_rotated_bounds, normalize_degrees, rotate_band, rotate_image, RotationGeometry,
    SamplingConvention, BACKGROUND,
};
