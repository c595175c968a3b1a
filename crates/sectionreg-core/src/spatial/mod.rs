//! Spatial types for planar physical coordinates.
//!
//! Sections are registered in the plane, so every type here is fixed to two
//! axes and stored in `(x, y)` order. Physical units are whatever the caller
//! supplies as resolution (µm per pixel for microscopy).

pub mod point;
pub mod spacing;

pub use point::Point;
pub use spacing::Spacing;
