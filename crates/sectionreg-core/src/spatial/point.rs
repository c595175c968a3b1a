//! Point type for physical positions in the section plane.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// A position in physical space, `(x, y)`.
///
/// Thin wrapper around nalgebra's `Point2<f64>`; used for image origins and
/// for evaluating transforms at single locations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point(pub Point2<f64>);

impl Point {
    /// Create a point from `[x, y]`.
    pub fn new(coords: [f64; 2]) -> Self {
        Self(Point2::new(coords[0], coords[1]))
    }

    /// The physical origin `(0, 0)`.
    pub fn origin() -> Self {
        Self(Point2::origin())
    }

    pub fn x(&self) -> f64 {
        self.0.x
    }

    pub fn y(&self) -> f64 {
        self.0.y
    }

    /// Coordinates as `[x, y]`.
    pub fn to_array(&self) -> [f64; 2] {
        [self.0.x, self.0.y]
    }

    /// Translate the point by a physical offset.
    pub fn offset(&self, delta: [f64; 2]) -> Self {
        Self(self.0 + Vector2::new(delta[0], delta[1]))
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        nalgebra::distance(&self.0, &other.0)
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::origin()
    }
}

impl std::ops::Index<usize> for Point {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl std::ops::IndexMut<usize> for Point {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}
