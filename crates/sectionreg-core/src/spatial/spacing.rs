//! Pixel spacing (physical resolution) along each image axis.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Physical distance between adjacent pixels, `(x, y)`.
///
/// For microscopy this is the resolution in µm per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spacing(pub Vector2<f64>);

impl Spacing {
    pub fn new(components: [f64; 2]) -> Self {
        Self(Vector2::new(components[0], components[1]))
    }

    /// Same spacing on both axes.
    pub fn uniform(value: f64) -> Self {
        Self::new([value, value])
    }

    /// Check if spacing is uniform (both components equal).
    pub fn is_uniform(&self) -> bool {
        (self.0.x - self.0.y).abs() < 1e-9
    }

    /// Both components finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|s| s.is_finite() && *s > 0.0)
    }

    pub fn to_array(&self) -> [f64; 2] {
        [self.0.x, self.0.y]
    }

    /// Physical offset of a pixel index under this spacing.
    pub fn scale_index(&self, index: [usize; 2]) -> [f64; 2] {
        [index[0] as f64 * self.0.x, index[1] as f64 * self.0.y]
    }
}

impl Default for Spacing {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

impl std::ops::Index<usize> for Spacing {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spacing_uniform() {
        let s = Spacing::uniform(0.5);
        assert!(s.is_uniform());
        assert_eq!(s.to_array(), [0.5, 0.5]);
    }

    #[test]
    fn test_spacing_validity() {
        assert!(Spacing::new([0.5, 0.65]).is_valid());
        assert!(!Spacing::new([0.0, 1.0]).is_valid());
        assert!(!Spacing::new([f64::NAN, 1.0]).is_valid());
    }

    #[test]
    fn test_scale_index() {
        let s = Spacing::new([0.5, 2.0]);
        assert_eq!(s.scale_index([10, 3]), [5.0, 6.0]);
    }
}
