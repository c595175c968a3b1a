//! Axis-aligned pixel regions of an uncropped image.

use serde::{Deserialize, Serialize};
use crate::spatial::Spacing;

/// A crop window in the pixel grid of an original, uncropped image.
///
/// `origin` and `size` are `[x, y]` and `[width, height]`; `parent_size` is the
/// extent of the image the box was taken from. A transform computed on the
/// cropped image is only valid in the parent frame after it has been shifted
/// by [`BoundingBox::physical_offset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    origin: [usize; 2],
    size: [usize; 2],
    parent_size: [usize; 2],
}

impl BoundingBox {
    /// Create a box, or `None` if it is empty or leaves the parent extent.
    pub fn new(origin: [usize; 2], size: [usize; 2], parent_size: [usize; 2]) -> Option<Self> {
        let fits = (0..2).all(|axis| {
            size[axis] > 0 && origin[axis] + size[axis] <= parent_size[axis]
        });
        fits.then_some(Self {
            origin,
            size,
            parent_size,
        })
    }

    /// Box from half-open pixel bounds `[x0, x1) x [y0, y1)`, clipped to the parent.
    pub fn from_bounds(start: [usize; 2], end: [usize; 2], parent_size: [usize; 2]) -> Option<Self> {
        let x1 = end[0].min(parent_size[0]);
        let y1 = end[1].min(parent_size[1]);
        if start[0] >= x1 || start[1] >= y1 {
            return None;
        }
        Self::new(start, [x1 - start[0], y1 - start[1]], parent_size)
    }

    pub fn origin(&self) -> [usize; 2] {
        self.origin
    }

    pub fn size(&self) -> [usize; 2] {
        self.size
    }

    pub fn parent_size(&self) -> [usize; 2] {
        self.parent_size
    }

    /// Exclusive end corner `[x1, y1]`.
    pub fn end(&self) -> [usize; 2] {
        [self.origin[0] + self.size[0], self.origin[1] + self.size[1]]
    }

    /// Physical shift from the cropped frame back to the parent frame.
    pub fn physical_offset(&self, spacing: &Spacing) -> [f64; 2] {
        spacing.scale_index(self.origin)
    }

    /// True when the box covers the whole parent.
    pub fn is_full(&self) -> bool {
        self.origin == [0, 0] && self.size == self.parent_size
    }
}
