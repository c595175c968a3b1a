//! Image metadata types.
//!
//! Metadata describes how pixel indices map to physical coordinates and
//! carries the intensity conventions a decoded image came with.

use serde::{Deserialize, Serialize};
use crate::spatial::{Point, Spacing};

/// Sample type of the decoded source, used to re-encode outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PixelType {
    U8,
    U16,
    #[default]
    F32,
}

impl PixelType {
    /// Largest representable sample value, `None` for floating point.
    pub fn max_value(&self) -> Option<f32> {
        match self {
            PixelType::U8 => Some(u8::MAX as f32),
            PixelType::U16 => Some(u16::MAX as f32),
            PixelType::F32 => None,
        }
    }
}

/// Intensity convention of an image.
///
/// Drives preprocessing normalization only; geometry is never affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    /// Light background with dense foreground signal (brightfield, H&E).
    #[serde(
        rename = "brightfield",
        alias = "RGB_l",
        alias = "rgb_l",
        alias = "dense-signal/light-background"
    )]
    Brightfield,
    /// Dark background with sparse bright signal (autofluorescence, IF).
    #[serde(
        rename = "fluorescence",
        alias = "AF",
        alias = "af",
        alias = "sparse-signal/dark-background"
    )]
    Fluorescence,
    /// Already preprocessed and held in memory; skips normalization.
    #[serde(rename = "in_memory")]
    InMemory,
}

/// Image metadata: physical placement plus intensity conventions.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    /// Physical coordinate of pixel (0, 0).
    origin: Point,
    /// Physical distance between pixels along each axis.
    spacing: Spacing,
    pixel_type: PixelType,
    modality: Modality,
}

impl ImageMetadata {
    pub fn new(origin: Point, spacing: Spacing, pixel_type: PixelType, modality: Modality) -> Self {
        Self {
            origin,
            spacing,
            pixel_type,
            modality,
        }
    }

    /// Zero origin, unit spacing, `f32` samples held in memory.
    pub fn in_memory() -> Self {
        Self::new(Point::origin(), Spacing::uniform(1.0), PixelType::F32, Modality::InMemory)
    }

    pub fn origin(&self) -> &Point {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing {
        &self.spacing
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn with_origin(mut self, origin: Point) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_spacing(mut self, spacing: Spacing) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_pixel_type(mut self, pixel_type: PixelType) -> Self {
        self.pixel_type = pixel_type;
        self
    }

    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = modality;
        self
    }
}

impl Default for ImageMetadata {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// A resampling grid: pixel extent plus physical placement.
///
/// `size` is `[width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageDomain {
    pub size: [usize; 2],
    pub spacing: Spacing,
    pub origin: Point,
}

impl ImageDomain {
    pub fn new(size: [usize; 2], spacing: Spacing, origin: Point) -> Self {
        Self { size, spacing, origin }
    }

    /// Physical width and height covered by the pixel centers.
    pub fn physical_extent(&self) -> [f64; 2] {
        [
            self.size[0].saturating_sub(1) as f64 * self.spacing[0],
            self.size[1].saturating_sub(1) as f64 * self.spacing[1],
        ]
    }

    /// Physical coordinate of the grid center.
    pub fn physical_center(&self) -> Point {
        let extent = self.physical_extent();
        self.origin.offset([extent[0] / 2.0, extent[1] / 2.0])
    }

    /// Half the physical diagonal; used as a lever arm for rotation scaling.
    pub fn half_diagonal(&self) -> f64 {
        let extent = self.physical_extent();
        (extent[0].hypot(extent[1]) / 2.0).max(1.0)
    }

    pub fn pixel_count(&self) -> usize {
        self.size[0] * self.size[1]
    }
}
