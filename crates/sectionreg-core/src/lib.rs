pub mod image;
pub mod spatial;
pub mod transform;
pub mod interpolation;
pub mod filter;

pub use image::{BoundingBox, Image, ImageDomain, ImageMetadata, Modality, PixelType};
pub use spatial::{Point, Spacing};
