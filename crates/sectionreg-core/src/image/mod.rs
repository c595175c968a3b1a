//! Image types and operations.

pub mod grid;
pub mod image;
pub mod metadata;
pub mod region;

pub use image::Image;
pub use metadata::{ImageDomain, ImageMetadata, Modality, PixelType};
pub use region::BoundingBox;
