//! Pixel codecs for sectionreg images.
//!
//! Images are decoded into planar `f32` tensors and remember the sample type
//! they came from so outputs can be re-encoded the same way.

pub mod mha_io;
pub mod tiff_io;

pub use mha_io::{read_mha, write_mha};
pub use tiff_io::{read_tiff, write_tiff};

use anyhow::{bail, Result};
use burn::tensor::backend::Backend;
use sectionreg_core::image::Image;
use std::path::Path;

/// Decode an image, choosing the codec from the file extension.
pub fn read_image<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Image<B>> {
    let path = path.as_ref();
    match extension(path).as_deref() {
        Some("tif") | Some("tiff") => read_tiff(path, device),
        Some("mha") => read_mha(path, device),
        _ => bail!("Unsupported image format: {}", path.display()),
    }
}

/// Encode an image, choosing the codec from the file extension.
pub fn write_image<B: Backend, P: AsRef<Path>>(image: &Image<B>, path: P) -> Result<()> {
    let path = path.as_ref();
    match extension(path).as_deref() {
        Some("tif") | Some("tiff") => write_tiff(image, path),
        Some("mha") => write_mha(image, path),
        _ => bail!("Unsupported image format: {}", path.display()),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Host copy of the pixel data, channel-major.
pub(crate) fn planar_samples<B: Backend>(image: &Image<B>) -> Result<Vec<f32>> {
    image
        .to_planar()
        .map_err(|e| anyhow::anyhow!("Failed to read image data: {:?}", e))
}

/// Round and clamp a sample into an integer range.
pub(crate) fn quantize(value: f32, max: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.round().clamp(0.0, max)
    }
}
