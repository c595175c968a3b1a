//! Image loading and normalization ahead of registration.
//!
//! Preprocessing only changes intensities and, when a mask is supplied with
//! the bounding-box policy on, the extent of the image. The crop geometry is
//! returned alongside the image so transforms can later be moved back into
//! the uncropped frame.

use std::path::PathBuf;

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

use sectionreg_core::image::{BoundingBox, Image, Modality, PixelType};
use sectionreg_core::spatial::{Point, Spacing};

use crate::error::{RegistrationError, Result};

/// Rec.601 luma weights.
const LUMA: [f32; 3] = [0.299, 0.587, 0.114];

/// Where an image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource<B: Backend> {
    Path(PathBuf),
    InMemory(Image<B>),
}

impl<B: Backend> ImageSource<B> {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    fn describe(&self) -> String {
        match self {
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::InMemory(_) => "<in-memory image>".to_string(),
        }
    }
}

/// A binary mask and the resolution it was drawn at.
#[derive(Debug, Clone)]
pub struct MaskSource<B: Backend> {
    pub source: ImageSource<B>,
    /// Microns per pixel; defaults to the resolution of the masked image.
    pub resolution: Option<f64>,
}

impl<B: Backend> MaskSource<B> {
    pub fn new(source: ImageSource<B>, resolution: Option<f64>) -> Self {
        Self { source, resolution }
    }
}

/// A normalized image ready for registration.
#[derive(Debug, Clone)]
pub struct PreparedImage<B: Backend> {
    image: Image<B>,
    bbox: Option<BoundingBox>,
}

impl<B: Backend> PreparedImage<B> {
    pub fn new(image: Image<B>, bbox: Option<BoundingBox>) -> Self {
        Self { image, bbox }
    }

    pub fn image(&self) -> &Image<B> {
        &self.image
    }

    pub fn into_image(self) -> Image<B> {
        self.image
    }

    /// Crop applied to the original image, if any.
    pub fn bbox(&self) -> Option<BoundingBox> {
        self.bbox
    }
}

/// Loads and normalizes registration inputs on one device.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ImagePreprocessor<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Load, optionally crop to a mask's extent, and normalize an image.
    ///
    /// The result is a single channel in `[0, 1]` (in-memory sources pass
    /// through untouched) with spacing `resolution` and origin `(0, 0)`.
    pub fn prepare(
        &self,
        source: &ImageSource<B>,
        resolution: f64,
        modality: Modality,
        mask: Option<&MaskSource<B>>,
        use_bounding_box: bool,
    ) -> Result<PreparedImage<B>> {
        match (source, modality) {
            (ImageSource::Path(path), Modality::InMemory) => {
                return Err(RegistrationError::invalid_image(format!(
                    "{} is a file but its modality is in_memory",
                    path.display()
                )))
            }
            (ImageSource::InMemory(_), Modality::Brightfield | Modality::Fluorescence) => {
                return Err(RegistrationError::invalid_image(format!(
                    "in-memory images must use the in_memory modality, got {:?}",
                    modality
                )))
            }
            _ => {}
        }

        let image = self.load_raw(source, resolution)?;

        let bbox = match (mask, use_bounding_box) {
            (Some(mask), true) => Some(self.mask_bounding_box(mask, resolution, image.extent())?),
            _ => None,
        };
        let image = match &bbox {
            Some(bbox) => image
                .crop(bbox)
                .ok_or_else(|| RegistrationError::mask_mismatch("mask box does not fit the image"))?,
            None => image,
        };

        let image = match modality {
            Modality::Brightfield => normalize_brightfield(image),
            Modality::Fluorescence => normalize_fluorescence(image),
            Modality::InMemory => image,
        };

        tracing::debug!(
            source = %source.describe(),
            ?modality,
            extent = ?image.extent(),
            cropped = bbox.is_some(),
            "prepared image"
        );
        Ok(PreparedImage::new(image, bbox))
    }

    /// Decode an image without normalization, placing it at `resolution`
    /// with origin `(0, 0)`.
    pub fn load_raw(&self, source: &ImageSource<B>, resolution: f64) -> Result<Image<B>> {
        let spacing = Spacing::uniform(resolution);
        if !spacing.is_valid() {
            return Err(RegistrationError::invalid_image(format!(
                "resolution must be finite and positive, got {}",
                resolution
            )));
        }

        let image = match source {
            ImageSource::Path(path) => sectionreg_io::read_image::<B, _>(path, &self.device).map_err(|e| {
                RegistrationError::invalid_image(format!("cannot decode {}: {:#}", path.display(), e))
            })?,
            ImageSource::InMemory(image) => image.clone(),
        };

        let metadata = image
            .metadata()
            .clone()
            .with_spacing(spacing)
            .with_origin(Point::origin());
        Ok(image.with_metadata(metadata))
    }

    /// Pixel box of the image covered by the mask's nonzero extent.
    fn mask_bounding_box(
        &self,
        mask: &MaskSource<B>,
        image_resolution: f64,
        image_extent: [usize; 2],
    ) -> Result<BoundingBox> {
        let mask_resolution = mask.resolution.unwrap_or(image_resolution);
        let mask_image = self.load_raw(&mask.source, mask_resolution)?;
        let ([x0, y0], [x1, y1]) = nonzero_extent(&mask_image)?
            .ok_or_else(|| RegistrationError::mask_mismatch(format!("mask {} is empty", mask.source.describe())))?;

        let scale = mask_resolution / image_resolution;
        let start = [(x0 as f64 * scale).floor() as usize, (y0 as f64 * scale).floor() as usize];
        let end = [
            ((x1 + 1) as f64 * scale).ceil() as usize,
            ((y1 + 1) as f64 * scale).ceil() as usize,
        ];

        let bbox = BoundingBox::from_bounds(start, end, image_extent).ok_or_else(|| {
            RegistrationError::mask_mismatch(format!(
                "mask extent {:?}..{:?} does not intersect the {}x{} image",
                start, end, image_extent[0], image_extent[1]
            ))
        })?;
        tracing::debug!(origin = ?bbox.origin(), size = ?bbox.size(), "mask bounding box");
        Ok(bbox)
    }
}

/// Inclusive pixel extent `([x0, y0], [x1, y1])` of nonzero samples in any
/// channel, or `None` for an all-zero mask.
fn nonzero_extent<B: Backend>(mask: &Image<B>) -> Result<Option<([usize; 2], [usize; 2])>> {
    let [width, height] = mask.extent();
    let samples = mask
        .to_planar()
        .map_err(|e| RegistrationError::invalid_image(format!("cannot read mask data: {:?}", e)))?;

    let mut extent: Option<([usize; 2], [usize; 2])> = None;
    for plane in samples.chunks(width * height) {
        for (i, _) in plane.iter().enumerate().filter(|(_, v)| **v != 0.0) {
            let (x, y) = (i % width, i / width);
            extent = Some(match extent {
                None => ([x, y], [x, y]),
                Some((lo, hi)) => ([lo[0].min(x), lo[1].min(y)], [hi[0].max(x), hi[1].max(y)]),
            });
        }
    }
    Ok(extent)
}

/// Luminance scaled by the sample range, inverted so tissue is bright.
fn normalize_brightfield<B: Backend>(image: Image<B>) -> Image<B> {
    let [channels, height, width] = image.shape();
    let data = image.data().clone();

    let luminance = if channels >= 3 {
        let weighted: Vec<Tensor<B, 3>> = LUMA
            .iter()
            .enumerate()
            .map(|(c, w)| data.clone().slice([c..c + 1, 0..height, 0..width]).mul_scalar(*w))
            .collect();
        weighted
            .into_iter()
            .reduce(|a, b| a + b)
            .unwrap_or_else(|| Tensor::zeros([1, height, width], &image.device()))
    } else {
        data.mean_dim(0)
    };

    let max = match image.metadata().pixel_type().max_value() {
        Some(max) => max,
        None => luminance.clone().max().into_scalar().elem::<f32>(),
    };
    let scale = if max.is_finite() && max > 0.0 { max } else { 1.0 };

    let normalized = luminance.div_scalar(scale).clamp(0.0, 1.0).neg().add_scalar(1.0);
    single_channel(image, normalized)
}

/// Per-pixel channel maximum rescaled to `[0, 1]`.
fn normalize_fluorescence<B: Backend>(image: Image<B>) -> Image<B> {
    let projected = image.data().clone().max_dim(0);
    let min = projected.clone().min().into_scalar().elem::<f32>();
    let max = projected.clone().max().into_scalar().elem::<f32>();

    let normalized = if max > min {
        projected.sub_scalar(min).div_scalar(max - min)
    } else {
        projected.zeros_like()
    };
    single_channel(image, normalized)
}

fn single_channel<B: Backend>(image: Image<B>, data: Tensor<B, 3>) -> Image<B> {
    let metadata = image.metadata().clone().with_pixel_type(PixelType::F32);
    Image::new(data, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use sectionreg_core::image::ImageMetadata;

    type TestBackend = NdArray<f32>;

    fn in_memory(samples: Vec<f32>, shape: [usize; 3], pixel_type: PixelType) -> Image<TestBackend> {
        let metadata = ImageMetadata::in_memory().with_pixel_type(pixel_type);
        Image::from_planar(samples, shape, metadata, &Default::default()).unwrap()
    }

    #[test]
    fn test_brightfield_inverts_luminance() {
        // white and black RGB pixels
        let image = in_memory(vec![255.0, 0.0, 255.0, 0.0, 255.0, 0.0], [3, 1, 2], PixelType::U8);
        let values = normalize_brightfield(image).to_planar().unwrap();
        assert!(values[0].abs() < 1e-6);
        assert!((values[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_brightfield_gray_uses_data_max_for_float() {
        let image = in_memory(vec![0.0, 2.0, 4.0], [1, 1, 3], PixelType::F32);
        let values = normalize_brightfield(image).to_planar().unwrap();
        assert_eq!(values, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_fluorescence_max_projection() {
        let image = in_memory(vec![0.0, 10.0, 5.0, 20.0, 0.0, 5.0], [2, 1, 3], PixelType::U16);
        let normalized = normalize_fluorescence(image);
        assert_eq!(normalized.channels(), 1);
        assert_eq!(normalized.to_planar().unwrap(), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_fluorescence_constant_is_zero() {
        let image = in_memory(vec![7.0; 4], [1, 2, 2], PixelType::U8);
        assert_eq!(normalize_fluorescence(image).to_planar().unwrap(), vec![0.0; 4]);
    }

    #[test]
    fn test_nonzero_extent_any_channel() {
        let mut samples = vec![0.0; 2 * 4 * 5];
        samples[6] = 1.0; // channel 0, (1, 1)
        samples[20 + 13] = 1.0; // channel 1, (3, 2)
        let mask = in_memory(samples, [2, 4, 5], PixelType::U8);
        assert_eq!(nonzero_extent(&mask).unwrap(), Some(([1, 1], [3, 2])));
    }

    #[test]
    fn test_in_memory_requires_in_memory_modality() {
        let preprocessor = ImagePreprocessor::<TestBackend>::new(Default::default());
        let source = ImageSource::InMemory(in_memory(vec![0.0; 4], [1, 2, 2], PixelType::F32));
        let err = preprocessor
            .prepare(&source, 1.0, Modality::Brightfield, None, false)
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidImageError(_)));

        let path = ImageSource::<TestBackend>::path("slide.tif");
        let err = preprocessor.prepare(&path, 1.0, Modality::InMemory, None, false).unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidImageError(_)));
    }

    #[test]
    fn test_resolution_must_be_positive() {
        let preprocessor = ImagePreprocessor::<TestBackend>::new(Default::default());
        let source = ImageSource::InMemory(in_memory(vec![0.0; 4], [1, 2, 2], PixelType::F32));
        for resolution in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = preprocessor
                .prepare(&source, resolution, Modality::InMemory, None, false)
                .unwrap_err();
            assert!(matches!(err, RegistrationError::InvalidImageError(_)));
        }
    }
}
