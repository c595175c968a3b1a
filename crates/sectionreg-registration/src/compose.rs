//! Applying fitted transforms to full-resolution originals.
//!
//! Transforms are fitted on preprocessed, possibly cropped images whose
//! origin was reset to `(0, 0)`. Before one can be applied to the uncropped
//! original it is reprojected through the crop offsets it recorded:
//! `T'(p) = T(p - o_fixed) + o_moving`.

use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use sectionreg_core::filter::ResampleImageFilter;
use sectionreg_core::image::{Image, ImageDomain};
use sectionreg_core::interpolation::LinearInterpolator;
use sectionreg_core::spatial::{Point, Spacing};
use sectionreg_core::transform::{ChainedTransform, Transform};

use crate::error::{RegistrationError, Result};
use crate::transform::{RegistrationTransform, Stage};

/// A transform evaluated in the uncropped fixed and moving frames.
pub struct ReprojectedTransform<B: Backend> {
    inner: Box<dyn Transform<B>>,
    fixed_offset: [f64; 2],
    moving_offset: [f64; 2],
}

impl<B: Backend> ReprojectedTransform<B> {
    pub fn new(inner: Box<dyn Transform<B>>, fixed_offset: [f64; 2], moving_offset: [f64; 2]) -> Self {
        Self {
            inner,
            fixed_offset,
            moving_offset,
        }
    }

    pub fn fixed_offset(&self) -> [f64; 2] {
        self.fixed_offset
    }

    pub fn moving_offset(&self) -> [f64; 2] {
        self.moving_offset
    }
}

impl<B: Backend> Transform<B> for ReprojectedTransform<B> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = points.device();
        let fixed = offset_row::<B>(self.fixed_offset, &device);
        let moving = offset_row::<B>(self.moving_offset, &device);
        self.inner.transform_points(points - fixed) + moving
    }
}

impl<B: Backend> std::fmt::Debug for ReprojectedTransform<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReprojectedTransform")
            .field("fixed_offset", &self.fixed_offset)
            .field("moving_offset", &self.moving_offset)
            .finish_non_exhaustive()
    }
}

fn offset_row<B: Backend>(offset: [f64; 2], device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(
        TensorData::new(vec![offset[0] as f32, offset[1] as f32], Shape::new([1, 2])),
        device,
    )
}

/// Move a transform from its cropped frames into the uncropped ones.
pub fn reproject<B: Backend>(transform: &RegistrationTransform, device: &B::Device) -> Result<ReprojectedTransform<B>> {
    Ok(ReprojectedTransform::new(
        transform.to_core::<B>(device)?,
        transform.fixed_offset(),
        transform.moving_offset(),
    ))
}

/// Apply a stage-ordered chain of transforms to an uncropped original.
///
/// `transforms` are given in the order they were fitted; a linear stage after
/// a non-linear one is rejected. The output covers the full fixed extent at
/// the fixed spacing and keeps every channel of `original`.
pub fn apply_chain<B: Backend>(
    original: &Image<B>,
    transforms: &[RegistrationTransform],
    resolution: f64,
) -> Result<Image<B>> {
    validate_order(transforms)?;
    let Some(first_applied) = transforms.last() else {
        return Err(RegistrationError::transform_order("no transforms to apply"));
    };
    let device = original.device();
    let input = place(original, resolution)?;

    // The fixed point is mapped through the last fitted stage first.
    let mut chain = ChainedTransform::new(Vec::with_capacity(transforms.len()));
    for transform in transforms.iter().rev() {
        chain.push(Box::new(reproject::<B>(transform, &device)?));
    }

    let domain = output_domain(first_applied);
    tracing::info!(stages = transforms.len(), size = ?domain.size, "resampling original through transform chain");
    Ok(resample(&input, chain, domain, transforms))
}

/// Apply one transform to an uncropped original.
pub fn apply_single<B: Backend>(
    original: &Image<B>,
    transform: &RegistrationTransform,
    resolution: f64,
) -> Result<Image<B>> {
    apply_chain(original, std::slice::from_ref(transform), resolution)
}

fn validate_order(transforms: &[RegistrationTransform]) -> Result<()> {
    if transforms.is_empty() {
        return Err(RegistrationError::transform_order("no transforms to apply"));
    }
    let misplaced = transforms
        .windows(2)
        .position(|pair| pair[0].stage() == Stage::NonLinear && pair[1].stage() == Stage::Linear);
    match misplaced {
        Some(i) => Err(RegistrationError::transform_order(format!(
            "linear transform at position {} follows a non-linear one",
            i + 1
        ))),
        None => Ok(()),
    }
}

/// The original at `resolution` with its origin at zero, matching the frame
/// preprocessing placed it in.
fn place<B: Backend>(original: &Image<B>, resolution: f64) -> Result<Image<B>> {
    let spacing = Spacing::uniform(resolution);
    if !spacing.is_valid() {
        return Err(RegistrationError::invalid_image(format!(
            "resolution must be finite and positive, got {}",
            resolution
        )));
    }
    let metadata = original
        .metadata()
        .clone()
        .with_spacing(spacing)
        .with_origin(Point::origin());
    Ok(original.clone().with_metadata(metadata))
}

fn output_domain(first_applied: &RegistrationTransform) -> ImageDomain {
    ImageDomain::new(
        first_applied.full_fixed_size(),
        first_applied.fixed_domain().spacing,
        Point::origin(),
    )
}

fn resample<B: Backend>(
    input: &Image<B>,
    chain: ChainedTransform<B>,
    domain: ImageDomain,
    transforms: &[RegistrationTransform],
) -> Image<B> {
    let default_value = transforms
        .iter()
        .rev()
        .find_map(|t| t.parameter_map().get_f64("DefaultPixelValue").ok().flatten())
        .unwrap_or(0.0) as f32;
    ResampleImageFilter::new(domain, chain, LinearInterpolator::with_default(default_value)).apply(input)
}
