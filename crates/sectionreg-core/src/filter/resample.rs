//! Resample image filter.
//!
//! Provides [`ResampleImageFilter`], which maps an image onto a new sampling
//! grid through a transform and an interpolator.

use std::marker::PhantomData;

use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};

use crate::image::grid::generate_grid_rows;
use crate::image::{Image, ImageDomain};
use crate::interpolation::trait_::Interpolator;
use crate::transform::trait_::Transform;

/// Output points evaluated per pass; bounds the size of intermediate tensors.
pub const CHUNK_POINTS: usize = 65_536;

/// Resample image filter.
///
/// The transform maps output physical points to input physical points, which
/// is the direction registration transforms already have (fixed to moving).
/// All channels of the input are resampled together.
///
/// # Type Parameters
/// * `B` - The Burn backend
/// * `T` - The transform type
/// * `I` - The interpolator type
pub struct ResampleImageFilter<B, T, I>
where
    B: Backend,
    T: Transform<B>,
    I: Interpolator<B>,
{
    domain: ImageDomain,
    transform: T,
    interpolator: I,
    chunk_points: usize,
    _phantom: PhantomData<B>,
}

impl<B, T, I> ResampleImageFilter<B, T, I>
where
    B: Backend,
    T: Transform<B>,
    I: Interpolator<B>,
{
    /// Create a new resample filter.
    ///
    /// # Arguments
    /// * `domain` - Output grid (size, spacing, origin)
    /// * `transform` - Transform from output space to input space
    /// * `interpolator` - Interpolator for input image sampling
    pub fn new(domain: ImageDomain, transform: T, interpolator: I) -> Self {
        Self {
            domain,
            transform,
            interpolator,
            chunk_points: CHUNK_POINTS,
            _phantom: PhantomData,
        }
    }

    /// Output grid taken from a reference image.
    pub fn new_from_reference(reference: &Image<B>, transform: T, interpolator: I) -> Self {
        Self::new(reference.domain(), transform, interpolator)
    }

    /// Override the number of output points evaluated per pass.
    pub fn with_chunk_points(mut self, chunk_points: usize) -> Self {
        self.chunk_points = chunk_points.max(1);
        self
    }

    pub fn domain(&self) -> &ImageDomain {
        &self.domain
    }

    /// Apply filter to an input image.
    ///
    /// The result keeps the input's pixel type and modality and takes the
    /// output grid's origin and spacing.
    pub fn apply(&self, input: &Image<B>) -> Image<B> {
        let device = input.device();
        let [width, height] = self.domain.size;
        let channels = input.channels();
        let rows_per_chunk = (self.chunk_points / width.max(1)).max(1);

        let mut pieces = Vec::new();
        let mut row = 0;
        while row < height {
            let end = (row + rows_per_chunk).min(height);

            let output_indices = generate_grid_rows::<B>(self.domain.size, row..end, 1, &device);
            let output_points = self.indices_to_physical(output_indices, &device);
            let input_points = self.transform.transform_points(output_points);
            let input_indices = input.world_to_index_tensor(input_points);

            // [N, C] -> [C, N]
            pieces.push(self.interpolator.interpolate(input.data(), input_indices).transpose());
            row = end;
        }

        let flat = if pieces.is_empty() {
            Tensor::<B, 2>::zeros([channels, 0], &device)
        } else {
            Tensor::cat(pieces, 1)
        };
        let data = flat.reshape([channels, height, width]);

        let metadata = input
            .metadata()
            .clone()
            .with_origin(self.domain.origin)
            .with_spacing(self.domain.spacing);
        Image::new(data, metadata)
    }

    fn indices_to_physical(&self, indices: Tensor<B, 2>, device: &B::Device) -> Tensor<B, 2> {
        let origin = Tensor::<B, 2>::from_data(
            TensorData::new(
                vec![self.domain.origin.x() as f32, self.domain.origin.y() as f32],
                Shape::new([1, 2]),
            ),
            device,
        );
        let spacing = Tensor::<B, 2>::from_data(
            TensorData::new(
                vec![self.domain.spacing[0] as f32, self.domain.spacing[1] as f32],
                Shape::new([1, 2]),
            ),
            device,
        );
        indices * spacing + origin
    }
}
