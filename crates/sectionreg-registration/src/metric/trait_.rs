//! Metric trait for image similarity measurement.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use sectionreg_core::image::Image;
use sectionreg_core::transform::Transform;

/// Measures dissimilarity between a fixed image and a transformed moving image.
///
/// Lower values indicate better alignment. The returned tensor has shape `[1]`
/// so it can be differentiated with respect to the transform parameters.
pub trait Metric<B: Backend> {
    /// Loss of `moving` sampled through `transform` against `fixed`.
    ///
    /// # Arguments
    /// * `fixed` - The fixed (reference) image
    /// * `moving` - The moving image
    /// * `transform` - Maps fixed physical points to moving physical points
    fn forward(&self, fixed: &Image<B>, moving: &Image<B>, transform: &impl Transform<B>) -> Tensor<B, 1>;

    fn name(&self) -> &'static str;
}
