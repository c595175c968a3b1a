//! Interpolator trait for sampling values at continuous coordinates.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Samples planar image data at non-integer pixel indices.
///
/// # Type Parameters
/// * `B` - The Burn backend
pub trait Interpolator<B: Backend> {
    /// Interpolate every channel of `data` at the given continuous indices.
    ///
    /// # Arguments
    /// * `data` - Planar image `[C, H, W]`
    /// * `indices` - Continuous `(x, y)` indices `[Batch, 2]`
    ///
    /// # Returns
    /// Tensor of sampled values `[Batch, C]`
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 2>;
}
