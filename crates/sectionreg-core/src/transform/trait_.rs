//! Transform trait for spatial coordinate transformations.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Maps physical points of one image plane to physical points of another.
///
/// Registration transforms map fixed-image (output) coordinates to
/// moving-image (input) coordinates, which is the direction resampling needs.
/// The trait does not require `burn::module::Module`, so both trainable and
/// frozen transforms can implement it.
pub trait Transform<B: Backend> {
    /// Apply the transform to a batch of points.
    ///
    /// # Arguments
    /// * `points` - Tensor of shape `[Batch, 2]` in physical units
    ///
    /// # Returns
    /// Tensor of shape `[Batch, 2]` containing the mapped points
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2>;
}

impl<B: Backend, T: Transform<B> + ?Sized> Transform<B> for Box<T> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        (**self).transform_points(points)
    }
}
