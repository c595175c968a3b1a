//! Mean squares metric.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use sectionreg_core::image::grid;
use sectionreg_core::image::Image;
use sectionreg_core::interpolation::{Interpolator, LinearInterpolator};
use sectionreg_core::transform::Transform;

use super::trait_::Metric;

/// Fixed-image samples evaluated per pass.
const CHUNK_SIZE: usize = 32_768;

/// Mean squared intensity difference over a strided grid of fixed pixels.
///
/// MSE = (1/N) * sum((Fixed(x) - Moving(T(x)))^2), with every channel
/// contributing. Moving samples that fall outside the image read the
/// interpolator's default value.
#[derive(Debug, Clone)]
pub struct MeanSquares {
    interpolator: LinearInterpolator,
    stride: usize,
}

impl MeanSquares {
    /// # Arguments
    /// * `stride` - Sampling step over the fixed image in pixels
    /// * `default_value` - Intensity read outside the moving image
    pub fn new(stride: usize, default_value: f32) -> Self {
        Self {
            interpolator: LinearInterpolator::with_default(default_value),
            stride: stride.max(1),
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

impl Default for MeanSquares {
    fn default() -> Self {
        Self::new(1, 0.0)
    }
}

impl<B: Backend> Metric<B> for MeanSquares {
    fn forward(&self, fixed: &Image<B>, moving: &Image<B>, transform: &impl Transform<B>) -> Tensor<B, 1> {
        let device = fixed.device();
        let fixed_indices = grid::generate_grid::<B>(fixed.extent(), self.stride, &device);
        let [n, _] = fixed_indices.dims();

        let mut fixed_chunks = Vec::with_capacity(n.div_ceil(CHUNK_SIZE));
        let mut moving_chunks = Vec::with_capacity(n.div_ceil(CHUNK_SIZE));
        let mut start = 0;
        while start < n {
            let end = (start + CHUNK_SIZE).min(n);
            let indices = fixed_indices.clone().slice([start..end, 0..2]);

            let fixed_points = fixed.index_to_world_tensor(indices.clone());
            let moving_points = transform.transform_points(fixed_points);
            let moving_indices = moving.world_to_index_tensor(moving_points);

            fixed_chunks.push(self.interpolator.interpolate(fixed.data(), indices));
            moving_chunks.push(self.interpolator.interpolate(moving.data(), moving_indices));
            start = end;
        }

        let fixed_values = Tensor::cat(fixed_chunks, 0);
        let moving_values = Tensor::cat(moving_chunks, 0);
        (moving_values - fixed_values).powf_scalar(2.0).mean()
    }

    fn name(&self) -> &'static str {
        "AdvancedMeanSquares"
    }
}
