//! Bilinear interpolation over planar multi-channel images.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use serde::{Deserialize, Serialize};

use super::trait_::Interpolator;

/// Bilinear interpolator.
///
/// Points whose continuous index falls outside the pixel buffer, taken as
/// `[-0.5, size - 0.5)` on each axis, receive `default_value`. Inside, the
/// four neighbours are clamped to the image so edge pixels extend by half a
/// pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearInterpolator {
    default_value: f32,
}

impl LinearInterpolator {
    pub fn new() -> Self {
        Self::with_default(0.0)
    }

    /// Interpolator that fills out-of-bounds samples with `default_value`.
    pub fn with_default(default_value: f32) -> Self {
        Self { default_value }
    }

    pub fn default_value(&self) -> f32 {
        self.default_value
    }

    /// Values at flat indices `y * width + x` for every channel, `[Batch, C]`.
    #[inline]
    fn gather<B: Backend>(
        flat_data: &Tensor<B, 2>,
        xi: &Tensor<B, 1, Int>,
        yi: &Tensor<B, 1, Int>,
        stride_y: i32,
    ) -> Tensor<B, 2> {
        let idx = yi.clone() * stride_y + xi.clone();
        flat_data.clone().select(1, idx).transpose()
    }

    /// 1 where `lo <= v < hi`, else 0.
    fn inside<B: Backend>(v: &Tensor<B, 1>, lo: f32, hi: f32) -> Tensor<B, 1> {
        let above = v.clone().greater_equal_elem(lo).float();
        let below = v.clone().lower_elem(hi).float();
        above * below
    }
}

impl Default for LinearInterpolator {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Interpolator<B> for LinearInterpolator {
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        let [channels, height, width] = data.dims();
        let [batch_size, _] = indices.dims();
        let device = indices.device();

        if batch_size == 0 {
            return Tensor::zeros([0, channels], &device);
        }

        let x = indices.clone().narrow(1, 0, 1).squeeze::<1>(1);
        let y = indices.narrow(1, 1, 1).squeeze::<1>(1);

        let valid = Self::inside(&x, -0.5, width as f32 - 0.5) * Self::inside(&y, -0.5, height as f32 - 0.5);

        let x0 = x.clone().floor();
        let y0 = y.clone().floor();
        let wx = (x - x0.clone()).unsqueeze_dim::<2>(1);
        let wy = (y - y0.clone()).unsqueeze_dim::<2>(1);

        let x1 = x0.clone() + 1.0;
        let y1 = y0.clone() + 1.0;

        let x0_i = x0.clamp(0.0, (width - 1) as f64).int();
        let y0_i = y0.clamp(0.0, (height - 1) as f64).int();
        let x1_i = x1.clamp(0.0, (width - 1) as f64).int();
        let y1_i = y1.clamp(0.0, (height - 1) as f64).int();

        let flat_data = data.clone().reshape([channels, height * width]);
        let stride_y = width as i32;

        let v00 = Self::gather(&flat_data, &x0_i, &y0_i, stride_y);
        let v01 = Self::gather(&flat_data, &x0_i, &y1_i, stride_y);
        let v10 = Self::gather(&flat_data, &x1_i, &y0_i, stride_y);
        let v11 = Self::gather(&flat_data, &x1_i, &y1_i, stride_y);

        let one_minus_wx = wx.clone().neg().add_scalar(1.0);
        let one_minus_wy = wy.clone().neg().add_scalar(1.0);

        let c0 = v00 * one_minus_wx.clone() + v10 * wx.clone();
        let c1 = v01 * one_minus_wx + v11 * wx;
        let sampled = c0 * one_minus_wy + c1 * wy;

        let valid = valid.unsqueeze_dim::<2>(1);
        let fill = valid.clone().neg().add_scalar(1.0).mul_scalar(self.default_value);
        sampled * valid + fill
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn grid_image() -> Tensor<TestBackend, 3> {
        // channel 0: value = x + 10 y; channel 1: constant 5
        let device = Default::default();
        Tensor::<TestBackend, 3>::from_floats(
            [
                [[0.0, 1.0, 2.0], [10.0, 11.0, 12.0]],
                [[5.0, 5.0, 5.0], [5.0, 5.0, 5.0]],
            ],
            &device,
        )
    }

    #[test]
    fn test_bilinear_midpoint() {
        let device = Default::default();
        let indices = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5], [2.0, 1.0]], &device);
        let values = LinearInterpolator::new()
            .interpolate(&grid_image(), indices)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(values.len(), 4);
        assert!((values[0] - 5.5).abs() < 1e-5);
        assert!((values[1] - 5.0).abs() < 1e-5);
        assert!((values[2] - 12.0).abs() < 1e-5);
    }

    #[test]
    fn test_out_of_bounds_uses_default() {
        let device = Default::default();
        let indices = Tensor::<TestBackend, 2>::from_floats([[-3.0, 0.0], [0.0, 7.0]], &device);
        let values = LinearInterpolator::with_default(-1.0)
            .interpolate(&grid_image(), indices)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(values, vec![-1.0, -1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_half_pixel_border_extends_edge() {
        let device = Default::default();
        let indices = Tensor::<TestBackend, 2>::from_floats([[-0.25, 0.0]], &device);
        let values = LinearInterpolator::new()
            .interpolate(&grid_image(), indices)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!((values[0] - 0.0).abs() < 1e-5);
        assert!((values[1] - 5.0).abs() < 1e-5);
    }
}
