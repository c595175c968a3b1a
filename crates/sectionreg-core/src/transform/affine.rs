//! Affine transform implementation.

use burn::module::{Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};

use super::trait_::Transform;
use super::{pair_tensor, to_f64_vec};
use crate::spatial::Point;

/// Affine Transform with a fixed center.
///
/// `T(x) = A(x - c) + c + t`, with `A = I + M / lever`. The trainable
/// matrix parameter is `M`, the deviation from identity scaled by the lever
/// arm, so matrix entries and translations share a physical scale.
#[derive(Module, Debug)]
pub struct AffineTransform<B: Backend> {
    matrix: Param<Tensor<B, 2>>,
    translation: Param<Tensor<B, 1>>,
    center: Tensor<B, 1>,
    lever: f64,
}

impl<B: Backend> AffineTransform<B> {
    /// Create an affine transform from a row-major matrix `[a00, a01, a10, a11]`.
    pub fn new(matrix: [f64; 4], translation: [f64; 2], center: Point, lever: f64, device: &B::Device) -> Self {
        let lever = if lever.is_finite() && lever > 0.0 { lever } else { 1.0 };
        let identity = [1.0, 0.0, 0.0, 1.0];
        let deviation: Vec<f32> = matrix
            .iter()
            .zip(identity)
            .map(|(a, i)| ((a - i) * lever) as f32)
            .collect();
        let matrix = Tensor::from_data(TensorData::new(deviation, Shape::new([2, 2])), device);

        Self {
            matrix: Param::from_tensor(matrix),
            translation: Param::from_tensor(pair_tensor(translation, device)),
            center: pair_tensor(center.to_array(), device),
            lever,
        }
    }

    pub fn identity(center: Point, lever: f64, device: &B::Device) -> Self {
        Self::new([1.0, 0.0, 0.0, 1.0], [0.0, 0.0], center, lever, device)
    }

    /// The effective linear part `A`.
    pub fn matrix(&self) -> Tensor<B, 2> {
        let device = self.center.device();
        Tensor::eye(2, &device) + self.matrix.val().div_scalar(self.lever)
    }

    pub fn center(&self) -> Point {
        let c = to_f64_vec(self.center.clone());
        Point::new([c[0], c[1]])
    }

    /// Parameters in physical units: `[a00, a01, a10, a11, tx, ty]`.
    pub fn parameters(&self) -> Vec<f64> {
        let mut params = to_f64_vec(self.matrix());
        params.extend(to_f64_vec(self.translation.val()));
        params
    }
}

impl<B: Backend> Transform<B> for AffineTransform<B> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let c = self.center.clone().reshape([1, 2]);
        let t = self.translation.val().reshape([1, 2]);

        (points - c.clone()).matmul(self.matrix().transpose()) + c + t
    }
}
