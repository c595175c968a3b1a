//! Rigid transform (rotation about a fixed center plus translation).

use burn::module::{Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

use super::trait_::Transform;
use super::{pair_tensor, to_f64_vec};
use crate::spatial::Point;

/// Rigid Transform: `T(x) = R(x - c) + c + t`.
///
/// The rotation parameter is stored as an arc length, `angle * lever`, where
/// `lever` is a characteristic radius of the image (half its diagonal). A unit
/// step in any parameter then moves the image corners by roughly one unit.
#[derive(Module, Debug)]
pub struct RigidTransform<B: Backend> {
    rotation: Param<Tensor<B, 1>>,
    translation: Param<Tensor<B, 1>>,
    center: Tensor<B, 1>,
    lever: f64,
}

impl<B: Backend> RigidTransform<B> {
    /// Create a rigid transform.
    ///
    /// # Arguments
    /// * `angle` - Rotation in radians
    /// * `translation` - Offset `[tx, ty]` in physical units
    /// * `center` - Fixed center of rotation
    /// * `lever` - Radius used to scale the rotation parameter, must be positive
    pub fn new(angle: f64, translation: [f64; 2], center: Point, lever: f64, device: &B::Device) -> Self {
        let lever = if lever.is_finite() && lever > 0.0 { lever } else { 1.0 };
        Self {
            rotation: Param::from_tensor(Tensor::from_floats([(angle * lever) as f32], device)),
            translation: Param::from_tensor(pair_tensor(translation, device)),
            center: pair_tensor(center.to_array(), device),
            lever,
        }
    }

    pub fn identity(center: Point, lever: f64, device: &B::Device) -> Self {
        Self::new(0.0, [0.0, 0.0], center, lever, device)
    }

    /// Rotation angle in radians.
    pub fn angle(&self) -> f64 {
        self.rotation.val().into_scalar().elem::<f64>() / self.lever
    }

    pub fn translation(&self) -> [f64; 2] {
        let t = to_f64_vec(self.translation.val());
        [t[0], t[1]]
    }

    pub fn center(&self) -> Point {
        let c = to_f64_vec(self.center.clone());
        Point::new([c[0], c[1]])
    }

    /// Parameters in physical units: `[angle, tx, ty]`.
    pub fn parameters(&self) -> Vec<f64> {
        let [tx, ty] = self.translation();
        vec![self.angle(), tx, ty]
    }

    fn rotation_matrix(&self) -> Tensor<B, 2> {
        let theta = self.rotation.val().div_scalar(self.lever);
        let c = theta.clone().cos();
        let s = theta.sin();

        let row1 = Tensor::cat(vec![c.clone(), s.clone().neg()], 0).reshape([1, 2]);
        let row2 = Tensor::cat(vec![s, c], 0).reshape([1, 2]);
        Tensor::cat(vec![row1, row2], 0)
    }
}

impl<B: Backend> Transform<B> for RigidTransform<B> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        // Row vectors: y = (x - c) @ R^T + c + t
        let r = self.rotation_matrix();
        let c = self.center.clone().reshape([1, 2]);
        let t = self.translation.val().reshape([1, 2]);

        (points - c.clone()).matmul(r.transpose()) + c + t
    }
}
