//! Transform types and operations.
//!
//! All transforms act on 2D physical coordinates. Linear transforms carry a
//! fixed center; their rotation-like parameters are stored divided by a lever
//! arm so that every parameter moves points by comparable physical distances
//! during gradient descent.

pub mod trait_;
pub mod translation;
pub mod rigid;
pub mod affine;
pub mod bspline;
pub mod chained;

pub use trait_::Transform;
pub use translation::TranslationTransform;
pub use rigid::RigidTransform;
pub use affine::AffineTransform;
pub use bspline::BSplineTransform;
pub use chained::ChainedTransform;

use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};

/// Host copy of a small parameter tensor.
pub(crate) fn to_f64_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f64> {
    tensor.into_data().iter::<f64>().collect()
}

/// A `[2]` tensor from a coordinate pair.
pub(crate) fn pair_tensor<B: Backend>(values: [f64; 2], device: &B::Device) -> Tensor<B, 1> {
    Tensor::from_data(
        TensorData::new(vec![values[0] as f32, values[1] as f32], Shape::new([2])),
        device,
    )
}
