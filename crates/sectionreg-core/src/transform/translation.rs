use burn::module::{Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::trait_::Transform;
use super::{pair_tensor, to_f64_vec};

/// Translates points by a fixed offset vector.
#[derive(Module, Debug)]
pub struct TranslationTransform<B: Backend> {
    translation: Param<Tensor<B, 1>>,
}

impl<B: Backend> TranslationTransform<B> {
    /// Create a translation from a `[2]` tensor.
    pub fn new(translation: Tensor<B, 1>) -> Self {
        Self {
            translation: Param::from_tensor(translation),
        }
    }

    pub fn from_offset(offset: [f64; 2], device: &B::Device) -> Self {
        Self::new(pair_tensor(offset, device))
    }

    pub fn identity(device: &B::Device) -> Self {
        Self::new(Tensor::zeros([2], device))
    }

    pub fn translation(&self) -> Tensor<B, 1> {
        self.translation.val()
    }

    /// Parameters in physical units: `[tx, ty]`.
    pub fn parameters(&self) -> Vec<f64> {
        to_f64_vec(self.translation.val())
    }
}

impl<B: Backend> Transform<B> for TranslationTransform<B> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        points + self.translation.val().reshape([1, 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_translation_transform() {
        let device = Default::default();
        let transform = TranslationTransform::<TestBackend>::from_offset([1.0, -2.0], &device);
        let points = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0], [1.0, 1.0]], &device);

        let data = transform.transform_points(points).into_data();
        assert_eq!(data.as_slice::<f32>().unwrap(), &[1.0, -2.0, 2.0, -1.0]);
        assert_eq!(transform.parameters(), vec![1.0, -2.0]);
    }
}
