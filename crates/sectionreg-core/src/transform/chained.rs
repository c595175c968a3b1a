//! Chained transform implementation.
//!
//! Applies a list of transforms in order: `T(x) = Tn(...T2(T1(x)))`.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::trait_::Transform;

/// Sequence of transforms applied as a single point mapping.
///
/// For a registration chain whose stages map output to input, pass the last
/// stage first: resampling through the chain then walks from the output grid
/// back to the source image in one interpolation.
pub struct ChainedTransform<B: Backend> {
    stages: Vec<Box<dyn Transform<B>>>,
}

impl<B: Backend> ChainedTransform<B> {
    /// Create a chain; `stages[0]` is applied first.
    pub fn new(stages: Vec<Box<dyn Transform<B>>>) -> Self {
        Self { stages }
    }

    pub fn push(&mut self, stage: Box<dyn Transform<B>>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl<B: Backend> Transform<B> for ChainedTransform<B> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        self.stages
            .iter()
            .fold(points, |points, stage| stage.transform_points(points))
    }
}

impl<B: Backend> std::fmt::Debug for ChainedTransform<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedTransform")
            .field("stages", &self.stages.len())
            .finish()
    }
}
