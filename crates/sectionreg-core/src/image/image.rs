//! Image type with physical metadata and coordinate transformations.
//!
//! An [`Image`] holds planar pixel data `[C, H, W]` together with the
//! [`ImageMetadata`] that places it in physical space. Registration works on
//! single-channel images; multi-channel data is carried through resampling
//! unchanged.

use burn::tensor::backend::Backend;
use burn::tensor::{DataError, Shape, Tensor, TensorData};

use super::metadata::{ImageDomain, ImageMetadata};
use super::region::BoundingBox;
use crate::spatial::Point;

/// Planar image with physical metadata.
///
/// # Coordinate Systems
/// * **Index Space**: continuous pixel indices `(x, y)`, `x` along columns
/// * **Physical Space**: `origin + index * spacing`, in microns for microscopy
#[derive(Debug, Clone)]
pub struct Image<B: Backend> {
    /// Pixel data, `[channels, height, width]`.
    data: Tensor<B, 3>,
    metadata: ImageMetadata,
}

impl<B: Backend> Image<B> {
    /// Create an image from a `[C, H, W]` tensor.
    pub fn new(data: Tensor<B, 3>, metadata: ImageMetadata) -> Self {
        Self { data, metadata }
    }

    /// Create a single-channel image from a `[H, W]` tensor.
    pub fn from_plane(plane: Tensor<B, 2>, metadata: ImageMetadata) -> Self {
        Self::new(plane.unsqueeze_dim(0), metadata)
    }

    /// Create an image from planar samples laid out channel-major.
    ///
    /// Returns `None` when `samples` does not hold exactly `c * h * w` values.
    pub fn from_planar(
        samples: Vec<f32>,
        shape: [usize; 3],
        metadata: ImageMetadata,
        device: &B::Device,
    ) -> Option<Self> {
        if samples.len() != shape.iter().product::<usize>() || shape.contains(&0) {
            return None;
        }
        let data = Tensor::<B, 3>::from_data(TensorData::new(samples, Shape::new(shape)), device);
        Some(Self::new(data, metadata))
    }

    /// Copy the pixel data back to host memory, channel-major.
    pub fn to_planar(&self) -> Result<Vec<f32>, DataError> {
        self.data.clone().into_data().convert::<f32>().to_vec::<f32>()
    }

    pub fn data(&self) -> &Tensor<B, 3> {
        &self.data
    }

    pub fn into_data(self) -> Tensor<B, 3> {
        self.data
    }

    pub fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    pub fn origin(&self) -> &Point {
        self.metadata.origin()
    }

    pub fn spacing(&self) -> &crate::spatial::Spacing {
        self.metadata.spacing()
    }

    /// Tensor shape `[C, H, W]`.
    pub fn shape(&self) -> [usize; 3] {
        self.data.dims()
    }

    pub fn channels(&self) -> usize {
        self.shape()[0]
    }

    pub fn height(&self) -> usize {
        self.shape()[1]
    }

    pub fn width(&self) -> usize {
        self.shape()[2]
    }

    /// Pixel extent `[width, height]`.
    pub fn extent(&self) -> [usize; 2] {
        [self.width(), self.height()]
    }

    /// The sampling grid this image occupies.
    pub fn domain(&self) -> ImageDomain {
        ImageDomain::new(self.extent(), *self.metadata.spacing(), *self.metadata.origin())
    }

    pub fn device(&self) -> B::Device {
        self.data.device()
    }

    pub fn with_metadata(mut self, metadata: ImageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_data(mut self, data: Tensor<B, 3>) -> Self {
        self.data = data;
        self
    }

    /// A single channel as an `[H, W]` plane.
    pub fn channel(&self, channel: usize) -> Tensor<B, 2> {
        let [_, h, w] = self.shape();
        self.data
            .clone()
            .slice([channel..channel + 1, 0..h, 0..w])
            .squeeze::<2>(0)
    }

    /// Restrict the image to `bbox`.
    ///
    /// The cropped image starts at physical origin `(0, 0)`. Returns `None`
    /// when the box was taken from an image of a different size.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<Self> {
        if bbox.parent_size() != self.extent() {
            return None;
        }
        let [x0, y0] = bbox.origin();
        let [x1, y1] = bbox.end();
        let data = self.data.clone().slice([0..self.channels(), y0..y1, x0..x1]);
        let metadata = self.metadata.clone().with_origin(Point::origin());
        Some(Self::new(data, metadata))
    }

    /// Convert a continuous index to a physical point.
    pub fn index_to_physical(&self, index: [f64; 2]) -> Point {
        let spacing = self.metadata.spacing();
        self.metadata
            .origin()
            .offset([index[0] * spacing[0], index[1] * spacing[1]])
    }

    /// Convert a physical point to a continuous index.
    pub fn physical_to_index(&self, point: &Point) -> [f64; 2] {
        let origin = self.metadata.origin();
        let spacing = self.metadata.spacing();
        [
            (point.x() - origin.x()) / spacing[0],
            (point.y() - origin.y()) / spacing[1],
        ]
    }

    /// Batch transform physical points `[N, 2]` to continuous indices.
    pub fn world_to_index_tensor(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let (origin, scale) = self.affine_rows(&points.device(), true);
        (points - origin) * scale
    }

    /// Batch transform continuous indices `[N, 2]` to physical points.
    pub fn index_to_world_tensor(&self, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        let (origin, scale) = self.affine_rows(&indices.device(), false);
        indices * scale + origin
    }

    fn affine_rows(&self, device: &B::Device, inverse: bool) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let origin = self.metadata.origin();
        let spacing = self.metadata.spacing();
        let scale: Vec<f32> = (0..2)
            .map(|i| {
                let s = if inverse { 1.0 / spacing[i] } else { spacing[i] };
                s as f32
            })
            .collect();
        let origin = Tensor::<B, 2>::from_data(
            TensorData::new(vec![origin.x() as f32, origin.y() as f32], Shape::new([1, 2])),
            device,
        );
        let scale = Tensor::<B, 2>::from_data(TensorData::new(scale, Shape::new([1, 2])), device);
        (origin, scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::Spacing;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    fn ramp(width: usize, height: usize) -> Image<Backend> {
        let samples = (0..width * height).map(|v| v as f32).collect();
        let metadata = ImageMetadata::in_memory()
            .with_origin(Point::new([10.0, 20.0]))
            .with_spacing(Spacing::new([0.5, 2.0]));
        Image::from_planar(samples, [1, height, width], metadata, &Default::default()).unwrap()
    }

    #[test]
    fn test_image_shape() {
        let image = ramp(4, 3);
        assert_eq!(image.shape(), [1, 3, 4]);
        assert_eq!(image.extent(), [4, 3]);
        assert_eq!(image.channels(), 1);
    }

    #[test]
    fn test_from_planar_rejects_wrong_length() {
        let result = Image::<Backend>::from_planar(
            vec![0.0; 5],
            [1, 2, 3],
            ImageMetadata::in_memory(),
            &Default::default(),
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_index_physical_mapping() {
        let image = ramp(4, 3);
        let point = image.index_to_physical([2.0, 1.0]);
        assert!((point.x() - 11.0).abs() < 1e-12);
        assert!((point.y() - 22.0).abs() < 1e-12);
        let index = image.physical_to_index(&point);
        assert!((index[0] - 2.0).abs() < 1e-12);
        assert!((index[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_tensor_mapping_matches_scalar() {
        let image = ramp(4, 3);
        let device = Default::default();
        let indices = Tensor::<Backend, 2>::from_floats([[2.0, 1.0], [0.0, 0.0]], &device);
        let world = image.index_to_world_tensor(indices);
        let values = world.clone().into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![11.0, 22.0, 10.0, 20.0]);
        let back = image.world_to_index_tensor(world).into_data().to_vec::<f32>().unwrap();
        assert_eq!(back, vec![2.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_crop_resets_origin() {
        let image = ramp(4, 3);
        let bbox = BoundingBox::new([1, 1], [2, 2], [4, 3]).unwrap();
        let cropped = image.crop(&bbox).unwrap();
        assert_eq!(cropped.extent(), [2, 2]);
        assert_eq!(cropped.origin(), &Point::origin());
        let values = cropped.to_planar().unwrap();
        assert_eq!(values, vec![5.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn test_crop_rejects_foreign_box() {
        let image = ramp(4, 3);
        let bbox = BoundingBox::new([0, 0], [2, 2], [8, 8]).unwrap();
        assert!(image.crop(&bbox).is_none());
    }
}
