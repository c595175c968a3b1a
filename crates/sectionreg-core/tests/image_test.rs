use sectionreg_core::image::{BoundingBox, Image, ImageMetadata, Modality, PixelType};
use sectionreg_core::spatial::{Point, Spacing};
use burn_ndarray::NdArray;

type Backend = NdArray<f32>;

fn rgb(width: usize, height: usize) -> Image<Backend> {
    let samples = (0..3 * width * height).map(|v| (v % 251) as f32).collect();
    let metadata = ImageMetadata::new(
        Point::new([3.0, 4.0]),
        Spacing::uniform(0.65),
        PixelType::U8,
        Modality::Brightfield,
    );
    Image::from_planar(samples, [3, height, width], metadata, &Default::default()).unwrap()
}

#[test]
fn test_crop_keeps_every_channel() {
    let image = rgb(10, 8);
    let bbox = BoundingBox::new([2, 1], [4, 3], [10, 8]).unwrap();
    let cropped = image.crop(&bbox).unwrap();

    assert_eq!(cropped.shape(), [3, 3, 4]);
    assert_eq!(cropped.metadata().pixel_type(), PixelType::U8);
    assert_eq!(cropped.metadata().modality(), Modality::Brightfield);
    assert_eq!(cropped.spacing(), &Spacing::uniform(0.65));

    let parent = image.to_planar().unwrap();
    let child = cropped.to_planar().unwrap();
    // channel 2, row 1 of the crop, column 3
    let parent_index = 2 * 80 + (1 + 1) * 10 + (2 + 3);
    let child_index = 2 * 12 + 4 + 3;
    assert_eq!(parent[parent_index], child[child_index]);
}

#[test]
fn test_full_crop_is_identity_on_data() {
    let image = rgb(5, 5);
    let bbox = BoundingBox::new([0, 0], [5, 5], [5, 5]).unwrap();
    assert!(bbox.is_full());
    let cropped = image.crop(&bbox).unwrap();
    assert_eq!(cropped.to_planar().unwrap(), image.to_planar().unwrap());
}

#[test]
fn test_channel_plane() {
    let image = rgb(4, 2);
    let plane = image.channel(1);
    assert_eq!(plane.dims(), [2, 4]);
    let values = plane.into_data().to_vec::<f32>().unwrap();
    assert_eq!(values[0], 8.0);
}

#[test]
fn test_domain_reflects_metadata() {
    let image = rgb(11, 21);
    let domain = image.domain();
    assert_eq!(domain.size, [11, 21]);
    assert_eq!(domain.origin, Point::new([3.0, 4.0]));
    assert_eq!(domain.pixel_count(), 231);
}
