//! Serializable registration transforms.
//!
//! A [`RegistrationTransform`] is what a registration stage produces: the
//! fitted parameters in physical units, the fixed grid they were fitted on and
//! the crop geometry of both images at the time. It converts to a burn
//! [`Transform`] for evaluation and round-trips through an elastix-style
//! TransformParameters map.

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use sectionreg_core::image::{BoundingBox, ImageDomain};
use sectionreg_core::spatial::{Point, Spacing};
use sectionreg_core::transform::{
    AffineTransform, BSplineTransform, RigidTransform, Transform, TranslationTransform,
};

use crate::error::{RegistrationError, Result};
use crate::params::ParameterMap;

/// Registration stage a transform belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Linear,
    NonLinear,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Linear => "Linear",
            Stage::NonLinear => "NonLinear",
        }
    }
}

/// Supported transform families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformModel {
    Translation,
    /// Rotation plus translation.
    Euler,
    Affine,
    /// Cubic B-spline free-form deformation.
    BSpline,
}

impl TransformModel {
    pub fn elastix_name(&self) -> &'static str {
        match self {
            TransformModel::Translation => "TranslationTransform",
            TransformModel::Euler => "EulerTransform",
            TransformModel::Affine => "AffineTransform",
            TransformModel::BSpline => "BSplineTransform",
        }
    }

    pub fn from_elastix_name(name: &str) -> Option<Self> {
        match name {
            "TranslationTransform" => Some(TransformModel::Translation),
            "EulerTransform" => Some(TransformModel::Euler),
            "AffineTransform" => Some(TransformModel::Affine),
            "BSplineTransform" => Some(TransformModel::BSpline),
            _ => None,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            TransformModel::BSpline => Stage::NonLinear,
            _ => Stage::Linear,
        }
    }

    /// Parameter count of the linear families.
    pub fn linear_parameter_count(&self) -> Option<usize> {
        match self {
            TransformModel::Translation => Some(2),
            TransformModel::Euler => Some(3),
            TransformModel::Affine => Some(6),
            TransformModel::BSpline => None,
        }
    }
}

/// Control point lattice of a B-spline transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BSplineGrid {
    pub size: [usize; 2],
    pub origin: [f64; 2],
    pub spacing: [f64; 2],
}

/// Crop boxes of the fixed and moving images a transform was computed on.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CropContext {
    pub fixed: Option<BoundingBox>,
    pub moving: Option<BoundingBox>,
}

impl CropContext {
    pub fn new(fixed: Option<BoundingBox>, moving: Option<BoundingBox>) -> Self {
        Self { fixed, moving }
    }
}

/// A fitted transform mapping fixed physical points to moving physical points.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationTransform {
    model: TransformModel,
    /// Physical-unit parameters; B-spline displacements are all x then all y.
    parameters: Vec<f64>,
    /// Center of rotation for Euler and affine transforms.
    center: Point,
    grid: Option<BSplineGrid>,
    fixed_domain: ImageDomain,
    moving_spacing: Spacing,
    crop: CropContext,
    parameter_map: ParameterMap,
}

impl RegistrationTransform {
    /// Create a linear transform.
    ///
    /// `parameters` are `[tx, ty]`, `[angle, tx, ty]` or
    /// `[a00, a01, a10, a11, tx, ty]` depending on `model`.
    pub fn linear(
        model: TransformModel,
        parameters: Vec<f64>,
        center: Point,
        fixed_domain: ImageDomain,
        moving_spacing: Spacing,
        parameter_map: ParameterMap,
    ) -> Result<Self> {
        let expected = model.linear_parameter_count().ok_or_else(|| {
            RegistrationError::config(format!("{} is not a linear transform", model.elastix_name()))
        })?;
        if parameters.len() != expected {
            return Err(RegistrationError::config(format!(
                "{} expects {} parameters, got {}",
                model.elastix_name(),
                expected,
                parameters.len()
            )));
        }
        Ok(Self {
            model,
            parameters,
            center,
            grid: None,
            fixed_domain,
            moving_spacing,
            crop: CropContext::default(),
            parameter_map,
        })
    }

    /// Create a B-spline transform from its lattice and displacements.
    pub fn bspline(
        grid: BSplineGrid,
        parameters: Vec<f64>,
        fixed_domain: ImageDomain,
        moving_spacing: Spacing,
        parameter_map: ParameterMap,
    ) -> Result<Self> {
        let expected = 2 * grid.size[0] * grid.size[1];
        if expected == 0 || parameters.len() != expected {
            return Err(RegistrationError::config(format!(
                "BSplineTransform on a {}x{} grid expects {} parameters, got {}",
                grid.size[0],
                grid.size[1],
                expected,
                parameters.len()
            )));
        }
        Ok(Self {
            model: TransformModel::BSpline,
            parameters,
            center: Point::origin(),
            grid: Some(grid),
            fixed_domain,
            moving_spacing,
            crop: CropContext::default(),
            parameter_map,
        })
    }

    /// Record the crop boxes the transform was computed on.
    pub fn with_crop(mut self, crop: CropContext) -> Self {
        self.crop = crop;
        self
    }

    pub fn model(&self) -> TransformModel {
        self.model
    }

    pub fn stage(&self) -> Stage {
        self.model.stage()
    }

    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    pub fn center(&self) -> Point {
        self.center
    }

    pub fn grid(&self) -> Option<&BSplineGrid> {
        self.grid.as_ref()
    }

    pub fn fixed_domain(&self) -> &ImageDomain {
        &self.fixed_domain
    }

    pub fn moving_spacing(&self) -> &Spacing {
        &self.moving_spacing
    }

    pub fn crop(&self) -> &CropContext {
        &self.crop
    }

    /// The hyperparameters the transform was fitted with.
    pub fn parameter_map(&self) -> &ParameterMap {
        &self.parameter_map
    }

    /// Physical offset of the fixed crop in the uncropped fixed image.
    pub fn fixed_offset(&self) -> [f64; 2] {
        self.crop
            .fixed
            .map(|bbox| bbox.physical_offset(&self.fixed_domain.spacing))
            .unwrap_or([0.0, 0.0])
    }

    /// Physical offset of the moving crop in the uncropped moving image.
    pub fn moving_offset(&self) -> [f64; 2] {
        self.crop
            .moving
            .map(|bbox| bbox.physical_offset(&self.moving_spacing))
            .unwrap_or([0.0, 0.0])
    }

    /// Pixel extent of the uncropped fixed image.
    pub fn full_fixed_size(&self) -> [usize; 2] {
        self.crop
            .fixed
            .map(|bbox| bbox.parent_size())
            .unwrap_or(self.fixed_domain.size)
    }

    /// Build an evaluable transform in the cropped frames it was fitted in.
    pub fn to_core<B: Backend>(&self, device: &B::Device) -> Result<Box<dyn Transform<B>>> {
        let p = &self.parameters;
        let transform: Box<dyn Transform<B>> = match self.model {
            TransformModel::Translation => Box::new(TranslationTransform::from_offset([p[0], p[1]], device)),
            TransformModel::Euler => Box::new(RigidTransform::new(p[0], [p[1], p[2]], self.center, 1.0, device)),
            TransformModel::Affine => Box::new(AffineTransform::new(
                [p[0], p[1], p[2], p[3]],
                [p[4], p[5]],
                self.center,
                1.0,
                device,
            )),
            TransformModel::BSpline => {
                let grid = self
                    .grid
                    .ok_or_else(|| RegistrationError::config("BSplineTransform without a control grid"))?;
                let bspline = BSplineTransform::from_flat_parameters(grid.size, grid.origin, grid.spacing, p, device)
                    .ok_or_else(|| RegistrationError::config("B-spline parameter count does not match its grid"))?;
                Box::new(bspline)
            }
        };
        Ok(transform)
    }

    /// Elastix TransformParameters form.
    pub fn to_parameter_map(&self) -> ParameterMap {
        let mut map = ParameterMap::new();
        map.set_str("Transform", self.model.elastix_name());
        map.set_numbers("NumberOfParameters", &[self.parameters.len()]);
        map.set_numbers("TransformParameters", &self.parameters);
        map.set_str("InitialTransformParametersFileName", "NoInitialTransform");
        map.set_str("HowToCombineTransforms", "Compose");
        map.set_str("Stage", self.stage().as_str());
        map.set_numbers("FixedImageDimension", &[2]);
        map.set_numbers("MovingImageDimension", &[2]);
        map.set_numbers("Size", &self.fixed_domain.size);
        map.set_numbers("Spacing", &self.fixed_domain.spacing.to_array());
        map.set_numbers("Origin", &self.fixed_domain.origin.to_array());
        map.set_numbers("MovingSpacing", &self.moving_spacing.to_array());

        match self.model {
            TransformModel::Euler | TransformModel::Affine => {
                map.set_numbers("CenterOfRotationPoint", &self.center.to_array());
            }
            TransformModel::BSpline => {
                if let Some(grid) = &self.grid {
                    map.set_numbers("GridSize", &grid.size);
                    map.set_numbers("GridOrigin", &grid.origin);
                    map.set_numbers("GridSpacing", &grid.spacing);
                    map.set_numbers("BSplineTransformSplineOrder", &[3]);
                }
            }
            TransformModel::Translation => {}
        }

        for (prefix, bbox) in [("Fixed", &self.crop.fixed), ("Moving", &self.crop.moving)] {
            if let Some(bbox) = bbox {
                map.set_numbers(&format!("{}CropOrigin", prefix), &bbox.origin());
                map.set_numbers(&format!("{}CropSize", prefix), &bbox.size());
                map.set_numbers(&format!("{}ParentSize", prefix), &bbox.parent_size());
            }
        }
        map
    }

    /// Rebuild a transform from its TransformParameters map and the
    /// hyperparameter map it was fitted with.
    pub fn from_parameter_map(map: &ParameterMap, parameter_map: ParameterMap) -> Result<Self> {
        let model = map.transform_model()?;
        let parameters = map.require_f64_list("TransformParameters")?;
        let size = usize_pair(map, "Size")?;
        let spacing = Spacing::new(f64_pair(map, "Spacing")?);
        let origin = Point::new(f64_pair(map, "Origin")?);
        let fixed_domain = ImageDomain::new(size, spacing, origin);
        let moving_spacing = match map.get("MovingSpacing") {
            Some(_) => Spacing::new(f64_pair(map, "MovingSpacing")?),
            None => spacing,
        };

        let transform = match model {
            TransformModel::BSpline => {
                let grid = BSplineGrid {
                    size: usize_pair(map, "GridSize")?,
                    origin: f64_pair(map, "GridOrigin")?,
                    spacing: f64_pair(map, "GridSpacing")?,
                };
                Self::bspline(grid, parameters, fixed_domain, moving_spacing, parameter_map)?
            }
            _ => {
                let center = match map.get("CenterOfRotationPoint") {
                    Some(_) => Point::new(f64_pair(map, "CenterOfRotationPoint")?),
                    None => Point::origin(),
                };
                Self::linear(model, parameters, center, fixed_domain, moving_spacing, parameter_map)?
            }
        };

        let crop = CropContext::new(crop_box(map, "Fixed")?, crop_box(map, "Moving")?);
        Ok(transform.with_crop(crop))
    }

    /// Read `<stem>.txt` and, when present, `<stem>_parameters.txt`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let map = ParameterMap::from_file(path)?;
        let companion = parameters_path(path);
        let parameter_map = if companion.is_file() {
            ParameterMap::from_file(&companion)?
        } else {
            ParameterMap::new()
        };
        Self::from_parameter_map(&map, parameter_map)
    }
}

/// `<dir>/<stem>_parameters.txt` next to `<dir>/<stem>.txt`.
pub fn parameters_path(transform_path: &Path) -> PathBuf {
    let stem = transform_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    transform_path.with_file_name(format!("{}_parameters.txt", stem))
}

fn f64_pair(map: &ParameterMap, name: &str) -> Result<[f64; 2]> {
    match map.require_f64_list(name)?.as_slice() {
        [a, b] => Ok([*a, *b]),
        other => Err(RegistrationError::config(format!(
            "{} expects 2 values, got {}",
            name,
            other.len()
        ))),
    }
}

fn usize_pair(map: &ParameterMap, name: &str) -> Result<[usize; 2]> {
    let [a, b] = f64_pair(map, name)?;
    if a < 0.0 || b < 0.0 || a.fract() != 0.0 || b.fract() != 0.0 {
        return Err(RegistrationError::config(format!("{} expects non-negative integers", name)));
    }
    Ok([a as usize, b as usize])
}

fn crop_box(map: &ParameterMap, prefix: &str) -> Result<Option<BoundingBox>> {
    let origin_key = format!("{}CropOrigin", prefix);
    if !map.contains(&origin_key) {
        return Ok(None);
    }
    let origin = usize_pair(map, &origin_key)?;
    let size = usize_pair(map, &format!("{}CropSize", prefix))?;
    let parent = usize_pair(map, &format!("{}ParentSize", prefix))?;
    BoundingBox::new(origin, size, parent)
        .map(Some)
        .ok_or_else(|| RegistrationError::config(format!("{} crop box does not fit its parent", prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterStore;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn domain() -> ImageDomain {
        ImageDomain::new([100, 80], Spacing::uniform(0.5), Point::origin())
    }

    #[test]
    fn test_linear_parameter_count_is_checked() {
        let result = RegistrationTransform::linear(
            TransformModel::Euler,
            vec![0.0, 1.0],
            Point::origin(),
            domain(),
            Spacing::uniform(0.5),
            ParameterMap::new(),
        );
        assert!(matches!(result, Err(RegistrationError::ConfigError(_))));
    }

    #[test]
    fn test_parameter_map_round_trip_with_crop() {
        let fixed = BoundingBox::new([10, 20], [100, 80], [300, 200]).unwrap();
        let moving = BoundingBox::new([5, 0], [90, 90], [120, 160]).unwrap();
        let rigid = ParameterStore::new().resolve("rigid").unwrap();
        let transform = RegistrationTransform::linear(
            TransformModel::Euler,
            vec![0.05, 3.5, -1.25],
            Point::new([24.75, 19.75]),
            domain(),
            Spacing::uniform(0.65),
            rigid.clone(),
        )
        .unwrap()
        .with_crop(CropContext::new(Some(fixed), Some(moving)));

        let text = transform.to_parameter_map().to_text();
        let parsed = ParameterMap::parse(&text).unwrap();
        let restored = RegistrationTransform::from_parameter_map(&parsed, rigid).unwrap();
        assert_eq!(restored, transform);
    }

    #[test]
    fn test_offsets_use_each_image_spacing() {
        let transform = RegistrationTransform::linear(
            TransformModel::Translation,
            vec![0.0, 0.0],
            Point::origin(),
            domain(),
            Spacing::uniform(2.0),
            ParameterMap::new(),
        )
        .unwrap()
        .with_crop(CropContext::new(
            BoundingBox::new([4, 6], [100, 80], [200, 200]),
            BoundingBox::new([1, 1], [10, 10], [20, 20]),
        ));
        assert_eq!(transform.fixed_offset(), [2.0, 3.0]);
        assert_eq!(transform.moving_offset(), [2.0, 2.0]);
        assert_eq!(transform.full_fixed_size(), [200, 200]);
    }

    #[test]
    fn test_core_affine_matches_parameters() {
        let device = Default::default();
        let transform = RegistrationTransform::linear(
            TransformModel::Affine,
            vec![1.0, 0.0, 0.0, 2.0, 1.0, 1.0],
            Point::origin(),
            domain(),
            Spacing::uniform(0.5),
            ParameterMap::new(),
        )
        .unwrap();
        let core = transform.to_core::<TestBackend>(&device).unwrap();
        let out = core
            .transform_points(Tensor::<TestBackend, 2>::from_floats([[2.0, 3.0]], &device))
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!((out[0] - 3.0).abs() < 1e-4);
        assert!((out[1] - 7.0).abs() < 1e-4);
    }

    #[test]
    fn test_bspline_grid_survives_round_trip() {
        let grid = BSplineGrid {
            size: [3, 2],
            origin: [-4.0, -4.0],
            spacing: [4.0, 4.0],
        };
        let params: Vec<f64> = (0..12).map(|v| v as f64 * 0.5).collect();
        let transform =
            RegistrationTransform::bspline(grid, params, domain(), Spacing::uniform(0.5), ParameterMap::new()).unwrap();
        assert_eq!(transform.stage(), Stage::NonLinear);

        let map = transform.to_parameter_map();
        let restored = RegistrationTransform::from_parameter_map(&map, ParameterMap::new()).unwrap();
        assert_eq!(restored.grid(), Some(&grid));
        assert_eq!(restored.parameters(), transform.parameters());
    }

    #[test]
    fn test_parameters_path() {
        let path = parameters_path(Path::new("/runs/tag_init_src_tgt_init.txt"));
        assert_eq!(path, PathBuf::from("/runs/tag_init_src_tgt_init_parameters.txt"));
    }
}
