use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use burn_ndarray::NdArray;
use sectionreg_core::filter::ResampleImageFilter;
use sectionreg_core::image::{Image, ImageMetadata, Modality, PixelType};
use sectionreg_core::interpolation::LinearInterpolator;
use sectionreg_core::spatial::{Point, Spacing};
use sectionreg_core::transform::BSplineTransform;
use sectionreg_registration::transform::BSplineGrid;
use sectionreg_registration::{
    CallerTag, ImageInput, ImageSource, MaskSource, MeanSquaresEngine, ParameterMap, RegistrationEngine,
    RegistrationError, RegistrationPipeline, RegistrationTransform, RunRequest, RunSpec, RunState, Stage,
    TransformModel,
};

type TestBackend = NdArray<f32>;

/// Returns a fixed shift for linear stages and a zero B-spline otherwise.
struct ShiftEngine {
    shift: [f64; 2],
}

impl<B: Backend> RegistrationEngine<B> for ShiftEngine {
    fn register(
        &self,
        fixed: &Image<B>,
        moving: &Image<B>,
        params: &ParameterMap,
        want_warped_image: bool,
    ) -> sectionreg_registration::Result<(RegistrationTransform, Option<Image<B>>)> {
        let domain = fixed.domain();
        let model = params.transform_model()?;
        let transform = match (params.stage()?, model) {
            (Stage::Linear, TransformModel::Translation) => RegistrationTransform::linear(
                model,
                self.shift.to_vec(),
                Point::origin(),
                domain,
                *moving.spacing(),
                params.clone(),
            )?,
            (Stage::Linear, TransformModel::Euler) => RegistrationTransform::linear(
                model,
                vec![0.0, self.shift[0], self.shift[1]],
                domain.physical_center(),
                domain,
                *moving.spacing(),
                params.clone(),
            )?,
            (Stage::Linear, _) => return Err(RegistrationError::config("unsupported in test engine")),
            (Stage::NonLinear, _) => {
                let spacing = params.require_f64("FinalGridSpacingInPhysicalUnits")?;
                let (size, origin) = BSplineTransform::<B>::grid_for_domain(&domain, spacing);
                let grid = BSplineGrid {
                    size,
                    origin,
                    spacing: [spacing, spacing],
                };
                RegistrationTransform::bspline(
                    grid,
                    vec![0.0; 2 * size[0] * size[1]],
                    domain,
                    *moving.spacing(),
                    params.clone(),
                )?
            }
        };

        let warped = if want_warped_image {
            let filter = ResampleImageFilter::new(
                domain,
                transform.to_core::<B>(&fixed.device())?,
                LinearInterpolator::new(),
            );
            Some(filter.apply(moving))
        } else {
            None
        };
        Ok((transform, warped))
    }
}

fn write_rgb(path: &Path, width: usize, height: usize) {
    let plane = width * height;
    let mut samples = vec![255.0f32; 3 * plane];
    for i in 0..plane {
        let (x, y) = (i % width, i / width);
        let dx = x as f32 - width as f32 / 2.0;
        let dy = y as f32 - height as f32 / 2.0;
        let r2 = (dx * dx + dy * dy) / (width * width) as f32;
        let tissue = 255.0 * (1.0 - (-r2 * 20.0).exp());
        samples[i] = tissue;
        samples[plane + i] = tissue * 0.8;
        samples[2 * plane + i] = tissue * 0.9;
    }
    let metadata = ImageMetadata::new(Point::origin(), Spacing::uniform(1.0), PixelType::U8, Modality::Brightfield);
    let image = Image::<TestBackend>::from_planar(samples, [3, height, width], metadata, &Default::default()).unwrap();
    sectionreg_io::write_tiff(&image, path).unwrap();
}

fn write_mask(path: &Path, size: [usize; 2], start: [usize; 2], end: [usize; 2]) {
    let [width, height] = size;
    let samples = (0..width * height)
        .map(|i| {
            let (x, y) = (i % width, i / width);
            let inside = (start[0]..end[0]).contains(&x) && (start[1]..end[1]).contains(&y);
            if inside {
                255.0
            } else {
                0.0
            }
        })
        .collect();
    let metadata = ImageMetadata::in_memory().with_pixel_type(PixelType::U8);
    let image = Image::<TestBackend>::from_planar(samples, [1, height, width], metadata, &Default::default()).unwrap();
    sectionreg_io::write_tiff(&image, path).unwrap();
}

/// Three-channel U8 image whose pixel `(x, y)` is `pattern(x + offset.x, y + offset.y)`.
fn write_pattern(path: &Path, size: [usize; 2], offset: [usize; 2]) {
    let [width, height] = size;
    let plane = width * height;
    let mut samples = vec![0.0f32; 3 * plane];
    for i in 0..plane {
        let (x, y) = (i % width + offset[0], i / width + offset[1]);
        let value = ((x * 7 + y * 13) % 200) as f32 + 20.0;
        samples[i] = value;
        samples[plane + i] = (value * 0.5).round();
        samples[2 * plane + i] = 255.0 - value;
    }
    let metadata = ImageMetadata::new(Point::origin(), Spacing::uniform(1.0), PixelType::U8, Modality::Brightfield);
    let image = Image::<TestBackend>::from_planar(samples, [3, height, width], metadata, &Default::default()).unwrap();
    sectionreg_io::write_tiff(&image, path).unwrap();
}

fn input(path: PathBuf, resolution: f64, modality: Modality) -> ImageInput<TestBackend> {
    ImageInput {
        source: ImageSource::Path(path),
        resolution,
        modality,
        mask: None,
    }
}

fn request(dir: &Path, reg_model: &str) -> RunRequest<TestBackend> {
    RunRequest {
        source: input(dir.join("source.tif"), 0.5, Modality::Brightfield),
        target: input(dir.join("target.tif"), 0.5, Modality::Brightfield),
        work_dir: dir.join("out"),
        reg_model: reg_model.to_string(),
        project_name: "serial".to_string(),
        intermediate_output: true,
        bounding_box_source: true,
        bounding_box_target: true,
    }
}

#[test]
fn test_end_to_end_rigid_run() {
    let dir = tempfile::tempdir().unwrap();
    write_rgb(&dir.path().join("source.tif"), 2000, 2000);
    write_rgb(&dir.path().join("target.tif"), 1800, 1800);

    let pipeline = RegistrationPipeline::new(ShiftEngine { shift: [50.0, 50.0] }, Default::default());
    let report = pipeline
        .run(&request(dir.path(), "rigid-default"), &CallerTag("run1".into()))
        .unwrap();

    assert_eq!(report.state(), RunState::Done);
    assert_eq!(
        report.history,
        vec![
            RunState::Init,
            RunState::SourceLoaded,
            RunState::TargetLoaded,
            RunState::LinearRegistered,
            RunState::IntermediateWritten,
            RunState::NonLinearRegistered,
            RunState::Composed,
            RunState::Written,
            RunState::Done,
        ]
    );

    let out = dir.path().join("out");
    let images = out.join("run1_images");
    assert_eq!(report.intermediate_image, Some(images.join("serial_src_tgt_init.tif")));
    assert_eq!(report.final_image, images.join("serial_src_tgt_nl.tif"));
    assert!(images.join("serial_src_tgt_init.tif").is_file());
    assert!(images.join("serial_src_tgt_nl.tif").is_file());
    assert_eq!(report.final_extent, [1800, 1800]);

    for (dir_name, stem) in [
        ("run1_tforms_src_tgt_init", "run1_init_src_tgt_init"),
        ("run1_tforms_src_tgt_nl", "run1_init_src_tgt_nl"),
    ] {
        assert!(out.join(dir_name).join(format!("{}.txt", stem)).is_file());
        assert!(out.join(dir_name).join(format!("{}_parameters.txt", stem)).is_file());
    }

    let final_image = sectionreg_io::read_image::<TestBackend, _>(&report.final_image, &Default::default()).unwrap();
    assert_eq!(final_image.extent(), [1800, 1800]);
    assert_eq!(final_image.channels(), 3);

    let stages: Vec<Stage> = report.transforms.iter().map(|t| t.stage()).collect();
    assert_eq!(stages, vec![Stage::Linear, Stage::NonLinear]);
    let reloaded = RegistrationTransform::load(&report.transform_files[0]).unwrap();
    assert_eq!(reloaded, report.transforms[0]);
}

#[test]
fn test_unknown_model_fails_at_init() {
    let dir = tempfile::tempdir().unwrap();
    write_rgb(&dir.path().join("source.tif"), 32, 32);
    write_rgb(&dir.path().join("target.tif"), 32, 32);

    let pipeline = RegistrationPipeline::new(ShiftEngine { shift: [0.0, 0.0] }, Default::default());
    let err = pipeline
        .run(&request(dir.path(), "no-such-model"), &CallerTag("bad".into()))
        .unwrap_err();

    assert_eq!(err.stage, RunState::Init);
    assert!(matches!(err.source, RegistrationError::ConfigError(_)));
    assert!(!err.compute_wasted());

    let out = dir.path().join("out");
    let images = out.join("bad_images");
    assert!(images.is_dir());
    assert_eq!(fs::read_dir(&images).unwrap().count(), 0);
    assert!(!out.join("bad_tforms_src_tgt_init").exists());
    assert!(!out.join("bad_tforms_src_tgt_nl").exists());
}

#[test]
fn test_non_linear_model_rejected_for_linear_stage() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = RegistrationPipeline::new(ShiftEngine { shift: [0.0, 0.0] }, Default::default());
    let err = pipeline
        .run(&request(dir.path(), "nl"), &CallerTag("nl".into()))
        .unwrap_err();
    assert_eq!(err.stage, RunState::Init);
    assert!(matches!(err.source, RegistrationError::ConfigError(_)));
}

#[test]
fn test_missing_target_fails_after_source() {
    let dir = tempfile::tempdir().unwrap();
    write_rgb(&dir.path().join("source.tif"), 32, 32);

    let pipeline = RegistrationPipeline::new(ShiftEngine { shift: [0.0, 0.0] }, Default::default());
    let err = pipeline
        .run(&request(dir.path(), "translation"), &CallerTag("t".into()))
        .unwrap_err();
    assert_eq!(err.stage, RunState::SourceLoaded);
    assert!(matches!(err.source, RegistrationError::InvalidImageError(_)));
}

#[test]
fn test_cropped_target_output_covers_full_target() {
    let dir = tempfile::tempdir().unwrap();
    write_rgb(&dir.path().join("source.tif"), 72, 64);
    write_rgb(&dir.path().join("target.tif"), 64, 60);
    write_mask(&dir.path().join("target_mask.tif"), [64, 60], [8, 6], [56, 54]);

    let mut request = request(dir.path(), "translation");
    request.target.mask = Some(MaskSource::new(
        ImageSource::Path(dir.path().join("target_mask.tif")),
        None,
    ));
    request.intermediate_output = false;

    let pipeline = RegistrationPipeline::new(MeanSquaresEngine::new(), Default::default());
    let report = pipeline.run(&request, &CallerTag("crop".into())).unwrap();

    assert_eq!(report.state(), RunState::Done);
    assert!(!report.history.contains(&RunState::IntermediateWritten));
    assert_eq!(report.intermediate_image, None);
    assert_eq!(report.final_extent, [64, 60]);

    let crop = report.transforms[0].crop();
    let target_box = crop.fixed.unwrap();
    assert_eq!(target_box.origin(), [8, 6]);
    assert_eq!(target_box.parent_size(), [64, 60]);
    assert_eq!(crop.moving, None);
    assert_eq!(report.transforms[1].crop().moving, Some(target_box));
}

#[test]
fn test_run_from_yaml_spec() {
    let dir = tempfile::tempdir().unwrap();
    write_rgb(&dir.path().join("source.tif"), 40, 40);
    write_rgb(&dir.path().join("target.tif"), 36, 36);

    let yaml = format!(
        r#"
source_fp: {source}
source_res: 1.0
source_img_type: RGB_l
target_fp: {target}
target_res: 1.0
target_img_type: RGB_l
wd: {wd}
reg_model: translation
project_name: yaml
tag: fromyaml
"#,
        source = dir.path().join("source.tif").display(),
        target = dir.path().join("target.tif").display(),
        wd = dir.path().join("out").display(),
    );
    let spec = RunSpec::from_yaml_str(&yaml).unwrap();
    let tag = CallerTag(spec.tag.clone().unwrap());

    let pipeline = RegistrationPipeline::new(ShiftEngine { shift: [1.0, 2.0] }, Default::default());
    let report = pipeline.run(&spec.to_request::<TestBackend>(), &tag).unwrap();
    assert_eq!(report.tag, "fromyaml");
    assert_eq!(report.final_extent, [36, 36]);
    assert!(dir.path().join("out/fromyaml_images/yaml_src_tgt_nl.tif").is_file());
}

#[test]
fn test_cropped_source_identity_reproduces_target() {
    let dir = tempfile::tempdir().unwrap();
    // The target is the [8, 6]..[56, 46] window of the source.
    write_pattern(&dir.path().join("source.tif"), [64, 56], [0, 0]);
    write_pattern(&dir.path().join("target.tif"), [48, 40], [8, 6]);
    write_mask(&dir.path().join("source_mask.tif"), [64, 56], [8, 6], [56, 46]);

    let mut request = request(dir.path(), "translation");
    request.source.mask = Some(MaskSource::new(
        ImageSource::Path(dir.path().join("source_mask.tif")),
        None,
    ));
    request.intermediate_output = false;

    let pipeline = RegistrationPipeline::new(ShiftEngine { shift: [0.0, 0.0] }, Default::default());
    let report = pipeline.run(&request, &CallerTag("srccrop".into())).unwrap();
    assert_eq!(report.state(), RunState::Done);

    let crop = report.transforms[0].crop();
    let source_box = crop.moving.unwrap();
    assert_eq!(source_box.origin(), [8, 6]);
    assert_eq!(source_box.size(), [48, 40]);
    assert_eq!(crop.fixed, None);

    let device = Default::default();
    let registered = sectionreg_io::read_image::<TestBackend, _>(&report.final_image, &device).unwrap();
    let target = sectionreg_io::read_image::<TestBackend, _>(dir.path().join("target.tif"), &device).unwrap();
    assert_eq!(registered.shape(), target.shape());
    assert_eq!(registered.to_planar().unwrap(), target.to_planar().unwrap());
}
