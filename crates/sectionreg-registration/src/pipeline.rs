//! Two-stage registration run: linear, then non-linear, then composition.
//!
//! A run moves through
//! `Init -> SourceLoaded -> TargetLoaded -> LinearRegistered ->
//! [IntermediateWritten] -> NonLinearRegistered -> Composed -> Written -> Done`,
//! or into `Failed` from any of them. Outputs already written when a run fails
//! are left on disk.

use std::fmt;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use serde::Serialize;

use sectionreg_core::image::Modality;

use crate::compose;
use crate::engine::RegistrationEngine;
use crate::error::{RegistrationError, Result, RunError};
use crate::naming::NamingStrategy;
use crate::output::{ensure_dir, OutputWriter};
use crate::params::{ParameterStore, NON_LINEAR};
use crate::preprocess::{ImagePreprocessor, ImageSource, MaskSource, PreparedImage};
use crate::transform::{CropContext, RegistrationTransform, Stage};

/// Progress of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunState {
    Init,
    SourceLoaded,
    TargetLoaded,
    LinearRegistered,
    IntermediateWritten,
    NonLinearRegistered,
    Composed,
    Written,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Init => "Init",
            RunState::SourceLoaded => "SourceLoaded",
            RunState::TargetLoaded => "TargetLoaded",
            RunState::LinearRegistered => "LinearRegistered",
            RunState::IntermediateWritten => "IntermediateWritten",
            RunState::NonLinearRegistered => "NonLinearRegistered",
            RunState::Composed => "Composed",
            RunState::Written => "Written",
            RunState::Done => "Done",
            RunState::Failed => "Failed",
        }
    }

    /// True once the linear registration has produced a transform.
    pub fn has_registered(&self) -> bool {
        matches!(
            self,
            RunState::LinearRegistered
                | RunState::IntermediateWritten
                | RunState::NonLinearRegistered
                | RunState::Composed
                | RunState::Written
                | RunState::Done
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One image of a run and how to prepare it.
#[derive(Debug, Clone)]
pub struct ImageInput<B: Backend> {
    pub source: ImageSource<B>,
    /// Microns per pixel.
    pub resolution: f64,
    pub modality: Modality,
    pub mask: Option<MaskSource<B>>,
}

/// Everything a run needs besides the engine.
#[derive(Debug, Clone)]
pub struct RunRequest<B: Backend> {
    pub source: ImageInput<B>,
    pub target: ImageInput<B>,
    pub work_dir: PathBuf,
    /// Linear preset name or parameter file path.
    pub reg_model: String,
    pub project_name: String,
    pub intermediate_output: bool,
    pub bounding_box_source: bool,
    pub bounding_box_target: bool,
}

/// Per-run state. Created and mutated only by [`RegistrationPipeline::run`].
#[derive(Debug)]
pub struct RegistrationRun<B: Backend> {
    project_name: String,
    tag: String,
    work_dir: PathBuf,
    image_dir: PathBuf,
    init_transform_dir: PathBuf,
    nl_transform_dir: PathBuf,
    source: Option<PreparedImage<B>>,
    target: Option<PreparedImage<B>>,
    transforms: Vec<RegistrationTransform>,
    intermediate_output: bool,
    bounding_box_source: bool,
    bounding_box_target: bool,
    state: RunState,
    history: Vec<RunState>,
}

impl<B: Backend> RegistrationRun<B> {
    fn new(request: &RunRequest<B>, tag: String) -> Self {
        let work_dir = request.work_dir.clone();
        Self {
            project_name: request.project_name.clone(),
            image_dir: work_dir.join(format!("{}_images", tag)),
            init_transform_dir: work_dir.join(format!("{}_tforms_src_tgt_init", tag)),
            nl_transform_dir: work_dir.join(format!("{}_tforms_src_tgt_nl", tag)),
            work_dir,
            tag,
            source: None,
            target: None,
            transforms: Vec::new(),
            intermediate_output: request.intermediate_output,
            bounding_box_source: request.bounding_box_source,
            bounding_box_target: request.bounding_box_target,
            state: RunState::Init,
            history: vec![RunState::Init],
        }
    }

    fn advance(&mut self, next: RunState) {
        tracing::info!(tag = %self.tag, from = %self.state, to = %next, "run state transition");
        self.state = next;
        self.history.push(next);
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn transforms(&self) -> &[RegistrationTransform] {
        &self.transforms
    }

    /// The prepared source, once loaded.
    pub fn source(&self) -> Option<&PreparedImage<B>> {
        self.source.as_ref()
    }

    pub fn target(&self) -> Option<&PreparedImage<B>> {
        self.target.as_ref()
    }
}

/// Outputs of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub tag: String,
    pub history: Vec<RunState>,
    pub image_dir: PathBuf,
    pub intermediate_image: Option<PathBuf>,
    pub final_image: PathBuf,
    pub final_extent: [usize; 2],
    /// `.txt` transform files in stage order.
    pub transform_files: Vec<PathBuf>,
    pub transforms: Vec<RegistrationTransform>,
}

impl RunReport {
    pub fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Init)
    }
}

/// Drives source-to-target registration runs.
///
/// Holds no per-run state, so one pipeline can serve independent runs as long
/// as they write to distinct directories.
pub struct RegistrationPipeline<B: Backend, E: RegistrationEngine<B>> {
    engine: E,
    preprocessor: ImagePreprocessor<B>,
    store: ParameterStore,
    writer: OutputWriter,
}

impl<B: Backend, E: RegistrationEngine<B>> RegistrationPipeline<B, E> {
    pub fn new(engine: E, device: B::Device) -> Self {
        Self {
            engine,
            preprocessor: ImagePreprocessor::new(device),
            store: ParameterStore::new(),
            writer: OutputWriter::new(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Register the request's source onto its target and write the results.
    pub fn run(&self, request: &RunRequest<B>, naming: &dyn NamingStrategy) -> std::result::Result<RunReport, RunError> {
        let tag = naming.run_tag(&request.project_name);
        let mut run = RegistrationRun::new(request, tag);
        tracing::info!(tag = %run.tag, project = %run.project_name, work_dir = %run.work_dir.display(), "starting run");

        match self.execute(&mut run, request) {
            Ok(report) => Ok(report),
            Err(source) => {
                let error = RunError::new(run.state, source);
                if error.compute_wasted() {
                    tracing::warn!(
                        tag = %run.tag,
                        state = %run.state,
                        "writing outputs failed after registration; the registration compute was wasted"
                    );
                }
                tracing::error!(tag = %run.tag, state = %run.state, kind = error.source.kind(), "run failed: {}", error.source);
                run.advance(RunState::Failed);
                Err(error)
            }
        }
    }

    fn execute(&self, run: &mut RegistrationRun<B>, request: &RunRequest<B>) -> Result<RunReport> {
        if run.image_dir.exists() {
            tracing::warn!(dir = %run.image_dir.display(), "run directory already exists");
        }
        ensure_dir(&run.image_dir)?;

        let linear_params = self.store.resolve(&request.reg_model)?;
        let linear_model = linear_params.transform_model()?;
        if linear_model.stage() != Stage::Linear {
            return Err(RegistrationError::config(format!(
                "reg_model '{}' selects {}, which is not a linear transform",
                request.reg_model,
                linear_model.elastix_name()
            )));
        }

        let source = self.prepare(&request.source, run.bounding_box_source)?;
        run.source = Some(source.clone());
        run.advance(RunState::SourceLoaded);

        let target = self.prepare(&request.target, run.bounding_box_target)?;
        run.target = Some(target.clone());
        run.advance(RunState::TargetLoaded);

        // Linear stage: source onto target.
        let (linear, warped) = self
            .engine
            .register(target.image(), source.image(), &linear_params, true)?;
        let linear = linear.with_crop(CropContext::new(target.bbox(), source.bbox()));
        let warped = warped.ok_or_else(|| {
            RegistrationError::invalid_image("registration engine returned no warped source image")
        })?;
        run.transforms.push(linear.clone());
        run.advance(RunState::LinearRegistered);

        let mut transform_files = Vec::with_capacity(2);
        transform_files.push(self.writer.write_transform(
            &linear,
            &run.init_transform_dir,
            &format!("{}_init_src_tgt_init", run.tag),
        )?);

        let original = self
            .preprocessor
            .load_raw(&request.source.source, request.source.resolution)?;

        let intermediate_image = if run.intermediate_output {
            let image = compose::apply_single(&original, &linear, request.source.resolution)?;
            let path = self
                .writer
                .write(&image, &run.image_dir, &format!("{}_src_tgt_init", run.project_name))?;
            run.advance(RunState::IntermediateWritten);
            Some(path)
        } else {
            None
        };

        // Non-linear stage: the warped source already lives in the cropped
        // target frame, so it is registered without a crop of its own.
        let nl_params = self.store.resolve(NON_LINEAR)?;
        let warped = self.preprocessor.prepare(
            &ImageSource::InMemory(warped),
            request.target.resolution,
            Modality::InMemory,
            None,
            false,
        )?;
        let (non_linear, _) = self
            .engine
            .register(target.image(), warped.image(), &nl_params, false)?;
        let non_linear = non_linear.with_crop(CropContext::new(target.bbox(), target.bbox()));
        run.transforms.push(non_linear.clone());
        run.advance(RunState::NonLinearRegistered);

        transform_files.push(self.writer.write_transform(
            &non_linear,
            &run.nl_transform_dir,
            &format!("{}_init_src_tgt_nl", run.tag),
        )?);

        let registered = compose::apply_chain(&original, &run.transforms, request.source.resolution)?;
        run.advance(RunState::Composed);

        let final_image = self
            .writer
            .write(&registered, &run.image_dir, &format!("{}_src_tgt_nl", run.project_name))?;
        run.advance(RunState::Written);
        run.advance(RunState::Done);

        Ok(RunReport {
            tag: run.tag.clone(),
            history: run.history.clone(),
            image_dir: run.image_dir.clone(),
            intermediate_image,
            final_image,
            final_extent: registered.extent(),
            transform_files,
            transforms: run.transforms.clone(),
        })
    }

    fn prepare(&self, input: &ImageInput<B>, use_bounding_box: bool) -> Result<PreparedImage<B>> {
        self.preprocessor.prepare(
            &input.source,
            input.resolution,
            input.modality,
            input.mask.as_ref(),
            use_bounding_box,
        )
    }
}
