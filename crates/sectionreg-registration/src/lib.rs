//! Two-stage registration of serial tissue sections.
//!
//! A linear transform (translation, rigid or affine) is fitted first, then a
//! B-spline refines it. [`RegistrationPipeline`] prepares both images,
//! drives a [`RegistrationEngine`] through the two stages and applies the
//! composed transform to the full-resolution source.

pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod metric;
pub mod naming;
pub mod output;
pub mod params;
pub mod pipeline;
pub mod preprocess;
pub mod registration;
pub mod transform;

pub use config::{ImageSpec, RunSpec};
pub use engine::{MeanSquaresEngine, RegistrationEngine};
pub use error::{RegistrationError, Result, RunError};
pub use naming::{CallerTag, NamingStrategy, TimestampNaming};
pub use output::{select_encoding, Encoding, OutputWriter, MAX_TAGGED_DIMENSION};
pub use params::{ParameterMap, ParameterStore};
pub use pipeline::{ImageInput, RegistrationPipeline, RunReport, RunRequest, RunState};
pub use preprocess::{ImagePreprocessor, ImageSource, MaskSource, PreparedImage};
pub use transform::{CropContext, RegistrationTransform, Stage, TransformModel};
