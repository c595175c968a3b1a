//! Error types for registration runs.
//!
//! [`RegistrationError`] is the error of every component. [`RunError`] wraps
//! it with the pipeline state the run was in when it failed.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::pipeline::RunState;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Unknown preset, unreadable or malformed parameter file, bad run spec.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// An image or mask could not be decoded or has unusable metadata.
    #[error("Invalid image: {0}")]
    InvalidImageError(String),

    /// The mask is empty or does not overlap its image.
    #[error("Mask mismatch: {0}")]
    MaskMismatchError(String),

    /// The optimizer produced a non-finite loss or parameters.
    #[error("Convergence failure: {0}")]
    ConvergenceError(String),

    /// Fixed and moving images are not comparable.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatchError(String),

    /// A deformable stage was followed by a linear one.
    #[error("Transform order violation: {0}")]
    TransformOrderError(String),

    /// Writing an output failed.
    #[error("Failed to write {}: {source}", .path.display())]
    IoWriteError {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create an invalid image error.
    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Self::InvalidImageError(msg.into())
    }

    /// Create a mask mismatch error.
    pub fn mask_mismatch(msg: impl Into<String>) -> Self {
        Self::MaskMismatchError(msg.into())
    }

    /// Create a convergence error.
    pub fn convergence(msg: impl Into<String>) -> Self {
        Self::ConvergenceError(msg.into())
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Self::DimensionMismatchError(msg.into())
    }

    /// Create a transform order error.
    pub fn transform_order(msg: impl Into<String>) -> Self {
        Self::TransformOrderError(msg.into())
    }

    /// Create a write error for `path`.
    pub fn io_write(path: impl AsRef<Path>, source: impl Into<anyhow::Error>) -> Self {
        Self::IoWriteError {
            path: path.as_ref().to_path_buf(),
            source: source.into(),
        }
    }

    /// Short name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "ConfigError",
            Self::InvalidImageError(_) => "InvalidImageError",
            Self::MaskMismatchError(_) => "MaskMismatchError",
            Self::ConvergenceError(_) => "ConvergenceError",
            Self::DimensionMismatchError(_) => "DimensionMismatchError",
            Self::TransformOrderError(_) => "TransformOrderError",
            Self::IoWriteError { .. } => "IOWriteError",
        }
    }
}

/// A failed run: the state it failed in and the originating error.
#[derive(Error, Debug)]
#[error("Registration failed during {stage:?}: {source}")]
pub struct RunError {
    pub stage: RunState,
    #[source]
    pub source: RegistrationError,
}

impl RunError {
    pub fn new(stage: RunState, source: RegistrationError) -> Self {
        Self { stage, source }
    }

    /// True when a write failed after at least one registration had finished.
    pub fn compute_wasted(&self) -> bool {
        matches!(self.source, RegistrationError::IoWriteError { .. }) && self.stage.has_registered()
    }
}
