//! Registration backends.
//!
//! The pipeline only talks to [`RegistrationEngine`]; how a transform is
//! fitted is up to the implementation.

pub mod mean_squares;

pub use mean_squares::MeanSquaresEngine;

use burn::tensor::backend::Backend;
use sectionreg_core::image::Image;

use crate::error::Result;
use crate::params::ParameterMap;
use crate::transform::RegistrationTransform;

/// Fits a transform mapping `fixed` physical points onto `moving`.
pub trait RegistrationEngine<B: Backend> {
    /// Register `moving` onto `fixed` with the hyperparameters in `params`.
    ///
    /// The transform's stage follows the family `params` selects and its
    /// domain is the fixed image's domain. When `want_warped_image` is set the
    /// moving image resampled onto the fixed grid is returned as well.
    fn register(
        &self,
        fixed: &Image<B>,
        moving: &Image<B>,
        params: &ParameterMap,
        want_warped_image: bool,
    ) -> Result<(RegistrationTransform, Option<Image<B>>)>;
}

impl<B: Backend, E: RegistrationEngine<B> + ?Sized> RegistrationEngine<B> for &E {
    fn register(
        &self,
        fixed: &Image<B>,
        moving: &Image<B>,
        params: &ParameterMap,
        want_warped_image: bool,
    ) -> Result<(RegistrationTransform, Option<Image<B>>)> {
        (**self).register(fixed, moving, params, want_warped_image)
    }
}
