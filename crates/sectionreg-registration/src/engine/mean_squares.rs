//! Mean squares + Adam registration on burn's autodiff backend.

use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use sectionreg_core::filter::ResampleImageFilter;
use sectionreg_core::image::Image;
use sectionreg_core::interpolation::LinearInterpolator;
use sectionreg_core::transform::{
    AffineTransform, BSplineTransform, RigidTransform, Transform, TranslationTransform,
};

use super::RegistrationEngine;
use crate::error::{RegistrationError, Result};
use crate::metric::MeanSquares;
use crate::params::ParameterMap;
use crate::registration::{OptimizerSettings, Registration};
use crate::transform::{BSplineGrid, RegistrationTransform, TransformModel};

/// Gradient-descent engine: mean squared intensity difference minimized with
/// Adam.
///
/// Rigid and affine transforms rotate about the fixed image center, with
/// rotation-like parameters scaled by the fixed half-diagonal so a single
/// learning rate suits every parameter. Runs are deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaresEngine;

impl MeanSquaresEngine {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> RegistrationEngine<B> for MeanSquaresEngine {
    fn register(
        &self,
        fixed: &Image<B>,
        moving: &Image<B>,
        params: &ParameterMap,
        want_warped_image: bool,
    ) -> Result<(RegistrationTransform, Option<Image<B>>)> {
        if fixed.channels() != moving.channels() {
            return Err(RegistrationError::dimension_mismatch(format!(
                "fixed image has {} channels, moving image has {}",
                fixed.channels(),
                moving.channels()
            )));
        }

        let model = params.transform_model()?;
        let settings = OptimizerSettings::from_parameter_map(params)?;
        let stride = params.get_usize("SampleGridSpacing")?.unwrap_or(1);
        let default_value = params.get_f64("DefaultPixelValue")?.unwrap_or(0.0) as f32;
        let metric = MeanSquares::new(stride, default_value);

        let device = fixed.device();
        let domain = fixed.domain();
        let center = domain.physical_center();
        let lever = domain.half_diagonal();
        let fixed_ad = lift(fixed);
        let moving_ad = lift(moving);

        tracing::info!(
            transform = model.elastix_name(),
            iterations = settings.iterations,
            learning_rate = settings.learning_rate,
            stride,
            fixed = ?fixed.extent(),
            moving = ?moving.extent(),
            "starting registration"
        );

        let (parameters, grid) = match model {
            TransformModel::Translation => {
                let initial = TranslationTransform::<Autodiff<B>>::identity(&device);
                (fit_with(&metric, settings, &fixed_ad, &moving_ad, initial)?.parameters(), None)
            }
            TransformModel::Euler => {
                let initial = RigidTransform::<Autodiff<B>>::identity(center, lever, &device);
                (fit_with(&metric, settings, &fixed_ad, &moving_ad, initial)?.parameters(), None)
            }
            TransformModel::Affine => {
                let initial = AffineTransform::<Autodiff<B>>::identity(center, lever, &device);
                (fit_with(&metric, settings, &fixed_ad, &moving_ad, initial)?.parameters(), None)
            }
            TransformModel::BSpline => {
                let spacing = params.require_f64("FinalGridSpacingInPhysicalUnits")?;
                if !(spacing.is_finite() && spacing > 0.0) {
                    return Err(RegistrationError::config(format!(
                        "FinalGridSpacingInPhysicalUnits must be positive, got {}",
                        spacing
                    )));
                }
                let initial = BSplineTransform::<Autodiff<B>>::identity_for_domain(&domain, spacing, &device);
                let transform = fit_with(&metric, settings, &fixed_ad, &moving_ad, initial)?;
                let grid = BSplineGrid {
                    size: transform.grid_size(),
                    origin: transform.grid_origin(),
                    spacing: transform.grid_spacing(),
                };
                (transform.flat_parameters(), Some(grid))
            }
        };

        if let Some(bad) = parameters.iter().find(|p| !p.is_finite()) {
            return Err(RegistrationError::convergence(format!(
                "{} produced a non-finite parameter ({})",
                model.elastix_name(),
                bad
            )));
        }
        tracing::debug!(transform = model.elastix_name(), ?parameters, "registration finished");

        let transform = match grid {
            Some(grid) => RegistrationTransform::bspline(grid, parameters, domain, *moving.spacing(), params.clone())?,
            None => RegistrationTransform::linear(model, parameters, center, domain, *moving.spacing(), params.clone())?,
        };

        let warped = if want_warped_image {
            let filter = ResampleImageFilter::new(
                domain,
                transform.to_core::<B>(&device)?,
                LinearInterpolator::with_default(default_value),
            );
            Some(filter.apply(moving))
        } else {
            None
        };

        Ok((transform, warped))
    }
}

/// Copy an image onto the autodiff backend.
fn lift<B: Backend>(image: &Image<B>) -> Image<Autodiff<B>> {
    Image::new(Tensor::from_inner(image.data().clone()), image.metadata().clone())
}

fn fit_with<B, T>(
    metric: &MeanSquares,
    settings: OptimizerSettings,
    fixed: &Image<Autodiff<B>>,
    moving: &Image<Autodiff<B>>,
    transform: T,
) -> Result<T>
where
    B: Backend,
    T: Transform<Autodiff<B>> + AutodiffModule<Autodiff<B>>,
{
    let mut registration = Registration::new(metric.clone(), settings);
    let (transform, loss) = registration.execute(fixed, moving, transform)?;
    tracing::info!(final_loss = ?loss, "optimization complete");
    Ok(transform)
}
