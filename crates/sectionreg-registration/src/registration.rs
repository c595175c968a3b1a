//! Gradient-descent fitting of a single transform.

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use sectionreg_core::image::Image;
use sectionreg_core::transform::Transform;

use crate::error::{RegistrationError, Result};
use crate::metric::Metric;
use crate::params::ParameterMap;

/// Iterations between progress log lines.
pub const LOG_INTERVAL: usize = 50;

/// Optimizer hyperparameters read from a parameter map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    pub iterations: usize,
    pub learning_rate: f64,
}

impl OptimizerSettings {
    pub fn from_parameter_map(params: &ParameterMap) -> Result<Self> {
        let iterations = params.require_usize("MaximumNumberOfIterations")?;
        let learning_rate = params.require_f64("LearningRate")?;
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(RegistrationError::config(format!(
                "LearningRate must be positive, got {}",
                learning_rate
            )));
        }
        Ok(Self {
            iterations,
            learning_rate,
        })
    }
}

/// Fits a transform by minimizing a metric with Adam.
pub struct Registration<B, M, T>
where
    B: AutodiffBackend,
    M: Metric<B>,
    T: Transform<B> + AutodiffModule<B>,
{
    metric: M,
    optimizer: OptimizerAdaptor<Adam, T, B>,
    settings: OptimizerSettings,
}

impl<B, M, T> Registration<B, M, T>
where
    B: AutodiffBackend,
    M: Metric<B>,
    T: Transform<B> + AutodiffModule<B>,
{
    pub fn new(metric: M, settings: OptimizerSettings) -> Self {
        Self {
            metric,
            optimizer: AdamConfig::new().init(),
            settings,
        }
    }

    /// Run the optimization and return the fitted transform with its last loss.
    ///
    /// Fails with `ConvergenceError` as soon as the loss stops being finite.
    pub fn execute(&mut self, fixed: &Image<B>, moving: &Image<B>, mut transform: T) -> Result<(T, Option<f64>)> {
        let mut last_loss = None;

        for i in 0..self.settings.iterations {
            let loss = self.metric.forward(fixed, moving, &transform);
            let value = loss.clone().into_scalar().elem::<f64>();
            if !value.is_finite() {
                return Err(RegistrationError::convergence(format!(
                    "{} loss became {} at iteration {}",
                    self.metric.name(),
                    value,
                    i
                )));
            }
            if i % LOG_INTERVAL == 0 {
                tracing::info!("Iteration {}: Loss {:.6}", i, value);
            }
            last_loss = Some(value);

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &transform);
            transform = self.optimizer.step(self.settings.learning_rate, transform, grads);
        }

        Ok((transform, last_loss))
    }
}
