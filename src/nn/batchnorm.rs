use super::{ConfigValue, Module, ModuleConfig, ModuleCore};
use crate::backend::Backend;
use crate::error::Error;
use crate::ops;
use crate::tensor::Tensor;
use log::trace;

/// Batch normalization over the feature axis of `[N, C]` input.
///
/// Training mode normalizes with batch statistics and folds them into the
/// running buffers with `momentum` (using the unbiased batch variance);
/// evaluation mode normalizes with the running buffers.
pub struct BatchNorm1d<B: Backend> {
    core: ModuleCore<B>,
    num_features: usize,
    eps: f32,
    momentum: f32,
    weight: Tensor<B>,
    bias: Tensor<B>,
    running_mean: Tensor<B>,
    running_var: Tensor<B>,
    num_batches_tracked: Tensor<B>,
}

impl<B: Backend> BatchNorm1d<B> {
    pub const DEFAULT_EPS: f32 = 1e-5;
    pub const DEFAULT_MOMENTUM: f32 = 0.1;

    pub fn new(num_features: usize) -> Result<Self, Error> {
        Self::with_options(num_features, Self::DEFAULT_EPS, Self::DEFAULT_MOMENTUM)
    }

    pub fn with_options(num_features: usize, eps: f32, momentum: f32) -> Result<Self, Error> {
        if num_features == 0 {
            return Err(Error::InvalidOperation(
                "BatchNorm1d needs at least one feature".to_string(),
            ));
        }
        let weight = Tensor::ones(&[num_features], true)?;
        let bias = Tensor::zeros(&[num_features], true)?;
        let running_mean = Tensor::zeros(&[num_features], false)?;
        let running_var = Tensor::ones(&[num_features], false)?;
        let num_batches_tracked = Tensor::scalar(0.0, false)?;

        let mut core = ModuleCore::new();
        core.register_parameter("weight", weight.clone())?;
        core.register_parameter("bias", bias.clone())?;
        core.register_buffer("running_mean", running_mean.clone())?;
        core.register_buffer("running_var", running_var.clone())?;
        core.register_buffer("num_batches_tracked", num_batches_tracked.clone())?;
        Ok(Self {
            core,
            num_features,
            eps,
            momentum,
            weight,
            bias,
            running_mean,
            running_var,
            num_batches_tracked,
        })
    }

    pub fn running_mean(&self) -> &Tensor<B> {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Tensor<B> {
        &self.running_var
    }

    pub fn num_batches_tracked(&self) -> Result<usize, Error> {
        Ok(self.num_batches_tracked.item()? as usize)
    }

    fn update_running_stats(
        &self,
        batch_mean: &B::Storage,
        batch_var: &B::Storage,
        batch_size: usize,
    ) -> Result<(), Error> {
        let m = self.momentum;
        let unbiased = B::mul_scalar(batch_var, batch_size as f32 / (batch_size - 1) as f32)?;
        let mean = B::add(
            &B::mul_scalar(&*self.running_mean.data(), 1.0 - m)?,
            &B::mul_scalar(batch_mean, m)?,
        )?;
        let var = B::add(
            &B::mul_scalar(&*self.running_var.data(), 1.0 - m)?,
            &B::mul_scalar(&unbiased, m)?,
        )?;
        self.running_mean.set_data(mean)?;
        self.running_var.set_data(var)?;
        let tracked = B::add_scalar(&*self.num_batches_tracked.data(), 1.0)?;
        self.num_batches_tracked.set_data(tracked)
    }
}

impl<B: Backend> Module<B> for BatchNorm1d<B> {
    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>, Error> {
        let shape = input.shape();
        if shape.len() != 2 || shape[1] != self.num_features {
            return Err(Error::ShapeError(format!(
                "BatchNorm1d expected input of shape [N, {}], got {:?}",
                self.num_features, shape
            )));
        }

        let (centered, var) = if self.is_training() {
            if shape[0] < 2 {
                return Err(Error::ShapeError(format!(
                    "BatchNorm1d expected more than 1 value per channel when training, got input of shape {:?}",
                    shape
                )));
            }
            let mean = ops::mean(input, Some(0))?;
            let centered = ops::sub(input, &mean)?;
            let var = ops::mean(&ops::mul(&centered, &centered)?, Some(0))?;
            self.update_running_stats(&*mean.data(), &*var.data(), shape[0])?;
            trace!("BatchNorm1d: updated running statistics");
            (centered, var)
        } else {
            let running_mean = self.running_mean.detach();
            (ops::sub(input, &running_mean)?, self.running_var.detach())
        };

        let std = ops::sqrt(&ops::add_scalar(&var, self.eps)?)?;
        let normalized = ops::div(&centered, &std)?;
        ops::add(&ops::mul(&normalized, &self.weight)?, &self.bias)
    }

    fn core(&self) -> &ModuleCore<B> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore<B> {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "BatchNorm1d"
    }

    fn config(&self) -> ModuleConfig {
        ModuleConfig::from([
            ("num_features".to_string(), ConfigValue::Int(self.num_features as i64)),
            ("eps".to_string(), ConfigValue::Float(self.eps as f64)),
            ("momentum".to_string(), ConfigValue::Float(self.momentum as f64)),
        ])
    }
}
