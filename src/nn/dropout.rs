use super::{ConfigValue, Module, ModuleConfig, ModuleCore};
use crate::backend::Backend;
use crate::error::Error;
use crate::ops;
use crate::tensor::Tensor;

fn check_probability(p: f32) -> Result<(), Error> {
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::InvalidProbability(p));
    }
    Ok(())
}

/// Scale applied to kept elements: `1 / (1 - p)`, or 0 when everything is dropped.
fn keep_scale(p: f32) -> f32 {
    if p == 1.0 {
        0.0
    } else {
        1.0 / (1.0 - p)
    }
}

/// Applies a scaled keep-mask of shape `mask_shape` (broadcast over the input).
fn apply_mask<B: Backend>(
    input: &Tensor<B>,
    mask_shape: &[usize],
    p: f32,
    inplace: bool,
) -> Result<Tensor<B>, Error> {
    let mask = B::mul_scalar(&B::bernoulli(mask_shape, 1.0 - p)?, keep_scale(p))?;
    if inplace {
        B::mul_assign(&mut *input.data_mut(), &mask)?;
        return Ok(input.clone());
    }
    ops::mul(input, &Tensor::new(mask, false))
}

fn dropout_config(p: f32, inplace: bool) -> ModuleConfig {
    ModuleConfig::from([
        ("p".to_string(), ConfigValue::Float(p as f64)),
        ("inplace".to_string(), ConfigValue::Bool(inplace)),
    ])
}

/// Zeroes each element independently with probability `p` during training
/// and scales the survivors by `1 / (1 - p)`. Identity in evaluation mode.
///
/// With `inplace` the input's array is multiplied directly and the input
/// handle is returned; no graph edge is recorded for the mask.
pub struct Dropout<B: Backend> {
    core: ModuleCore<B>,
    p: f32,
    inplace: bool,
}

impl<B: Backend> Dropout<B> {
    pub fn new(p: f32) -> Result<Self, Error> {
        Self::with_inplace(p, false)
    }

    pub fn with_inplace(p: f32, inplace: bool) -> Result<Self, Error> {
        check_probability(p)?;
        Ok(Self {
            core: ModuleCore::new(),
            p,
            inplace,
        })
    }

    pub fn p(&self) -> f32 {
        self.p
    }
}

impl<B: Backend> Module<B> for Dropout<B> {
    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>, Error> {
        if !self.is_training() {
            return Ok(input.clone());
        }
        apply_mask(input, &input.shape(), self.p, self.inplace)
    }

    fn core(&self) -> &ModuleCore<B> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore<B> {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "Dropout"
    }

    fn config(&self) -> ModuleConfig {
        dropout_config(self.p, self.inplace)
    }
}

/// Zeroes whole channels of `[N, C, H, W]` input: one keep decision per
/// (sample, channel), shared by every spatial position of that channel.
pub struct Dropout2d<B: Backend> {
    core: ModuleCore<B>,
    p: f32,
    inplace: bool,
}

impl<B: Backend> Dropout2d<B> {
    pub fn new(p: f32) -> Result<Self, Error> {
        Self::with_inplace(p, false)
    }

    pub fn with_inplace(p: f32, inplace: bool) -> Result<Self, Error> {
        check_probability(p)?;
        Ok(Self {
            core: ModuleCore::new(),
            p,
            inplace,
        })
    }

    pub fn p(&self) -> f32 {
        self.p
    }
}

impl<B: Backend> Module<B> for Dropout2d<B> {
    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>, Error> {
        if !self.is_training() {
            return Ok(input.clone());
        }
        let shape = input.shape();
        if shape.len() != 4 {
            return Err(Error::ShapeError(format!(
                "Dropout2d expected 4D input, got {}D input",
                shape.len()
            )));
        }
        apply_mask(input, &[shape[0], shape[1], 1, 1], self.p, self.inplace)
    }

    fn core(&self) -> &ModuleCore<B> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore<B> {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "Dropout2d"
    }

    fn config(&self) -> ModuleConfig {
        dropout_config(self.p, self.inplace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;

    type T = Tensor<CpuBackend>;

    #[test]
    fn test_probability_bounds() {
        assert!(matches!(
            Dropout::<CpuBackend>::new(1.5),
            Err(Error::InvalidProbability(p)) if p == 1.5
        ));
        assert!(Dropout2d::<CpuBackend>::new(-0.1).is_err());
        assert!(Dropout::<CpuBackend>::new(0.0).is_ok());
        assert!(Dropout::<CpuBackend>::new(1.0).is_ok());
    }

    #[test]
    fn test_keep_scale() {
        assert_eq!(keep_scale(0.0), 1.0);
        assert_eq!(keep_scale(0.5), 2.0);
        assert_eq!(keep_scale(1.0), 0.0);
    }

    #[test]
    fn test_eval_returns_input_handle() -> Result<(), Error> {
        let mut dropout = Dropout::<CpuBackend>::new(0.5)?;
        dropout.eval();
        let x = T::ones(&[10], true)?;
        let y = dropout.forward(&x)?;
        assert_eq!(x, y);
        Ok(())
    }

    #[test]
    fn test_inplace_returns_same_tensor() -> Result<(), Error> {
        let dropout = Dropout::<CpuBackend>::with_inplace(1.0, true)?;
        let x = T::ones(&[3], false)?;
        let y = dropout.forward(&x)?;
        assert_eq!(x, y);
        assert_eq!(x.to_vec()?, vec![0.0; 3]);
        Ok(())
    }

    #[test]
    fn test_gradient_flows_through_kept_elements() -> Result<(), Error> {
        let dropout = Dropout::<CpuBackend>::new(0.5)?;
        let x = T::ones(&[64], true)?;
        let y = dropout.forward(&x)?;
        ops::sum(&y, None)?.backward()?;
        // d y_i / d x_i equals the mask value, which is also y_i for x = 1
        assert_eq!(x.grad_vec()?, Some(y.to_vec()?));
        Ok(())
    }

    #[test]
    fn test_dropout2d_requires_4d() -> Result<(), Error> {
        let dropout = Dropout2d::<CpuBackend>::new(0.5)?;
        let x = T::ones(&[2, 3, 4], false)?;
        assert!(matches!(dropout.forward(&x), Err(Error::ShapeError(_))));
        Ok(())
    }
}
