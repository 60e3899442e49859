use super::{ConfigValue, Module, ModuleConfig, ModuleCore};
use crate::backend::Backend;
use crate::error::Error;
use crate::init;
use crate::ops;
use crate::tensor::Tensor;

/// Fully connected layer: `y = x @ W + b`, with `W` of shape `[in, out]`.
pub struct Linear<B: Backend> {
    core: ModuleCore<B>,
    in_features: usize,
    out_features: usize,
    weight: Tensor<B>,
    bias: Option<Tensor<B>>,
}

impl<B: Backend> Linear<B> {
    /// Kaiming-uniform weight; bias drawn from U(-1/sqrt(in), 1/sqrt(in)).
    pub fn new(in_features: usize, out_features: usize, bias: bool) -> Result<Self, Error> {
        let weight = Tensor::kaiming_uniform(in_features, &[in_features, out_features], true)?;
        let bias = if bias {
            let bound = init::fan_in_bound(in_features)?;
            Some(Tensor::new(
                B::random_uniform(&[out_features], -bound, bound)?,
                true,
            ))
        } else {
            None
        };

        let mut core = ModuleCore::new();
        core.register_parameter("weight", weight.clone())?;
        if let Some(bias) = &bias {
            core.register_parameter("bias", bias.clone())?;
        }
        Ok(Self {
            core,
            in_features,
            out_features,
            weight,
            bias,
        })
    }

    pub fn weight(&self) -> &Tensor<B> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor<B>> {
        self.bias.as_ref()
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl<B: Backend> Module<B> for Linear<B> {
    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>, Error> {
        let shape = input.shape();
        if shape.len() != 2 || shape[1] != self.in_features {
            return Err(Error::IncompatibleShapes {
                op: "Linear".to_string(),
                shape_a: shape,
                shape_b: self.weight.shape(),
            });
        }
        let out = ops::matmul(input, &self.weight)?;
        match &self.bias {
            Some(bias) => ops::add(&out, bias),
            None => Ok(out),
        }
    }

    fn core(&self) -> &ModuleCore<B> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore<B> {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "Linear"
    }

    fn config(&self) -> ModuleConfig {
        ModuleConfig::from([
            ("in_features".to_string(), ConfigValue::Int(self.in_features as i64)),
            ("out_features".to_string(), ConfigValue::Int(self.out_features as i64)),
            ("bias".to_string(), ConfigValue::Bool(self.bias.is_some())),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;

    #[test]
    fn test_linear_forward_shape_and_grads() -> Result<(), Error> {
        let layer = Linear::<CpuBackend>::new(3, 2, true)?;
        let x = Tensor::<CpuBackend>::ones(&[4, 3], false)?;
        let y = layer.forward(&x)?;
        assert_eq!(y.shape(), vec![4, 2]);

        ops::sum(&y, None)?.backward()?;
        assert_eq!(layer.weight().grad_vec()?, Some(vec![4.0; 6]));
        assert_eq!(layer.bias().unwrap().grad_vec()?, Some(vec![4.0, 4.0]));
        Ok(())
    }

    #[test]
    fn test_linear_without_bias() -> Result<(), Error> {
        let layer = Linear::<CpuBackend>::new(3, 2, false)?;
        assert_eq!(layer.parameters().len(), 1);
        assert_eq!(layer.config()["bias"], ConfigValue::Bool(false));
        Ok(())
    }

    #[test]
    fn test_linear_rejects_wrong_input() -> Result<(), Error> {
        let layer = Linear::<CpuBackend>::new(3, 2, true)?;
        let x = Tensor::<CpuBackend>::ones(&[4, 5], false)?;
        assert!(matches!(
            layer.forward(&x),
            Err(Error::IncompatibleShapes { .. })
        ));
        Ok(())
    }
}
