use super::{Module, ModuleConfig, ModuleCore};
use crate::backend::Backend;
use crate::error::Error;
use crate::tensor::Tensor;

/// Runs its children in order, feeding each output to the next child.
/// Children are named `"0"`, `"1"`, ... by position.
pub struct Sequential<B: Backend> {
    core: ModuleCore<B>,
}

impl<B: Backend> Sequential<B> {
    pub fn new(layers: Vec<Box<dyn Module<B>>>) -> Result<Self, Error> {
        let mut sequential = Self::empty();
        for layer in layers {
            sequential.push(layer)?;
        }
        Ok(sequential)
    }

    pub fn empty() -> Self {
        Self {
            core: ModuleCore::new(),
        }
    }

    /// Appends a layer under the next positional name.
    pub fn push(&mut self, layer: Box<dyn Module<B>>) -> Result<(), Error> {
        let name = self.core.modules().len().to_string();
        self.core.register_module(&name, layer)
    }

    pub fn len(&self) -> usize {
        self.core.modules().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.modules().is_empty()
    }
}

impl<B: Backend> Module<B> for Sequential<B> {
    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>, Error> {
        let mut x = input.clone();
        for (_, layer) in self.core.modules() {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }

    fn core(&self) -> &ModuleCore<B> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore<B> {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "Sequential"
    }

    fn config(&self) -> ModuleConfig {
        ModuleConfig::new()
    }
}
