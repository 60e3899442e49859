//! Layers and the parameter/buffer tree they are built from.
//!
//! A layer owns a [`ModuleCore`] holding its named parameters, named buffers
//! and named child modules in registration order. Everything else
//! (recursive enumeration, state dicts, train/eval switching) is provided by
//! the [`Module`] trait on top of that core.

use crate::array::Array;
use crate::backend::Backend;
use crate::error::Error;
use crate::tensor::Tensor;
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

pub mod batchnorm;
pub mod dropout;
pub mod linear;
pub mod sequential;

pub use batchnorm::BatchNorm1d;
pub use dropout::{Dropout, Dropout2d};
pub use linear::Linear;
pub use sequential::Sequential;

/// One constructor argument of a module, as stored in a model record.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// The explicit constructor configuration of a module.
pub type ModuleConfig = BTreeMap<String, ConfigValue>;

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers are widened, so `Int(3)` reads as `3.0`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Named copies of a module's parameters and buffers, in traversal order.
///
/// Gradients are never part of a state dict.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct StateDict {
    entries: Vec<(String, Array)>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `name`, keeping its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: Array) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Array> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Array)> for StateDict {
    fn from_iter<I: IntoIterator<Item = (String, Array)>>(iter: I) -> Self {
        let mut dict = StateDict::new();
        for (name, value) in iter {
            dict.insert(name, value);
        }
        dict
    }
}

impl IntoIterator for StateDict {
    type Item = (String, Array);
    type IntoIter = std::vec::IntoIter<(String, Array)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// How [`Module::load_state_dict`] treats keys that do not line up.
///
/// Shape mismatches on matching keys are rejected in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrictness {
    /// Missing or unexpected keys are an error and nothing is loaded.
    #[default]
    Strict,
    /// Missing or unexpected keys are logged; matching entries are loaded.
    Warn,
    /// Missing or unexpected keys are skipped silently.
    Ignore,
}

/// Keys that did not line up during a non-strict load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub missing_keys: Vec<String>,
    pub unexpected_keys: Vec<String>,
}

/// Registered state of one module.
pub struct ModuleCore<B: Backend> {
    parameters: Vec<(String, Tensor<B>)>,
    buffers: Vec<(String, Tensor<B>)>,
    modules: Vec<(String, Box<dyn Module<B>>)>,
    training: bool,
}

impl<B: Backend> Default for ModuleCore<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ModuleCore<B> {
    /// An empty core in training mode.
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
            buffers: Vec::new(),
            modules: Vec::new(),
            training: true,
        }
    }

    fn check_name(&self, name: &str) -> Result<(), Error> {
        if name.is_empty() || name.contains('.') {
            return Err(Error::InvalidOperation(format!(
                "invalid member name '{}': must be non-empty and contain no '.'",
                name
            )));
        }
        let taken = self.parameters.iter().any(|(n, _)| n == name)
            || self.buffers.iter().any(|(n, _)| n == name)
            || self.modules.iter().any(|(n, _)| n == name);
        if taken {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Registers a trainable leaf. Its `requires_grad` is switched on.
    pub fn register_parameter(&mut self, name: &str, tensor: Tensor<B>) -> Result<(), Error> {
        self.check_name(name)?;
        tensor.set_requires_grad(true)?;
        self.parameters.push((name.to_string(), tensor));
        Ok(())
    }

    /// Registers non-trainable persistent state (running statistics, counters).
    pub fn register_buffer(&mut self, name: &str, tensor: Tensor<B>) -> Result<(), Error> {
        self.check_name(name)?;
        tensor.set_requires_grad(false)?;
        self.buffers.push((name.to_string(), tensor));
        Ok(())
    }

    pub fn register_module(&mut self, name: &str, module: Box<dyn Module<B>>) -> Result<(), Error> {
        self.check_name(name)?;
        self.modules.push((name.to_string(), module));
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Option<&Tensor<B>> {
        lookup(&self.parameters, name)
    }

    pub fn buffer(&self, name: &str) -> Option<&Tensor<B>> {
        lookup(&self.buffers, name)
    }

    pub fn module(&self, name: &str) -> Option<&dyn Module<B>> {
        self.modules
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m.as_ref())
    }

    pub fn parameters(&self) -> &[(String, Tensor<B>)] {
        &self.parameters
    }

    pub fn buffers(&self) -> &[(String, Tensor<B>)] {
        &self.buffers
    }

    pub fn modules(&self) -> &[(String, Box<dyn Module<B>>)] {
        &self.modules
    }

    pub fn modules_mut(&mut self) -> &mut [(String, Box<dyn Module<B>>)] {
        &mut self.modules
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

fn lookup<'a, B: Backend>(items: &'a [(String, Tensor<B>)], name: &str) -> Option<&'a Tensor<B>> {
    items.iter().find(|(n, _)| n == name).map(|(_, t)| t)
}

fn prefixed<'a, T: 'a>(
    prefix: &'a str,
    items: Vec<(String, T)>,
) -> impl Iterator<Item = (String, T)> + 'a {
    items
        .into_iter()
        .map(move |(name, item)| (format!("{}.{}", prefix, name), item))
}

/// A layer or container of layers.
///
/// Implementors supply `forward`, access to their [`ModuleCore`], and the
/// type name and constructor configuration used by model records.
pub trait Module<B: Backend> {
    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>, Error>;

    fn core(&self) -> &ModuleCore<B>;

    fn core_mut(&mut self) -> &mut ModuleCore<B>;

    /// Registry name of this module type, e.g. `"Linear"`.
    fn type_name(&self) -> &'static str;

    /// Constructor arguments needed to rebuild an equivalent empty module.
    fn config(&self) -> ModuleConfig;

    /// Parameters of this module and all descendants, with dotted names.
    fn named_parameters(&self) -> Vec<(String, Tensor<B>)> {
        let core = self.core();
        let mut out = core.parameters.clone();
        for (name, child) in &core.modules {
            out.extend(prefixed(name, child.named_parameters()));
        }
        out
    }

    fn parameters(&self) -> Vec<Tensor<B>> {
        self.named_parameters().into_iter().map(|(_, t)| t).collect()
    }

    /// Buffers of this module and all descendants, with dotted names.
    fn named_buffers(&self) -> Vec<(String, Tensor<B>)> {
        let core = self.core();
        let mut out = core.buffers.clone();
        for (name, child) in &core.modules {
            out.extend(prefixed(name, child.named_buffers()));
        }
        out
    }

    /// Every tensor that belongs in a state dict: per module, parameters,
    /// then buffers, then children depth-first.
    fn named_state(&self) -> Vec<(String, Tensor<B>)> {
        let core = self.core();
        let mut out = core.parameters.clone();
        out.extend(core.buffers.iter().cloned());
        for (name, child) in &core.modules {
            out.extend(prefixed(name, child.named_state()));
        }
        out
    }

    /// Direct children and, recursively, their children, with dotted names.
    fn named_modules(&self) -> Vec<(String, &dyn Module<B>)> {
        let mut out = Vec::new();
        for (name, child) in &self.core().modules {
            out.push((name.clone(), child.as_ref()));
            out.extend(prefixed(name, child.named_modules()));
        }
        out
    }

    /// Copies every parameter and buffer into a [`StateDict`].
    fn state_dict(&self) -> Result<StateDict, Error> {
        self.named_state()
            .into_iter()
            .map(|(name, tensor)| {
                let array = Array::from_vec(tensor.to_vec()?, &tensor.shape())?;
                Ok((name, array))
            })
            .collect()
    }

    /// Overwrites matching parameters and buffers in place.
    ///
    /// Everything is validated before anything is written, so a rejected
    /// load leaves the module untouched.
    fn load_state_dict(
        &mut self,
        state: &StateDict,
        strictness: LoadStrictness,
    ) -> Result<LoadReport, Error> {
        let targets = self.named_state();
        let target_names: HashSet<&str> = targets.iter().map(|(n, _)| n.as_str()).collect();

        let mut report = LoadReport::default();
        let mut pending = Vec::with_capacity(targets.len());
        for (name, tensor) in &targets {
            match state.get(name) {
                Some(array) => {
                    let expected = tensor.shape();
                    if array.shape() != expected.as_slice() {
                        return Err(Error::StateDictShapeMismatch {
                            name: name.clone(),
                            expected,
                            actual: array.shape().to_vec(),
                        });
                    }
                    pending.push((tensor, array));
                }
                None => report.missing_keys.push(name.clone()),
            }
        }
        report.unexpected_keys = state
            .keys()
            .filter(|key| !target_names.contains(key))
            .map(str::to_string)
            .collect();

        let clean = report.missing_keys.is_empty() && report.unexpected_keys.is_empty();
        match strictness {
            LoadStrictness::Strict if !clean => {
                return Err(Error::StateDictKeys {
                    unexpected: report.unexpected_keys,
                    missing: report.missing_keys,
                });
            }
            LoadStrictness::Warn if !clean => {
                warn!(
                    "load_state_dict: missing keys {:?}, unexpected keys {:?}",
                    report.missing_keys, report.unexpected_keys
                );
            }
            _ => {}
        }

        for (tensor, array) in pending {
            tensor.set_data(B::from_vec(array.to_vec(), array.shape())?)?;
        }
        debug!("load_state_dict: loaded {} entries", targets.len() - report.missing_keys.len());
        Ok(report)
    }

    /// Sets training mode on this module and all descendants.
    fn train(&mut self, training: bool) {
        self.core_mut().set_training(training);
        for (_, child) in self.core_mut().modules_mut() {
            child.train(training);
        }
    }

    fn eval(&mut self) {
        self.train(false);
    }

    fn is_training(&self) -> bool {
        self.core().is_training()
    }

    /// Clears the gradient of every parameter.
    fn zero_grad(&self) {
        for param in self.parameters() {
            param.zero_grad();
        }
    }
}
