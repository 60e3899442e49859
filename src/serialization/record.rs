//! Versioned JSON records of whole models.

use super::registry::ModelResolver;
use super::{read_json, write_json, FORMAT_VERSION};
use crate::backend::Backend;
use crate::error::Error;
use crate::nn::{LoadStrictness, Module, ModuleConfig, StateDict};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Type, configuration and children of one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Name under the parent; empty for the root.
    pub name: String,
    pub model_type: String,
    pub config: ModuleConfig,
    pub modules: Vec<ModuleRecord>,
}

impl ModuleRecord {
    pub fn from_module<B: Backend, M: Module<B> + ?Sized>(name: &str, module: &M) -> Self {
        Self {
            name: name.to_string(),
            model_type: module.type_name().to_string(),
            config: module.config(),
            modules: module
                .core()
                .modules()
                .iter()
                .map(|(child_name, child)| ModuleRecord::from_module(child_name, child.as_ref()))
                .collect(),
        }
    }
}

/// Everything needed to rebuild a model: its module tree and its state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub format_version: u32,
    #[serde(flatten)]
    pub module: ModuleRecord,
    pub state_dict: StateDict,
}

impl ModelRecord {
    pub fn from_module<B: Backend, M: Module<B> + ?Sized>(model: &M) -> Result<Self, Error> {
        Ok(Self {
            format_version: FORMAT_VERSION,
            module: ModuleRecord::from_module("", model),
            state_dict: model.state_dict()?,
        })
    }

    /// Builds the module tree through `resolver` and loads the state strictly.
    pub fn into_module<B: Backend>(
        self,
        resolver: &ModelResolver<B>,
    ) -> Result<Box<dyn Module<B>>, Error> {
        let mut model = resolver.build(&self.module)?;
        model.load_state_dict(&self.state_dict, LoadStrictness::Strict)?;
        Ok(model)
    }
}

/// Writes `model`'s type tree, configuration and state dict to `path`.
pub fn save_model<B, M, P>(model: &M, path: P) -> Result<(), Error>
where
    B: Backend,
    M: Module<B> + ?Sized,
    P: AsRef<Path>,
{
    let record = ModelRecord::from_module(model)?;
    write_json(path.as_ref(), &record)?;
    debug!(
        "save_model: wrote {} with {} state entries to {}",
        record.module.model_type,
        record.state_dict.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Rebuilds a model saved with [`save_model`].
///
/// Fails with [`Error::UnknownModelClass`] when a type in the record is not
/// known to `resolver`.
pub fn load_model<B: Backend, P: AsRef<Path>>(
    path: P,
    resolver: &ModelResolver<B>,
) -> Result<Box<dyn Module<B>>, Error> {
    let record: ModelRecord = read_json(path.as_ref())?;
    debug!(
        "load_model: rebuilding {} from {}",
        record.module.model_type,
        path.as_ref().display()
    );
    record.into_module(resolver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;
    use crate::nn::{BatchNorm1d, Linear, Sequential};

    #[test]
    fn test_record_mirrors_module_tree() -> Result<(), Error> {
        let model = Sequential::<CpuBackend>::new(vec![
            Box::new(Linear::new(2, 3, true)?),
            Box::new(BatchNorm1d::new(3)?),
        ])?;
        let record = ModelRecord::from_module(&model)?;
        assert_eq!(record.format_version, FORMAT_VERSION);
        assert_eq!(record.module.model_type, "Sequential");
        let children: Vec<(&str, &str)> = record
            .module
            .modules
            .iter()
            .map(|m| (m.name.as_str(), m.model_type.as_str()))
            .collect();
        assert_eq!(children, vec![("0", "Linear"), ("1", "BatchNorm1d")]);
        assert_eq!(record.state_dict.len(), 7);
        Ok(())
    }

    #[test]
    fn test_record_json_is_flat() -> Result<(), Error> {
        let model = Linear::<CpuBackend>::new(1, 1, false)?;
        let record = ModelRecord::from_module(&model)?;
        let value = serde_json::to_value(&record)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        assert_eq!(value["model_type"], "Linear");
        assert!(value.get("config").is_some());
        assert!(value.get("state_dict").is_some());
        Ok(())
    }
}
