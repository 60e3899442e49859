//! Model type lookup for rebuilding modules from records.

use super::record::ModuleRecord;
use crate::backend::Backend;
use crate::error::Error;
use crate::nn::{BatchNorm1d, ConfigValue, Dropout, Dropout2d, Linear, Module, Sequential};
use log::trace;
use std::collections::BTreeMap;

/// Builds an empty module of one type from its record. Child records are
/// built through the resolver so nested custom types resolve too.
pub type ModuleFactory<B> =
    fn(&ModuleRecord, &ModelResolver<B>) -> Result<Box<dyn Module<B>>, Error>;

/// Type name to factory table.
pub struct ModelRegistry<B: Backend> {
    factories: BTreeMap<String, ModuleFactory<B>>,
}

impl<B: Backend> Default for ModelRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ModelRegistry<B> {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// The layers this crate ships.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("Linear", build_linear::<B>);
        registry.register("BatchNorm1d", build_batchnorm1d::<B>);
        registry.register("Dropout", build_dropout::<B>);
        registry.register("Dropout2d", build_dropout2d::<B>);
        registry.register("Sequential", build_sequential::<B>);
        registry
    }

    /// Registers `factory` under `name`, returning the factory it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: ModuleFactory<B>,
    ) -> Option<ModuleFactory<B>> {
        self.factories.insert(name.into(), factory)
    }

    pub fn get(&self, name: &str) -> Option<ModuleFactory<B>> {
        self.factories.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// Resolves type names against the caller's registry, then the built-in
/// layers, then the application's registry. The first match wins.
pub struct ModelResolver<B: Backend> {
    custom: ModelRegistry<B>,
    builtin: ModelRegistry<B>,
    application: ModelRegistry<B>,
}

impl<B: Backend> Default for ModelResolver<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ModelResolver<B> {
    /// Built-in layers only.
    pub fn new() -> Self {
        Self {
            custom: ModelRegistry::new(),
            builtin: ModelRegistry::builtin(),
            application: ModelRegistry::new(),
        }
    }

    /// Types supplied for a single load; searched before the built-in layers.
    pub fn with_custom(mut self, registry: ModelRegistry<B>) -> Self {
        self.custom = registry;
        self
    }

    /// Application-wide types; searched after the built-in layers.
    pub fn with_application(mut self, registry: ModelRegistry<B>) -> Self {
        self.application = registry;
        self
    }

    pub fn resolve(&self, name: &str) -> Result<ModuleFactory<B>, Error> {
        let tiers = [
            ("custom", &self.custom),
            ("builtin", &self.builtin),
            ("application", &self.application),
        ];
        for (tier, registry) in tiers {
            if let Some(factory) = registry.get(name) {
                trace!("ModelResolver: '{}' resolved from {} registry", name, tier);
                return Ok(factory);
            }
        }
        Err(Error::UnknownModelClass(name.to_string()))
    }

    /// Builds the module a record describes, children included.
    pub fn build(&self, record: &ModuleRecord) -> Result<Box<dyn Module<B>>, Error> {
        let factory = self.resolve(&record.model_type)?;
        factory(record, self)
    }
}

fn config_value<'a>(record: &'a ModuleRecord, key: &str) -> Result<&'a ConfigValue, Error> {
    record.config.get(key).ok_or_else(|| Error::InvalidConfig {
        model_type: record.model_type.clone(),
        reason: format!("missing '{}'", key),
    })
}

fn wrong_type(record: &ModuleRecord, key: &str, expected: &str) -> Error {
    Error::InvalidConfig {
        model_type: record.model_type.clone(),
        reason: format!("'{}' is not {}", key, expected),
    }
}

/// Reads a non-negative integer from the record's config.
pub fn config_usize(record: &ModuleRecord, key: &str) -> Result<usize, Error> {
    config_value(record, key)?
        .as_i64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| wrong_type(record, key, "a non-negative integer"))
}

/// Reads a float (integers are accepted) from the record's config.
pub fn config_f32(record: &ModuleRecord, key: &str) -> Result<f32, Error> {
    config_value(record, key)?
        .as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| wrong_type(record, key, "a number"))
}

pub fn config_bool(record: &ModuleRecord, key: &str) -> Result<bool, Error> {
    config_value(record, key)?
        .as_bool()
        .ok_or_else(|| wrong_type(record, key, "a bool"))
}

fn build_linear<B: Backend>(
    record: &ModuleRecord,
    _: &ModelResolver<B>,
) -> Result<Box<dyn Module<B>>, Error> {
    Ok(Box::new(Linear::new(
        config_usize(record, "in_features")?,
        config_usize(record, "out_features")?,
        config_bool(record, "bias")?,
    )?))
}

fn build_batchnorm1d<B: Backend>(
    record: &ModuleRecord,
    _: &ModelResolver<B>,
) -> Result<Box<dyn Module<B>>, Error> {
    Ok(Box::new(BatchNorm1d::with_options(
        config_usize(record, "num_features")?,
        config_f32(record, "eps")?,
        config_f32(record, "momentum")?,
    )?))
}

fn build_dropout<B: Backend>(
    record: &ModuleRecord,
    _: &ModelResolver<B>,
) -> Result<Box<dyn Module<B>>, Error> {
    Ok(Box::new(Dropout::with_inplace(
        config_f32(record, "p")?,
        config_bool(record, "inplace")?,
    )?))
}

fn build_dropout2d<B: Backend>(
    record: &ModuleRecord,
    _: &ModelResolver<B>,
) -> Result<Box<dyn Module<B>>, Error> {
    Ok(Box::new(Dropout2d::with_inplace(
        config_f32(record, "p")?,
        config_bool(record, "inplace")?,
    )?))
}

fn build_sequential<B: Backend>(
    record: &ModuleRecord,
    resolver: &ModelResolver<B>,
) -> Result<Box<dyn Module<B>>, Error> {
    let layers = record
        .modules
        .iter()
        .map(|child| resolver.build(child))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Box::new(Sequential::new(layers)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;
    use crate::nn::ModuleConfig;

    fn record(model_type: &str, config: ModuleConfig) -> ModuleRecord {
        ModuleRecord {
            name: String::new(),
            model_type: model_type.to_string(),
            config,
            modules: Vec::new(),
        }
    }

    fn build_marker(
        _: &ModuleRecord,
        _: &ModelResolver<CpuBackend>,
    ) -> Result<Box<dyn Module<CpuBackend>>, Error> {
        Ok(Box::new(Dropout::new(0.25)?))
    }

    #[test]
    fn test_unknown_model_class() {
        let resolver = ModelResolver::<CpuBackend>::new();
        match resolver.build(&record("Transformer", ModuleConfig::new())) {
            Err(err @ Error::UnknownModelClass(_)) => {
                assert_eq!(err.to_string(), "Unknown model class: Transformer");
            }
            other => panic!("expected UnknownModelClass, got {:?}", other.map(|m| m.type_name())),
        }
    }

    #[test]
    fn test_custom_registry_shadows_builtin() -> Result<(), Error> {
        let mut custom = ModelRegistry::new();
        custom.register("Linear", build_marker);
        let resolver = ModelResolver::<CpuBackend>::new().with_custom(custom);
        let module = resolver.build(&record("Linear", ModuleConfig::new()))?;
        assert_eq!(module.type_name(), "Dropout");
        Ok(())
    }

    #[test]
    fn test_application_registry_searched_last() -> Result<(), Error> {
        let mut application = ModelRegistry::new();
        application.register("Marker", build_marker);
        application.register("Dropout", build_linear::<CpuBackend>);
        let resolver = ModelResolver::<CpuBackend>::new().with_application(application);

        assert_eq!(resolver.build(&record("Marker", ModuleConfig::new()))?.type_name(), "Dropout");
        let dropout_config = ModuleConfig::from([
            ("p".to_string(), ConfigValue::Float(0.5)),
            ("inplace".to_string(), ConfigValue::Bool(false)),
        ]);
        // builtin Dropout wins over the application entry
        assert_eq!(resolver.build(&record("Dropout", dropout_config))?.type_name(), "Dropout");
        Ok(())
    }

    #[test]
    fn test_missing_config_key() {
        let resolver = ModelResolver::<CpuBackend>::new();
        let result = resolver.build(&record("Linear", ModuleConfig::new()));
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
