#![cfg(feature = "serialization")]

use rust_autograd_lib::nn::{
    BatchNorm1d, ConfigValue, Dropout, Linear, ModuleConfig, ModuleCore, Sequential,
};
use rust_autograd_lib::serialization::{
    config_usize, load_checkpoint, load_model, load_state_dict_file, save_checkpoint, save_model,
    save_state_dict, CheckpointMeta, ModelRegistry, ModelResolver, ModuleRecord, FORMAT_VERSION,
};
use rust_autograd_lib::{
    ops, Adam, Array, CpuBackend, Error, LoadStrictness, Module, Optimizer, Sgd, StateDict, Tensor,
};
use serde_json::json;
use std::collections::BTreeMap;
use tempfile::tempdir;

type B = CpuBackend;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn network() -> Result<Sequential<B>, Error> {
    Sequential::new(vec![
        Box::new(Linear::new(3, 4, true)?),
        Box::new(BatchNorm1d::new(4)?),
        Box::new(Dropout::new(0.1)?),
        Box::new(Linear::new(4, 2, false)?),
    ])
}

fn assert_same_state<M, N>(a: &M, b: &N) -> Result<(), Error>
where
    M: Module<B> + ?Sized,
    N: Module<B> + ?Sized,
{
    let a = a.named_state();
    let b = b.named_state();
    assert_eq!(a.len(), b.len());
    for ((name_a, ta), (name_b, tb)) in a.iter().zip(&b) {
        assert_eq!(name_a, name_b);
        assert_eq!(ta.shape(), tb.shape(), "{} shape differs", name_a);
        let bits_a: Vec<u32> = ta.to_vec()?.iter().map(|v| v.to_bits()).collect();
        let bits_b: Vec<u32> = tb.to_vec()?.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits_a, bits_b, "{} values differ", name_a);
    }
    Ok(())
}

/// Runs one training step so buffers and optimizer moments are non-trivial.
fn train_step(model: &Sequential<B>, optimizer: &mut dyn Optimizer<B>) -> Result<f32, Error> {
    let x = Tensor::<B>::from_vec((0..12).map(|v| v as f32 / 7.0).collect(), &[4, 3], false)?;
    optimizer.zero_grad();
    let out = model.forward(&x)?;
    let loss = ops::mean(&ops::mul(&out, &out)?, None)?;
    loss.backward()?;
    optimizer.step()?;
    loss.item()
}

#[test]
fn test_checkpoint_round_trip() -> Result<(), Error> {
    init_logging();
    let dir = tempdir()?;
    let path = dir.path().join("checkpoint.json");

    let model = network()?;
    let mut adam = Adam::new(model.parameters(), 0.01)?;
    let loss = train_step(&model, &mut adam)?;

    let meta = CheckpointMeta {
        epoch: Some(7),
        loss: Some(loss as f64),
        additional_data: BTreeMap::from([
            ("run".to_string(), json!("baseline")),
            ("lr_schedule".to_string(), json!([0.1, 0.01])),
        ]),
    };
    save_checkpoint(&path, &model, Some(&adam as &dyn Optimizer<B>), &meta)?;

    let mut restored = network()?;
    let mut restored_adam = Adam::new(restored.parameters(), 0.5)?;
    let loaded = load_checkpoint(
        &path,
        &mut restored,
        Some(&mut restored_adam as &mut dyn Optimizer<B>),
    )?;

    assert_eq!(loaded, meta);
    assert_eq!(loaded.loss.map(|l| l.to_bits()), Some((loss as f64).to_bits()));
    assert_same_state(&model, &restored)?;
    assert_eq!(restored_adam.learning_rate(), 0.01);
    assert_eq!(restored_adam.timestep(), 1);

    Ok(())
}

#[test]
fn test_checkpoint_without_optimizer() -> Result<(), Error> {
    let dir = tempdir()?;
    let path = dir.path().join("weights_only.json");
    let model = Linear::<B>::new(2, 2, true)?;
    save_checkpoint(&path, &model, None, &CheckpointMeta::default())?;

    let mut restored = Linear::<B>::new(2, 2, true)?;
    let meta = load_checkpoint::<B, _, _>(&path, &mut restored, None)?;
    assert_eq!(meta, CheckpointMeta::default());
    assert_same_state(&model, &restored)
}

#[test]
fn test_state_dict_archive_round_trip() -> Result<(), Error> {
    let dir = tempdir()?;
    let path = dir.path().join("model.safetensors");

    let model = network()?;
    save_state_dict(&model.state_dict()?, &path)?;

    let state: StateDict = load_state_dict_file(&path)?;
    assert_eq!(state, model.state_dict()?);
    let mut restored = network()?;
    restored.load_state_dict(&state, LoadStrictness::Strict)?;
    assert_same_state(&model, &restored)
}

#[test]
fn test_model_round_trip_through_builtin_registry() -> Result<(), Error> {
    let dir = tempdir()?;
    let path = dir.path().join("model.json");
    let model = network()?;
    save_model(&model, &path)?;

    let restored = load_model(&path, &ModelResolver::<B>::new())?;
    assert_eq!(restored.type_name(), "Sequential");
    let types: Vec<&str> = restored
        .named_modules()
        .iter()
        .map(|(_, m)| m.type_name())
        .collect();
    assert_eq!(types, vec!["Linear", "BatchNorm1d", "Dropout", "Linear"]);
    assert_eq!(restored.named_modules()[2].1.config(), model.named_modules()[2].1.config());
    assert_same_state(&model, restored.as_ref())
}

/// Scales its input by a learned vector.
struct Scale {
    core: ModuleCore<B>,
    weight: Tensor<B>,
    features: usize,
}

impl Scale {
    fn new(features: usize) -> Result<Self, Error> {
        let weight = Tensor::ones(&[features], true)?;
        let mut core = ModuleCore::new();
        core.register_parameter("weight", weight.clone())?;
        Ok(Self { core, weight, features })
    }
}

impl Module<B> for Scale {
    fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>, Error> {
        ops::mul(input, &self.weight)
    }

    fn core(&self) -> &ModuleCore<B> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore<B> {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "Scale"
    }

    fn config(&self) -> ModuleConfig {
        ModuleConfig::from([("features".to_string(), ConfigValue::Int(self.features as i64))])
    }
}

fn build_scale(record: &ModuleRecord, _: &ModelResolver<B>) -> Result<Box<dyn Module<B>>, Error> {
    Ok(Box::new(Scale::new(config_usize(record, "features")?)?))
}

fn custom_model() -> Result<Sequential<B>, Error> {
    let scale = Scale::new(2)?;
    scale.weight.set_data(Array::from_vec(vec![0.5, -3.25], &[2])?)?;
    Sequential::new(vec![Box::new(Linear::new(2, 2, true)?), Box::new(scale)])
}

#[test]
fn test_unknown_model_class() -> Result<(), Error> {
    let dir = tempdir()?;
    let path = dir.path().join("custom.json");
    save_model(&custom_model()?, &path)?;

    match load_model(&path, &ModelResolver::<B>::new()) {
        Err(err) => assert_eq!(err.to_string(), "Unknown model class: Scale"),
        Ok(_) => panic!("Scale should not resolve without a registry"),
    }
    Ok(())
}

#[test]
fn test_custom_and_application_registries() -> Result<(), Error> {
    let dir = tempdir()?;
    let path = dir.path().join("custom.json");
    let model = custom_model()?;
    save_model(&model, &path)?;

    let mut registry = ModelRegistry::new();
    registry.register("Scale", build_scale);

    let from_custom = load_model(&path, &ModelResolver::new().with_custom(registry))?;
    assert_same_state(&model, from_custom.as_ref())?;

    let mut application = ModelRegistry::new();
    application.register("Scale", build_scale);
    let from_application = load_model(&path, &ModelResolver::new().with_application(application))?;
    assert_same_state(&model, from_application.as_ref())
}

#[test]
fn test_unsupported_format_version() -> Result<(), Error> {
    let dir = tempdir()?;
    let path = dir.path().join("model.json");
    save_model(&Linear::<B>::new(1, 1, false)?, &path)?;

    let mut document: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)
        .map_err(|e| Error::DeserializationError(e.to_string()))?;
    document["format_version"] = json!(FORMAT_VERSION + 1);
    std::fs::write(&path, document.to_string())?;

    assert!(matches!(
        load_model(&path, &ModelResolver::<B>::new()),
        Err(Error::UnsupportedFormat { .. })
    ));
    Ok(())
}

fn diverged_linear() -> Result<Linear<B>, Error> {
    let layer = Linear::<B>::new(2, 2, true)?;
    layer
        .weight()
        .set_data(Array::from_vec(vec![f32::INFINITY, f32::NAN, -0.0, f32::NEG_INFINITY], &[2, 2])?)?;
    Ok(layer)
}

#[test]
fn test_checkpoint_keeps_non_finite_values() -> Result<(), Error> {
    let dir = tempdir()?;
    let model = diverged_linear()?;
    let mut sgd = Sgd::with_momentum(model.parameters(), 0.1, 0.9)?;
    model.weight().set_grad(Some(Array::ones(&[2, 2])))?;
    sgd.step()?;

    for loss in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let path = dir.path().join("diverged.json");
        let meta = CheckpointMeta {
            epoch: Some(3),
            loss: Some(loss),
            additional_data: BTreeMap::new(),
        };
        save_checkpoint(&path, &model, Some(&sgd as &dyn Optimizer<B>), &meta)?;
        assert!(!std::fs::read_to_string(&path)?.contains("null"));

        let mut restored = Linear::<B>::new(2, 2, true)?;
        let mut restored_sgd = Sgd::new(restored.parameters(), 1.0)?;
        let loaded = load_checkpoint(
            &path,
            &mut restored,
            Some(&mut restored_sgd as &mut dyn Optimizer<B>),
        )?;
        assert_eq!(loaded.epoch, Some(3));
        assert_eq!(loaded.loss.map(f64::to_bits), Some(loss.to_bits()));
        assert_same_state(&model, &restored)?;
        assert_eq!(restored_sgd.learning_rate(), 0.1);
        assert_eq!(restored_sgd.state_dict()?, sgd.state_dict()?);
    }
    Ok(())
}

#[test]
fn test_model_record_keeps_non_finite_parameters() -> Result<(), Error> {
    let dir = tempdir()?;
    let path = dir.path().join("diverged_model.json");
    let model = diverged_linear()?;
    save_model(&model, &path)?;

    let restored = load_model(&path, &ModelResolver::<B>::new())?;
    assert_same_state(&model, restored.as_ref())
}
