//! Saving and restoring models.
//!
//! Three formats are supported:
//!
//! * state-dict archives: a safetensors file of named `f32` arrays
//!   ([`save_state_dict`], [`load_state_dict_file`]);
//! * model records: JSON holding the module tree, each module's
//!   configuration and the state dict, rebuilt through a [`ModelResolver`]
//!   ([`save_model`], [`load_model`]);
//! * checkpoints: JSON holding the model state, optional optimizer state and
//!   training progress ([`save_checkpoint`], [`load_checkpoint`]).
//!
//! JSON documents carry a `format_version`; any other version is rejected
//! with [`Error::UnsupportedFormat`]. Arrays inside them are written as
//! their shape and `f32` bit patterns, so non-finite values round-trip.

pub(crate) mod json_float;
pub mod record;
pub mod registry;

pub use record::{load_model, save_model, ModelRecord, ModuleRecord};
pub use registry::{config_bool, config_f32, config_usize, ModelRegistry, ModelResolver, ModuleFactory};

use crate::array::Array;
use crate::backend::Backend;
use crate::error::Error;
use crate::nn::{LoadStrictness, Module, StateDict};
use crate::optim::{Optimizer, OptimizerState};
use log::{debug, warn};
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Version written into every JSON record and checkpoint.
pub const FORMAT_VERSION: u32 = 1;

/// safetensors metadata key holding the entry order as a JSON list.
const ORDER_KEY: &str = "order";

fn ser_err(e: impl std::fmt::Display) -> Error {
    Error::SerializationError(e.to_string())
}

fn de_err(e: impl std::fmt::Display) -> Error {
    Error::DeserializationError(e.to_string())
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value).map_err(ser_err)?;
    writer.flush()?;
    Ok(())
}

/// Reads a versioned JSON document, checking `format_version` before the
/// rest of the structure.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let value: serde_json::Value =
        serde_json::from_reader(BufReader::new(File::open(path)?)).map_err(de_err)?;
    let found = value
        .get("format_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| de_err(format!("{} has no format_version", path.display())))?;
    if found != u64::from(FORMAT_VERSION) {
        return Err(Error::UnsupportedFormat {
            found: u32::try_from(found).unwrap_or(u32::MAX),
            expected: FORMAT_VERSION,
        });
    }
    serde_json::from_value(value).map_err(de_err)
}

/// Writes `state` as a safetensors file of little-endian `f32` arrays.
/// Values are stored bit for bit and the entry order is kept.
pub fn save_state_dict<P: AsRef<Path>>(state: &StateDict, path: P) -> Result<(), Error> {
    let encoded: Vec<(&str, Vec<usize>, Vec<u8>)> = state
        .iter()
        .map(|(name, array)| {
            let bytes = array.to_vec().iter().flat_map(|v| v.to_le_bytes()).collect();
            (name, array.shape().to_vec(), bytes)
        })
        .collect();
    let views = encoded
        .iter()
        .map(|(name, shape, bytes)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes).map(|view| (*name, view))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(ser_err)?;

    let order: Vec<&str> = state.keys().collect();
    let metadata = Some(HashMap::from([(
        ORDER_KEY.to_string(),
        serde_json::to_string(&order).map_err(ser_err)?,
    )]));
    safetensors::serialize_to_file(views, &metadata, path.as_ref()).map_err(ser_err)?;
    debug!(
        "save_state_dict: wrote {} entries to {}",
        state.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Reads a state dict written by [`save_state_dict`]. Files without an
/// order entry are read in name order.
pub fn load_state_dict_file<P: AsRef<Path>>(path: P) -> Result<StateDict, Error> {
    let bytes = std::fs::read(path.as_ref())?;
    let (_, metadata) = SafeTensors::read_metadata(&bytes).map_err(de_err)?;
    let tensors = SafeTensors::deserialize(&bytes).map_err(de_err)?;

    let names: Vec<String> = match metadata.metadata().as_ref().and_then(|m| m.get(ORDER_KEY)) {
        Some(order) => serde_json::from_str(order).map_err(de_err)?,
        None => {
            let mut names: Vec<String> = tensors.names().into_iter().cloned().collect();
            names.sort();
            names
        }
    };

    let mut state = StateDict::new();
    for name in names {
        let view = tensors.tensor(&name).map_err(de_err)?;
        if view.dtype() != Dtype::F32 {
            return Err(de_err(format!(
                "entry '{}' has dtype {:?}, expected F32",
                name,
                view.dtype()
            )));
        }
        let data: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        state.insert(name, Array::from_vec(data, view.shape())?);
    }
    Ok(state)
}

/// Training progress stored alongside a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epoch: Option<usize>,
    /// Stored as `"NaN"`, `"inf"` or `"-inf"` when not finite.
    #[serde(default, with = "json_float::option")]
    pub loss: Option<f64>,
    pub additional_data: BTreeMap<String, serde_json::Value>,
}

/// On-disk layout of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub model_state_dict: StateDict,
    pub optimizer_state_dict: Option<OptimizerState>,
    #[serde(flatten)]
    pub meta: CheckpointMeta,
}

/// Writes the model state, the optimizer state (if given) and `meta` to `path`.
pub fn save_checkpoint<B, M, P>(
    path: P,
    model: &M,
    optimizer: Option<&dyn Optimizer<B>>,
    meta: &CheckpointMeta,
) -> Result<(), Error>
where
    B: Backend,
    M: Module<B> + ?Sized,
    P: AsRef<Path>,
{
    let checkpoint = Checkpoint {
        format_version: FORMAT_VERSION,
        model_state_dict: model.state_dict()?,
        optimizer_state_dict: optimizer.map(|opt| opt.state_dict()).transpose()?,
        meta: meta.clone(),
    };
    write_json(path.as_ref(), &checkpoint)?;
    debug!(
        "save_checkpoint: epoch {:?} written to {}",
        meta.epoch,
        path.as_ref().display()
    );
    Ok(())
}

/// Restores `model` (strictly) and, when both are present, `optimizer`
/// from a checkpoint, returning the stored training progress.
pub fn load_checkpoint<B, M, P>(
    path: P,
    model: &mut M,
    optimizer: Option<&mut dyn Optimizer<B>>,
) -> Result<CheckpointMeta, Error>
where
    B: Backend,
    M: Module<B> + ?Sized,
    P: AsRef<Path>,
{
    let checkpoint: Checkpoint = read_json(path.as_ref())?;
    model.load_state_dict(&checkpoint.model_state_dict, LoadStrictness::Strict)?;
    match (optimizer, &checkpoint.optimizer_state_dict) {
        (Some(optimizer), Some(state)) => optimizer.load_state_dict(state)?,
        (Some(_), None) => warn!("load_checkpoint: checkpoint has no optimizer state"),
        _ => {}
    }
    debug!(
        "load_checkpoint: restored epoch {:?} from {}",
        checkpoint.meta.epoch,
        path.as_ref().display()
    );
    Ok(checkpoint.meta)
}
