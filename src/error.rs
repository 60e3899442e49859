use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Shape error: {0}")]
    ShapeError(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Incompatible shapes for operation {op}: {shape_a:?} and {shape_b:?}")]
    IncompatibleShapes {
        op: String,
        shape_a: Vec<usize>,
        shape_b: Vec<usize>,
    },

    #[error("Invalid axis {axis} for tensor with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("Invalid permutation {axes:?} for tensor with {ndim} dimensions: {reason}")]
    InvalidPermutation {
        axes: Vec<usize>,
        ndim: usize,
        reason: String,
    },

    #[error("Dropout probability has to be between 0 and 1, but got {0}")]
    InvalidProbability(f32),

    #[error("Sampler has no data source")]
    MissingDataSource,

    #[error("Context for {function} was already populated with '{name}'")]
    ContextReused { function: &'static str, name: String },

    #[error("Context for {function} has no saved value '{name}'")]
    MissingSavedValue { function: &'static str, name: String },

    #[error("Graph node {function} was already released by a previous backward pass; use retain_graph to traverse it twice")]
    GraphReleased { function: &'static str },

    #[error("Operation requires tensor to require grad")]
    RequiresGradError,

    #[error("Operation cannot be performed on empty tensor")]
    EmptyTensor,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Error during tensor initialization")]
    InitializationError,

    #[error("Internal logic error: {0}")]
    InternalLogicError(String),

    #[error("Name '{0}' is already registered in this module")]
    DuplicateName(String),

    #[error("State dict shape mismatch for '{name}': expected {expected:?}, got {actual:?}")]
    StateDictShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Error(s) loading state dict: unexpected keys {unexpected:?}, missing keys {missing:?}")]
    StateDictKeys {
        unexpected: Vec<String>,
        missing: Vec<String>,
    },

    #[error("Unknown model class: {0}")]
    UnknownModelClass(String),

    #[error("Invalid model configuration for {model_type}: {reason}")]
    InvalidConfig { model_type: String, reason: String },

    #[error("Unsupported record format version {found}, expected {expected}")]
    UnsupportedFormat { found: u32, expected: u32 },

    #[error("Gradient check error: analytical={analytical:?}, numerical={numerical:?}, max_rel_error={max_rel_error}, max_abs_error={max_abs_error}, at_index={at_index}")]
    GradientCheckError {
        analytical: Vec<f32>,
        numerical: Vec<f32>,
        max_rel_error: f32,
        max_abs_error: f32,
        at_index: usize,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[cfg(feature = "csv")]
    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[cfg(feature = "serialization")]
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[cfg(feature = "serialization")]
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
