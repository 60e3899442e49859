//! A small reverse-mode automatic differentiation library.
//!
//! Operations on [`Tensor`]s record a dynamic graph of [`Function`]
//! invocations. Calling [`Tensor::backward`] walks that graph in reverse
//! topological order, summing every gradient path into the leaves that
//! require grad. On top of the engine the crate provides:
//! - a CPU backend over `ndarray`
//! - layers with a parameter/buffer tree and state dicts ([`nn`])
//! - samplers and a minimal batching loader ([`sampler`], [`data`])
//! - SGD and Adam optimizers ([`optim`])
//! - model, state-dict and checkpoint persistence (`serialization`)
//!
//! # Features
//! - `serialization` (default) - JSON records, checkpoints and safetensors archives
//! - `csv` - CSV dataset loading
//!
//! # Example
//! ```rust
//! use rust_autograd_lib::{ops, CpuBackend, Tensor};
//!
//! fn main() -> Result<(), rust_autograd_lib::Error> {
//!     let x = Tensor::<CpuBackend>::from_vec(vec![1.0, 2.0, 3.0], &[3], true)?;
//!
//!     // x is used twice: y = x * x + x
//!     let y = ops::add(&ops::mul(&x, &x)?, &x)?;
//!     let loss = ops::sum(&y, None)?;
//!     loss.backward()?;
//!
//!     // dy/dx = 2x + 1
//!     assert_eq!(x.grad_vec()?, Some(vec![3.0, 5.0, 7.0]));
//!     Ok(())
//! }
//! ```

pub mod array;
pub mod backend;
pub mod context;
pub mod data;
pub mod engine;
pub mod error;
pub mod function;
pub mod graph;
pub mod init;
pub mod nn;
pub mod ops;
pub mod optim;
pub mod sampler;
#[cfg(feature = "serialization")]
pub mod serialization;
pub mod tensor;
mod tensor_debug_impl;
pub mod test_utils;
pub mod util;

pub use array::Array;
pub use backend::cpu::CpuBackend;
pub use backend::{Backend, CpuTensor};
pub use context::{Context, SavedArgument};
pub use data::{Dataset, TensorDataset};
pub use engine::{BackwardOptions, GradientMap};
pub use error::Error;
pub use function::Function;
pub use graph::Node;
pub use nn::{LoadStrictness, Module, StateDict};
pub use optim::{Adam, Optimizer, OptimizerState, Sgd};
pub use sampler::{DataLoader, RandomSampler, Sampler, SequentialSampler};
pub use tensor::{Tensor, TensorId};
