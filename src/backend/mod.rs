//! Backend trait definition and module structure.
//!
//! A backend is the opaque array-arithmetic provider the autograd engine is
//! written against. Every method allocates a fresh storage unless its name
//! says otherwise (`set_data`, `set_shape`, the optimizer `*_step` methods).

use crate::error::Error;
use std::fmt::Debug;

pub mod cpu;

pub type CpuTensor = crate::tensor::Tensor<cpu::CpuBackend>;

pub trait Backend: Sized + Debug + Clone + 'static {
    type Storage: Clone + Debug;

    // --- Factory Methods (Creating Storage) ---

    /// Creates new storage filled with zeros.
    fn zeros(shape: &[usize]) -> Result<Self::Storage, Error>;
    /// Creates new storage filled with ones.
    fn ones(shape: &[usize]) -> Result<Self::Storage, Error>;
    /// Creates new storage from a flat vector and a shape.
    fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self::Storage, Error>;
    /// Creates new storage with Kaiming uniform initialization.
    fn kaiming_uniform(fan_in: usize, shape: &[usize]) -> Result<Self::Storage, Error>;

    // --- Random Generation Methods ---
    /// Creates new storage filled with values from a uniform distribution U(low, high).
    fn random_uniform(shape: &[usize], low: f32, high: f32) -> Result<Self::Storage, Error>;

    /// Creates new storage filled with independent Bernoulli(p) draws (1.0 or 0.0).
    fn bernoulli(shape: &[usize], p: f32) -> Result<Self::Storage, Error>;

    // --- Shape/Data Access ---

    /// Returns the shape of the storage.
    fn shape(storage: &Self::Storage) -> &[usize];
    /// Returns the total number of elements in the storage.
    fn size(storage: &Self::Storage) -> usize;
    /// Copies the storage into a flat host `Vec<f32>` in row-major order.
    fn copy_to_host(storage: &Self::Storage) -> Result<Vec<f32>, Error>;
    /// Replaces the contents of `storage` with `data`. Shapes must match.
    fn set_data(storage: &mut Self::Storage, data: Self::Storage) -> Result<(), Error>;
    /// Sets the shape of the storage without changing its data.
    /// The new shape must have the same total number of elements.
    fn set_shape(storage: &mut Self::Storage, shape: &[usize]) -> Result<(), Error>;

    // --- Element-wise Operations (numpy broadcasting) ---

    fn add(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    fn sub(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    fn mul(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    fn div(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    fn neg(x: &Self::Storage) -> Result<Self::Storage, Error>;
    fn mul_scalar(x: &Self::Storage, scalar: f32) -> Result<Self::Storage, Error>;
    fn add_scalar(x: &Self::Storage, scalar: f32) -> Result<Self::Storage, Error>;
    fn exp(x: &Self::Storage) -> Result<Self::Storage, Error>;
    fn sqrt(x: &Self::Storage) -> Result<Self::Storage, Error>;
    fn relu(x: &Self::Storage) -> Result<Self::Storage, Error>;

    /// Multiplies `x` by `mask` in place. `mask` must broadcast to `x`'s shape.
    fn mul_assign(x: &mut Self::Storage, mask: &Self::Storage) -> Result<(), Error>;

    // --- Comparisons (1.0 for true, 0.0 for false, broadcasting) ---

    fn equal(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    fn not_equal(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    fn greater(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    fn greater_equal(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    fn less(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    fn less_equal(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;

    // --- Layout Operations ---

    /// Matrix multiplication of two 2-D storages.
    fn matmul(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    /// Reverses the order of all axes.
    fn transpose(x: &Self::Storage) -> Result<Self::Storage, Error>;
    /// Reorders axes; `axes` must be a valid permutation of `0..ndim`.
    fn permute(x: &Self::Storage, axes: &[usize]) -> Result<Self::Storage, Error>;
    fn broadcast_to(x: &Self::Storage, shape: &[usize]) -> Result<Self::Storage, Error>;

    // --- Reduction Operations ---

    fn sum_along_axis(x: &Self::Storage, axis: usize) -> Result<Self::Storage, Error>;
    fn sum_all(x: &Self::Storage) -> Result<f32, Error>;
    /// Mean along `axis`, or over all elements (0-d result) when `axis` is `None`.
    fn mean(x: &Self::Storage, axis: Option<usize>) -> Result<Self::Storage, Error>;

    // --- Optimizer Steps (in place) ---

    /// `param -= lr * grad`
    fn sgd_step(param: &mut Self::Storage, grad: &Self::Storage, lr: f32) -> Result<(), Error>;

    /// `velocity = momentum * velocity + grad; param -= lr * velocity`
    fn momentum_sgd_step(
        param: &mut Self::Storage,
        grad: &Self::Storage,
        velocity: &mut Self::Storage,
        lr: f32,
        momentum: f32,
    ) -> Result<(), Error>;

    /// Bias-corrected Adam update at timestep `t` (1-based).
    #[allow(clippy::too_many_arguments)]
    fn adam_step(
        param: &mut Self::Storage,
        grad: &Self::Storage,
        m: &mut Self::Storage,
        v: &mut Self::Storage,
        lr: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        t: usize,
    ) -> Result<(), Error>;
}
