//! Differentiable operations and their public entry points.
//!
//! Every operation is a [`Function`] implementor living in one of the
//! submodules; the free functions here are thin wrappers around
//! `Function::apply` so call sites read like ordinary math.

use crate::backend::Backend;
use crate::error::Error;
use crate::function::Function;
use crate::tensor::Tensor;

pub mod arithmetic;
pub mod compare;
pub mod matrix;
pub mod reduce;

pub use arithmetic::{Add, AddScalar, Div, Exp, Mul, MulScalar, Neg, Relu, Sqrt, Sub};
pub use compare::{Equal, Greater, GreaterEqual, Less, LessEqual, NotEqual};
pub use matrix::{Matmul, Reshape, Transpose};
pub use reduce::{Mean, Sum};

// --- Element-wise ---

/// Element-wise addition with numpy-style broadcasting.
pub fn add<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Add::apply(&[a, b], ())
}

/// Element-wise subtraction: a - b
pub fn sub<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Sub::apply(&[a, b], ())
}

/// Element-wise multiplication: a * b
pub fn mul<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Mul::apply(&[a, b], ())
}

/// Element-wise division: a / b
pub fn div<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Div::apply(&[a, b], ())
}

pub fn neg<B: Backend>(x: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Neg::apply(&[x], ())
}

pub fn mul_scalar<B: Backend>(x: &Tensor<B>, scalar: f32) -> Result<Tensor<B>, Error> {
    MulScalar::apply(&[x], scalar)
}

pub fn add_scalar<B: Backend>(x: &Tensor<B>, scalar: f32) -> Result<Tensor<B>, Error> {
    AddScalar::apply(&[x], scalar)
}

pub fn exp<B: Backend>(x: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Exp::apply(&[x], ())
}

pub fn sqrt<B: Backend>(x: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Sqrt::apply(&[x], ())
}

pub fn relu<B: Backend>(x: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Relu::apply(&[x], ())
}

// --- Layout ---

/// Matrix multiplication of two 2-D tensors.
pub fn matmul<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Matmul::apply(&[a, b], ())
}

/// Permutes axes. `None` reverses all of them; `Some(axes)` must be a
/// permutation of `0..ndim`, checked before anything is computed.
pub fn transpose<B: Backend>(x: &Tensor<B>, axes: Option<&[usize]>) -> Result<Tensor<B>, Error> {
    Transpose::apply(&[x], axes.map(|a| a.to_vec()))
}

/// Same data in a new shape with the same number of elements.
pub fn reshape<B: Backend>(x: &Tensor<B>, shape: &[usize]) -> Result<Tensor<B>, Error> {
    Reshape::apply(&[x], shape.to_vec())
}

// --- Reductions ---

/// Sum along `axis`, or over everything (0-d result) when `axis` is `None`.
pub fn sum<B: Backend>(x: &Tensor<B>, axis: Option<usize>) -> Result<Tensor<B>, Error> {
    Sum::apply(&[x], axis)
}

/// Mean along `axis`, or over everything (0-d result) when `axis` is `None`.
pub fn mean<B: Backend>(x: &Tensor<B>, axis: Option<usize>) -> Result<Tensor<B>, Error> {
    Mean::apply(&[x], axis)
}

// --- Comparisons (never differentiable) ---

pub fn greater<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Greater::apply(&[a, b], ())
}

pub fn greater_equal<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    GreaterEqual::apply(&[a, b], ())
}

pub fn less<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Less::apply(&[a, b], ())
}

pub fn less_equal<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    LessEqual::apply(&[a, b], ())
}

pub fn equal<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    Equal::apply(&[a, b], ())
}

pub fn not_equal<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    NotEqual::apply(&[a, b], ())
}

/// Reverses broadcasting by summing `grad` down to `target_shape`.
///
/// Leading axes that broadcasting added are summed away, then every axis
/// where the target has extent 1 is summed with the axis kept.
pub(crate) fn unbroadcast<B: Backend>(
    grad: B::Storage,
    target_shape: &[usize],
) -> Result<B::Storage, Error> {
    if B::shape(&grad) == target_shape {
        return Ok(grad);
    }

    let mut current = grad;
    while B::shape(&current).len() > target_shape.len() {
        current = B::sum_along_axis(&current, 0)?;
    }

    for axis in (0..target_shape.len()).rev() {
        if target_shape[axis] == 1 && B::shape(&current)[axis] != 1 {
            current = B::sum_along_axis(&current, axis)?;
            let mut kept = B::shape(&current).to_vec();
            kept.insert(axis, 1);
            B::set_shape(&mut current, &kept)?;
        }
    }

    if B::shape(&current) != target_shape {
        return Err(Error::IncompatibleShapes {
            op: "unbroadcast".to_string(),
            shape_a: B::shape(&current).to_vec(),
            shape_b: target_shape.to_vec(),
        });
    }
    Ok(current)
}

/// Expands a reduced gradient back over the input shape by re-inserting
/// `axis` with extent 1 and broadcasting.
pub(crate) fn expand_reduced<B: Backend>(
    grad: &B::Storage,
    axis: Option<usize>,
    input_shape: &[usize],
) -> Result<B::Storage, Error> {
    match axis {
        None => B::broadcast_to(grad, input_shape),
        Some(axis) => {
            let mut kept = B::shape(grad).to_vec();
            if axis > kept.len() {
                return Err(Error::InvalidAxis {
                    axis,
                    ndim: input_shape.len(),
                });
            }
            kept.insert(axis, 1);
            let mut reshaped = grad.clone();
            B::set_shape(&mut reshaped, &kept)?;
            B::broadcast_to(&reshaped, input_shape)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;

    #[test]
    fn test_unbroadcast_leading_and_unit_axes() -> Result<(), Error> {
        let grad = CpuBackend::ones(&[4, 2, 3])?;
        let reduced = unbroadcast::<CpuBackend>(grad.clone(), &[2, 1])?;
        assert_eq!(CpuBackend::shape(&reduced), &[2, 1]);
        assert_eq!(reduced.to_vec(), vec![12.0, 12.0]);

        let reduced = unbroadcast::<CpuBackend>(grad, &[3])?;
        assert_eq!(reduced.to_vec(), vec![8.0, 8.0, 8.0]);
        Ok(())
    }

    #[test]
    fn test_unbroadcast_to_scalar() -> Result<(), Error> {
        let grad = CpuBackend::ones(&[2, 2])?;
        let reduced = unbroadcast::<CpuBackend>(grad, &[])?;
        assert_eq!(CpuBackend::shape(&reduced), &[] as &[usize]);
        assert_eq!(reduced.to_vec(), vec![4.0]);
        Ok(())
    }

    #[test]
    fn test_expand_reduced_axis() -> Result<(), Error> {
        let grad = CpuBackend::from_vec(vec![1.0, 2.0], &[2])?;
        let expanded = expand_reduced::<CpuBackend>(&grad, Some(1), &[2, 3])?;
        assert_eq!(expanded.to_vec(), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        Ok(())
    }
}
