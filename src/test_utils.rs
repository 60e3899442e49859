//! Helpers for testing ops: a finite-difference gradient checker and
//! storage assertions.

use crate::{Backend, Error, Tensor};
use log::{debug, trace};

/// Compares the gradient that backward computes for `inputs[wrt]` against
/// central finite differences of `func`.
///
/// `func` must return a single-element tensor. Every input is treated as a
/// constant except `inputs[wrt]`, which must require grad.
pub fn check_gradient<B, F>(
    func: F,
    inputs: &[Tensor<B>],
    wrt: usize,
    epsilon: f32,
    tolerance: f32,
) -> Result<(), Error>
where
    B: Backend,
    F: Fn(&[Tensor<B>]) -> Result<Tensor<B>, Error>,
{
    let target = inputs.get(wrt).ok_or_else(|| {
        Error::InvalidOperation(format!(
            "check_gradient: input index {} out of bounds for {} inputs",
            wrt,
            inputs.len()
        ))
    })?;
    if !target.requires_grad() {
        return Err(Error::RequiresGradError);
    }

    let analytical = analytical_gradient(&func, inputs, wrt)?;
    let numerical = numerical_gradient(&func, inputs, wrt, epsilon)?;
    debug!(
        "check_gradient: input {} analytical {:?} numerical {:?}",
        wrt, analytical, numerical
    );
    compare_gradients(&analytical, &numerical, tolerance)
}

fn scalar_output<B: Backend>(loss: &Tensor<B>) -> Result<f32, Error> {
    if loss.size() != 1 {
        return Err(Error::InvalidOperation(format!(
            "check_gradient needs a single-element output, got shape {:?}",
            loss.shape()
        )));
    }
    loss.item()
}

fn analytical_gradient<B, F>(func: &F, inputs: &[Tensor<B>], wrt: usize) -> Result<Vec<f32>, Error>
where
    B: Backend,
    F: Fn(&[Tensor<B>]) -> Result<Tensor<B>, Error>,
{
    for input in inputs.iter().filter(|t| t.requires_grad()) {
        input.zero_grad();
    }
    let loss = func(inputs)?;
    scalar_output(&loss)?;
    loss.backward()?;

    let target = &inputs[wrt];
    match target.grad_vec()? {
        Some(grad) => Ok(grad),
        // no path from the output back to the input
        None => Ok(vec![0.0; target.size()]),
    }
}

fn numerical_gradient<B, F>(
    func: &F,
    inputs: &[Tensor<B>],
    wrt: usize,
    epsilon: f32,
) -> Result<Vec<f32>, Error>
where
    B: Backend,
    F: Fn(&[Tensor<B>]) -> Result<Tensor<B>, Error>,
{
    let target = &inputs[wrt];
    let shape = target.shape();
    let original = target.to_vec()?;
    let mut perturbed_inputs: Vec<Tensor<B>> = inputs.iter().map(Tensor::detach).collect();

    let mut evaluate = |values: Vec<f32>| -> Result<f32, Error> {
        perturbed_inputs[wrt] = Tensor::from_vec(values, &shape, false)?;
        scalar_output(&func(&perturbed_inputs)?)
    };

    let mut numerical = Vec::with_capacity(original.len());
    for i in 0..original.len() {
        let mut plus = original.clone();
        plus[i] += epsilon;
        let mut minus = original.clone();
        minus[i] -= epsilon;
        let grad = (evaluate(plus)? - evaluate(minus)?) / (2.0 * epsilon);
        trace!("check_gradient: d/dx[{}] ~ {}", i, grad);
        numerical.push(grad);
    }
    Ok(numerical)
}

fn compare_gradients(analytical: &[f32], numerical: &[f32], tolerance: f32) -> Result<(), Error> {
    if analytical.len() != numerical.len() {
        return Err(Error::InternalLogicError(format!(
            "Gradient size mismatch: analytical size={}, numerical size={}",
            analytical.len(),
            numerical.len()
        )));
    }

    let mut max_rel_err = 0.0;
    let mut max_abs_err = 0.0;
    let mut max_err_idx = 0;
    for (i, (a, n)) in analytical.iter().zip(numerical).enumerate() {
        let abs_err = (a - n).abs();
        let rel_err = if a.abs() > 1e-8 && n.abs() > 1e-8 {
            abs_err / a.abs().max(n.abs())
        } else {
            abs_err
        };
        if rel_err > max_rel_err {
            max_rel_err = rel_err;
            max_abs_err = abs_err;
            max_err_idx = i;
        }
    }

    if max_rel_err <= tolerance {
        Ok(())
    } else {
        Err(Error::GradientCheckError {
            analytical: analytical.to_vec(),
            numerical: numerical.to_vec(),
            max_rel_error: max_rel_err,
            max_abs_error: max_abs_err,
            at_index: max_err_idx,
        })
    }
}

fn host_pair<B: Backend>(a: &B::Storage, b: &B::Storage) -> Result<(Vec<f32>, Vec<f32>), Error> {
    assert_eq!(B::shape(a), B::shape(b), "Storage shapes don't match");
    Ok((B::copy_to_host(a)?, B::copy_to_host(b)?))
}

/// Panics unless both storages have the same shape and bit-identical values.
/// Errors from reading either storage are returned.
pub fn assert_storage_eq<B: Backend>(a: &B::Storage, b: &B::Storage) -> Result<(), Error> {
    let (a_data, b_data) = host_pair::<B>(a, b)?;
    for (i, (a_val, b_val)) in a_data.iter().zip(&b_data).enumerate() {
        assert_eq!(
            a_val.to_bits(),
            b_val.to_bits(),
            "Values at index {i} don't match: a={a_val}, b={b_val}"
        );
    }
    Ok(())
}

/// Panics unless both storages have the same shape and values within `tol`.
pub fn assert_storage_close<B: Backend>(
    a: &B::Storage,
    b: &B::Storage,
    tol: f32,
) -> Result<(), Error> {
    let (a_data, b_data) = host_pair::<B>(a, b)?;
    for (i, (a_val, b_val)) in a_data.iter().zip(&b_data).enumerate() {
        assert!(
            (a_val - b_val).abs() < tol,
            "Values at index {i} aren't close enough: a={a_val}, b={b_val}, diff={}, tol={tol}",
            (a_val - b_val).abs()
        );
    }
    Ok(())
}
