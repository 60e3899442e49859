//! CPU backend implementation using `ndarray`.

use crate::array::Array; // The storage type for this backend
use crate::backend::Backend;
use crate::error::Error;
use crate::init;
use crate::util;
use ndarray::{ArrayD, Axis, IxDyn, Zip};
use rand::Rng;
use rand_distr::{Bernoulli, Uniform};

/// Marker struct for the CPU backend.
/// Implements the `Backend` trait using `ndarray` operations via the `Array` wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuBackend;

/// Applies `f` element-wise over the broadcast of `a` and `b`.
fn zip_broadcast<F>(op: &str, a: &Array, b: &Array, f: F) -> Result<Array, Error>
where
    F: Fn(f32, f32) -> f32,
{
    let a_data = a.get_data();
    let b_data = b.get_data();
    if a_data.shape() == b_data.shape() {
        return Ok(Array::new(
            Zip::from(a_data)
                .and(b_data)
                .map_collect(|&x, &y| f(x, y)),
        ));
    }
    let broadcast_shape = util::broadcast_shapes(a_data.shape(), b_data.shape())?;
    let incompatible = || Error::IncompatibleShapes {
        op: op.to_string(),
        shape_a: a_data.shape().to_vec(),
        shape_b: b_data.shape().to_vec(),
    };
    let a_broadcast = a_data
        .broadcast(IxDyn(&broadcast_shape))
        .ok_or_else(incompatible)?;
    let b_broadcast = b_data
        .broadcast(IxDyn(&broadcast_shape))
        .ok_or_else(incompatible)?;
    Ok(Array::new(
        Zip::from(&a_broadcast)
            .and(&b_broadcast)
            .map_collect(|&x, &y| f(x, y)),
    ))
}

fn indicator(condition: bool) -> f32 {
    if condition {
        1.0
    } else {
        0.0
    }
}

fn check_same_shape(expected: &Array, actual: &Array) -> Result<(), Error> {
    if expected.shape() != actual.shape() {
        return Err(Error::ShapeMismatch {
            expected: expected.shape().to_vec(),
            actual: actual.shape().to_vec(),
        });
    }
    Ok(())
}

impl Backend for CpuBackend {
    type Storage = Array;

    fn zeros(shape: &[usize]) -> Result<Self::Storage, Error> {
        Ok(Array::zeros(shape))
    }

    fn ones(shape: &[usize]) -> Result<Self::Storage, Error> {
        Ok(Array::ones(shape))
    }

    fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self::Storage, Error> {
        Array::from_vec(data, shape)
    }

    fn kaiming_uniform(fan_in: usize, shape: &[usize]) -> Result<Self::Storage, Error> {
        init::kaiming_uniform(fan_in, shape)
    }

    fn random_uniform(shape: &[usize], low: f32, high: f32) -> Result<Self::Storage, Error> {
        let size = shape.iter().product::<usize>();
        if size == 0 {
            return Ok(Array::zeros(shape));
        }
        let dist = Uniform::new(low, high).map_err(|_| Error::InitializationError)?;
        let mut rng = rand::rng();
        let data: Vec<f32> = (0..size).map(|_| rng.sample(&dist)).collect();
        Array::from_vec(data, shape)
    }

    fn bernoulli(shape: &[usize], p: f32) -> Result<Self::Storage, Error> {
        let size = shape.iter().product::<usize>();
        if size == 0 {
            return Ok(Array::zeros(shape));
        }

        let dist = Bernoulli::new(p as f64).map_err(|_| Error::InvalidProbability(p))?;

        let mut rng = rand::rng();
        let mut data = Vec::with_capacity(size);
        for _ in 0..size {
            let sample: bool = rng.sample(dist);
            data.push(indicator(sample));
        }

        Array::from_vec(data, shape)
    }

    // --- Shape/Data Access ---
    fn shape(storage: &Self::Storage) -> &[usize] {
        storage.shape()
    }

    fn size(storage: &Self::Storage) -> usize {
        storage.size()
    }

    fn copy_to_host(storage: &Self::Storage) -> Result<Vec<f32>, Error> {
        Ok(storage.to_vec())
    }

    fn set_data(storage: &mut Self::Storage, data: Self::Storage) -> Result<(), Error> {
        check_same_shape(storage, &data)?;
        *storage = data;
        Ok(())
    }

    fn set_shape(storage: &mut Self::Storage, shape: &[usize]) -> Result<(), Error> {
        storage.reshape(shape)
    }

    // --- Element-wise Operations ---
    fn add(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        zip_broadcast("add", a, b, |x, y| x + y)
    }

    fn sub(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        zip_broadcast("sub", a, b, |x, y| x - y)
    }

    fn mul(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        zip_broadcast("mul", a, b, |x, y| x * y)
    }

    fn div(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        // Division by zero follows IEEE semantics (inf/nan), as ndarray does.
        zip_broadcast("div", a, b, |x, y| x / y)
    }

    fn neg(x: &Self::Storage) -> Result<Self::Storage, Error> {
        Ok(Array::new(x.get_data().mapv(|v| -v)))
    }

    fn mul_scalar(x: &Self::Storage, scalar: f32) -> Result<Self::Storage, Error> {
        Ok(Array::new(x.get_data() * scalar))
    }

    fn add_scalar(x: &Self::Storage, scalar: f32) -> Result<Self::Storage, Error> {
        Ok(Array::new(x.get_data() + scalar))
    }

    fn exp(x: &Self::Storage) -> Result<Self::Storage, Error> {
        Ok(Array::new(x.get_data().mapv(f32::exp)))
    }

    fn sqrt(x: &Self::Storage) -> Result<Self::Storage, Error> {
        Ok(Array::new(x.get_data().mapv(f32::sqrt)))
    }

    fn relu(x: &Self::Storage) -> Result<Self::Storage, Error> {
        Ok(Array::new(x.get_data().mapv(|v| v.max(0.0))))
    }

    fn mul_assign(x: &mut Self::Storage, mask: &Self::Storage) -> Result<(), Error> {
        let target_shape = x.shape().to_vec();
        let mask_view = mask
            .get_data()
            .broadcast(IxDyn(&target_shape))
            .ok_or_else(|| Error::IncompatibleShapes {
                op: "mul_assign".to_string(),
                shape_a: target_shape.clone(),
                shape_b: mask.shape().to_vec(),
            })?;
        x.get_data_mut()
            .zip_mut_with(&mask_view, |value, &m| *value *= m);
        Ok(())
    }

    // --- Comparisons ---
    fn equal(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        zip_broadcast("equal", a, b, |x, y| indicator(x == y))
    }

    fn not_equal(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        zip_broadcast("not_equal", a, b, |x, y| indicator(x != y))
    }

    fn greater(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        zip_broadcast("greater", a, b, |x, y| indicator(x > y))
    }

    fn greater_equal(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        zip_broadcast("greater_equal", a, b, |x, y| indicator(x >= y))
    }

    fn less(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        zip_broadcast("less", a, b, |x, y| indicator(x < y))
    }

    fn less_equal(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        zip_broadcast("less_equal", a, b, |x, y| indicator(x <= y))
    }

    // --- Layout Operations ---
    fn matmul(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        let a_2d = a
            .get_data()
            .view()
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|e| Error::ShapeError(format!("Input 'a' is not 2D: {}", e)))?;
        let b_2d = b
            .get_data()
            .view()
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|e| Error::ShapeError(format!("Input 'b' is not 2D: {}", e)))?;

        // (m, k) x (k, n)
        if a_2d.shape()[1] != b_2d.shape()[0] {
            return Err(Error::IncompatibleShapes {
                op: "matmul".to_string(),
                shape_a: a_2d.shape().to_vec(),
                shape_b: b_2d.shape().to_vec(),
            });
        }
        Ok(Array::new(a_2d.dot(&b_2d).into_dyn()))
    }

    fn transpose(x: &Self::Storage) -> Result<Self::Storage, Error> {
        Ok(x.reversed())
    }

    fn permute(x: &Self::Storage, axes: &[usize]) -> Result<Self::Storage, Error> {
        util::validate_permutation(axes, x.shape().len())?;
        Ok(x.permuted(axes))
    }

    fn broadcast_to(x: &Self::Storage, shape: &[usize]) -> Result<Self::Storage, Error> {
        x.broadcast_to(shape)
    }

    // --- Reduction Operations ---
    fn sum_along_axis(x: &Self::Storage, axis: usize) -> Result<Self::Storage, Error> {
        x.sum_along_axis(axis)
    }

    fn sum_all(x: &Self::Storage) -> Result<f32, Error> {
        Ok(x.get_data().sum())
    }

    fn mean(x: &Self::Storage, axis: Option<usize>) -> Result<Self::Storage, Error> {
        let data = x.get_data();
        match axis {
            Some(ax) => {
                if ax >= data.ndim() {
                    return Err(Error::InvalidAxis {
                        axis: ax,
                        ndim: data.ndim(),
                    });
                }
                data.mean_axis(Axis(ax))
                    .map(Array::new)
                    .ok_or(Error::EmptyTensor)
            }
            None => data
                .mean()
                .map(|mean_val| Array::new(ArrayD::from_elem(IxDyn(&[]), mean_val)))
                .ok_or(Error::EmptyTensor),
        }
    }

    // --- Optimizer Steps ---
    fn sgd_step(param: &mut Self::Storage, grad: &Self::Storage, lr: f32) -> Result<(), Error> {
        check_same_shape(param, grad)?;
        param
            .get_data_mut()
            .zip_mut_with(grad.get_data(), |w, &dw| *w -= lr * dw);
        Ok(())
    }

    fn momentum_sgd_step(
        param: &mut Self::Storage,
        grad: &Self::Storage,
        velocity: &mut Self::Storage,
        lr: f32,
        momentum: f32,
    ) -> Result<(), Error> {
        check_same_shape(param, grad)?;
        check_same_shape(param, velocity)?;
        velocity
            .get_data_mut()
            .zip_mut_with(grad.get_data(), |v, &g| *v = momentum * *v + g);
        param
            .get_data_mut()
            .zip_mut_with(velocity.get_data(), |w, &v| *w -= lr * v);
        Ok(())
    }

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
    ) -> Result<(), Error> {
        check_same_shape(param, grad)?;
        check_same_shape(param, m)?;
        check_same_shape(param, v)?;
        if t == 0 {
            return Err(Error::InternalLogicError(
                "Adam step called with t=0".to_string(),
            ));
        }
        let bias_correction1 = 1.0 - beta1.powi(t as i32);
        let bias_correction2 = 1.0 - beta2.powi(t as i32);

        Zip::from(param.get_data_mut())
            .and(grad.get_data())
            .and(m.get_data_mut())
            .and(v.get_data_mut())
            .for_each(|w, &g, m_i, v_i| {
                *m_i = beta1 * *m_i + (1.0 - beta1) * g;
                *v_i = beta2 * *v_i + (1.0 - beta2) * g * g;
                let m_hat = *m_i / bias_correction1;
                let v_hat = *v_i / bias_correction2;
                *w -= lr * m_hat / (v_hat.sqrt() + epsilon);
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_broadcast_add() -> Result<(), Error> {
        let a = CpuBackend::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])?;
        let b = CpuBackend::from_vec(vec![10.0, 20.0, 30.0], &[3])?;
        let c = CpuBackend::add(&a, &b)?;
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(
            CpuBackend::copy_to_host(&c)?,
            vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]
        );
        Ok(())
    }

    #[test]
    fn test_incompatible_broadcast_is_error() -> Result<(), Error> {
        let a = CpuBackend::zeros(&[2, 3])?;
        let b = CpuBackend::zeros(&[4])?;
        assert!(matches!(
            CpuBackend::mul(&a, &b),
            Err(Error::IncompatibleShapes { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_comparisons() -> Result<(), Error> {
        let a = CpuBackend::from_vec(vec![1.0, 2.0, 3.0], &[3])?;
        let b = CpuBackend::from_vec(vec![2.0], &[1])?;
        assert_eq!(CpuBackend::copy_to_host(&CpuBackend::greater(&a, &b)?)?, vec![0.0, 0.0, 1.0]);
        assert_eq!(CpuBackend::copy_to_host(&CpuBackend::greater_equal(&a, &b)?)?, vec![0.0, 1.0, 1.0]);
        assert_eq!(CpuBackend::copy_to_host(&CpuBackend::less(&a, &b)?)?, vec![1.0, 0.0, 0.0]);
        assert_eq!(CpuBackend::copy_to_host(&CpuBackend::less_equal(&a, &b)?)?, vec![1.0, 1.0, 0.0]);
        assert_eq!(CpuBackend::copy_to_host(&CpuBackend::equal(&a, &b)?)?, vec![0.0, 1.0, 0.0]);
        assert_eq!(CpuBackend::copy_to_host(&CpuBackend::not_equal(&a, &b)?)?, vec![1.0, 0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_matmul_shapes() -> Result<(), Error> {
        let a = CpuBackend::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])?;
        let b = CpuBackend::from_vec(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2])?;
        let c = CpuBackend::matmul(&a, &b)?;
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(CpuBackend::copy_to_host(&c)?, vec![4.0, 5.0, 10.0, 11.0]);
        assert!(CpuBackend::matmul(&a, &a).is_err());
        Ok(())
    }

    #[test]
    fn test_bernoulli_extremes() -> Result<(), Error> {
        let ones = CpuBackend::bernoulli(&[4, 4], 1.0)?;
        assert!(ones.to_vec().iter().all(|&v| v == 1.0));
        let zeros = CpuBackend::bernoulli(&[4, 4], 0.0)?;
        assert!(zeros.to_vec().iter().all(|&v| v == 0.0));
        assert!(matches!(
            CpuBackend::bernoulli(&[2], 1.5),
            Err(Error::InvalidProbability(_))
        ));
        Ok(())
    }

    #[test]
    fn test_adam_step_moves_against_gradient() -> Result<(), Error> {
        let mut param = CpuBackend::from_vec(vec![1.0, -1.0], &[2])?;
        let grad = CpuBackend::from_vec(vec![0.5, -0.5], &[2])?;
        let mut m = CpuBackend::zeros(&[2])?;
        let mut v = CpuBackend::zeros(&[2])?;
        CpuBackend::adam_step(&mut param, &grad, &mut m, &mut v, 0.1, 0.9, 0.999, 1e-8, 1)?;
        let values = param.to_vec();
        // First bias-corrected Adam step moves each weight by ~lr.
        assert_abs_diff_eq!(values[0], 0.9, epsilon = 1e-5);
        assert_abs_diff_eq!(values[1], -0.9, epsilon = 1e-5);
        Ok(())
    }
}
