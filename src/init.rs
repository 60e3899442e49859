//! Parameter initialisation schemes.

use crate::array::Array;
use crate::error::Error;
use rand_distr::{Distribution, Uniform};

/// Bound `1 / sqrt(fan_in)` used for bias vectors of fan-in layers.
pub fn fan_in_bound(fan_in: usize) -> Result<f32, Error> {
    if fan_in == 0 {
        return Err(Error::InvalidOperation(
            "Fan-in cannot be zero for fan-in initialization".to_string(),
        ));
    }
    Ok(1.0 / (fan_in as f32).sqrt())
}

/// Kaiming uniform initialization: U(-sqrt(6 / fan_in), sqrt(6 / fan_in)).
pub fn kaiming_uniform(fan_in: usize, shape: &[usize]) -> Result<Array, Error> {
    if shape.is_empty() {
        return Err(Error::InvalidOperation(
            "Cannot initialize tensor with empty shape".to_string(),
        ));
    }
    if shape.iter().any(|&dim| dim == 0) {
        return Ok(Array::zeros(shape));
    }
    if fan_in == 0 {
        return Err(Error::InvalidOperation(
            "Fan-in cannot be zero for Kaiming initialization".to_string(),
        ));
    }

    let bound = (6.0 / fan_in as f32).sqrt();
    symmetric_uniform(bound, shape)
}

/// Samples U(-bound, bound) into a new array.
pub(crate) fn symmetric_uniform(bound: f32, shape: &[usize]) -> Result<Array, Error> {
    if !bound.is_finite() || bound <= 0.0 {
        return Err(Error::InitializationError);
    }
    let size: usize = shape
        .iter()
        .try_fold(1usize, |acc, &x| acc.checked_mul(x))
        .ok_or_else(|| {
            Error::InvalidOperation("Shape dimensions multiply to overflow usize".to_string())
        })?;

    let dist = Uniform::new(-bound, bound).map_err(|_| Error::InitializationError)?;
    let mut rng = rand::rng();
    let data: Vec<f32> = (0..size).map(|_| dist.sample(&mut rng)).collect();
    Array::from_vec(data, shape)
}
