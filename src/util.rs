use crate::error::Error;

/// Compute the broadcasted shape for two shapes, following numpy broadcasting rules.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>, Error> {
    let mut result = Vec::new();
    let ndim = std::cmp::max(a.len(), b.len());
    for i in 0..ndim {
        let a_dim = if i >= ndim - a.len() {
            a[i - (ndim - a.len())]
        } else {
            1
        };
        let b_dim = if i >= ndim - b.len() {
            b[i - (ndim - b.len())]
        } else {
            1
        };
        if a_dim == b_dim || a_dim == 1 || b_dim == 1 {
            result.push(std::cmp::max(a_dim, b_dim));
        } else {
            return Err(Error::IncompatibleShapes {
                op: format!("broadcast (dimension {})", i),
                shape_a: a.to_vec(),
                shape_b: b.to_vec(),
            });
        }
    }
    Ok(result)
}

/// Checks that `axes` is a bijection over `0..ndim`.
pub fn validate_permutation(axes: &[usize], ndim: usize) -> Result<(), Error> {
    let invalid = |reason: String| Error::InvalidPermutation {
        axes: axes.to_vec(),
        ndim,
        reason,
    };
    if axes.len() != ndim {
        return Err(invalid(format!(
            "expected {} axes, got {}",
            ndim,
            axes.len()
        )));
    }
    let mut seen = vec![false; ndim];
    for &axis in axes {
        if axis >= ndim {
            return Err(invalid(format!("axis {} is out of range", axis)));
        }
        if seen[axis] {
            return Err(invalid(format!("axis {} is repeated", axis)));
        }
        seen[axis] = true;
    }
    Ok(())
}

/// Returns the permutation that undoes `axes` (its argsort).
///
/// `axes` must already be a valid permutation.
pub fn inverse_permutation(axes: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; axes.len()];
    for (position, &axis) in axes.iter().enumerate() {
        inverse[axis] = position;
    }
    inverse
}
