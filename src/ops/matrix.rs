//! Axis permutation, matrix product and reshape.

use crate::backend::Backend;
use crate::context::{Context, SavedArgument};
use crate::engine::GradientMap;
use crate::error::Error;
use crate::function::{check_arity, Function};
use crate::tensor::Tensor;
use crate::util::{inverse_permutation, validate_permutation};

/// Axis permutation.
///
/// `Args = None` reverses all axes (and is its own inverse); `Some(axes)`
/// reorders them so that output axis `i` is input axis `axes[i]`. Backward
/// applies the inverse permutation to the incoming gradient.
pub struct Transpose;

impl<B: Backend> Function<B> for Transpose {
    type Args = Option<Vec<usize>>;
    const NAME: &'static str = "Transpose";

    fn forward(
        ctx: &mut Context<B>,
        inputs: &[&Tensor<B>],
        axes: Option<Vec<usize>>,
    ) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 1)?;
        let x = inputs[0];
        if let Some(axes) = &axes {
            validate_permutation(axes, x.ndim())?;
        }
        let out = match &axes {
            Some(axes) => B::permute(&*x.data(), axes)?,
            None => B::transpose(&*x.data())?,
        };
        ctx.save_for_backward(inputs)?;
        ctx.save_argument("axes", SavedArgument::Axes(axes))?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let grad_input = match ctx.axes("axes")? {
            Some(axes) => B::permute(grad_output, &inverse_permutation(axes))?,
            None => B::transpose(grad_output)?,
        };
        grads.accumulate(ctx.saved_tensor(0)?, grad_input)
    }
}

/// 2-D matrix product.
pub struct Matmul;

impl<B: Backend> Function<B> for Matmul {
    type Args = ();
    const NAME: &'static str = "Matmul";

    fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], _: ()) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 2)?;
        let out = B::matmul(&*inputs[0].data(), &*inputs[1].data())?;
        ctx.save_for_backward(inputs)?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let a = ctx.saved_tensor(0)?;
        let b = ctx.saved_tensor(1)?;
        // dA = dC @ B.T, dB = A.T @ dC
        let grad_a = B::matmul(grad_output, &B::transpose(&*b.data())?)?;
        let grad_b = B::matmul(&B::transpose(&*a.data())?, grad_output)?;
        grads.accumulate(a, grad_a)?;
        grads.accumulate(b, grad_b)
    }
}

/// Same elements, new shape.
pub struct Reshape;

impl<B: Backend> Function<B> for Reshape {
    type Args = Vec<usize>;
    const NAME: &'static str = "Reshape";

    fn forward(
        ctx: &mut Context<B>,
        inputs: &[&Tensor<B>],
        shape: Vec<usize>,
    ) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 1)?;
        let x = inputs[0];
        let mut out = x.data().clone();
        B::set_shape(&mut out, &shape)?;
        ctx.save_for_backward(inputs)?;
        ctx.save_argument("input_shape", SavedArgument::Shape(x.shape()))?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let mut grad_input = grad_output.clone();
        B::set_shape(&mut grad_input, ctx.shape("input_shape")?)?;
        grads.accumulate(ctx.saved_tensor(0)?, grad_input)
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::cpu::CpuBackend;
    use crate::error::Error;
    use crate::ops;
    use crate::tensor::Tensor;

    type T = Tensor<CpuBackend>;

    #[test]
    fn test_transpose_2d_values() -> Result<(), Error> {
        let x = T::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false)?;
        let y = ops::transpose(&x, None)?;
        assert_eq!(y.shape(), vec![3, 2]);
        assert_eq!(y.to_vec()?, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        Ok(())
    }

    #[test]
    fn test_permute_backward_applies_inverse() -> Result<(), Error> {
        let data: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let x = T::from_vec(data, &[2, 3, 4], true)?;
        let y = ops::transpose(&x, Some(&[1, 2, 0]))?;
        assert_eq!(y.shape(), vec![3, 4, 2]);

        let seed: Vec<f32> = (0..24).map(|v| v as f32 * 0.5).collect();
        let seed_t = T::from_vec(seed, &[3, 4, 2], false)?;
        // sum(y * seed) has gradient seed permuted back onto x's layout
        ops::sum(&ops::mul(&y, &seed_t)?, None)?.backward()?;
        let expected = ops::transpose(&seed_t, Some(&[2, 0, 1]))?.to_vec()?;
        assert_eq!(x.grad_vec()?, Some(expected));
        Ok(())
    }

    #[test]
    fn test_invalid_permutation_fails_at_forward() -> Result<(), Error> {
        let x = T::zeros(&[2, 3], true)?;
        let bad_axes: [&[usize]; 3] = [&[0, 0], &[0, 2], &[0]];
        for bad in bad_axes {
            assert!(matches!(
                ops::transpose(&x, Some(bad)),
                Err(Error::InvalidPermutation { .. })
            ));
        }
        Ok(())
    }

    #[test]
    fn test_matmul_backward() -> Result<(), Error> {
        let a = T::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], true)?;
        let b = T::from_vec(vec![5.0, 6.0, 7.0, 8.0], &[2, 2], true)?;
        ops::sum(&ops::matmul(&a, &b)?, None)?.backward()?;
        // dA = ones @ B.T, dB = A.T @ ones
        assert_eq!(a.grad_vec()?, Some(vec![11.0, 15.0, 11.0, 15.0]));
        assert_eq!(b.grad_vec()?, Some(vec![4.0, 4.0, 6.0, 6.0]));
        Ok(())
    }

    #[test]
    fn test_reshape_roundtrip_gradient() -> Result<(), Error> {
        let x = T::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], true)?;
        let y = ops::reshape(&x, &[4])?;
        assert_eq!(y.shape(), vec![4]);
        ops::sum(&ops::mul_scalar(&y, 2.0)?, None)?.backward()?;
        assert_eq!(x.grad_vec()?, Some(vec![2.0; 4]));
        assert!(matches!(ops::reshape(&x, &[3]), Err(Error::ShapeMismatch { .. })));
        Ok(())
    }
}
