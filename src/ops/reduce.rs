//! Sum and mean reductions.

use super::expand_reduced;
use crate::backend::Backend;
use crate::context::{Context, SavedArgument};
use crate::engine::GradientMap;
use crate::error::Error;
use crate::function::{check_arity, Function};
use crate::tensor::Tensor;

/// Sum over one axis (removed from the shape) or over all elements.
pub struct Sum;

impl<B: Backend> Function<B> for Sum {
    type Args = Option<usize>;
    const NAME: &'static str = "Sum";

    fn forward(
        ctx: &mut Context<B>,
        inputs: &[&Tensor<B>],
        axis: Option<usize>,
    ) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 1)?;
        let out = {
            let x = inputs[0].data();
            match axis {
                Some(axis) => B::sum_along_axis(&*x, axis)?,
                None => B::from_vec(vec![B::sum_all(&*x)?], &[])?,
            }
        };
        ctx.save_for_backward(inputs)?;
        ctx.save_argument("axis", SavedArgument::Axis(axis))?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let x = ctx.saved_tensor(0)?;
        let grad_input = expand_reduced::<B>(grad_output, ctx.axis("axis")?, &x.shape())?;
        grads.accumulate(x, grad_input)
    }
}

/// Mean over one axis (removed from the shape) or over all elements.
pub struct Mean;

impl<B: Backend> Function<B> for Mean {
    type Args = Option<usize>;
    const NAME: &'static str = "Mean";

    fn forward(
        ctx: &mut Context<B>,
        inputs: &[&Tensor<B>],
        axis: Option<usize>,
    ) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 1)?;
        let out = B::mean(&*inputs[0].data(), axis)?;
        ctx.save_for_backward(inputs)?;
        ctx.save_argument("axis", SavedArgument::Axis(axis))?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let x = ctx.saved_tensor(0)?;
        let input_shape = x.shape();
        let axis = ctx.axis("axis")?;
        let count = match axis {
            Some(axis) => input_shape[axis],
            None => input_shape.iter().product(),
        };
        let broadcast = expand_reduced::<B>(grad_output, axis, &input_shape)?;
        grads.accumulate(x, B::mul_scalar(&broadcast, 1.0 / count.max(1) as f32)?)
    }
}
