//! The forward/backward contract every differentiable operation implements.

use crate::backend::Backend;
use crate::context::Context;
use crate::engine::GradientMap;
use crate::error::Error;
use crate::graph::Node;
use crate::tensor::Tensor;
use log::trace;

/// A stateless operation. Each call to [`Function::apply`] is one graph edge:
/// input tensors, a fresh [`Context`], and one output tensor.
///
/// Implementors are unit structs; invocation parameters travel through
/// `Args` into the context, never into `self`.
///
/// # Example
/// ```rust
/// use rust_autograd_lib::{Backend, Context, CpuBackend, Error, Function, GradientMap, Tensor};
///
/// /// y = 3x
/// struct Triple;
///
/// impl<B: Backend> Function<B> for Triple {
///     type Args = ();
///     const NAME: &'static str = "Triple";
///
///     fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], _: ()) -> Result<B::Storage, Error> {
///         ctx.save_for_backward(inputs)?;
///         B::mul_scalar(&*inputs[0].data(), 3.0)
///     }
///
///     fn backward(ctx: &Context<B>, grad: &B::Storage, grads: &mut GradientMap<B>) -> Result<(), Error> {
///         grads.accumulate(ctx.saved_tensor(0)?, B::mul_scalar(grad, 3.0)?)
///     }
/// }
///
/// let x = Tensor::<CpuBackend>::from_vec(vec![1.0, 2.0], &[2], true)?;
/// let y = Triple::apply(&[&x], ())?;
/// y.backward()?;
/// assert_eq!(x.grad_vec()?, Some(vec![3.0, 3.0]));
/// # Ok::<(), Error>(())
/// ```
pub trait Function<B: Backend> {
    /// Invocation parameters (axes, scalars, ...), saved into the context by `forward`.
    type Args;

    const NAME: &'static str;

    /// Non-differentiable functions produce outputs with `requires_grad = false`
    /// and no graph node; their `backward` is never called by the engine.
    const DIFFERENTIABLE: bool = true;

    /// Computes the output array. Must validate its arguments here so that
    /// invalid invocations never reach `backward`.
    fn forward(
        ctx: &mut Context<B>,
        inputs: &[&Tensor<B>],
        args: Self::Args,
    ) -> Result<B::Storage, Error>;

    /// Accumulates one contribution per differentiable input into `grads`.
    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error>;

    /// Runs `forward` with a fresh context and wires the output into the graph.
    fn apply(inputs: &[&Tensor<B>], args: Self::Args) -> Result<Tensor<B>, Error> {
        let mut ctx = Context::new(Self::NAME);
        let output = Self::forward(&mut ctx, inputs, args)?;

        let requires_grad = Self::DIFFERENTIABLE && inputs.iter().any(|t| t.requires_grad());
        if !requires_grad {
            return Ok(Tensor::new(output, false));
        }

        let parents: Vec<Tensor<B>> = inputs.iter().map(|t| (*t).clone()).collect();
        trace!(
            "{}: recording node over inputs {:?}",
            Self::NAME,
            parents.iter().map(|t| t.id()).collect::<Vec<_>>()
        );
        let node = Node::new(Self::NAME, parents, Self::backward, ctx);
        Ok(Tensor::from_node(output, node))
    }
}

/// Fails unless exactly `expected` inputs were passed to `function`.
pub(crate) fn check_arity<B: Backend>(
    function: &str,
    inputs: &[&Tensor<B>],
    expected: usize,
) -> Result<(), Error> {
    if inputs.len() != expected {
        return Err(Error::InvalidOperation(format!(
            "{} expects {} input(s), got {}",
            function,
            expected,
            inputs.len()
        )));
    }
    Ok(())
}
