use crate::backend::Backend;
use crate::context::Context;
use crate::engine::GradientMap;
use crate::error::Error;
use crate::tensor::Tensor;

use std::cell::RefCell;
use std::fmt;

#[allow(type_alias_bounds)]
pub type BackwardFn<B: Backend> =
    fn(&Context<B>, &B::Storage, &mut GradientMap<B>) -> Result<(), Error>;

/// One recorded function invocation: the edge from `inputs` to the tensor
/// that holds this node as its `grad_fn`.
///
/// A node must never save its own output tensor in its context; the output
/// owns the node, so doing so would leak the whole graph.
pub struct Node<B: Backend> {
    name: &'static str,
    inputs: Vec<Tensor<B>>,
    backward_fn: BackwardFn<B>,
    ctx: RefCell<Option<Context<B>>>,
}

impl<B: Backend> Node<B> {
    pub(crate) fn new(
        name: &'static str,
        inputs: Vec<Tensor<B>>,
        backward_fn: BackwardFn<B>,
        ctx: Context<B>,
    ) -> Self {
        Self {
            name,
            inputs,
            backward_fn,
            ctx: RefCell::new(Some(ctx)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Parent tensors in the order they were passed to the forward call.
    pub fn inputs(&self) -> &[Tensor<B>] {
        &self.inputs
    }

    /// True once a backward pass has consumed this node's context.
    pub fn is_released(&self) -> bool {
        self.ctx.borrow().is_none()
    }

    /// Runs the recorded backward function. The context is kept until
    /// [`Node::release`] is called.
    pub(crate) fn backward(
        &self,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let ctx_ref = self.ctx.borrow();
        let ctx = ctx_ref
            .as_ref()
            .ok_or(Error::GraphReleased { function: self.name })?;
        (self.backward_fn)(ctx, grad_output, grads)
    }

    /// Drops the saved context; a later backward through this node fails
    /// with `GraphReleased`.
    pub(crate) fn release(&self) {
        self.ctx.borrow_mut().take();
    }
}

impl<B: Backend> fmt::Debug for Node<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field(
                "inputs",
                &self.inputs.iter().map(|t| t.id()).collect::<Vec<_>>(),
            )
            .field("released", &self.is_released())
            .finish()
    }
}
