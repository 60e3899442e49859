use crate::backend::Backend;
use crate::tensor::TensorData;
use std::fmt;

impl<B: Backend> fmt::Debug for TensorData<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorData")
            .field("id", &self.id)
            .field("shape", &B::shape(&self.data))
            .field("grad", &self.grad.as_ref().map(|g| B::shape(g).to_vec()))
            .field("requires_grad", &self.requires_grad)
            .field("grad_fn", &self.grad_fn.as_ref().map(|node| node.name()))
            .field("retains_grad", &self.retains_grad)
            .finish()
    }
}
