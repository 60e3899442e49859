//! Per-invocation scratch store bridging a function's forward and backward calls.

use crate::backend::Backend;
use crate::error::Error;
use crate::tensor::Tensor;
use std::collections::BTreeMap;
use std::fmt;

/// A non-tensor value recorded by a forward call for its backward call.
#[derive(Debug, Clone, PartialEq)]
pub enum SavedArgument {
    /// An axis permutation, `None` meaning "reverse all axes".
    Axes(Option<Vec<usize>>),
    /// A reduction axis, `None` meaning "all axes".
    Axis(Option<usize>),
    Shape(Vec<usize>),
    Scalar(f32),
}

/// Saved state of exactly one forward invocation.
///
/// A context is created by [`Function::apply`](crate::function::Function::apply),
/// written once by that forward call, moved into the graph node the call
/// creates, and handed to the matching backward call as `&Context`. The
/// backward engine drops it right after the backward call has run.
pub struct Context<B: Backend> {
    function: &'static str,
    saved_tensors: Option<Vec<Tensor<B>>>,
    saved_arguments: BTreeMap<&'static str, SavedArgument>,
}

impl<B: Backend> Context<B> {
    pub(crate) fn new(function: &'static str) -> Self {
        Self {
            function,
            saved_tensors: None,
            saved_arguments: BTreeMap::new(),
        }
    }

    /// Name of the function this context belongs to.
    pub fn function(&self) -> &'static str {
        self.function
    }

    /// Records the tensors backward will need. May be called once per context.
    pub fn save_for_backward(&mut self, tensors: &[&Tensor<B>]) -> Result<(), Error> {
        if self.saved_tensors.is_some() {
            return Err(Error::ContextReused {
                function: self.function,
                name: "saved_tensors".to_string(),
            });
        }
        self.saved_tensors = Some(tensors.iter().map(|t| (*t).clone()).collect());
        Ok(())
    }

    /// Records a named non-tensor argument. Each name may be written once.
    pub fn save_argument(&mut self, name: &'static str, value: SavedArgument) -> Result<(), Error> {
        if self.saved_arguments.contains_key(name) {
            return Err(Error::ContextReused {
                function: self.function,
                name: name.to_string(),
            });
        }
        self.saved_arguments.insert(name, value);
        Ok(())
    }

    pub fn saved_tensors(&self) -> &[Tensor<B>] {
        self.saved_tensors.as_deref().unwrap_or(&[])
    }

    pub fn saved_tensor(&self, index: usize) -> Result<&Tensor<B>, Error> {
        self.saved_tensors()
            .get(index)
            .ok_or_else(|| self.missing(format!("saved_tensors[{}]", index)))
    }

    pub fn argument(&self, name: &str) -> Result<&SavedArgument, Error> {
        self.saved_arguments
            .get(name)
            .ok_or_else(|| self.missing(name.to_string()))
    }

    pub fn axes(&self, name: &str) -> Result<Option<&[usize]>, Error> {
        match self.argument(name)? {
            SavedArgument::Axes(axes) => Ok(axes.as_deref()),
            other => Err(self.wrong_kind(name, other)),
        }
    }

    pub fn axis(&self, name: &str) -> Result<Option<usize>, Error> {
        match self.argument(name)? {
            SavedArgument::Axis(axis) => Ok(*axis),
            other => Err(self.wrong_kind(name, other)),
        }
    }

    pub fn shape(&self, name: &str) -> Result<&[usize], Error> {
        match self.argument(name)? {
            SavedArgument::Shape(shape) => Ok(shape),
            other => Err(self.wrong_kind(name, other)),
        }
    }

    pub fn scalar(&self, name: &str) -> Result<f32, Error> {
        match self.argument(name)? {
            SavedArgument::Scalar(value) => Ok(*value),
            other => Err(self.wrong_kind(name, other)),
        }
    }

    fn missing(&self, name: String) -> Error {
        Error::MissingSavedValue {
            function: self.function,
            name,
        }
    }

    fn wrong_kind(&self, name: &str, found: &SavedArgument) -> Error {
        Error::InternalLogicError(format!(
            "{}: saved argument '{}' has unexpected kind {:?}",
            self.function, name, found
        ))
    }
}

impl<B: Backend> fmt::Debug for Context<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("function", &self.function)
            .field(
                "saved_tensors",
                &self.saved_tensors().iter().map(|t| t.id()).collect::<Vec<_>>(),
            )
            .field("saved_arguments", &self.saved_arguments)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;

    #[test]
    fn test_context_is_write_once() -> Result<(), Error> {
        let x = Tensor::<CpuBackend>::from_vec(vec![1.0], &[1], true)?;
        let mut ctx = Context::<CpuBackend>::new("Test");
        ctx.save_for_backward(&[&x])?;
        assert!(matches!(
            ctx.save_for_backward(&[&x]),
            Err(Error::ContextReused { .. })
        ));
        ctx.save_argument("axis", SavedArgument::Axis(Some(0)))?;
        assert!(matches!(
            ctx.save_argument("axis", SavedArgument::Axis(None)),
            Err(Error::ContextReused { .. })
        ));
        assert_eq!(ctx.axis("axis")?, Some(0));
        assert_eq!(ctx.saved_tensor(0)?.id(), x.id());
        Ok(())
    }

    #[test]
    fn test_missing_and_mistyped_values() {
        let ctx = Context::<CpuBackend>::new("Test");
        assert!(matches!(
            ctx.saved_tensor(0),
            Err(Error::MissingSavedValue { .. })
        ));
        assert!(matches!(ctx.axes("axes"), Err(Error::MissingSavedValue { .. })));

        let mut ctx = Context::<CpuBackend>::new("Test");
        ctx.save_argument("scale", SavedArgument::Scalar(2.0)).unwrap();
        assert!(matches!(ctx.shape("scale"), Err(Error::InternalLogicError(_))));
        assert_eq!(ctx.scalar("scale").unwrap(), 2.0);
    }
}
