//! Reverse-mode traversal of the recorded graph.
//!
//! One backward pass owns a small arena: every tensor reachable from the root
//! through `grad_fn` edges gets a slot index, and contributions are summed
//! into those slots. Tensors are looked up by [`TensorId`], never by address.

use crate::backend::Backend;
use crate::error::Error;
use crate::tensor::{Tensor, TensorId};
use log::{debug, trace};
use std::collections::{HashMap, HashSet};

/// Options for [`Tensor::backward_with`].
#[derive(Debug, Clone)]
pub struct BackwardOptions<B: Backend> {
    /// Seed gradient for the root. Defaults to ones of the root's shape.
    pub gradient: Option<B::Storage>,
    /// Keep every node's context alive so the graph can be traversed again.
    pub retain_graph: bool,
}

impl<B: Backend> Default for BackwardOptions<B> {
    fn default() -> Self {
        Self {
            gradient: None,
            retain_graph: false,
        }
    }
}

impl<B: Backend> BackwardOptions<B> {
    pub fn with_gradient(mut self, gradient: B::Storage) -> Self {
        self.gradient = Some(gradient);
        self
    }

    pub fn retain_graph(mut self, retain: bool) -> Self {
        self.retain_graph = retain;
        self
    }
}

/// Gradient accumulator for one backward traversal.
///
/// Contributions for the same tensor are summed, so the final entry of a
/// tensor consumed by N operations is the sum of the N per-edge gradients,
/// whatever order they arrive in.
pub struct GradientMap<B: Backend> {
    index: HashMap<TensorId, usize>,
    slots: Vec<Option<B::Storage>>,
}

impl<B: Backend> GradientMap<B> {
    /// Creates a map with one empty slot per tensor, in the given order.
    pub fn for_tensors(tensors: &[&Tensor<B>]) -> Self {
        let mut map = Self {
            index: HashMap::with_capacity(tensors.len()),
            slots: Vec::with_capacity(tensors.len()),
        };
        for tensor in tensors {
            map.register(tensor);
        }
        map
    }

    fn register(&mut self, tensor: &Tensor<B>) -> usize {
        let next = self.slots.len();
        let slot = *self.index.entry(tensor.id()).or_insert(next);
        if slot == next {
            self.slots.push(None);
        }
        slot
    }

    /// Adds `contribution` to the slot of `tensor`.
    ///
    /// Tensors that do not require grad, or that are not part of this
    /// traversal, are skipped silently. A contribution whose shape differs
    /// from the tensor's shape is an error.
    pub fn accumulate(&mut self, tensor: &Tensor<B>, contribution: B::Storage) -> Result<(), Error> {
        if !tensor.requires_grad() {
            return Ok(());
        }
        let Some(&slot) = self.index.get(&tensor.id()) else {
            trace!("gradient for tensor {} outside the traversal dropped", tensor.id());
            return Ok(());
        };

        let expected = tensor.shape();
        if B::shape(&contribution) != expected.as_slice() {
            return Err(Error::IncompatibleShapes {
                op: format!("gradient accumulation for tensor {}", tensor.id()),
                shape_a: expected,
                shape_b: B::shape(&contribution).to_vec(),
            });
        }

        let merged = match self.slots[slot].take() {
            Some(existing) => B::add(&existing, &contribution)?,
            None => contribution,
        };
        self.slots[slot] = Some(merged);
        Ok(())
    }

    /// Current accumulated gradient of `tensor`, if any contribution arrived.
    pub fn get(&self, tensor: &Tensor<B>) -> Option<&B::Storage> {
        self.index
            .get(&tensor.id())
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    fn take(&mut self, tensor: &Tensor<B>) -> Option<B::Storage> {
        self.index
            .get(&tensor.id())
            .and_then(|&slot| self.slots[slot].take())
    }

    /// Number of tensors tracked by this map.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Tensors reachable from `root` through `grad_fn` edges, every tensor
/// listed after all of its inputs (leaves first, root last).
pub(crate) fn topological_order<B: Backend>(root: &Tensor<B>) -> Vec<Tensor<B>> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    // (tensor, inputs_already_pushed)
    let mut stack = vec![(root.clone(), false)];

    while let Some((tensor, expanded)) = stack.pop() {
        if expanded {
            order.push(tensor);
            continue;
        }
        if !seen.insert(tensor.id()) {
            continue;
        }
        let node = tensor.grad_fn();
        stack.push((tensor, true));
        if let Some(node) = node {
            for input in node.inputs().iter().rev() {
                if !seen.contains(&input.id()) {
                    stack.push((input.clone(), false));
                }
            }
        }
    }
    order
}

/// Backpropagates from `root`, writing final gradients onto leaf tensors
/// (and onto non-leaf tensors that asked to retain theirs).
pub(crate) fn run_backward<B: Backend>(
    root: &Tensor<B>,
    options: BackwardOptions<B>,
) -> Result<(), Error> {
    if !root.requires_grad() {
        return Err(Error::RequiresGradError);
    }

    let root_shape = root.shape();
    let seed = match options.gradient {
        Some(gradient) => {
            if B::shape(&gradient) != root_shape.as_slice() {
                return Err(Error::ShapeMismatch {
                    expected: root_shape,
                    actual: B::shape(&gradient).to_vec(),
                });
            }
            gradient
        }
        None => B::ones(&root_shape)?,
    };

    let order = topological_order(root);
    let refs: Vec<&Tensor<B>> = order.iter().collect();
    let mut grads = GradientMap::for_tensors(&refs);
    debug!(
        "backward from tensor {}: {} tensors in graph",
        root.id(),
        order.len()
    );
    grads.accumulate(root, seed)?;

    // Every consumer of a tensor comes after it in `order`, so walking it in
    // reverse guarantees a slot is complete by the time it is visited.
    // Gradients are stored and contexts released only once every backward
    // function has succeeded; a failed pass leaves tensors and graph untouched.
    let mut finished = Vec::new();
    let mut ran = Vec::new();
    for tensor in order.iter().rev() {
        let Some(grad) = grads.take(tensor) else {
            trace!("tensor {} received no gradient", tensor.id());
            continue;
        };

        let node = tensor.grad_fn();
        if node.is_none() || tensor.retains_grad() {
            finished.push((tensor, tensor.accumulated_grad(grad.clone())?));
        }
        if let Some(node) = node {
            trace!("running {} backward for tensor {}", node.name(), tensor.id());
            node.backward(&grad, &mut grads)?;
            ran.push(node);
        }
    }

    for (tensor, grad) in finished {
        tensor.store_grad(grad);
    }
    if !options.retain_graph {
        for node in &ran {
            node.release();
        }
    }
    debug!("backward from tensor {}: ran {} nodes", root.id(), ran.len());
    Ok(())
}
