use crate::{
    backend::Backend,
    engine::{self, BackwardOptions},
    error::Error,
    graph::Node,
    ops,
};
use std::ops::{Add, Div, Mul, Sub};
use std::{
    cell::{Ref, RefCell, RefMut},
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

static TENSOR_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Process-unique identity of a tensor. Used for equality, hashing and as
/// the key of the per-traversal gradient table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(usize);

impl TensorId {
    fn next() -> Self {
        TensorId(TENSOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct TensorData<B: Backend> {
    pub id: TensorId,
    pub data: B::Storage,
    pub grad: Option<B::Storage>,
    pub requires_grad: bool,
    pub grad_fn: Option<Rc<Node<B>>>,
    pub retains_grad: bool,
}

/// A multi-dimensional array with automatic differentiation support.
///
/// A `Tensor` is a cheap handle: cloning it shares the same data, gradient
/// and graph node. Tensors produced by a differentiable operation remember
/// that operation as their `grad_fn`; calling [`Tensor::backward`] on any
/// tensor in the graph fills the `grad` of every upstream leaf that requires
/// grad.
///
/// # Example
/// ```rust
/// use rust_autograd_lib::{Tensor, CpuBackend, ops};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let x = Tensor::<CpuBackend>::from_vec(vec![1.0, 2.0, 3.0], &[3], true)?;
///
///     // y = x * x + x, x is used on two paths
///     let y = (&(&x * &x)? + &x)?;
///     let loss = ops::sum(&y, None)?;
///     loss.backward()?;
///
///     assert_eq!(x.grad_vec()?, Some(vec![3.0, 5.0, 7.0]));
///     Ok(())
/// }
/// ```
pub struct Tensor<B: Backend> {
    pub(crate) inner: Rc<RefCell<TensorData<B>>>,
    _backend: PhantomData<B>,
}

impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> PartialEq for Tensor<B> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<B: Backend> Eq for Tensor<B> {}

impl<B: Backend> Hash for Tensor<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<B: Backend> fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("inner", &*self.inner.borrow())
            .finish()
    }
}

// --- Operator Overloading ---
impl<'b, B: Backend> Add<&'b Tensor<B>> for &Tensor<B> {
    type Output = Result<Tensor<B>, Error>;

    /// Element-wise addition with broadcasting. Calls [`ops::add`].
    ///
    /// # Example
    /// ```rust
    /// use rust_autograd_lib::{Tensor, CpuBackend};
    /// let a = Tensor::<CpuBackend>::from_vec(vec![1.0], &[1], false).unwrap();
    /// let b = Tensor::<CpuBackend>::from_vec(vec![2.0], &[1], false).unwrap();
    /// let c = (&a + &b)?;
    /// assert_eq!(c.to_vec()?, vec![3.0]);
    /// # Ok::<(), rust_autograd_lib::Error>(())
    /// ```
    fn add(self, rhs: &'b Tensor<B>) -> Self::Output {
        ops::add(self, rhs)
    }
}

impl<'b, B: Backend> Sub<&'b Tensor<B>> for &Tensor<B> {
    type Output = Result<Tensor<B>, Error>;

    /// Element-wise subtraction with broadcasting. Calls [`ops::sub`].
    fn sub(self, rhs: &'b Tensor<B>) -> Self::Output {
        ops::sub(self, rhs)
    }
}

impl<'b, B: Backend> Mul<&'b Tensor<B>> for &Tensor<B> {
    type Output = Result<Tensor<B>, Error>;

    /// Element-wise multiplication with broadcasting. Calls [`ops::mul`].
    /// Use [`ops::matmul`] for matrix multiplication.
    fn mul(self, rhs: &'b Tensor<B>) -> Self::Output {
        ops::mul(self, rhs)
    }
}

impl<'b, B: Backend> Div<&'b Tensor<B>> for &Tensor<B> {
    type Output = Result<Tensor<B>, Error>;

    /// Element-wise division with broadcasting. Calls [`ops::div`].
    fn div(self, rhs: &'b Tensor<B>) -> Self::Output {
        ops::div(self, rhs)
    }
}

impl<B: Backend> Tensor<B> {
    /// Creates a new leaf tensor from backend storage.
    pub fn new(data: B::Storage, requires_grad: bool) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TensorData {
                id: TensorId::next(),
                data,
                grad: None,
                requires_grad,
                grad_fn: None,
                retains_grad: false,
            })),
            _backend: PhantomData,
        }
    }

    /// Creates the output tensor of a recorded function invocation.
    pub(crate) fn from_node(data: B::Storage, node: Node<B>) -> Self {
        let tensor = Self::new(data, true);
        tensor.inner.borrow_mut().grad_fn = Some(Rc::new(node));
        tensor
    }

    pub fn zeros(shape: &[usize], requires_grad: bool) -> Result<Self, Error> {
        Ok(Self::new(B::zeros(shape)?, requires_grad))
    }

    pub fn ones(shape: &[usize], requires_grad: bool) -> Result<Self, Error> {
        Ok(Self::new(B::ones(shape)?, requires_grad))
    }

    /// Creates a new tensor from a flat row-major vector.
    ///
    /// # Errors
    /// Returns an error if the product of `shape` doesn't match `data.len()`.
    pub fn from_vec(data: Vec<f32>, shape: &[usize], requires_grad: bool) -> Result<Self, Error> {
        Ok(Self::new(B::from_vec(data, shape)?, requires_grad))
    }

    /// Creates a 0-dimensional tensor.
    pub fn scalar(value: f32, requires_grad: bool) -> Result<Self, Error> {
        Self::from_vec(vec![value], &[], requires_grad)
    }

    /// Initialize weights using Kaiming uniform initialization via the Backend
    pub fn kaiming_uniform(
        fan_in: usize,
        shape: &[usize],
        requires_grad: bool,
    ) -> Result<Self, Error> {
        Ok(Self::new(B::kaiming_uniform(fan_in, shape)?, requires_grad))
    }

    pub fn id(&self) -> TensorId {
        self.inner.borrow().id
    }

    /// Gets an immutable reference to the underlying storage.
    pub fn data(&self) -> Ref<'_, B::Storage> {
        Ref::map(self.inner.borrow(), |inner| &inner.data)
    }

    /// Gets a mutable reference to the underlying storage.
    ///
    /// # Warning
    /// Mutating data that a pending backward pass has saved changes the
    /// gradients that pass computes.
    pub(crate) fn data_mut(&self) -> RefMut<'_, B::Storage> {
        RefMut::map(self.inner.borrow_mut(), |inner| &mut inner.data)
    }

    /// Overwrites the data of this tensor in place. Shapes must match.
    pub fn set_data(&self, data: B::Storage) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        B::set_data(&mut inner.data, data)
    }

    pub fn shape(&self) -> Vec<usize> {
        B::shape(&self.inner.borrow().data).to_vec()
    }

    pub fn ndim(&self) -> usize {
        B::shape(&self.inner.borrow().data).len()
    }

    pub fn size(&self) -> usize {
        B::size(&self.inner.borrow().data)
    }

    /// Copies the data into a flat row-major vector.
    pub fn to_vec(&self) -> Result<Vec<f32>, Error> {
        B::copy_to_host(&*self.data())
    }

    /// Returns the only element of a one-element tensor.
    pub fn item(&self) -> Result<f32, Error> {
        let values = self.to_vec()?;
        match values.as_slice() {
            [value] => Ok(*value),
            _ => Err(Error::ShapeError(format!(
                "item() needs a tensor with one element, got shape {:?}",
                self.shape()
            ))),
        }
    }

    pub fn requires_grad(&self) -> bool {
        self.inner.borrow().requires_grad
    }

    /// Turns gradient tracking on or off for a leaf tensor.
    pub fn set_requires_grad(&self, requires_grad: bool) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.grad_fn.is_some() {
            return Err(Error::InvalidOperation(format!(
                "requires_grad can only be changed on leaf tensors (tensor {})",
                inner.id
            )));
        }
        inner.requires_grad = requires_grad;
        Ok(())
    }

    /// A tensor is a leaf when no recorded operation produced it.
    pub fn is_leaf(&self) -> bool {
        self.inner.borrow().grad_fn.is_none()
    }

    /// The node of the operation that produced this tensor.
    pub fn grad_fn(&self) -> Option<Rc<Node<B>>> {
        self.inner.borrow().grad_fn.clone()
    }

    /// Name of the producing function, e.g. `"Mul"`.
    pub fn grad_fn_name(&self) -> Option<&'static str> {
        self.inner.borrow().grad_fn.as_ref().map(|node| node.name())
    }

    /// Asks the backward engine to also write this non-leaf tensor's gradient.
    pub fn retain_grad(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.requires_grad {
            inner.retains_grad = true;
        }
    }

    pub fn retains_grad(&self) -> bool {
        self.inner.borrow().retains_grad
    }

    /// Returns a new leaf sharing a copy of this tensor's data, cut from the graph.
    pub fn detach(&self) -> Self {
        Self::new(self.data().clone(), false)
    }

    /// Gets an immutable reference to the gradient if it exists.
    pub fn grad(&self) -> Option<Ref<'_, B::Storage>> {
        Ref::filter_map(self.inner.borrow(), |inner| inner.grad.as_ref()).ok()
    }

    /// Copies the gradient into a flat vector, if there is one.
    pub fn grad_vec(&self) -> Result<Option<Vec<f32>>, Error> {
        match self.grad() {
            Some(grad) => Ok(Some(B::copy_to_host(&*grad)?)),
            None => Ok(None),
        }
    }

    /// Replaces the gradient. Its shape must match the data.
    pub fn set_grad(&self, grad: Option<B::Storage>) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if let Some(ref g) = grad {
            if B::shape(&inner.data) != B::shape(g) {
                return Err(Error::ShapeMismatch {
                    expected: B::shape(&inner.data).to_vec(),
                    actual: B::shape(g).to_vec(),
                });
            }
        }
        inner.grad = grad;
        Ok(())
    }

    /// Clears the gradient of this tensor (sets it to None).
    pub fn zero_grad(&self) {
        self.inner.borrow_mut().grad = None;
    }

    /// Returns the stored gradient plus `grad_to_add` without storing it.
    pub(crate) fn accumulated_grad(&self, grad_to_add: B::Storage) -> Result<B::Storage, Error> {
        let inner = self.inner.borrow();
        if B::shape(&inner.data) != B::shape(&grad_to_add) {
            return Err(Error::IncompatibleShapes {
                op: format!("accumulate_grad on tensor {}", self.id()),
                shape_a: B::shape(&inner.data).to_vec(),
                shape_b: B::shape(&grad_to_add).to_vec(),
            });
        }
        match &inner.grad {
            Some(existing) => B::add(existing, &grad_to_add),
            None => Ok(grad_to_add),
        }
    }

    /// Stores a gradient already checked by [`Tensor::accumulated_grad`].
    pub(crate) fn store_grad(&self, grad: B::Storage) {
        self.inner.borrow_mut().grad = Some(grad);
    }

    /// Backpropagates from this tensor with a ones seed and releases the graph.
    ///
    /// # Errors
    /// `RequiresGradError` if this tensor does not require grad,
    /// `GraphReleased` if a previous backward already consumed part of the graph.
    pub fn backward(&self) -> Result<(), Error> {
        engine::run_backward(self, BackwardOptions::default())
    }

    /// Backpropagates with an explicit seed gradient and/or a retained graph.
    pub fn backward_with(&self, options: BackwardOptions<B>) -> Result<(), Error> {
        engine::run_backward(self, options)
    }

    pub fn relu(&self) -> Result<Tensor<B>, Error> {
        ops::relu(self)
    }

    pub fn exp(&self) -> Result<Tensor<B>, Error> {
        ops::exp(self)
    }

    pub fn sqrt(&self) -> Result<Tensor<B>, Error> {
        ops::sqrt(self)
    }

    pub fn neg(&self) -> Result<Tensor<B>, Error> {
        ops::neg(self)
    }

    pub fn mul_scalar(&self, scalar: f32) -> Result<Tensor<B>, Error> {
        ops::mul_scalar(self, scalar)
    }

    pub fn add_scalar(&self, scalar: f32) -> Result<Tensor<B>, Error> {
        ops::add_scalar(self, scalar)
    }

    pub fn matmul(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
        ops::matmul(self, other)
    }

    /// Sum along `axis`, or over all elements when `axis` is `None`.
    pub fn sum(&self, axis: Option<usize>) -> Result<Tensor<B>, Error> {
        ops::sum(self, axis)
    }

    /// Mean along `axis`, or over all elements when `axis` is `None`.
    pub fn mean(&self, axis: Option<usize>) -> Result<Tensor<B>, Error> {
        ops::mean(self, axis)
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor<B>, Error> {
        ops::reshape(self, shape)
    }

    /// Reverses the order of all axes.
    pub fn t(&self) -> Result<Tensor<B>, Error> {
        ops::transpose(self, None)
    }

    /// Reorders axes by `axes`, which must be a permutation of `0..ndim`.
    pub fn permute(&self, axes: &[usize]) -> Result<Tensor<B>, Error> {
        ops::transpose(self, Some(axes))
    }

    pub fn gt(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
        ops::greater(self, other)
    }

    pub fn ge(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
        ops::greater_equal(self, other)
    }

    pub fn lt(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
        ops::less(self, other)
    }

    pub fn le(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
        ops::less_equal(self, other)
    }

    pub fn eq_elementwise(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
        ops::equal(self, other)
    }

    pub fn ne_elementwise(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
        ops::not_equal(self, other)
    }
}
