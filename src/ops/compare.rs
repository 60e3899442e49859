//! Element-wise comparisons producing 1.0/0.0 masks.
//!
//! None of these are differentiable: outputs never require grad and carry no
//! `grad_fn`, so the engine never reaches their `backward`. If it is called
//! directly it drops the incoming gradient and contributes nothing.

use crate::backend::Backend;
use crate::context::Context;
use crate::engine::GradientMap;
use crate::error::Error;
use crate::function::{check_arity, Function};
use crate::tensor::Tensor;

macro_rules! comparison {
    ($(#[$doc:meta])* $name:ident, $method:ident) => {
        $(#[$doc])*
        pub struct $name;

        impl<B: Backend> Function<B> for $name {
            type Args = ();
            const NAME: &'static str = stringify!($name);
            const DIFFERENTIABLE: bool = false;

            fn forward(
                _ctx: &mut Context<B>,
                inputs: &[&Tensor<B>],
                _: (),
            ) -> Result<B::Storage, Error> {
                check_arity(<Self as Function<B>>::NAME, inputs, 2)?;
                B::$method(&*inputs[0].data(), &*inputs[1].data())
            }

            fn backward(
                _ctx: &Context<B>,
                _grad_output: &B::Storage,
                _grads: &mut GradientMap<B>,
            ) -> Result<(), Error> {
                Ok(())
            }
        }
    };
}

comparison!(
    /// a > b
    Greater, greater
);
comparison!(
    /// a >= b
    GreaterEqual, greater_equal
);
comparison!(
    /// a < b
    Less, less
);
comparison!(
    /// a <= b
    LessEqual, less_equal
);
comparison!(
    /// a == b
    Equal, equal
);
comparison!(
    /// a != b
    NotEqual, not_equal
);
