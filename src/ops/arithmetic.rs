//! Element-wise arithmetic.

use super::unbroadcast;
use crate::backend::Backend;
use crate::context::{Context, SavedArgument};
use crate::engine::GradientMap;
use crate::error::Error;
use crate::function::{check_arity, Function};
use crate::tensor::Tensor;

/// Saved operands of a binary function, in forward order.
fn operands<B: Backend>(ctx: &Context<B>) -> Result<(&Tensor<B>, &Tensor<B>), Error> {
    Ok((ctx.saved_tensor(0)?, ctx.saved_tensor(1)?))
}

/// a + b
pub struct Add;

impl<B: Backend> Function<B> for Add {
    type Args = ();
    const NAME: &'static str = "Add";

    fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], _: ()) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 2)?;
        let out = B::add(&*inputs[0].data(), &*inputs[1].data())?;
        ctx.save_for_backward(inputs)?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let (a, b) = operands(ctx)?;
        grads.accumulate(a, unbroadcast::<B>(grad_output.clone(), &a.shape())?)?;
        grads.accumulate(b, unbroadcast::<B>(grad_output.clone(), &b.shape())?)
    }
}

/// a - b
pub struct Sub;

impl<B: Backend> Function<B> for Sub {
    type Args = ();
    const NAME: &'static str = "Sub";

    fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], _: ()) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 2)?;
        let out = B::sub(&*inputs[0].data(), &*inputs[1].data())?;
        ctx.save_for_backward(inputs)?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let (a, b) = operands(ctx)?;
        grads.accumulate(a, unbroadcast::<B>(grad_output.clone(), &a.shape())?)?;
        grads.accumulate(b, unbroadcast::<B>(B::neg(grad_output)?, &b.shape())?)
    }
}

/// a * b
pub struct Mul;

impl<B: Backend> Function<B> for Mul {
    type Args = ();
    const NAME: &'static str = "Mul";

    fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], _: ()) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 2)?;
        let out = B::mul(&*inputs[0].data(), &*inputs[1].data())?;
        ctx.save_for_backward(inputs)?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let (a, b) = operands(ctx)?;
        // dA = dC * B, dB = dC * A
        let grad_a = B::mul(grad_output, &*b.data())?;
        let grad_b = B::mul(grad_output, &*a.data())?;
        grads.accumulate(a, unbroadcast::<B>(grad_a, &a.shape())?)?;
        grads.accumulate(b, unbroadcast::<B>(grad_b, &b.shape())?)
    }
}

/// a / b
pub struct Div;

impl<B: Backend> Function<B> for Div {
    type Args = ();
    const NAME: &'static str = "Div";

    fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], _: ()) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 2)?;
        let out = B::div(&*inputs[0].data(), &*inputs[1].data())?;
        ctx.save_for_backward(inputs)?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let (a, b) = operands(ctx)?;
        let (grad_a, grad_b) = {
            let a_data = a.data();
            let b_data = b.data();
            // dA = dC / B, dB = -dC * A / B^2
            let grad_a = B::div(grad_output, &*b_data)?;
            let b_squared = B::mul(&*b_data, &*b_data)?;
            let grad_b = B::neg(&B::div(&B::mul(grad_output, &*a_data)?, &b_squared)?)?;
            (grad_a, grad_b)
        };
        grads.accumulate(a, unbroadcast::<B>(grad_a, &a.shape())?)?;
        grads.accumulate(b, unbroadcast::<B>(grad_b, &b.shape())?)
    }
}

/// -x
pub struct Neg;

impl<B: Backend> Function<B> for Neg {
    type Args = ();
    const NAME: &'static str = "Neg";

    fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], _: ()) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 1)?;
        let out = B::neg(&*inputs[0].data())?;
        ctx.save_for_backward(inputs)?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        grads.accumulate(ctx.saved_tensor(0)?, B::neg(grad_output)?)
    }
}

/// x * scalar
pub struct MulScalar;

impl<B: Backend> Function<B> for MulScalar {
    type Args = f32;
    const NAME: &'static str = "MulScalar";

    fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], scalar: f32) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 1)?;
        let out = B::mul_scalar(&*inputs[0].data(), scalar)?;
        ctx.save_for_backward(inputs)?;
        ctx.save_argument("scalar", SavedArgument::Scalar(scalar))?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let scalar = ctx.scalar("scalar")?;
        grads.accumulate(ctx.saved_tensor(0)?, B::mul_scalar(grad_output, scalar)?)
    }
}

/// x + scalar
pub struct AddScalar;

impl<B: Backend> Function<B> for AddScalar {
    type Args = f32;
    const NAME: &'static str = "AddScalar";

    fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], scalar: f32) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 1)?;
        let out = B::add_scalar(&*inputs[0].data(), scalar)?;
        ctx.save_for_backward(inputs)?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        grads.accumulate(ctx.saved_tensor(0)?, grad_output.clone())
    }
}

/// e^x
pub struct Exp;

impl<B: Backend> Function<B> for Exp {
    type Args = ();
    const NAME: &'static str = "Exp";

    fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], _: ()) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 1)?;
        let out = B::exp(&*inputs[0].data())?;
        ctx.save_for_backward(inputs)?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let x = ctx.saved_tensor(0)?;
        // Recomputed: a node never saves its own output.
        let y = B::exp(&*x.data())?;
        grads.accumulate(x, B::mul(grad_output, &y)?)
    }
}

/// sqrt(x)
pub struct Sqrt;

impl<B: Backend> Function<B> for Sqrt {
    type Args = ();
    const NAME: &'static str = "Sqrt";

    fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], _: ()) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 1)?;
        let out = B::sqrt(&*inputs[0].data())?;
        ctx.save_for_backward(inputs)?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let x = ctx.saved_tensor(0)?;
        // d sqrt(x) = 1 / (2 sqrt(x))
        let two_sqrt = B::mul_scalar(&B::sqrt(&*x.data())?, 2.0)?;
        grads.accumulate(x, B::div(grad_output, &two_sqrt)?)
    }
}

/// max(0, x)
pub struct Relu;

impl<B: Backend> Function<B> for Relu {
    type Args = ();
    const NAME: &'static str = "Relu";

    fn forward(ctx: &mut Context<B>, inputs: &[&Tensor<B>], _: ()) -> Result<B::Storage, Error> {
        check_arity(<Self as Function<B>>::NAME, inputs, 1)?;
        let out = B::relu(&*inputs[0].data())?;
        ctx.save_for_backward(inputs)?;
        Ok(out)
    }

    fn backward(
        ctx: &Context<B>,
        grad_output: &B::Storage,
        grads: &mut GradientMap<B>,
    ) -> Result<(), Error> {
        let x = ctx.saved_tensor(0)?;
        let mask = B::greater(&*x.data(), &B::zeros(&[])?)?;
        grads.accumulate(x, B::mul(grad_output, &mask)?)
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::cpu::CpuBackend;
    use crate::error::Error;
    use crate::ops;
    use crate::tensor::Tensor;
    use approx::assert_abs_diff_eq;

    type T = Tensor<CpuBackend>;

    #[test]
    fn test_broadcast_add_backward_sums_over_broadcast_axes() -> Result<(), Error> {
        let a = T::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], true)?;
        let bias = T::from_vec(vec![0.5, 0.5, 0.5], &[3], true)?;
        let y = ops::add(&a, &bias)?;
        ops::sum(&y, None)?.backward()?;
        assert_eq!(a.grad_vec()?, Some(vec![1.0; 6]));
        assert_eq!(bias.grad_vec()?, Some(vec![2.0, 2.0, 2.0]));
        Ok(())
    }

    #[test]
    fn test_div_backward() -> Result<(), Error> {
        let a = T::from_vec(vec![6.0], &[1], true)?;
        let b = T::from_vec(vec![2.0], &[1], true)?;
        ops::div(&a, &b)?.backward()?;
        assert_abs_diff_eq!(a.grad_vec()?.unwrap()[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(b.grad_vec()?.unwrap()[0], -1.5, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_relu_masks_gradient() -> Result<(), Error> {
        let x = T::from_vec(vec![-1.0, 0.0, 2.0], &[3], true)?;
        ops::relu(&x)?.backward()?;
        assert_eq!(x.grad_vec()?, Some(vec![0.0, 0.0, 1.0]));
        Ok(())
    }

    #[test]
    fn test_mul_scalar_and_neg() -> Result<(), Error> {
        let x = T::from_vec(vec![1.0, 2.0], &[2], true)?;
        let y = ops::neg(&ops::mul_scalar(&x, 3.0)?)?;
        assert_eq!(y.to_vec()?, vec![-3.0, -6.0]);
        y.backward()?;
        assert_eq!(x.grad_vec()?, Some(vec![-3.0, -3.0]));
        Ok(())
    }

    #[test]
    fn test_arity_is_checked() {
        use crate::function::Function;
        let x = T::from_vec(vec![1.0], &[1], true).unwrap();
        assert!(matches!(
            super::Add::apply(&[&x], ()),
            Err(Error::InvalidOperation(_))
        ));
    }
}
