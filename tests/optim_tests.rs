// tests/optim_tests.rs
use approx::assert_abs_diff_eq;
use rust_autograd_lib::nn::Linear;
use rust_autograd_lib::{ops, Adam, Backend, CpuBackend, Error, Module, Optimizer, Sgd, Tensor};

type T = Tensor<CpuBackend>;

/// Mean squared error of a linear fit to y = 2x - 1.
fn fit_loss(model: &Linear<CpuBackend>) -> Result<T, Error> {
    let x = T::from_vec(vec![-1.0, 0.0, 1.0, 2.0], &[4, 1], false)?;
    let y = T::from_vec(vec![-3.0, -1.0, 1.0, 3.0], &[4, 1], false)?;
    let diff = ops::sub(&model.forward(&x)?, &y)?;
    ops::mean(&ops::mul(&diff, &diff)?, None)
}

fn train(model: &Linear<CpuBackend>, optimizer: &mut dyn Optimizer<CpuBackend>) -> Result<f32, Error> {
    for _ in 0..300 {
        optimizer.zero_grad();
        fit_loss(model)?.backward()?;
        optimizer.step()?;
    }
    fit_loss(model)?.item()
}

#[test]
fn test_sgd_fits_a_line() -> Result<(), Error> {
    let model = Linear::<CpuBackend>::new(1, 1, true)?;
    let mut sgd = Sgd::with_momentum(model.parameters(), 0.05, 0.9)?;
    let loss = train(&model, &mut sgd)?;
    assert!(loss < 1e-3, "loss {}", loss);
    assert_abs_diff_eq!(model.weight().item()?, 2.0, epsilon = 0.05);
    Ok(())
}

#[test]
fn test_adam_fits_a_line() -> Result<(), Error> {
    let model = Linear::<CpuBackend>::new(1, 1, true)?;
    let mut adam = Adam::new(model.parameters(), 0.1)?;
    let loss = train(&model, &mut adam)?;
    assert!(loss < 1e-2, "loss {}", loss);
    Ok(())
}

#[test]
fn test_sgd_state_dict_restores_velocity() -> Result<(), Error> {
    let param = T::from_vec(vec![1.0, -1.0], &[2], true)?;
    let grad = CpuBackend::from_vec(vec![0.5, 0.5], &[2])?;
    param.set_grad(Some(grad.clone()))?;
    let mut sgd = Sgd::with_momentum(vec![param.clone()], 0.1, 0.5)?;
    sgd.step()?;

    let state = sgd.state_dict()?;
    assert_eq!(state.kind, "SGD");
    assert_eq!(state.step, 1);
    assert_eq!(state.buffers.get("velocity.0").map(|v| v.to_vec()), Some(vec![0.5, 0.5]));

    let twin = T::from_vec(param.to_vec()?, &[2], true)?;
    twin.set_grad(Some(grad))?;
    let mut restored = Sgd::new(vec![twin.clone()], 1.0)?;
    restored.load_state_dict(&state)?;
    assert_eq!(restored.learning_rate(), 0.1);

    sgd.step()?;
    restored.step()?;
    assert_eq!(param.to_vec()?, twin.to_vec()?);
    Ok(())
}

#[test]
fn test_state_shape_mismatch_rejected() -> Result<(), Error> {
    let small = T::zeros(&[2], true)?;
    let large = T::zeros(&[3], true)?;
    let adam = Adam::new(vec![small], 0.1)?;
    let mut other = Adam::new(vec![large], 0.1)?;
    assert!(matches!(
        other.load_state_dict(&adam.state_dict()?),
        Err(Error::StateDictShapeMismatch { .. })
    ));
    Ok(())
}
