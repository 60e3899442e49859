// src/optim.rs
use crate::array::Array;
use crate::nn::StateDict;
use crate::{Backend, Error, Tensor};
use log::{debug, warn};
use std::collections::BTreeMap;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Snapshot of an optimizer: hyperparameters, step counter and per-parameter
/// buffers keyed `"<buffer>.<parameter index>"`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct OptimizerState {
    pub kind: String,
    #[cfg_attr(
        feature = "serialization",
        serde(with = "crate::serialization::json_float::map")
    )]
    pub hyperparameters: BTreeMap<String, f64>,
    pub step: usize,
    pub buffers: StateDict,
}

/// Updates a fixed list of parameters from their accumulated gradients.
pub trait Optimizer<B: Backend> {
    /// Applies one update to every parameter that has a gradient.
    fn step(&mut self) -> Result<(), Error>;

    /// Clears the gradients of all tracked parameters.
    fn zero_grad(&mut self);

    fn state_dict(&self) -> Result<OptimizerState, Error>;

    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<(), Error>;
}

fn clear_grads<B: Backend>(parameters: &[Tensor<B>]) {
    for param in parameters {
        if param.requires_grad() {
            param.zero_grad();
        }
    }
}

/// Gradient of `param`, or `None` if it should be skipped this step.
fn usable_grad<B: Backend>(param: &Tensor<B>, index: usize, optimizer: &str) -> Option<B::Storage> {
    if !param.requires_grad() {
        return None;
    }
    let grad = param.grad()?.clone();
    let param_shape = param.shape();
    if B::shape(&grad) != param_shape.as_slice() {
        warn!(
            "{} skipping parameter {} (ID {}) due to shape mismatch: data {:?} vs grad {:?}",
            optimizer,
            index,
            param.id(),
            param_shape,
            B::shape(&grad)
        );
        return None;
    }
    Some(grad)
}

fn storage_to_array<B: Backend>(storage: &B::Storage) -> Result<Array, Error> {
    Array::from_vec(B::copy_to_host(storage)?, B::shape(storage))
}

fn export_buffers<B: Backend>(
    dict: &mut StateDict,
    name: &str,
    buffers: &[B::Storage],
) -> Result<(), Error> {
    for (i, storage) in buffers.iter().enumerate() {
        dict.insert(format!("{}.{}", name, i), storage_to_array::<B>(storage)?);
    }
    Ok(())
}

/// Reads `"<name>.<i>"` for every parameter, checking shapes against the parameters.
fn import_buffers<B: Backend>(
    dict: &StateDict,
    name: &str,
    parameters: &[Tensor<B>],
) -> Result<Vec<B::Storage>, Error> {
    parameters
        .iter()
        .enumerate()
        .map(|(i, param)| {
            let key = format!("{}.{}", name, i);
            let array = dict.get(&key).ok_or_else(|| Error::StateDictKeys {
                unexpected: Vec::new(),
                missing: vec![key.clone()],
            })?;
            let expected = param.shape();
            if array.shape() != expected.as_slice() {
                return Err(Error::StateDictShapeMismatch {
                    name: key,
                    expected,
                    actual: array.shape().to_vec(),
                });
            }
            B::from_vec(array.to_vec(), array.shape())
        })
        .collect()
}

fn check_kind(state: &OptimizerState, expected: &str) -> Result<(), Error> {
    if state.kind != expected {
        return Err(Error::InvalidOperation(format!(
            "Cannot load {} optimizer state into {}",
            state.kind, expected
        )));
    }
    Ok(())
}

fn hyperparameter(state: &OptimizerState, name: &str) -> Result<f32, Error> {
    state
        .hyperparameters
        .get(name)
        .map(|&v| v as f32)
        .ok_or_else(|| Error::InvalidOperation(format!("Optimizer state has no '{}'", name)))
}

/// Stochastic gradient descent, optionally with classical momentum.
#[derive(Debug)]
pub struct Sgd<B: Backend> {
    parameters: Vec<Tensor<B>>,
    learning_rate: f32,
    momentum: f32,
    velocities: Vec<B::Storage>,
    steps: usize,
}

impl<B: Backend> Sgd<B> {
    /// Plain SGD: `param -= lr * grad`.
    pub fn new(parameters: Vec<Tensor<B>>, learning_rate: f32) -> Result<Self, Error> {
        Self::with_momentum(parameters, learning_rate, 0.0)
    }

    /// SGD with a velocity buffer per parameter:
    /// `v = momentum * v + grad; param -= lr * v`.
    pub fn with_momentum(
        parameters: Vec<Tensor<B>>,
        learning_rate: f32,
        momentum: f32,
    ) -> Result<Self, Error> {
        if !(0.0..1.0).contains(&momentum) {
            return Err(Error::InvalidOperation(format!(
                "SGD momentum must be in [0, 1), got {}",
                momentum
            )));
        }
        let velocities = parameters
            .iter()
            .map(|p| B::zeros(&p.shape()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            parameters,
            learning_rate,
            momentum,
            velocities,
            steps: 0,
        })
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}

impl<B: Backend> Optimizer<B> for Sgd<B> {
    fn step(&mut self) -> Result<(), Error> {
        for (i, param) in self.parameters.iter().enumerate() {
            let Some(grad) = usable_grad(param, i, "SGD") else {
                continue;
            };
            let mut data = param.data_mut();
            if self.momentum == 0.0 {
                B::sgd_step(&mut data, &grad, self.learning_rate)?;
            } else {
                B::momentum_sgd_step(
                    &mut data,
                    &grad,
                    &mut self.velocities[i],
                    self.learning_rate,
                    self.momentum,
                )?;
            }
        }
        self.steps += 1;
        Ok(())
    }

    fn zero_grad(&mut self) {
        clear_grads(&self.parameters);
    }

    fn state_dict(&self) -> Result<OptimizerState, Error> {
        let mut buffers = StateDict::new();
        if self.momentum != 0.0 {
            export_buffers::<B>(&mut buffers, "velocity", &self.velocities)?;
        }
        Ok(OptimizerState {
            kind: "SGD".to_string(),
            hyperparameters: BTreeMap::from([
                ("lr".to_string(), self.learning_rate as f64),
                ("momentum".to_string(), self.momentum as f64),
            ]),
            step: self.steps,
            buffers,
        })
    }

    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<(), Error> {
        check_kind(state, "SGD")?;
        let learning_rate = hyperparameter(state, "lr")?;
        let momentum = hyperparameter(state, "momentum")?;
        let velocities = if momentum != 0.0 {
            import_buffers(&state.buffers, "velocity", &self.parameters)?
        } else {
            self.parameters
                .iter()
                .map(|p| B::zeros(&p.shape()))
                .collect::<Result<Vec<_>, _>>()?
        };
        self.learning_rate = learning_rate;
        self.momentum = momentum;
        self.velocities = velocities;
        self.steps = state.step;
        debug!("SGD: restored state at step {}", self.steps);
        Ok(())
    }
}

/// Adam with bias-corrected first and second moment estimates.
#[derive(Debug)]
pub struct Adam<B: Backend> {
    parameters: Vec<Tensor<B>>,
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m_states: Vec<B::Storage>,
    v_states: Vec<B::Storage>,
    t: usize,
}

impl<B: Backend> Adam<B> {
    pub const DEFAULT_BETA1: f32 = 0.9;
    pub const DEFAULT_BETA2: f32 = 0.999;
    pub const DEFAULT_EPSILON: f32 = 1e-8;

    /// Adam with the default betas and epsilon.
    pub fn new(parameters: Vec<Tensor<B>>, learning_rate: f32) -> Result<Self, Error> {
        Self::with_options(
            parameters,
            learning_rate,
            Self::DEFAULT_BETA1,
            Self::DEFAULT_BETA2,
            Self::DEFAULT_EPSILON,
        )
    }

    pub fn with_options(
        parameters: Vec<Tensor<B>>,
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    ) -> Result<Self, Error> {
        for (name, beta) in [("beta1", beta1), ("beta2", beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(Error::InvalidOperation(format!(
                    "Adam {} must be in [0, 1), got {}",
                    name, beta
                )));
            }
        }
        let mut m_states = Vec::with_capacity(parameters.len());
        let mut v_states = Vec::with_capacity(parameters.len());
        for param in &parameters {
            let shape = param.shape();
            m_states.push(B::zeros(&shape)?);
            v_states.push(B::zeros(&shape)?);
        }
        Ok(Self {
            parameters,
            learning_rate,
            beta1,
            beta2,
            epsilon,
            m_states,
            v_states,
            t: 0,
        })
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Number of steps taken so far.
    pub fn timestep(&self) -> usize {
        self.t
    }
}

impl<B: Backend> Optimizer<B> for Adam<B> {
    fn step(&mut self) -> Result<(), Error> {
        self.t += 1;
        for (i, param) in self.parameters.iter().enumerate() {
            let Some(grad) = usable_grad(param, i, "Adam") else {
                continue;
            };
            B::adam_step(
                &mut param.data_mut(),
                &grad,
                &mut self.m_states[i],
                &mut self.v_states[i],
                self.learning_rate,
                self.beta1,
                self.beta2,
                self.epsilon,
                self.t,
            )?;
        }
        Ok(())
    }

    fn zero_grad(&mut self) {
        clear_grads(&self.parameters);
    }

    fn state_dict(&self) -> Result<OptimizerState, Error> {
        let mut buffers = StateDict::new();
        export_buffers::<B>(&mut buffers, "m", &self.m_states)?;
        export_buffers::<B>(&mut buffers, "v", &self.v_states)?;
        Ok(OptimizerState {
            kind: "Adam".to_string(),
            hyperparameters: BTreeMap::from([
                ("lr".to_string(), self.learning_rate as f64),
                ("beta1".to_string(), self.beta1 as f64),
                ("beta2".to_string(), self.beta2 as f64),
                ("epsilon".to_string(), self.epsilon as f64),
            ]),
            step: self.t,
            buffers,
        })
    }

    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<(), Error> {
        check_kind(state, "Adam")?;
        let learning_rate = hyperparameter(state, "lr")?;
        let beta1 = hyperparameter(state, "beta1")?;
        let beta2 = hyperparameter(state, "beta2")?;
        let epsilon = hyperparameter(state, "epsilon")?;
        let m_states = import_buffers(&state.buffers, "m", &self.parameters)?;
        let v_states = import_buffers(&state.buffers, "v", &self.parameters)?;
        self.learning_rate = learning_rate;
        self.beta1 = beta1;
        self.beta2 = beta2;
        self.epsilon = epsilon;
        self.m_states = m_states;
        self.v_states = v_states;
        self.t = state.step;
        debug!("Adam: restored state at step {}", self.t);
        Ok(())
    }
}
