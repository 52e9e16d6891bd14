//! # Optimizers
//!
//! An optimizer is a pair of rules selected by name in [`NetOptions`]:
//!
//! 1. a **force** rule ([`ForceType`]) turns raw gradients and the learning
//!    rate into per-parameter update directions, keeping its own running
//!    statistics;
//! 2. an **update** rule ([`UpdateType`]) applies forces to parameters,
//!    possibly through a velocity buffer.
//!
//! Both rules follow the same contract: they declare the initial value of
//! their auxiliary state, and each step consumes the current state and
//! returns the next one alongside its result. [`Optimizer`] owns the state
//! of both and is the only place that writes it back.
//!
//! | Force | Buffers per parameter |
//! |-------|-----------------------|
//! | `Vanilla` | 0 |
//! | `Rmsprop` | 1 (`E[g²]`) |
//! | `Adadelta` | 2 (`E[g²]`, `E[Δx²]`) |
//! | `Adam` | 2 (`m`, `v`) + step counter |
//!
//! | Update | Buffers per parameter |
//! |--------|-----------------------|
//! | `Sgd` | 0 |
//! | `Momentum`, `Nesterov` | 1 (velocity) |

mod force;
mod update;

pub use force::ForceStep;
pub use update::UpdateStep;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::options::{ForceType, NetOptions, UpdateType};

/// Auxiliary buffers of one rule: `slots[param][buffer]`
#[derive(Debug, Clone)]
pub struct OptimState<B: Backend> {
    pub slots: Vec<Vec<Tensor<B, 2>>>,
    pub step: usize,
}

impl<B: Backend> OptimState<B> {
    /// `per_param` zero buffers for every shape
    pub fn zeros(shapes: &[[usize; 2]], per_param: usize, device: &B::Device) -> Self {
        Self {
            slots: shapes
                .iter()
                .map(|&shape| (0..per_param).map(|_| Tensor::zeros(shape, device)).collect())
                .collect(),
            step: 0,
        }
    }
}

/// Force and update rules together with their state, for one aligned list
/// of parameters.
#[derive(Debug, Clone)]
pub struct Optimizer<B: Backend> {
    force_type: ForceType,
    update_type: UpdateType,
    shapes: Vec<[usize; 2]>,
    device: B::Device,
    force_state: OptimState<B>,
    update_state: OptimState<B>,
}

impl<B: Backend> Optimizer<B> {
    /// Optimizer for parameters of the given shapes, state initialised
    pub fn new(options: &NetOptions, shapes: Vec<[usize; 2]>, device: &B::Device) -> Self {
        let force_state = options.force_type.init_state(&shapes, device);
        let update_state = options.update_type.init_state(&shapes, device);
        Self {
            force_type: options.force_type,
            update_type: options.update_type,
            shapes,
            device: device.clone(),
            force_state,
            update_state,
        }
    }

    /// Reset all auxiliary state to its initial value
    pub fn initialize(&mut self) {
        self.force_state = self.force_type.init_state(&self.shapes, &self.device);
        self.update_state = self.update_type.init_state(&self.shapes, &self.device);
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Number of steps taken since the last initialisation
    pub fn steps(&self) -> usize {
        self.force_state.step
    }

    /// Compute new parameter values from `grads`; `params` and `grads` are
    /// aligned by position with the shapes given at construction.
    pub fn step(
        &mut self,
        options: &NetOptions,
        lr: f32,
        params: &[Tensor<B, 2>],
        grads: &[Tensor<B, 2>],
    ) -> Vec<Tensor<B, 2>> {
        debug_assert_eq!(params.len(), self.shapes.len());
        debug_assert_eq!(grads.len(), self.shapes.len());

        let ForceStep { state, forces } =
            self.force_type.force(options, lr, grads, &self.force_state);
        self.force_state = state;

        debug_assert_eq!(forces.len(), params.len());
        let UpdateStep { state, params } =
            self.update_type.update(options, params, forces, &self.update_state);
        self.update_state = state;
        params
    }
}
