use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::options::{NetOptions, UpdateType};

use super::OptimState;

/// Next update state and the new parameter values
#[derive(Debug, Clone)]
pub struct UpdateStep<B: Backend> {
    pub state: OptimState<B>,
    pub params: Vec<Tensor<B, 2>>,
}

impl UpdateType {
    fn buffers(&self) -> usize {
        match self {
            UpdateType::Sgd => 0,
            UpdateType::Momentum | UpdateType::Nesterov => 1,
        }
    }

    /// Initial value of the auxiliary state for parameters of `shapes`
    pub fn init_state<B: Backend>(&self, shapes: &[[usize; 2]], device: &B::Device) -> OptimState<B> {
        OptimState::zeros(shapes, self.buffers(), device)
    }

    /// Apply `forces` to `params`
    pub fn update<B: Backend>(
        &self,
        options: &NetOptions,
        params: &[Tensor<B, 2>],
        forces: Vec<Tensor<B, 2>>,
        state: &OptimState<B>,
    ) -> UpdateStep<B> {
        let mu = options.momentum;
        let mut slots = Vec::with_capacity(params.len());
        let mut updated = Vec::with_capacity(params.len());

        for ((param, force), buffers) in params.iter().zip(forces).zip(&state.slots) {
            match self {
                UpdateType::Sgd => {
                    updated.push(param.clone() - force);
                    slots.push(Vec::new());
                }
                UpdateType::Momentum => {
                    let velocity = buffers[0].clone().mul_scalar(mu) - force;
                    updated.push(param.clone() + velocity.clone());
                    slots.push(vec![velocity]);
                }
                UpdateType::Nesterov => {
                    let velocity = buffers[0].clone().mul_scalar(mu) - force.clone();
                    updated.push(param.clone() + velocity.clone().mul_scalar(mu) - force);
                    slots.push(vec![velocity]);
                }
            }
        }

        UpdateStep {
            state: OptimState {
                slots,
                step: state.step + 1,
            },
            params: updated,
        }
    }
}
