use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::options::{ForceType, NetOptions};

use super::OptimState;

/// Next force state and one force per gradient
#[derive(Debug, Clone)]
pub struct ForceStep<B: Backend> {
    pub state: OptimState<B>,
    pub forces: Vec<Tensor<B, 2>>,
}

impl ForceType {
    fn buffers(&self) -> usize {
        match self {
            ForceType::Vanilla => 0,
            ForceType::Rmsprop => 1,
            ForceType::Adadelta | ForceType::Adam => 2,
        }
    }

    /// Initial value of the auxiliary state for parameters of `shapes`
    pub fn init_state<B: Backend>(&self, shapes: &[[usize; 2]], device: &B::Device) -> OptimState<B> {
        OptimState::zeros(shapes, self.buffers(), device)
    }

    /// Turn gradients into forces; the caller applies the returned state
    pub fn force<B: Backend>(
        &self,
        options: &NetOptions,
        lr: f32,
        grads: &[Tensor<B, 2>],
        state: &OptimState<B>,
    ) -> ForceStep<B> {
        let step = state.step + 1;
        let rho = options.decay_rate;
        let eps = options.epsilon;

        let mut slots = Vec::with_capacity(grads.len());
        let mut forces = Vec::with_capacity(grads.len());

        for (grad, buffers) in grads.iter().zip(&state.slots) {
            let grad = grad.clone();
            match self {
                ForceType::Vanilla => {
                    forces.push(grad.mul_scalar(lr));
                    slots.push(Vec::new());
                }
                ForceType::Rmsprop => {
                    let mean_sq = buffers[0].clone().mul_scalar(rho)
                        + grad.clone().powf_scalar(2.0).mul_scalar(1.0 - rho);
                    forces.push(grad.mul_scalar(lr) / mean_sq.clone().add_scalar(eps).sqrt());
                    slots.push(vec![mean_sq]);
                }
                ForceType::Adadelta => {
                    let mean_sq = buffers[0].clone().mul_scalar(rho)
                        + grad.clone().powf_scalar(2.0).mul_scalar(1.0 - rho);
                    let delta = grad * buffers[1].clone().add_scalar(eps).sqrt()
                        / mean_sq.clone().add_scalar(eps).sqrt();
                    let mean_delta_sq = buffers[1].clone().mul_scalar(rho)
                        + delta.clone().powf_scalar(2.0).mul_scalar(1.0 - rho);
                    forces.push(delta.mul_scalar(lr));
                    slots.push(vec![mean_sq, mean_delta_sq]);
                }
                ForceType::Adam => {
                    let (beta1, beta2) = (options.beta1, options.beta2);
                    let m = buffers[0].clone().mul_scalar(beta1)
                        + grad.clone().mul_scalar(1.0 - beta1);
                    let v = buffers[1].clone().mul_scalar(beta2)
                        + grad.powf_scalar(2.0).mul_scalar(1.0 - beta2);
                    let m_hat = m.clone().div_scalar(1.0 - beta1.powi(step as i32));
                    let v_hat = v.clone().div_scalar(1.0 - beta2.powi(step as i32));
                    forces.push(m_hat.mul_scalar(lr) / v_hat.sqrt().add_scalar(eps));
                    slots.push(vec![m, v]);
                }
            }
        }

        ForceStep {
            state: OptimState { slots, step },
            forces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_vanilla_force_scales_by_lr() {
        let device = Default::default();
        let options = NetOptions::default();
        let state = ForceType::Vanilla.init_state::<TestBackend>(&[[1, 2]], &device);
        let grad = Tensor::<TestBackend, 2>::from_floats([[2.0, -4.0]], &device);

        let step = ForceType::Vanilla.force(&options, 0.5, &[grad], &state);
        assert_eq!(step.forces[0].to_data().to_vec::<f32>().unwrap(), vec![1.0, -2.0]);
        assert_eq!(step.state.step, 1);
    }

    #[test]
    fn test_adam_first_step_is_sign_times_lr() {
        let device = Default::default();
        let options = NetOptions::default();
        let state = ForceType::Adam.init_state::<TestBackend>(&[[1, 2]], &device);
        let grad = Tensor::<TestBackend, 2>::from_floats([[0.3, -7.0]], &device);

        let step = ForceType::Adam.force(&options, 0.01, &[grad], &state);
        let forces = step.forces[0].to_data().to_vec::<f32>().unwrap();
        assert!((forces[0] - 0.01).abs() < 1e-4);
        assert!((forces[1] + 0.01).abs() < 1e-4);
        assert_eq!(step.state.slots[0].len(), 2);
    }

    #[test]
    fn test_rmsprop_tracks_mean_square() {
        let device = Default::default();
        let options = NetOptions::default();
        let state = ForceType::Rmsprop.init_state::<TestBackend>(&[[1, 1]], &device);
        let grad = Tensor::<TestBackend, 2>::from_floats([[2.0]], &device);

        let step = ForceType::Rmsprop.force(&options, 1.0, &[grad], &state);
        let mean_sq = step.state.slots[0][0].clone().into_scalar();
        assert!((mean_sq - (1.0 - options.decay_rate) * 4.0).abs() < 1e-6);
    }
}
