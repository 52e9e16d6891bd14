use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::{NetError, Result};
use crate::options::NetOptions;
use crate::params::{ParamStore, ParamView};

use super::{carried_state, declare_clock, glorot, project, step, ClockGate, StateSpec, StateUpdate};

/// GRU sequence layer
///
/// With `x W + b` split into `[x_z, x_r, x_h]` and `U = [U_zr | U_h]`:
/// - z = sigmoid(x_z + h U_z)
/// - r = sigmoid(x_r + h U_r)
/// - ĥ = tanh(x_h + (r * h) U_h)
/// - h' = h + z * (ĥ - h)
#[derive(Debug, Clone)]
pub struct GruLayer {
    name: String,
    n_in: usize,
    n_out: usize,
    clock: bool,
    state_slot: Option<usize>,
}

impl GruLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            n_in: 0,
            n_out: 0,
            clock: false,
            state_slot: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_in(&self) -> usize {
        self.n_in
    }

    pub fn n_out(&self) -> usize {
        self.n_out
    }

    pub fn state_width(&self) -> usize {
        self.n_out
    }

    pub fn declare_parameters<P: Backend>(
        &mut self,
        store: &mut ParamStore<P>,
        n_in: usize,
        n_out: usize,
        options: &NetOptions,
        device: &P::Device,
    ) -> Result<()> {
        self.n_in = n_in;
        self.n_out = n_out;
        self.clock = options.learn_clock_params;

        let gain = options.init_scale;
        store.declare(
            format!("{}_W", self.name),
            glorot([n_in, 3 * n_out], n_in, n_out, gain, device),
        )?;
        store.declare(
            format!("{}_U", self.name),
            glorot([n_out, 3 * n_out], n_out, n_out, gain, device),
        )?;
        store.declare(format!("{}_b", self.name), Tensor::zeros([1, 3 * n_out], device))?;

        if self.clock {
            declare_clock(store, &self.name, n_out, device)?;
        }
        if options.learn_init_states {
            let spec = StateSpec::for_layer(&self.name, self.state_width());
            store.declare(spec.init_name, Tensor::zeros([1, self.state_width()], device))?;
        }
        Ok(())
    }

    pub fn declare_state(&mut self, states: &mut Vec<StateSpec>) {
        self.state_slot = Some(states.len());
        states.push(StateSpec::for_layer(&self.name, self.state_width()));
    }

    pub fn build<C: Backend>(
        &self,
        input: Tensor<C, 3>,
        time: Option<&Tensor<C, 1>>,
        tap: usize,
        params: &ParamView<'_, C>,
        states: &[Tensor<C, 2>],
    ) -> Result<(Tensor<C, 3>, StateUpdate<C>)> {
        let seq_len = input.dims()[0];
        if tap >= seq_len {
            return Err(NetError::TapOutOfRange { tap, len: seq_len });
        }
        let n = self.n_out;

        let weight = params.get(&format!("{}_W", self.name))?;
        let recurrent = params.get(&format!("{}_U", self.name))?;
        let bias = params.get(&format!("{}_b", self.name))?;
        let gate = ClockGate::resolve(&self.name, self.clock, time, params, seq_len)?;
        let (slot, mut hidden) = carried_state(states, self.state_slot, &self.name, n)?;

        let u_zr = recurrent.clone().narrow(1, 0, 2 * n);
        let u_h = recurrent.narrow(1, 2 * n, n);
        let xw = project(input, weight, bias);

        let mut outputs: Vec<Tensor<C, 2>> = Vec::with_capacity(seq_len);
        let mut tapped = None;

        for t in 0..seq_len {
            let x = step(&xw, t).chunk(3, 1);
            let hu = hidden.clone().matmul(u_zr.clone()).chunk(2, 1);

            let update_gate = activation::sigmoid(x[0].clone() + hu[0].clone());
            let reset_gate = activation::sigmoid(x[1].clone() + hu[1].clone());
            let candidate = (x[2].clone() + (reset_gate * hidden.clone()).matmul(u_h.clone())).tanh();
            let new_hidden = hidden.clone() + update_gate * (candidate - hidden.clone());

            hidden = match gate {
                Some(ref gate) => gate.blend(t, new_hidden, hidden),
                None => new_hidden,
            };
            if t == tap {
                tapped = Some(hidden.clone());
            }
            outputs.push(hidden.clone());
        }

        let value = tapped.ok_or(NetError::TapOutOfRange { tap, len: seq_len })?;
        Ok((Tensor::stack(outputs, 0), StateUpdate { slot, value }))
    }
}
