use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::{NetError, Result};
use crate::options::NetOptions;
use crate::params::{ParamStore, ParamView};

use super::{carried_state, declare_clock, glorot, project, step, ClockGate, StateSpec, StateUpdate};

/// LSTM sequence layer
///
/// Implements the standard LSTM equations on `z = x W + h U + b`, split into
/// four gates:
/// - i = tanh(z_i)
/// - g = sigmoid(z_g)
/// - f = sigmoid(z_f + 1)
/// - o = sigmoid(z_o)
/// - c' = f * c + i * g
/// - h' = o * tanh(c')
///
/// The carried state is `[h, c]` concatenated along the feature axis.
#[derive(Debug, Clone)]
pub struct LstmLayer {
    name: String,
    n_in: usize,
    n_out: usize,
    clock: bool,
    state_slot: Option<usize>,
}

impl LstmLayer {
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
        2 * self.n_out
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
            glorot([n_in, 4 * n_out], n_in, n_out, gain, device),
        )?;
        store.declare(
            format!("{}_U", self.name),
            glorot([n_out, 4 * n_out], n_out, n_out, gain, device),
        )?;
        store.declare(format!("{}_b", self.name), Tensor::zeros([1, 4 * n_out], device))?;

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

    /// One LSTM step from precomputed input projection `xw` (`[batch, 4n]`)
    fn cell<C: Backend>(
        &self,
        xw: Tensor<C, 2>,
        hidden: Tensor<C, 2>,
        cell: Tensor<C, 2>,
        recurrent: &Tensor<C, 2>,
    ) -> (Tensor<C, 2>, Tensor<C, 2>) {
        let z = xw + hidden.matmul(recurrent.clone());

        let chunks = z.chunk(4, 1);
        let input_activation = chunks[0].clone().tanh();
        let input_gate = activation::sigmoid(chunks[1].clone());
        let forget_gate = activation::sigmoid(chunks[2].clone() + 1.0);
        let output_gate = activation::sigmoid(chunks[3].clone());

        let new_cell = cell * forget_gate + input_activation * input_gate;
        let new_hidden = new_cell.clone().tanh() * output_gate;

        (new_hidden, new_cell)
    }

    /// Run over `[seq_len, batch, n_in]`, returning `[seq_len, batch, n_out]`
    /// and the carried state after step `tap`
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
        let (slot, prev) = carried_state(states, self.state_slot, &self.name, self.state_width())?;

        let xw = project(input, weight, bias);
        let mut hidden = prev.clone().narrow(1, 0, n);
        let mut cell = prev.narrow(1, n, n);

        let mut outputs: Vec<Tensor<C, 2>> = Vec::with_capacity(seq_len);
        let mut tapped = None;

        for t in 0..seq_len {
            let (new_hidden, new_cell) = self.cell(step(&xw, t), hidden.clone(), cell.clone(), &recurrent);
            (hidden, cell) = match gate {
                Some(ref gate) => (
                    gate.blend(t, new_hidden, hidden),
                    gate.blend(t, new_cell, cell),
                ),
                None => (new_hidden, new_cell),
            };
            if t == tap {
                tapped = Some(Tensor::cat(vec![hidden.clone(), cell.clone()], 1));
            }
            outputs.push(hidden.clone());
        }

        let value = tapped.ok_or(NetError::TapOutOfRange { tap, len: seq_len })?;
        Ok((Tensor::stack(outputs, 0), StateUpdate { slot, value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn declared(options: &NetOptions) -> (LstmLayer, ParamStore<TestBackend>, Vec<StateSpec>) {
        let device = Default::default();
        let mut store = ParamStore::new("");
        let mut layer = LstmLayer::new("LSTM_0");
        layer
            .declare_parameters(&mut store, 3, 4, options, &device)
            .unwrap();
        let mut states = Vec::new();
        layer.declare_state(&mut states);
        (layer, store, states)
    }

    #[test]
    fn test_lstm_declares_parameters() {
        let options = NetOptions::default().with_learn_init_states(true).with_clock_params(true);
        let (layer, store, states) = declared(&options);

        assert_eq!(store.get("LSTM_0_W").unwrap().dims(), [3, 16]);
        assert_eq!(store.get("LSTM_0_U").unwrap().dims(), [4, 16]);
        assert_eq!(store.get("LSTM_0_b").unwrap().dims(), [1, 16]);
        assert_eq!(store.get("LSTM_0_clk_a").unwrap().dims(), [1, 4]);
        assert_eq!(store.get("LSTM_0_init").unwrap().dims(), [1, 8]);
        assert_eq!(states, vec![StateSpec::for_layer("LSTM_0", 8)]);
        assert_eq!(layer.state_width(), 8);
    }

    #[test]
    fn test_lstm_zero_input_keeps_zero_state() {
        let device = Default::default();
        let (layer, store, _) = declared(&NetOptions::default());
        let view = store.view(|t| t.clone());

        let input = Tensor::<TestBackend, 3>::zeros([5, 2, 3], &device);
        let prev = vec![Tensor::<TestBackend, 2>::zeros([2, 8], &device)];
        let (output, update) = layer.build(input, None, 4, &view, &prev).unwrap();

        assert_eq!(output.dims(), [5, 2, 4]);
        assert_eq!(update.value.dims(), [2, 8]);
        assert_eq!(update.value.abs().sum().into_scalar(), 0.0);
    }

    #[test]
    fn test_lstm_tap_selects_intermediate_state() {
        let device = Default::default();
        let (layer, store, _) = declared(&NetOptions::default());
        let view = store.view(|t| t.clone());

        let input = Tensor::<TestBackend, 3>::random(
            [6, 2, 3],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let prev = vec![Tensor::<TestBackend, 2>::zeros([2, 8], &device)];
        let (output, update) = layer.build(input, None, 2, &view, &prev).unwrap();

        // h at the tap is the layer output at that step
        let h_tap = update.value.narrow(1, 0, 4);
        let out_tap: Tensor<TestBackend, 2> = output.narrow(0, 2, 1).squeeze(0);
        assert!((h_tap - out_tap).abs().max().into_scalar() < 1e-6);
    }

    #[test]
    fn test_lstm_tap_out_of_range() {
        let device = Default::default();
        let (layer, store, _) = declared(&NetOptions::default());
        let view = store.view(|t| t.clone());

        let input = Tensor::<TestBackend, 3>::zeros([3, 2, 3], &device);
        let prev = vec![Tensor::<TestBackend, 2>::zeros([2, 8], &device)];
        let err = layer.build(input, None, 3, &view, &prev).unwrap_err();
        assert!(matches!(err, NetError::TapOutOfRange { tap: 3, len: 3 }));
    }

    #[test]
    fn test_lstm_clock_gate_changes_output() {
        let device = Default::default();
        let options = NetOptions::default().with_clock_params(true);
        let (layer, store, _) = declared(&options);
        let view = store.view(|t| t.clone());

        let input = Tensor::<TestBackend, 3>::ones([4, 2, 3], &device);
        let prev = vec![Tensor::<TestBackend, 2>::zeros([2, 8], &device)];
        let time = Tensor::<TestBackend, 1>::from_floats([0.0, 1.0, 2.0, 3.0], &device);

        let (gated, _) = layer
            .build(input.clone(), Some(&time), 3, &view, &prev)
            .unwrap();
        let (plain, _) = layer.build(input, None, 3, &view, &prev).unwrap();
        assert!((gated - plain).abs().max().into_scalar() > 0.0);
    }
}
