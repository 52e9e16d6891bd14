//! # Layers
//!
//! Sequence layers that declare named parameters into a
//! [`ParamStore`](crate::params::ParamStore), optionally declare a carried
//! state, and build their part of the forward graph from a
//! [`ParamView`](crate::params::ParamView).
//!
//! | Layer | Stateful | Carried state width |
//! |-------|----------|---------------------|
//! | [`FcLayer`] | no | - |
//! | [`LstmLayer`] | yes | `2 * n_out` (`[h, c]`) |
//! | [`GruLayer`] | yes | `n_out` |
//!
//! ## Tensor Shapes
//!
//! Sequence tensors are time-major: `[seq_len, batch, features]`. The
//! carried state of a layer is `[batch, state_width]`; its learnable initial
//! value (when enabled) is a single row `[1, state_width]`.
//!
//! ## Tap
//!
//! `build` runs the recurrence over the whole chunk and returns, besides the
//! output sequence, the state reached after time step `tap`. That state is
//! what the next chunk starts from.

pub mod fc;
pub mod gru;
pub mod lstm;
pub mod stack;

pub use fc::FcLayer;
pub use gru::GruLayer;
pub use lstm::LstmLayer;
pub use stack::LayerStack;

use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

use crate::error::{NetError, Result};
use crate::options::NetOptions;
use crate::params::{ParamStore, ParamView, INIT_SUFFIX};

/// Suffix of carried-state buffer names.
pub const PREV_SUFFIX: &str = "prev";

/// Declaration of a carried-state buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSpec {
    /// `<layer>_prev`
    pub name: String,
    /// `<layer>_init`, the parameter this buffer is reset from
    pub init_name: String,
    pub width: usize,
}

impl StateSpec {
    pub fn for_layer(layer_name: &str, width: usize) -> Self {
        Self {
            name: format!("{layer_name}_{PREV_SUFFIX}"),
            init_name: format!("{layer_name}_{INIT_SUFFIX}"),
            width,
        }
    }
}

/// New value for the carried state in `slot`, sampled at the tap
#[derive(Debug, Clone)]
pub struct StateUpdate<B: Backend> {
    pub slot: usize,
    pub value: Tensor<B, 2>,
}

/// Any layer the stack can hold.
#[derive(Debug, Clone)]
pub enum Layer {
    Fc(FcLayer),
    Lstm(LstmLayer),
    Gru(GruLayer),
}

impl Layer {
    pub fn name(&self) -> &str {
        match self {
            Layer::Fc(layer) => layer.name(),
            Layer::Lstm(layer) => layer.name(),
            Layer::Gru(layer) => layer.name(),
        }
    }

    /// Declare this layer's parameters for `n_in` inputs and `n_out` outputs
    pub fn declare_parameters<P: Backend>(
        &mut self,
        store: &mut ParamStore<P>,
        n_in: usize,
        n_out: usize,
        options: &NetOptions,
        device: &P::Device,
    ) -> Result<()> {
        match self {
            Layer::Fc(layer) => layer.declare_parameters(store, n_in, n_out, options, device),
            Layer::Lstm(layer) => layer.declare_parameters(store, n_in, n_out, options, device),
            Layer::Gru(layer) => layer.declare_parameters(store, n_in, n_out, options, device),
        }
    }

    /// Register the carried state, if any, and remember its slot
    pub fn declare_state(&mut self, states: &mut Vec<StateSpec>) {
        match self {
            Layer::Fc(_) => {}
            Layer::Lstm(layer) => layer.declare_state(states),
            Layer::Gru(layer) => layer.declare_state(states),
        }
    }

    /// Build the layer over a `[seq_len, batch, n_in]` sequence
    pub fn build<C: Backend>(
        &self,
        input: Tensor<C, 3>,
        time: Option<&Tensor<C, 1>>,
        tap: usize,
        params: &ParamView<'_, C>,
        states: &[Tensor<C, 2>],
    ) -> Result<(Tensor<C, 3>, Option<StateUpdate<C>>)> {
        match self {
            Layer::Fc(layer) => Ok((layer.build(input, params)?, None)),
            Layer::Lstm(layer) => layer
                .build(input, time, tap, params, states)
                .map(|(out, update)| (out, Some(update))),
            Layer::Gru(layer) => layer
                .build(input, time, tap, params, states)
                .map(|(out, update)| (out, Some(update))),
        }
    }
}

/// Uniform Glorot initialisation scaled by `gain`
pub(crate) fn glorot<P: Backend>(
    shape: [usize; 2],
    fan_in: usize,
    fan_out: usize,
    gain: f32,
    device: &P::Device,
) -> Tensor<P, 2> {
    let limit = gain as f64 * (6.0 / (fan_in + fan_out) as f64).sqrt();
    Tensor::random(shape, Distribution::Uniform(-limit, limit), device)
}

/// `x W + b` applied to every time step at once
pub(crate) fn project<C: Backend>(
    input: Tensor<C, 3>,
    weight: Tensor<C, 2>,
    bias: Tensor<C, 2>,
) -> Tensor<C, 3> {
    let [seq_len, batch, n_in] = input.dims();
    let n_out = weight.dims()[1];
    (input.reshape([seq_len * batch, n_in]).matmul(weight) + bias).reshape([seq_len, batch, n_out])
}

/// Slice time step `t` out of a time-major sequence
pub(crate) fn step<C: Backend>(sequence: &Tensor<C, 3>, t: usize) -> Tensor<C, 2> {
    sequence.clone().narrow(0, t, 1).squeeze(0)
}

/// Carried state for `slot`, checked against the expected width
pub(crate) fn carried_state<C: Backend>(
    states: &[Tensor<C, 2>],
    slot: Option<usize>,
    layer: &str,
    width: usize,
) -> Result<(usize, Tensor<C, 2>)> {
    let slot = slot.ok_or_else(|| {
        NetError::InvalidOption(format!("layer `{layer}` has no declared state"))
    })?;
    let state = states
        .get(slot)
        .cloned()
        .ok_or_else(|| NetError::InvalidOption(format!("no state buffer for `{layer}`")))?;
    if state.dims()[1] != width {
        return Err(NetError::InputShape(format!(
            "state of `{layer}` has width {}, expected {width}",
            state.dims()[1]
        )));
    }
    Ok((slot, state))
}

/// Declare `<layer>_clk_a` and `<layer>_clk_b` for a [`ClockGate`]
pub(crate) fn declare_clock<P: Backend>(
    store: &mut ParamStore<P>,
    layer: &str,
    n_out: usize,
    device: &P::Device,
) -> Result<()> {
    store.declare(
        format!("{layer}_clk_a"),
        Tensor::random([1, n_out], Distribution::Uniform(-0.1, 0.1), device),
    )?;
    store.declare(format!("{layer}_clk_b"), Tensor::ones([1, n_out], device))
}

/// Learnable per-unit time gate.
///
/// At step `t` with timestamp `τ`, the gate `k = σ(a·τ + b)` blends the
/// freshly computed state with the previous one: `k ⊙ new + (1 - k) ⊙ old`.
pub(crate) struct ClockGate<C: Backend> {
    a: Tensor<C, 2>,
    b: Tensor<C, 2>,
    time: Tensor<C, 1>,
}

impl<C: Backend> ClockGate<C> {
    /// Gate for `layer` if clock parameters are enabled and a time port is wired
    pub(crate) fn resolve(
        layer: &str,
        enabled: bool,
        time: Option<&Tensor<C, 1>>,
        params: &ParamView<'_, C>,
        seq_len: usize,
    ) -> Result<Option<Self>> {
        match (enabled, time) {
            (true, Some(time)) => {
                if time.dims()[0] != seq_len {
                    return Err(NetError::InputShape(format!(
                        "time has length {}, sequence has {seq_len} steps",
                        time.dims()[0]
                    )));
                }
                Ok(Some(Self {
                    a: params.get(&format!("{layer}_clk_a"))?,
                    b: params.get(&format!("{layer}_clk_b"))?,
                    time: time.clone(),
                }))
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn blend(&self, t: usize, new: Tensor<C, 2>, old: Tensor<C, 2>) -> Tensor<C, 2> {
        let [batch, n_out] = new.dims();
        let stamp = self.time.clone().narrow(0, t, 1).reshape([1, 1]).expand([1, n_out]);
        let k = activation::sigmoid(self.a.clone() * stamp + self.b.clone()).expand([batch, n_out]);
        let keep = k.clone().neg().add_scalar(1.0);
        new * k + old * keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_state_spec_names() {
        let spec = StateSpec::for_layer("ab12_LSTM_0", 8);
        assert_eq!(spec.name, "ab12_LSTM_0_prev");
        assert_eq!(spec.init_name, "ab12_LSTM_0_init");
        assert_eq!(spec.width, 8);
    }

    #[test]
    fn test_project_shapes() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 3>::ones([5, 2, 3], &device);
        let weight = Tensor::<TestBackend, 2>::ones([3, 4], &device);
        let bias = Tensor::<TestBackend, 2>::zeros([1, 4], &device);

        let out = project(input, weight, bias);
        assert_eq!(out.dims(), [5, 2, 4]);
        assert!((out.mean().into_scalar() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_glorot_within_limit() {
        let device = Default::default();
        let w = glorot::<TestBackend>([10, 40], 10, 10, 1.0, &device);
        let limit = (6.0f32 / 20.0).sqrt();
        assert!(w.clone().abs().max().into_scalar() <= limit);
        assert_eq!(w.dims(), [10, 40]);
    }
}
