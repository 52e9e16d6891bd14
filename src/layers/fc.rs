use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::activation::Activation;
use crate::error::Result;
use crate::options::NetOptions;
use crate::params::{ParamStore, ParamView};

use super::{glorot, project};

/// Fully connected layer applied independently at every time step
///
/// `y = act(x W + b)`; stateless, so it never yields a state update.
#[derive(Debug, Clone)]
pub struct FcLayer {
    name: String,
    activation: Activation,
    n_in: usize,
    n_out: usize,
}

impl FcLayer {
    pub fn new(name: impl Into<String>, activation: Activation) -> Self {
        Self {
            name: name.into(),
            activation,
            n_in: 0,
            n_out: 0,
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
        store.declare(
            format!("{}_W", self.name),
            glorot([n_in, n_out], n_in, n_out, options.init_scale, device),
        )?;
        store.declare(format!("{}_b", self.name), Tensor::zeros([1, n_out], device))
    }

    /// Apply to a single `[batch, n_in]` slice
    pub fn build_step<C: Backend>(&self, input: Tensor<C, 2>, params: &ParamView<'_, C>) -> Result<Tensor<C, 2>> {
        let weight = params.get(&format!("{}_W", self.name))?;
        let bias = params.get(&format!("{}_b", self.name))?;
        Ok(self.activation.forward(input.matmul(weight) + bias))
    }

    /// Apply to a `[seq_len, batch, n_in]` sequence
    pub fn build<C: Backend>(&self, input: Tensor<C, 3>, params: &ParamView<'_, C>) -> Result<Tensor<C, 3>> {
        let weight = params.get(&format!("{}_W", self.name))?;
        let bias = params.get(&format!("{}_b", self.name))?;
        Ok(self.activation.forward(project(input, weight, bias)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_fc_declares_weight_and_bias() {
        let device = Default::default();
        let mut store = ParamStore::<TestBackend>::new("");
        let mut layer = FcLayer::new("FC_output", Activation::Identity);

        layer
            .declare_parameters(&mut store, 6, 2, &NetOptions::default(), &device)
            .unwrap();

        assert_eq!(store.get("FC_output_W").unwrap().dims(), [6, 2]);
        assert_eq!(store.get("FC_output_b").unwrap().dims(), [1, 2]);
        assert_eq!((layer.n_in(), layer.n_out()), (6, 2));
    }

    #[test]
    fn test_fc_sequence_matches_step() {
        let device = Default::default();
        let mut store = ParamStore::<TestBackend>::new("");
        let mut layer = FcLayer::new("FC", Activation::Tanh);
        layer
            .declare_parameters(&mut store, 3, 4, &NetOptions::default(), &device)
            .unwrap();
        let view = store.view(|t| t.clone());

        let input = Tensor::<TestBackend, 3>::random(
            [5, 2, 3],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let seq = layer.build(input.clone(), &view).unwrap();
        assert_eq!(seq.dims(), [5, 2, 4]);

        let step = layer
            .build_step(input.narrow(0, 3, 1).squeeze(0), &view)
            .unwrap();
        let seq_step: Tensor<TestBackend, 2> = seq.narrow(0, 3, 1).squeeze(0);
        assert!((step - seq_step).abs().max().into_scalar() < 1e-6);
    }
}
