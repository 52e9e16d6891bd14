//! Ordered composition of layers
//!
//! `input -> unit_0 -> ... -> unit_{D-1} -> FC_output`, with an optional
//! identity embedder whose output widens the input of every layer.

use burn::tensor::backend::Backend;

use crate::activation::Activation;
use crate::error::Result;
use crate::options::{NetOptions, UnitType};
use crate::params::ParamStore;

use super::{FcLayer, GruLayer, Layer, LstmLayer, StateSpec};

/// Layers of a network in vertical order
#[derive(Debug, Clone)]
pub struct LayerStack {
    id_embedder: Option<FcLayer>,
    layers: Vec<Layer>,
    states: Vec<StateSpec>,
}

impl LayerStack {
    /// Name every layer for `options`, prefixing with `prefix`
    pub fn new(options: &NetOptions, prefix: &str) -> Self {
        let id_embedder = options
            .learn_id_embedding
            .then(|| FcLayer::new(format!("{prefix}FC_id_embedder"), Activation::Identity));

        let unit = options.unit_type.layer_prefix();
        let mut layers: Vec<Layer> = (0..options.net_depth)
            .map(|i| {
                let name = format!("{prefix}{unit}_{i}");
                match options.unit_type {
                    UnitType::Lstm => Layer::Lstm(LstmLayer::new(name)),
                    UnitType::Gru => Layer::Gru(GruLayer::new(name)),
                }
            })
            .collect();
        layers.push(Layer::Fc(FcLayer::new(
            format!("{prefix}FC_output"),
            Activation::Identity,
        )));

        Self {
            id_embedder,
            layers,
            states: Vec::new(),
        }
    }

    /// Declare all parameters into `store` in stack order and register the
    /// carried states of the stateful layers.
    pub fn instantiate<P: Backend>(
        &mut self,
        store: &mut ParamStore<P>,
        options: &NetOptions,
        device: &P::Device,
    ) -> Result<()> {
        options.validate()?;
        let extra = options.id_embedding_width();

        if let Some(embedder) = self.id_embedder.as_mut() {
            embedder.declare_parameters(
                store,
                options.id_count,
                options.id_embedding_dim,
                options,
                device,
            )?;
        }

        let depth = options.net_depth;
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let below = if i > 0 { options.net_width } else { options.input_dim };
            let n_out = if i < depth { options.net_width } else { options.target_dim };
            layer.declare_parameters(store, extra + below, n_out, options, device)?;
        }

        self.states.clear();
        for layer in self.layers.iter_mut() {
            layer.declare_state(&mut self.states);
        }
        Ok(())
    }

    pub fn id_embedder(&self) -> Option<&FcLayer> {
        self.id_embedder.as_ref()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Carried-state declarations, one per stateful layer, in stack order
    pub fn states(&self) -> &[StateSpec] {
        &self.states
    }
}
