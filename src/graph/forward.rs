//! Forward graph builder
//!
//! Connects the optional identity embedding, the layer stack and the
//! carried-state feedback into one forward computation. Besides the output
//! sequence it returns, for every stateful layer, the state reached at the
//! tap so the caller can carry it into the next chunk.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use crate::error::Result;
use crate::layers::{LayerStack, StateUpdate};
use crate::options::NetOptions;
use crate::params::ParamView;

/// Port values consumed by the forward graph
#[derive(Debug, Clone)]
pub struct ForwardInputs<C: Backend> {
    /// `[seq_len, batch, input_dim]`
    pub input: Tensor<C, 3>,
    /// `[seq_len]`, read only with clock parameters
    pub time: Tensor<C, 1>,
    /// `[batch]`, read only with identity embedding
    pub id_idx: Tensor<C, 1, Int>,
}

/// Output of [`build`]
#[derive(Debug, Clone)]
pub struct ForwardGraph<C: Backend> {
    /// `[seq_len, batch, target_dim]`
    pub output: Tensor<C, 3>,
    pub state_updates: Vec<StateUpdate<C>>,
}

/// One-hot encode `[batch]` indices into `[batch, count]`
pub fn one_hot<C: Backend>(indices: Tensor<C, 1, Int>, count: usize) -> Tensor<C, 2> {
    let batch = indices.dims()[0];
    let device = indices.device();
    let classes = Tensor::<C, 1, Int>::arange(0..count as i64, &device)
        .reshape([1, count])
        .repeat_dim(0, batch);
    indices
        .reshape([batch, 1])
        .repeat_dim(1, count)
        .equal(classes)
        .float()
}

/// Build the forward graph over one chunk.
///
/// Layers run strictly in stack order; each consumes the previous output
/// (the raw input for the first) concatenated with the identity embedding.
pub fn build<C: Backend>(
    stack: &LayerStack,
    options: &NetOptions,
    inputs: ForwardInputs<C>,
    tap: usize,
    params: &ParamView<'_, C>,
    states: &[Tensor<C, 2>],
) -> Result<ForwardGraph<C>> {
    let ForwardInputs { input, time, id_idx } = inputs;
    let seq_len = input.dims()[0];

    // embedding is evaluated once per chunk and tiled over time
    let embedding = match stack.id_embedder() {
        Some(embedder) => {
            let emb = embedder.build_step(one_hot(id_idx, options.id_count), params)?;
            Some(emb.unsqueeze_dim::<3>(0).repeat_dim(0, seq_len))
        }
        None => None,
    };
    let cat = |below: Tensor<C, 3>| match embedding {
        Some(ref emb) => Tensor::cat(vec![below, emb.clone()], 2),
        None => below,
    };

    let time = options.learn_clock_params.then_some(&time);

    let mut below = input;
    let mut state_updates = Vec::with_capacity(stack.states().len());
    for layer in stack.layers() {
        let (output, update) = layer.build(cat(below), time, tap, params, states)?;
        if let Some(update) = update {
            state_updates.push(update);
        }
        below = output;
    }

    Ok(ForwardGraph {
        output: below,
        state_updates,
    })
}
