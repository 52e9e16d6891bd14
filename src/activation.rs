//! Activation functions for feedforward layers
//!
//! Layers pick their nonlinearity from the closed set in [`Activation`].
//! LeCun's scaled tanh is provided here since Burn does not ship it.

use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

/// LeCun's tanh activation function.
///
/// `f(x) = 1.7159 * tanh(0.666 * x)`, close to the identity near the origin
/// with outputs in roughly [-1.7159, 1.7159].
pub struct LeCun;

impl LeCun {
    /// Applies the LeCun tanh activation function element-wise.
    pub fn forward<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
        let scaled = x * 0.666f32;
        scaled.tanh() * 1.7159f32
    }
}

/// Nonlinearity applied at the end of a feedforward layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Pass-through, used by the identity embedder and the output projection
    #[default]
    Identity,
    Tanh,
    Sigmoid,
    Relu,
    LecunTanh,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Identity => x,
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => activation::sigmoid(x),
            Activation::Relu => activation::relu(x),
            Activation::LecunTanh => LeCun::forward(x),
        }
    }
}
