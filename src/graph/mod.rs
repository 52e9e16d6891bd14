//! # Graph assembly
//!
//! - [`forward`]: identity embedding, layer stack and carried-state feedback
//! - [`loss`]: masked mean squared error
//! - [`grads`]: gradient extraction and norm clipping
//!
//! Every builder is generic over the backend. Forward-only passes run on the
//! plain backend; forward-backward passes run the same code on an autodiff
//! backend with parameters (and, for learnable initial states, the carried
//! states) registered as tracked leaves.

pub mod forward;
pub mod grads;
pub mod loss;

pub use forward::{ForwardGraph, ForwardInputs};
