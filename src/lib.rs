//! # seqnet - stateful sequence training on Burn
//!
//! Recurrent networks (LSTM or GRU stacks with a linear read-out) trained on
//! long sequences that are fed in chunks. The carried state of every
//! recurrent layer survives between chunks, and its initial value can itself
//! be learned.
//!
//! ## Features
//!
//! - **Chunked training**: carried states sampled at a caller-chosen tap and
//!   fed into the next chunk
//! - **Learnable initial states**: a second gradient path and optimizer for
//!   the `_init` parameters
//! - **Clock gates**: optional learned per-unit blending driven by timestamps
//! - **Identity embedding**: optional learned per-sequence embedding
//!   concatenated into every layer
//! - **Optimizers**: Vanilla/Adadelta/RMSprop/Adam forces combined with
//!   SGD/Momentum/Nesterov updates
//! - **Persistence**: bincode archives of options and parameters, shared by
//!   training runs and any number of inference instances
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use burn::backend::{Autodiff, NdArray};
//! use burn::tensor::Tensor;
//! use seqnet::prelude::*;
//!
//! type Backend = Autodiff<NdArray<f32>>;
//!
//! let device = Default::default();
//! let options = NetOptions::new(3, 1)
//!     .with_layers(2, 16)
//!     .with_unit_type(UnitType::Gru)
//!     .with_batch_size(2);
//!
//! let mut net = NetBuilder::new()
//!     .with_options(options)
//!     .save_to("runs/quick")
//!     .build::<Backend>(&device)?;
//!
//! net.initialize_states()?;
//! let input = Tensor::ones([10, 2, 3], &device);
//! let target = Tensor::zeros([10, 2, 1], &device);
//! let loss = net.fwd_bwd_propagate(TrainBatch::new(input, target))?;
//! net.update_v_params(0.01)?;
//! net.save_v_params_to_workspace(None)?;
//! # let _ = loss;
//! # Ok::<(), seqnet::NetError>(())
//! ```

pub mod activation;
pub mod error;
pub mod functions;
pub mod graph;
pub mod layers;
pub mod net;
pub mod optim;
pub mod options;
pub mod params;

pub use error::{NetError, Result};
pub use functions::{Function, InferBatch, Port, PortKind, TrainBatch};
pub use net::{Inner, Mode, Net, NetBuilder};
pub use options::{ForceType, NetOptions, UnitType, UpdateType};

pub mod prelude {
    pub use crate::activation::Activation;
    pub use crate::error::{NetError, Result};
    pub use crate::functions::{Function, InferBatch, TrainBatch};
    pub use crate::net::{Mode, Net, NetBuilder};
    pub use crate::options::{ForceType, NetOptions, UnitType, UpdateType};
}
