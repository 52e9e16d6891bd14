//! Network options and their on-disk form
//!
//! [`NetOptions`] is fixed once a [`Net`](crate::Net) is built. Training runs
//! write it to `<save_to>/options.bin` before any graph is assembled; resumed
//! runs and inference read it back from `<load_from>/options.bin`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};

/// File name of the persisted option set inside a run directory.
pub const OPTIONS_FILE: &str = "options.bin";

/// Recurrent unit used for the hidden layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    /// Long short-term memory; carried state is `[h, c]` (width `2 * net_width`)
    Lstm,
    /// Gated recurrent unit; carried state is `h` (width `net_width`)
    Gru,
}

impl UnitType {
    /// Prefix used when naming layers of this type
    pub fn layer_prefix(&self) -> &'static str {
        match self {
            UnitType::Lstm => "LSTM",
            UnitType::Gru => "GRU",
        }
    }
}

/// Gradient transform applied before the update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceType {
    /// `f = lr * g`
    Vanilla,
    /// Adadelta running ratio of update and gradient magnitudes, scaled by `lr`
    Adadelta,
    /// `f = lr * g / sqrt(E[g²] + ε)`
    Rmsprop,
    /// Bias-corrected first/second moment estimate
    Adam,
}

/// Rule that turns forces into new parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// `p ← p - f`
    Sgd,
    /// `v ← μv - f; p ← p + v`
    Momentum,
    /// `v ← μv - f; p ← p + μv - f`
    Nesterov,
}

/// Complete option set of a network.
///
/// Equality is structural; a resumed training run must be constructed with
/// an option set equal to the persisted one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetOptions {
    pub input_dim: usize,
    pub target_dim: usize,
    /// Number of recurrent layers (the output projection is extra)
    pub net_depth: usize,
    pub net_width: usize,
    pub unit_type: UnitType,
    pub learn_id_embedding: bool,
    pub id_count: usize,
    pub id_embedding_dim: usize,
    pub learn_clock_params: bool,
    pub learn_init_states: bool,
    pub force_type: ForceType,
    pub update_type: UpdateType,
    pub batch_size: usize,
    /// Per-tensor L2 norm ceiling for gradients
    pub grad_norm_clip: Option<f32>,
    pub momentum: f32,
    /// Decay of running averages (RMSprop, Adadelta)
    pub decay_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Gain of the uniform Glorot initialiser
    pub init_scale: f32,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            input_dim: 1,
            target_dim: 1,
            net_depth: 1,
            net_width: 16,
            unit_type: UnitType::Lstm,
            learn_id_embedding: false,
            id_count: 0,
            id_embedding_dim: 0,
            learn_clock_params: false,
            learn_init_states: false,
            force_type: ForceType::Vanilla,
            update_type: UpdateType::Sgd,
            batch_size: 1,
            grad_norm_clip: None,
            momentum: 0.9,
            decay_rate: 0.95,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-6,
            init_scale: 1.0,
        }
    }
}

impl NetOptions {
    /// Create options for the given input/target widths with defaults elsewhere
    pub fn new(input_dim: usize, target_dim: usize) -> Self {
        Self {
            input_dim,
            target_dim,
            ..Self::default()
        }
    }

    /// Set depth and width of the recurrent stack
    pub fn with_layers(mut self, net_depth: usize, net_width: usize) -> Self {
        self.net_depth = net_depth;
        self.net_width = net_width;
        self
    }

    pub fn with_unit_type(mut self, unit_type: UnitType) -> Self {
        self.unit_type = unit_type;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable a learned identity embedding of `id_count` ids into `dim` features
    pub fn with_id_embedding(mut self, id_count: usize, dim: usize) -> Self {
        self.learn_id_embedding = true;
        self.id_count = id_count;
        self.id_embedding_dim = dim;
        self
    }

    pub fn with_clock_params(mut self, enabled: bool) -> Self {
        self.learn_clock_params = enabled;
        self
    }

    pub fn with_learn_init_states(mut self, enabled: bool) -> Self {
        self.learn_init_states = enabled;
        self
    }

    /// Select the optimizer as a (force, update) pair
    pub fn with_optimizer(mut self, force_type: ForceType, update_type: UpdateType) -> Self {
        self.force_type = force_type;
        self.update_type = update_type;
        self
    }

    pub fn with_grad_norm_clip(mut self, clip: f32) -> Self {
        self.grad_norm_clip = Some(clip);
        self
    }

    pub fn with_init_scale(mut self, init_scale: f32) -> Self {
        self.init_scale = init_scale;
        self
    }

    /// Extra input width every layer receives from the identity embedding
    pub fn id_embedding_width(&self) -> usize {
        if self.learn_id_embedding {
            self.id_embedding_dim
        } else {
            0
        }
    }

    /// Reject option sets that cannot describe a network
    pub fn validate(&self) -> Result<()> {
        if self.net_depth == 0 {
            return Err(NetError::InvalidOption("net_depth must be positive".into()));
        }
        if self.net_width == 0 || self.input_dim == 0 || self.target_dim == 0 {
            return Err(NetError::InvalidOption(
                "net_width, input_dim and target_dim must be positive".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(NetError::InvalidOption("batch_size must be positive".into()));
        }
        if self.learn_id_embedding && (self.id_count == 0 || self.id_embedding_dim == 0) {
            return Err(NetError::InvalidOption(
                "id embedding needs positive id_count and id_embedding_dim".into(),
            ));
        }
        if let Some(clip) = self.grad_norm_clip {
            if !(clip > 0.0) {
                return Err(NetError::InvalidOption(format!(
                    "grad_norm_clip must be positive, got {clip}"
                )));
            }
        }
        Ok(())
    }

    /// Write the option set to `<dir>/options.bin`
    pub fn save(&self, dir: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(dir.join(OPTIONS_FILE))?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Read the option set from `<dir>/options.bin`
    pub fn load(dir: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(dir.join(OPTIONS_FILE))?);
        Ok(bincode::deserialize_from(reader)?)
    }
}
