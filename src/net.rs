//! Network lifecycle
//!
//! [`NetBuilder`] resolves the run mode and option set, lays out the
//! parameters and allocates every backing buffer a [`Net`] needs. The
//! entry points that drive a built net live in [`functions`](crate::functions).
//!
//! ## Modes
//!
//! | Mode | Chosen when | Options from | Name prefix |
//! |------|-------------|--------------|-------------|
//! | [`Mode::Training`] | `save_to` is set | caller (checked against `load_from`) | empty |
//! | [`Mode::Inference`] | `save_to` is unset | `<load_from>/options.bin` | `<random>_<counter>_` |
//!
//! ## Example
//!
//! ```rust,no_run
//! use burn::backend::{Autodiff, NdArray};
//! use seqnet::prelude::*;
//!
//! type Backend = Autodiff<NdArray<f32>>;
//!
//! let device = Default::default();
//! let options = NetOptions::new(3, 1).with_layers(2, 16).with_batch_size(4);
//! let net = NetBuilder::new()
//!     .with_options(options)
//!     .save_to("runs/demo")
//!     .build::<Backend>(&device)?;
//! assert_eq!(net.dimensions(), (3, 1));
//! # Ok::<(), seqnet::NetError>(())
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use crate::error::{NetError, Result};
use crate::layers::{LayerStack, StateSpec};
use crate::optim::Optimizer;
use crate::options::NetOptions;
use crate::params::{self, archive_path, ParamStore};

/// Plain backend underneath an autodiff backend; all buffers live here.
pub type Inner<B> = <B as AutodiffBackend>::InnerBackend;

static INSTANCE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Process-unique name prefix for an inference instance
fn instance_prefix() -> String {
    let tag: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let count = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{tag}_{count}_")
}

/// Run mode of a [`Net`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Training,
    Inference,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Training => write!(f, "training"),
            Mode::Inference => write!(f, "inference"),
        }
    }
}

/// Gradient accumulators and optimizer for one group of parameters
#[derive(Debug, Clone)]
pub(crate) struct GradGroup<I: burn::tensor::backend::Backend> {
    /// Store positions of the parameters this group updates
    pub(crate) positions: Vec<usize>,
    pub(crate) grads: Vec<Tensor<I, 2>>,
    pub(crate) optimizer: Optimizer<I>,
    /// Set by a forward-backward pass, cleared by the matching update
    pub(crate) pending: bool,
}

/// Buffers that exist only in training mode
#[derive(Debug, Clone)]
pub(crate) struct TrainState<I: burn::tensor::backend::Backend> {
    pub(crate) params: GradGroup<I>,
    /// Present with learnable initial states; gradients are `[batch, S]` per
    /// carried state, positions point at the matching `_init` parameters.
    pub(crate) init: Option<GradGroup<I>>,
}

/// Builder for [`Net`].
///
/// Setting [`save_to`](Self::save_to) selects training mode; otherwise the
/// net is built for inference from [`load_from`](Self::load_from).
#[derive(Debug, Clone, Default)]
pub struct NetBuilder {
    options: Option<NetOptions>,
    save_to: Option<PathBuf>,
    load_from: Option<PathBuf>,
    batch_size: Option<usize>,
}

impl NetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: NetOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Run directory of a training run
    pub fn save_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_to = Some(dir.into());
        self
    }

    /// Directory holding `options.bin` and `params.bin` of an earlier run
    pub fn load_from(mut self, dir: impl Into<PathBuf>) -> Self {
        self.load_from = Some(dir.into());
        self
    }

    /// Batch size for inference; overrides the persisted one
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Resolve mode, options and prefix.
    ///
    /// Nothing beyond `options.bin` is read or written here, so a mismatching
    /// resume fails before any parameter is touched.
    fn configure(&self) -> Result<(Mode, NetOptions, String)> {
        match &self.save_to {
            Some(save_to) => {
                let options = self
                    .options
                    .clone()
                    .ok_or(NetError::MissingInput("options"))?;
                if let Some(load_from) = &self.load_from {
                    let persisted = NetOptions::load(load_from)?;
                    if persisted != options {
                        return Err(NetError::ConfigMismatch(format!(
                            "{} was written with {persisted:?}, got {options:?}",
                            load_from.display()
                        )));
                    }
                }
                options.validate()?;
                fs::create_dir_all(save_to)?;
                options.save(save_to)?;
                debug!("persisted options to {}", save_to.display());
                Ok((Mode::Training, options, String::new()))
            }
            None => {
                let load_from = self
                    .load_from
                    .as_ref()
                    .ok_or(NetError::MissingInput("load_from"))?;
                let batch_size = self
                    .batch_size
                    .or(self.options.as_ref().map(|o| o.batch_size))
                    .ok_or(NetError::MissingInput("batch_size"))?;
                let mut options = NetOptions::load(load_from)?;
                options.batch_size = batch_size;
                options.validate()?;
                Ok((Mode::Inference, options, instance_prefix()))
            }
        }
    }

    /// Build the net on `device`
    pub fn build<B: AutodiffBackend>(self, device: &B::Device) -> Result<Net<B>> {
        let (mode, options, prefix) = self.configure()?;

        let mut stack = LayerStack::new(&options, &prefix);
        let mut store = ParamStore::<Inner<B>>::new(prefix.clone());
        stack.instantiate(&mut store, &options, device)?;

        if let Some(load_from) = &self.load_from {
            let path = archive_path(load_from, None);
            store.load(&path, device)?;
            debug!("loaded {} parameters from {}", store.len(), path.display());
        }

        let prev_states = stack
            .states()
            .iter()
            .map(|spec| Tensor::zeros([options.batch_size, spec.width], device))
            .collect();

        let training = match mode {
            Mode::Training => Some(train_state(&options, &stack, &store, device)?),
            Mode::Inference => None,
        };

        info!(
            "built {} net: {} parameters, {} carried states, prefix {:?}",
            mode,
            store.len(),
            stack.states().len(),
            prefix
        );

        Ok(Net {
            options,
            mode,
            save_to: self.save_to,
            device: device.clone(),
            stack,
            store,
            prev_states,
            training,
        })
    }
}

fn train_state<I: burn::tensor::backend::Backend>(
    options: &NetOptions,
    stack: &LayerStack,
    store: &ParamStore<I>,
    device: &I::Device,
) -> Result<TrainState<I>> {
    let positions = store.optimizable_positions();
    let shapes: Vec<[usize; 2]> = positions.iter().map(|&p| store.value(p).dims()).collect();
    let params = GradGroup {
        grads: shapes.iter().map(|&shape| Tensor::zeros(shape, device)).collect(),
        optimizer: Optimizer::new(options, shapes, device),
        positions,
        pending: false,
    };

    let init = if options.learn_init_states {
        let positions = stack
            .states()
            .iter()
            .map(|spec| {
                store
                    .position(&spec.init_name)
                    .ok_or_else(|| NetError::MissingParam(spec.init_name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        let shapes: Vec<[usize; 2]> = stack.states().iter().map(|s| [1, s.width]).collect();
        Some(GradGroup {
            grads: stack
                .states()
                .iter()
                .map(|s| Tensor::zeros([options.batch_size, s.width], device))
                .collect(),
            optimizer: Optimizer::new(options, shapes, device),
            positions,
            pending: false,
        })
    } else {
        None
    };

    Ok(TrainState { params, init })
}

/// A configured network with all of its backing buffers.
///
/// `B` is the autodiff backend used for forward-backward passes. Parameters,
/// carried states, gradients and optimizer state are stored on its inner
/// backend.
#[derive(Debug)]
pub struct Net<B: AutodiffBackend> {
    pub(crate) options: NetOptions,
    pub(crate) mode: Mode,
    pub(crate) save_to: Option<PathBuf>,
    pub(crate) device: B::Device,
    pub(crate) stack: LayerStack,
    pub(crate) store: ParamStore<Inner<B>>,
    pub(crate) prev_states: Vec<Tensor<Inner<B>, 2>>,
    pub(crate) training: Option<TrainState<Inner<B>>>,
}

impl<B: AutodiffBackend> Net<B> {
    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Name prefix of this instance; empty in training mode
    pub fn prefix(&self) -> &str {
        self.store.prefix()
    }

    /// `(input_dim, target_dim)`
    pub fn dimensions(&self) -> (usize, usize) {
        (self.options.input_dim, self.options.target_dim)
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn params(&self) -> &ParamStore<Inner<B>> {
        &self.store
    }

    /// Current value of a parameter by its un-prefixed name
    pub fn param(&self, name: &str) -> Option<Tensor<Inner<B>, 2>> {
        self.store.get(&format!("{}{name}", self.prefix())).cloned()
    }

    /// Carried-state declarations, aligned with [`prev_states`](Self::prev_states)
    pub fn state_specs(&self) -> &[StateSpec] {
        self.stack.states()
    }

    /// Carried state of every stateful layer, `[batch_size, S]` each
    pub fn prev_states(&self) -> &[Tensor<Inner<B>, 2>] {
        &self.prev_states
    }

    /// Latest gradient of an optimisable parameter, by un-prefixed name
    pub fn gradient(&self, name: &str) -> Option<Tensor<Inner<B>, 2>> {
        let group = &self.training.as_ref()?.params;
        let position = self.store.position(&format!("{}{name}", self.prefix()))?;
        group
            .positions
            .iter()
            .position(|&p| p == position)
            .map(|i| group.grads[i].clone())
    }

    /// Latest gradients w.r.t. the carried states, one per stateful layer
    pub fn init_state_gradients(&self) -> Option<&[Tensor<Inner<B>, 2>]> {
        self.training
            .as_ref()?
            .init
            .as_ref()
            .map(|group| group.grads.as_slice())
    }

    /// Steps taken by the parameter optimizer since its last initialisation
    pub fn optimizer_steps(&self) -> Option<usize> {
        self.training.as_ref().map(|t| t.params.optimizer.steps())
    }

    pub(crate) fn require_mode(&self, op: &'static str, mode: Mode) -> Result<()> {
        if self.mode != mode {
            return Err(NetError::ModeViolation {
                op,
                reason: format!("requires {mode} mode, net is in {} mode", self.mode),
            });
        }
        Ok(())
    }

    fn workspace(&self, op: &'static str) -> Result<&Path> {
        self.require_mode(op, Mode::Training)?;
        self.save_to
            .as_deref()
            .ok_or(NetError::MissingInput("save_to"))
    }

    /// Write all parameters to `<save_to>/<name>.bin` (default `params`)
    pub fn save_v_params_to_workspace(&self, name: Option<&str>) -> Result<PathBuf> {
        let path = archive_path(self.workspace("save_v_params_to_workspace")?, name);
        self.store.save(&path)?;
        info!("saved {} parameters to {}", self.store.len(), path.display());
        Ok(path)
    }

    /// Overwrite all parameters from `<save_to>/<name>.bin`
    pub fn load_v_params_from_workspace(&mut self, name: Option<&str>) -> Result<()> {
        let path = archive_path(self.workspace("load_v_params_from_workspace")?, name);
        self.store.load(&path, &self.device)?;
        info!("loaded parameters from {}", path.display());
        Ok(())
    }

    /// Delete `<save_to>/<name>.bin`
    pub fn remove_params_file_from_workspace(&self, name: Option<&str>) -> Result<()> {
        let path = archive_path(self.workspace("remove_params_file_from_workspace")?, name);
        fs::remove_file(&path)?;
        debug!("removed {}", path.display());
        Ok(())
    }

    /// Export one parameter, by un-prefixed name, into its own archive
    pub fn save_param(&self, name: &str, file: &Path) -> Result<()> {
        self.require_mode("save_param", Mode::Inference)?;
        let value = self
            .param(name)
            .ok_or_else(|| NetError::MissingParam(name.to_string()))?;
        let mut archive = params::Archive::new();
        archive.insert(name.to_string(), params::tensor_to_array(&value)?);
        params::write_archive(file, &archive)?;
        debug!("exported {name} to {}", file.display());
        Ok(())
    }

    /// Change the batch size of an inference net.
    ///
    /// Carried states are re-derived through
    /// [`initialize_states`](Self::initialize_states).
    pub fn resize_batch(&mut self, batch_size: usize) -> Result<()> {
        self.require_mode("resize_batch", Mode::Inference)?;
        if batch_size == 0 {
            return Err(NetError::InvalidOption("batch_size must be positive".into()));
        }
        self.options.batch_size = batch_size;
        self.initialize_states()
    }
}
