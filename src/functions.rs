//! # Entry points
//!
//! The operations a caller drives a [`Net`] with. Each one reads its ports,
//! runs a pure forward (and possibly backward) computation and writes the
//! results back into the net's buffers.
//!
//! | Entry point | Mode | Writes |
//! |-------------|------|--------|
//! | [`initialize_states`](Net::initialize_states) | both | carried states |
//! | [`fwd_propagate`](Net::fwd_propagate) | training | carried states |
//! | [`fwd_propagate_inference`](Net::fwd_propagate_inference) | inference | carried states |
//! | [`fwd_bwd_propagate`](Net::fwd_bwd_propagate) | training | gradients, carried states |
//! | [`update_v_params`](Net::update_v_params) | training | parameters, optimizer state |
//! | [`fwd_bwd_for_init`](Net::fwd_bwd_for_init) | training, init states | gradients, init-state gradients, carried states |
//! | [`update_init_states`](Net::update_init_states) | training, init states | `_init` parameters, optimizer state |
//! | [`initialize_optimizer`](Net::initialize_optimizer) | training | optimizer state |
//!
//! A chunked training loop looks like:
//!
//! ```text
//! initialize_states
//! for chunk in sequence:
//!     fwd_bwd_propagate(chunk)    (or fwd_bwd_for_init on the first chunk)
//!     update_v_params(lr)
//!     update_init_states(lr)      (after fwd_bwd_for_init only)
//! ```
//!
//! The `time` and `id_idx` ports are always accepted. They are only read,
//! and only validated, when clock parameters or the identity embedding are
//! enabled.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor};
use tracing::debug;

use crate::error::{NetError, Result};
use crate::graph::{forward, grads, loss, ForwardInputs};
use crate::net::{Inner, Mode, Net};

/// Entry points of a [`Net`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    InitializeStates,
    FwdPropagate,
    FwdPropagateInference,
    FwdBwdPropagate,
    UpdateVParams,
    FwdBwdForInit,
    UpdateInitStates,
    InitializeOptimizer,
}

impl Function {
    pub const ALL: [Function; 8] = [
        Function::InitializeStates,
        Function::FwdPropagate,
        Function::FwdPropagateInference,
        Function::FwdBwdPropagate,
        Function::UpdateVParams,
        Function::FwdBwdForInit,
        Function::UpdateInitStates,
        Function::InitializeOptimizer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Function::InitializeStates => "initialize_states",
            Function::FwdPropagate => "fwd_propagate",
            Function::FwdPropagateInference => "fwd_propagate_inference",
            Function::FwdBwdPropagate => "fwd_bwd_propagate",
            Function::UpdateVParams => "update_v_params",
            Function::FwdBwdForInit => "fwd_bwd_for_init",
            Function::UpdateInitStates => "update_init_states",
            Function::InitializeOptimizer => "initialize_optimizer",
        }
    }

    /// Mode the entry point runs in; `None` for both
    pub fn mode(&self) -> Option<Mode> {
        match self {
            Function::InitializeStates => None,
            Function::FwdPropagateInference => Some(Mode::Inference),
            _ => Some(Mode::Training),
        }
    }

    /// Whether the entry point only exists with learnable initial states
    pub fn needs_init_states(&self) -> bool {
        matches!(self, Function::FwdBwdForInit | Function::UpdateInitStates)
    }
}

/// What a port carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// `[seq_len, batch, features]` float
    Sequence,
    /// `[seq_len]` float
    Time,
    /// `[batch]` int
    Index,
    /// Single integer
    Tap,
    /// Single float
    Scalar,
}

/// A declared input slot of an entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub name: &'static str,
    pub kind: PortKind,
    /// `false` when the port is accepted but ignored under the current options
    pub consumed: bool,
}

impl Port {
    fn new(name: &'static str, kind: PortKind, consumed: bool) -> Self {
        Self { name, kind, consumed }
    }
}

/// Ports of the training forward entry points.
#[derive(Debug, Clone)]
pub struct TrainBatch<I: Backend> {
    /// `[seq_len, batch, input_dim]`
    pub input: Tensor<I, 3>,
    /// `[seq_len, batch, target_dim]`
    pub target: Tensor<I, 3>,
    /// `[seq_len]`
    pub time: Option<Tensor<I, 1>>,
    /// `[batch]`
    pub id_idx: Option<Tensor<I, 1, Int>>,
    /// Step whose state is carried into the next chunk; defaults to the last
    pub last_tap: Option<usize>,
    /// First step that contributes to the loss
    pub loss_tap: usize,
}

impl<I: Backend> TrainBatch<I> {
    pub fn new(input: Tensor<I, 3>, target: Tensor<I, 3>) -> Self {
        Self {
            input,
            target,
            time: None,
            id_idx: None,
            last_tap: None,
            loss_tap: 0,
        }
    }

    pub fn with_time(mut self, time: Tensor<I, 1>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_id_idx(mut self, id_idx: Tensor<I, 1, Int>) -> Self {
        self.id_idx = Some(id_idx);
        self
    }

    pub fn with_last_tap(mut self, last_tap: usize) -> Self {
        self.last_tap = Some(last_tap);
        self
    }

    pub fn with_loss_tap(mut self, loss_tap: usize) -> Self {
        self.loss_tap = loss_tap;
        self
    }
}

/// Ports of [`Net::fwd_propagate_inference`]
#[derive(Debug, Clone)]
pub struct InferBatch<I: Backend> {
    pub input: Tensor<I, 3>,
    pub time: Option<Tensor<I, 1>>,
    pub id_idx: Option<Tensor<I, 1, Int>>,
}

impl<I: Backend> InferBatch<I> {
    pub fn new(input: Tensor<I, 3>) -> Self {
        Self {
            input,
            time: None,
            id_idx: None,
        }
    }

    pub fn with_time(mut self, time: Tensor<I, 1>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_id_idx(mut self, id_idx: Tensor<I, 1, Int>) -> Self {
        self.id_idx = Some(id_idx);
        self
    }
}

impl<B: burn::tensor::backend::AutodiffBackend> Net<B> {
    /// Declared ports of `function` under the current options
    pub fn ports(&self, function: Function) -> Vec<Port> {
        let clock = self.options.learn_clock_params;
        let ids = self.options.learn_id_embedding;
        let forward = |target: bool| {
            let mut ports = vec![Port::new("input", PortKind::Sequence, true)];
            if target {
                ports.push(Port::new("target", PortKind::Sequence, true));
            }
            ports.push(Port::new("time", PortKind::Time, clock));
            ports.push(Port::new("id_idx", PortKind::Index, ids));
            if target {
                ports.push(Port::new("last_tap", PortKind::Tap, true));
                ports.push(Port::new("loss_tap", PortKind::Tap, true));
            }
            ports
        };

        match function {
            Function::InitializeStates | Function::InitializeOptimizer => Vec::new(),
            Function::FwdPropagateInference => forward(false),
            Function::FwdPropagate | Function::FwdBwdPropagate | Function::FwdBwdForInit => {
                forward(true)
            }
            Function::UpdateVParams | Function::UpdateInitStates => {
                vec![Port::new("lr", PortKind::Scalar, true)]
            }
        }
    }

    /// Whether `function` may be invoked on this net
    pub fn require(&self, function: Function) -> Result<()> {
        if let Some(mode) = function.mode() {
            self.require_mode(function.name(), mode)?;
        }
        if function.needs_init_states() && !self.options.learn_init_states {
            return Err(NetError::ModeViolation {
                op: function.name(),
                reason: "learnable initial states are disabled".into(),
            });
        }
        Ok(())
    }

    /// Reset every carried state to zeros, or to its `_init` row tiled over
    /// the batch when initial states are learned.
    pub fn initialize_states(&mut self) -> Result<()> {
        self.require(Function::InitializeStates)?;
        let batch = self.options.batch_size;
        let mut states = Vec::with_capacity(self.stack.states().len());
        for spec in self.stack.states() {
            let state = if self.options.learn_init_states {
                let init = self
                    .store
                    .get(&spec.init_name)
                    .ok_or_else(|| NetError::MissingParam(spec.init_name.clone()))?;
                init.clone().repeat_dim(0, batch)
            } else {
                Tensor::zeros([batch, spec.width], &self.device)
            };
            states.push(state);
        }
        self.prev_states = states;
        debug!("initialized {} carried states", self.prev_states.len());
        Ok(())
    }

    /// Check the shared ports and fill in the ones a disabled feature ignores
    fn resolve_ports(
        &self,
        input: &Tensor<Inner<B>, 3>,
        time: Option<Tensor<Inner<B>, 1>>,
        id_idx: Option<Tensor<Inner<B>, 1, Int>>,
    ) -> Result<(Tensor<Inner<B>, 1>, Tensor<Inner<B>, 1, Int>)> {
        let [seq_len, batch, features] = input.dims();
        if seq_len == 0 {
            return Err(NetError::InputShape("input has no time steps".into()));
        }
        if batch != self.options.batch_size || features != self.options.input_dim {
            return Err(NetError::InputShape(format!(
                "input {:?}, expected [_, {}, {}]",
                input.dims(),
                self.options.batch_size,
                self.options.input_dim
            )));
        }

        let time = match time {
            Some(time) if self.options.learn_clock_params => {
                if time.dims() != [seq_len] {
                    return Err(NetError::InputShape(format!(
                        "time {:?}, expected [{seq_len}]",
                        time.dims()
                    )));
                }
                time
            }
            None if self.options.learn_clock_params => return Err(NetError::MissingInput("time")),
            _ => Tensor::zeros([seq_len], &self.device),
        };

        let id_idx = match id_idx {
            Some(id_idx) if self.options.learn_id_embedding => {
                if id_idx.dims() != [batch] {
                    return Err(NetError::InputShape(format!(
                        "id_idx {:?}, expected [{batch}]",
                        id_idx.dims()
                    )));
                }
                let lowest = id_idx.clone().min().into_scalar().elem::<i64>();
                let highest = id_idx.clone().max().into_scalar().elem::<i64>();
                if lowest < 0 || highest >= self.options.id_count as i64 {
                    return Err(NetError::InputShape(format!(
                        "id_idx values must lie in 0..{}, found {lowest}..={highest}",
                        self.options.id_count
                    )));
                }
                id_idx
            }
            None if self.options.learn_id_embedding => {
                return Err(NetError::MissingInput("id_idx"))
            }
            _ => Tensor::zeros([batch], &self.device),
        };

        Ok((time, id_idx))
    }

    fn last_tap(batch: &TrainBatch<Inner<B>>) -> Result<usize> {
        let seq_len = batch.input.dims()[0];
        let tap = batch.last_tap.unwrap_or(seq_len.saturating_sub(1));
        if tap >= seq_len {
            return Err(NetError::TapOutOfRange { tap, len: seq_len });
        }
        Ok(tap)
    }

    /// Forward pass with loss; carried states advance to `last_tap`
    pub fn fwd_propagate(&mut self, batch: TrainBatch<Inner<B>>) -> Result<f32> {
        self.require(Function::FwdPropagate)?;
        let tap = Self::last_tap(&batch)?;
        let TrainBatch {
            input,
            target,
            time,
            id_idx,
            loss_tap,
            ..
        } = batch;
        let (time, id_idx) = self.resolve_ports(&input, time, id_idx)?;

        let view = self.store.view(|value| value.clone());
        let graph = forward::build(
            &self.stack,
            &self.options,
            ForwardInputs { input, time, id_idx },
            tap,
            &view,
            &self.prev_states,
        )?;
        let loss = loss::mse_from(graph.output, target, loss_tap)?
            .into_scalar()
            .elem::<f32>();

        for update in graph.state_updates {
            self.prev_states[update.slot] = update.value;
        }
        Ok(loss)
    }

    /// Forward pass over a chunk, returning `[seq_len, batch, target_dim]`.
    /// Carried states advance to the last step.
    pub fn fwd_propagate_inference(
        &mut self,
        batch: InferBatch<Inner<B>>,
    ) -> Result<Tensor<Inner<B>, 3>> {
        self.require(Function::FwdPropagateInference)?;
        let InferBatch { input, time, id_idx } = batch;
        let tap = input.dims()[0].saturating_sub(1);
        let (time, id_idx) = self.resolve_ports(&input, time, id_idx)?;

        let view = self.store.view(|value| value.clone());
        let graph = forward::build(
            &self.stack,
            &self.options,
            ForwardInputs { input, time, id_idx },
            tap,
            &view,
            &self.prev_states,
        )?;

        for update in graph.state_updates {
            self.prev_states[update.slot] = update.value;
        }
        Ok(graph.output)
    }

    /// Forward pass with loss, then overwrite the gradient accumulators
    pub fn fwd_bwd_propagate(&mut self, batch: TrainBatch<Inner<B>>) -> Result<f32> {
        self.require(Function::FwdBwdPropagate)?;
        self.run_backward(batch, false)
    }

    /// As [`fwd_bwd_propagate`](Self::fwd_bwd_propagate), and additionally
    /// record gradients w.r.t. the carried states the chunk started from.
    pub fn fwd_bwd_for_init(&mut self, batch: TrainBatch<Inner<B>>) -> Result<f32> {
        self.require(Function::FwdBwdForInit)?;
        self.run_backward(batch, true)
    }

    fn run_backward(&mut self, batch: TrainBatch<Inner<B>>, for_init: bool) -> Result<f32> {
        let tap = Self::last_tap(&batch)?;
        let TrainBatch {
            input,
            target,
            time,
            id_idx,
            loss_tap,
            ..
        } = batch;
        let (time, id_idx) = self.resolve_ports(&input, time, id_idx)?;

        let inputs = ForwardInputs {
            input: Tensor::<B, 3>::from_inner(input),
            time: Tensor::<B, 1>::from_inner(time),
            id_idx: Tensor::<B, 1, Int>::from_inner(id_idx),
        };
        let view = self
            .store
            .view(|value| Tensor::<B, 2>::from_inner(value.clone()).require_grad());
        let states: Vec<Tensor<B, 2>> = self
            .prev_states
            .iter()
            .map(|state| {
                let state = Tensor::from_inner(state.clone());
                if for_init {
                    state.require_grad()
                } else {
                    state
                }
            })
            .collect();

        let graph = forward::build(&self.stack, &self.options, inputs, tap, &view, &states)?;
        let loss = loss::mse_from(graph.output, Tensor::from_inner(target), loss_tap)?;
        let value = loss.clone().into_scalar().elem::<f32>();
        let gradients = loss.backward();

        let clip = self.options.grad_norm_clip;
        let train = self.training.as_mut().ok_or(NetError::ModeViolation {
            op: "fwd_bwd_propagate",
            reason: "no training buffers".into(),
        })?;

        let leaves: Vec<Tensor<B, 2>> = train
            .params
            .positions
            .iter()
            .map(|&p| view.value(p).clone())
            .collect();
        train.params.grads = grads::collect::<B>(&leaves, &gradients, clip);
        train.params.pending = true;

        if for_init {
            if let Some(init) = train.init.as_mut() {
                init.grads = grads::collect::<B>(&states, &gradients, clip);
                init.pending = true;
            }
        }

        for update in graph.state_updates {
            self.prev_states[update.slot] = update.value.inner();
        }
        debug!(loss = value, for_init, "forward-backward pass");
        Ok(value)
    }

    /// Apply the optimizer to every optimisable parameter using the latest
    /// gradients
    pub fn update_v_params(&mut self, lr: f32) -> Result<()> {
        self.require(Function::UpdateVParams)?;
        let Some(train) = self.training.as_mut() else {
            return Err(NetError::MissingInput("training buffers"));
        };
        let group = &mut train.params;
        if !group.pending {
            return Err(NetError::CallOrder(
                "update_v_params needs a forward-backward pass since the last update",
            ));
        }

        let params: Vec<_> = group
            .positions
            .iter()
            .map(|&p| self.store.value(p).clone())
            .collect();
        let updated = group.optimizer.step(&self.options, lr, &params, &group.grads);
        for (&position, value) in group.positions.iter().zip(updated) {
            self.store.set(position, value);
        }
        group.pending = false;
        Ok(())
    }

    /// Apply the second optimizer to the `_init` parameters using the batch
    /// mean of the carried-state gradients
    pub fn update_init_states(&mut self, lr: f32) -> Result<()> {
        self.require(Function::UpdateInitStates)?;
        let Some(group) = self.training.as_mut().and_then(|t| t.init.as_mut()) else {
            return Err(NetError::MissingInput("init-state buffers"));
        };
        if !group.pending {
            return Err(NetError::CallOrder(
                "update_init_states needs fwd_bwd_for_init since the last update",
            ));
        }

        let params: Vec<_> = group
            .positions
            .iter()
            .map(|&p| self.store.value(p).clone())
            .collect();
        let grads: Vec<_> = group.grads.iter().map(|g| g.clone().mean_dim(0)).collect();
        let updated = group.optimizer.step(&self.options, lr, &params, &grads);
        for (&position, value) in group.positions.iter().zip(updated) {
            self.store.set(position, value);
        }
        group.pending = false;
        Ok(())
    }

    /// Reset the state of both optimizers
    pub fn initialize_optimizer(&mut self) -> Result<()> {
        self.require(Function::InitializeOptimizer)?;
        if let Some(train) = self.training.as_mut() {
            train.params.optimizer.initialize();
            if let Some(init) = train.init.as_mut() {
                init.optimizer.initialize();
            }
        }
        debug!("optimizer state reset");
        Ok(())
    }
}
