//! Error types for seqnet.

use thiserror::Error;

/// Result type alias for seqnet operations.
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors that can occur while building or driving a [`Net`](crate::Net).
///
/// Every variant is terminal for the operation that raised it; nothing in
/// this crate retries.
#[derive(Error, Debug)]
pub enum NetError {
    /// Resumed training with options that differ from the persisted run.
    #[error("mismatching options in loaded model: {0}")]
    ConfigMismatch(String),

    /// Entry point called in the wrong mode or without the feature it needs.
    #[error("`{op}` is not available: {reason}")]
    ModeViolation { op: &'static str, reason: String },

    /// A required constructor input was not supplied.
    #[error("missing required input: {0}")]
    MissingInput(&'static str),

    /// An option value that cannot describe a network.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// A parameter name was declared twice.
    #[error("duplicate parameter: {0}")]
    DuplicateParam(String),

    /// Parameter archive lacks a key the store declares.
    #[error("missing parameter: {0}")]
    MissingParam(String),

    /// Loaded array does not match the declared parameter shape.
    #[error("shape mismatch for `{name}`: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// A tap index outside the sequence.
    #[error("tap {tap} out of range for sequence of length {len}")]
    TapOutOfRange { tap: usize, len: usize },

    /// Port tensor with the wrong shape.
    #[error("input shape: {0}")]
    InputShape(String),

    /// Entry points invoked out of their required order.
    #[error("call order: {0}")]
    CallOrder(&'static str),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary encoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Tensor data conversion error.
    #[error("serialization error: {0}")]
    Serialization(String),
}
