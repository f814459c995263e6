use std::fmt;

/// Errors produced by the attention runtime.
#[derive(Debug, thiserror::Error)]
pub enum KoreError {
    /// Shape, rank or dimension violation, or an incompatible input combination.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("storage error: {0}")]
    StorageError(String),

    /// A required output slot was not provided by the caller.
    ///
    /// This is a contract violation by the surrounding engine, not bad user
    /// input; callers must abort the current execution.
    #[error("missing required output '{0}'")]
    MissingOutput(String),

    #[error("graph error: {0}")]
    GraphError(String),

    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

impl KoreError {
    /// Build an [`KoreError::InvalidArgument`] from any displayable message.
    pub fn invalid_argument(msg: impl fmt::Display) -> Self {
        KoreError::InvalidArgument(msg.to_string())
    }

    /// Whether the error is unrecoverable for the current execution.
    pub fn is_fatal(&self) -> bool {
        matches!(self, KoreError::MissingOutput(_))
    }
}

/// Return early with [`KoreError::InvalidArgument`] when `cond` holds.
///
/// ```
/// # use kore_core::{invalid_if, Result};
/// fn check(rank: usize) -> Result<()> {
///     invalid_if!(rank != 3, "Input 'input' is expected to have 3 dimensions, got {}", rank);
///     Ok(())
/// }
/// assert!(check(2).is_err());
/// ```
#[macro_export]
macro_rules! invalid_if {
    ($cond:expr, $($arg:tt)+) => {
        if $cond {
            return Err($crate::KoreError::InvalidArgument(format!($($arg)+)));
        }
    };
}
