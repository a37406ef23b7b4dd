//! Engine-level error model.

use thiserror::Error;

use crate::id::BatchId;

/// Result type used at the engine boundary.
pub type AssistResult<T> = Result<T, AssistError>;

/// Errors surfaced synchronously to callers of the submission/observation API.
///
/// Per-target analysis failures are *not* represented here: they are recorded on the
/// target's run record and reported through the event stream. Cache failures never
/// reach callers at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssistError {
    /// Bad runtime or system parameters, rejected before any work starts.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The batch id is not (or no longer) known to the engine.
    #[error("unknown batch: {0}")]
    UnknownBatch(BatchId),

    /// The batch driver went away before producing a final state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AssistError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
