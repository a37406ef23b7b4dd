//! Batch execution: run state, scheduling and progress.
//!
//! ## Components
//!
//! - `BatchRun` / `RunRecord`: per-batch and per-target state, one-directional transitions
//! - `BatchScheduler`: bounded worker pool per batch, cache short-circuit, cooperative cancel
//! - `BatchSubscription`: replay-then-live event feed, ordered per target
//! - `ProgressAggregator`: monotonic progress view folded from events

pub mod progress;
pub mod scheduler;
pub mod types;

pub use progress::{ProgressAggregator, ProgressSnapshot, TargetOutcome};
pub use scheduler::{BatchHandle, BatchScheduler, BatchSubscription};
pub use types::{
    BatchRun, BatchSummary, Diagnostic, RunEvent, RunRecord, RunStatus, TransitionError,
};
