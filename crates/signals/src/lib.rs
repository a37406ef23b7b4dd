//! `semassist-signals`
//!
//! **Responsibility:** the analysis boundary of the engine.
//!
//! - [`SignalComputer`] is the only call-out the scheduler makes to analysis code.
//! - Signals are *advisory*: nothing here gates or approves anything.
//! - [`ProfileSignalComputer`] is a deterministic reference implementation driven by
//!   pre-aggregated column statistics.

pub mod computer;
pub mod profile;
pub mod result;
pub mod review;

pub use computer::SignalComputer;
pub use profile::{
    ColumnProfile, InMemoryProfileSource, ProfileSignalComputer, ProfileSource, TableProfile,
};
pub use result::{ColumnSignal, ComputeError, SignalResult};
pub use review::{HIGH_CONFIDENCE_CUTOFF, LOW_CONFIDENCE_CUTOFF, ReviewBand, needs_review};
