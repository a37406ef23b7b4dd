//! `semassist-core`: building blocks shared by the semantic assist engine.
//!
//! This crate holds **pure** values only: identifiers, targets, configuration,
//! the run snapshot and the error taxonomy. No IO, no async.

pub mod clock;
pub mod config;
pub mod error;
pub mod id;
pub mod resolver;
pub mod target;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RunSnapshot, RuntimeConfig, SampleRatio, SystemConfig, TemplateId};
pub use error::{AssistError, AssistResult};
pub use id::{BatchId, TargetId};
pub use resolver::ConfigResolver;
pub use target::Target;
