//! `semassist-engine`
//!
//! **Responsibility:** the semantic assist batch analysis engine.
//!
//! Resolves a run snapshot, schedules signal computations over a set of targets
//! under a concurrency bound, reuses cached results within their TTL, and streams
//! per-target progress to whoever is watching.
//!
//! The engine is advisory: results never gate anything downstream.

pub mod batch;
pub mod cache;
pub mod config;
pub mod engine;

pub use batch::{
    BatchHandle, BatchRun, BatchScheduler, BatchSubscription, BatchSummary, Diagnostic,
    ProgressAggregator, ProgressSnapshot, RunEvent, RunRecord, RunStatus, TargetOutcome,
};
pub use cache::{CacheEntry, CacheError, CacheKey, CacheStore, FileCacheStore, InMemoryCacheStore};
pub use config::EngineConfig;
pub use engine::AssistEngine;
