//! Batch and per-target run state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use semassist_core::{BatchId, RunSnapshot, Target, TargetId};
use semassist_signals::{ComputeError, SignalResult};

/// Per-target status.
///
/// `Pending -> Running -> {Success, Error}`, `Pending -> Success` (cache hit) or
/// `Pending -> Cancelled`. Never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Error | RunStatus::Cancelled
        )
    }
}

impl core::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition for {target}: {from} -> {to}")]
pub struct TransitionError {
    pub target: TargetId,
    pub from: RunStatus,
    pub to: RunStatus,
}

/// State of one target within one batch.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub target: Target,
    pub status: RunStatus,
    pub result: Option<SignalResult>,
    pub error: Option<ComputeError>,
    /// Result was served from the cache without computing.
    pub from_cache: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            status: RunStatus::Pending,
            result: None,
            error: None,
            from_cache: false,
            started_at: None,
            finished_at: None,
        }
    }

    fn check(&self, from: RunStatus, to: RunStatus) -> Result<(), TransitionError> {
        if self.status != from {
            return Err(TransitionError {
                target: self.target.id.clone(),
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    /// Mark as running.
    pub fn mark_running(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(RunStatus::Pending, RunStatus::Running)?;
        self.status = RunStatus::Running;
        self.started_at = Some(at);
        Ok(())
    }

    /// Resolve straight from the cache.
    pub fn mark_cache_hit(
        &mut self,
        result: SignalResult,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check(RunStatus::Pending, RunStatus::Success)?;
        self.status = RunStatus::Success;
        self.result = Some(result);
        self.from_cache = true;
        self.finished_at = Some(at);
        Ok(())
    }

    /// Mark as completed.
    pub fn mark_succeeded(
        &mut self,
        result: SignalResult,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check(RunStatus::Running, RunStatus::Success)?;
        self.status = RunStatus::Success;
        self.result = Some(result);
        self.finished_at = Some(at);
        Ok(())
    }

    /// Mark as failed.
    pub fn mark_failed(
        &mut self,
        error: ComputeError,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check(RunStatus::Running, RunStatus::Error)?;
        self.status = RunStatus::Error;
        self.error = Some(error);
        self.finished_at = Some(at);
        Ok(())
    }

    /// Mark as cancelled (only from pending).
    pub fn mark_cancelled(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(RunStatus::Pending, RunStatus::Cancelled)?;
        self.status = RunStatus::Cancelled;
        self.finished_at = Some(at);
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some((f - s).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// Non-fatal note recorded at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A target id appeared more than once; the occurrence at `position` was dropped.
    Duplicate { target: TargetId, position: usize },
}

/// Counts reported when a batch completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Includes cache hits.
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub cache_hits: usize,
}

/// A batch of targets processed under one snapshot and one concurrency bound.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRun {
    pub id: BatchId,
    pub snapshot: RunSnapshot,
    /// Deduplicated, in admission order.
    pub targets: Vec<Target>,
    pub records: Vec<RunRecord>,
    pub concurrency: usize,
    pub diagnostics: Vec<Diagnostic>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

impl BatchRun {
    /// Build a batch, dropping repeated target ids (first occurrence wins).
    pub fn new(
        id: BatchId,
        snapshot: RunSnapshot,
        targets: Vec<Target>,
        concurrency: usize,
    ) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut kept = Vec::with_capacity(targets.len());
        let mut diagnostics = Vec::new();

        for (position, target) in targets.into_iter().enumerate() {
            if seen.insert(target.id.clone()) {
                kept.push(target);
            } else {
                diagnostics.push(Diagnostic::Duplicate {
                    target: target.id,
                    position,
                });
            }
        }

        let records = kept.iter().cloned().map(RunRecord::new).collect();
        Self {
            id,
            snapshot,
            targets: kept,
            records,
            concurrency,
            diagnostics,
            started_at: Utc::now(),
            completed_at: None,
            cancelled: false,
        }
    }

    pub fn record(&self, target: &TargetId) -> Option<&RunRecord> {
        self.records.iter().find(|r| &r.target.id == target)
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn all_terminal(&self) -> bool {
        self.records.iter().all(|r| r.status.is_terminal())
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Targets that were cancelled before they ever started.
    pub fn never_started(&self) -> Vec<&Target> {
        self.records
            .iter()
            .filter(|r| r.status == RunStatus::Cancelled)
            .map(|r| &r.target)
            .collect()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.records.len(),
            succeeded: self.count(RunStatus::Success),
            failed: self.count(RunStatus::Error),
            cancelled: self.count(RunStatus::Cancelled),
            cache_hits: self.records.iter().filter(|r| r.from_cache).count(),
        }
    }
}

/// One event per state transition, plus a final `BatchCompleted`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        batch_id: BatchId,
        target: Target,
        at: DateTime<Utc>,
    },
    CacheHit {
        batch_id: BatchId,
        target: Target,
        result: SignalResult,
        computed_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Succeeded {
        batch_id: BatchId,
        target: Target,
        result: SignalResult,
        at: DateTime<Utc>,
    },
    Failed {
        batch_id: BatchId,
        target: Target,
        error: ComputeError,
        at: DateTime<Utc>,
    },
    Cancelled {
        batch_id: BatchId,
        target: Target,
        at: DateTime<Utc>,
    },
    BatchCompleted {
        batch_id: BatchId,
        summary: BatchSummary,
        cancelled: bool,
        at: DateTime<Utc>,
    },
}

impl RunEvent {
    pub fn batch_id(&self) -> BatchId {
        match self {
            RunEvent::Started { batch_id, .. }
            | RunEvent::CacheHit { batch_id, .. }
            | RunEvent::Succeeded { batch_id, .. }
            | RunEvent::Failed { batch_id, .. }
            | RunEvent::Cancelled { batch_id, .. }
            | RunEvent::BatchCompleted { batch_id, .. } => *batch_id,
        }
    }

    /// The target this event is about, or `None` for `BatchCompleted`.
    pub fn target(&self) -> Option<&Target> {
        match self {
            RunEvent::Started { target, .. }
            | RunEvent::CacheHit { target, .. }
            | RunEvent::Succeeded { target, .. }
            | RunEvent::Failed { target, .. }
            | RunEvent::Cancelled { target, .. } => Some(target),
            RunEvent::BatchCompleted { .. } => None,
        }
    }

    /// Status the target is in after this event.
    pub fn status(&self) -> Option<RunStatus> {
        match self {
            RunEvent::Started { .. } => Some(RunStatus::Running),
            RunEvent::CacheHit { .. } | RunEvent::Succeeded { .. } => Some(RunStatus::Success),
            RunEvent::Failed { .. } => Some(RunStatus::Error),
            RunEvent::Cancelled { .. } => Some(RunStatus::Cancelled),
            RunEvent::BatchCompleted { .. } => None,
        }
    }

    pub fn is_batch_completed(&self) -> bool {
        matches!(self, RunEvent::BatchCompleted { .. })
    }
}
