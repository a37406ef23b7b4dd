//! Progress view derived from a batch's event stream.
//!
//! Read-only, eventually consistent, and monotonic: `completed` never goes down and
//! `results` only grows, in event-arrival order.

use std::collections::HashSet;

use serde::Serialize;

use semassist_core::{BatchId, Target, TargetId};
use semassist_signals::{ComputeError, SignalResult, needs_review};

use super::scheduler::BatchSubscription;
use super::types::{RunEvent, RunStatus};

/// Final outcome of one target as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetOutcome {
    pub target: Target,
    pub status: RunStatus,
    pub result: Option<SignalResult>,
    pub error: Option<ComputeError>,
    pub from_cache: bool,
    /// Presentational flag: quality score below the high-confidence cutoff.
    pub needs_review: bool,
}

impl TargetOutcome {
    fn new(
        target: Target,
        status: RunStatus,
        result: Option<SignalResult>,
        error: Option<ComputeError>,
        from_cache: bool,
    ) -> Self {
        let needs_review = result.as_ref().is_some_and(needs_review);
        Self {
            target,
            status,
            result,
            error,
            from_cache,
            needs_review,
        }
    }
}

/// Point-in-time progress of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub batch_id: BatchId,
    pub total: usize,
    pub completed: usize,
    /// Most recently started target that is still running.
    pub currently_running: Option<Target>,
    /// All running targets, in start order.
    pub running: Vec<Target>,
    pub results: Vec<TargetOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub cache_hits: usize,
    pub finished: bool,
}

impl ProgressSnapshot {
    /// Completed share in \[0, 1\]. An empty batch is fully complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total as f64
    }
}

/// Folds [`RunEvent`]s into a [`ProgressSnapshot`].
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    batch_id: BatchId,
    total: usize,
    running: Vec<Target>,
    results: Vec<TargetOutcome>,
    settled: HashSet<TargetId>,
    succeeded: usize,
    failed: usize,
    cancelled: usize,
    cache_hits: usize,
    finished: bool,
}

impl ProgressAggregator {
    pub fn new(batch_id: BatchId, total: usize) -> Self {
        Self {
            batch_id,
            total,
            running: Vec::new(),
            results: Vec::new(),
            settled: HashSet::new(),
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            cache_hits: 0,
            finished: false,
        }
    }

    /// Apply one event. Events for other batches, repeated terminal events and
    /// `Started` after settlement are ignored.
    pub fn apply(&mut self, event: &RunEvent) {
        if event.batch_id() != self.batch_id {
            return;
        }

        match event {
            RunEvent::Started { target, .. } => {
                if !self.settled.contains(&target.id) && !self.running.contains(target) {
                    self.running.push(target.clone());
                }
            }
            RunEvent::CacheHit { target, result, .. } => {
                if self.settle(target) {
                    self.succeeded += 1;
                    self.cache_hits += 1;
                    self.results.push(TargetOutcome::new(
                        target.clone(),
                        RunStatus::Success,
                        Some(result.clone()),
                        None,
                        true,
                    ));
                }
            }
            RunEvent::Succeeded { target, result, .. } => {
                if self.settle(target) {
                    self.succeeded += 1;
                    self.results.push(TargetOutcome::new(
                        target.clone(),
                        RunStatus::Success,
                        Some(result.clone()),
                        None,
                        false,
                    ));
                }
            }
            RunEvent::Failed { target, error, .. } => {
                if self.settle(target) {
                    self.failed += 1;
                    self.results.push(TargetOutcome::new(
                        target.clone(),
                        RunStatus::Error,
                        None,
                        Some(error.clone()),
                        false,
                    ));
                }
            }
            RunEvent::Cancelled { target, .. } => {
                if self.settle(target) {
                    self.cancelled += 1;
                    self.results.push(TargetOutcome::new(
                        target.clone(),
                        RunStatus::Cancelled,
                        None,
                        None,
                        false,
                    ));
                }
            }
            RunEvent::BatchCompleted { .. } => {
                self.finished = true;
                self.running.clear();
            }
        }
    }

    /// Record `target` as terminal; false if it already was.
    fn settle(&mut self, target: &Target) -> bool {
        if !self.settled.insert(target.id.clone()) {
            return false;
        }
        self.running.retain(|t| t != target);
        true
    }

    pub fn completed(&self) -> usize {
        self.settled.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            batch_id: self.batch_id,
            total: self.total,
            completed: self.completed(),
            currently_running: self.running.last().cloned(),
            running: self.running.clone(),
            results: self.results.clone(),
            succeeded: self.succeeded,
            failed: self.failed,
            cancelled: self.cancelled,
            cache_hits: self.cache_hits,
            finished: self.finished,
        }
    }

    /// Drain a subscription to its end, folding every event. Returns the final view.
    pub async fn follow(&mut self, subscription: &mut BatchSubscription) -> ProgressSnapshot {
        while let Some(event) = subscription.recv().await {
            self.apply(&event);
        }
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::super::types::BatchSummary;
    use super::*;

    fn started(batch_id: BatchId, id: &str) -> RunEvent {
        RunEvent::Started {
            batch_id,
            target: Target::new(id),
            at: Utc::now(),
        }
    }

    fn succeeded(batch_id: BatchId, id: &str, score: f64) -> RunEvent {
        RunEvent::Succeeded {
            batch_id,
            target: Target::new(id),
            result: SignalResult::new(score, 1.0),
            at: Utc::now(),
        }
    }

    #[test]
    fn tracks_running_and_results_in_arrival_order() {
        let id = BatchId::new();
        let mut agg = ProgressAggregator::new(id, 3);

        agg.apply(&started(id, "a"));
        agg.apply(&started(id, "b"));
        let snap = agg.snapshot();
        assert_eq!(snap.completed, 0);
        assert_eq!(snap.currently_running, Some(Target::new("b")));

        agg.apply(&succeeded(id, "b", 0.95));
        agg.apply(&RunEvent::CacheHit {
            batch_id: id,
            target: Target::new("c"),
            result: SignalResult::new(0.4, 1.0),
            computed_at: Utc::now(),
            at: Utc::now(),
        });

        let snap = agg.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.currently_running, Some(Target::new("a")));
        let order: Vec<_> = snap.results.iter().map(|o| o.target.id.as_str()).collect();
        assert_eq!(order, ["b", "c"]);
        assert!(!snap.results[0].needs_review);
        assert!(snap.results[1].needs_review);
        assert!(snap.results[1].from_cache);
        assert_eq!(snap.cache_hits, 1);
    }

    #[test]
    fn duplicate_terminal_events_do_not_double_count() {
        let id = BatchId::new();
        let mut agg = ProgressAggregator::new(id, 1);

        agg.apply(&started(id, "a"));
        agg.apply(&succeeded(id, "a", 0.9));
        agg.apply(&succeeded(id, "a", 0.9));
        agg.apply(&started(id, "a"));

        let snap = agg.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.results.len(), 1);
        assert!(snap.running.is_empty());
    }

    #[test]
    fn failures_and_cancellations_are_outcomes() {
        let id = BatchId::new();
        let mut agg = ProgressAggregator::new(id, 2);

        agg.apply(&started(id, "a"));
        agg.apply(&RunEvent::Failed {
            batch_id: id,
            target: Target::new("a"),
            error: ComputeError::failed(&TargetId::new("a"), "boom"),
            at: Utc::now(),
        });
        agg.apply(&RunEvent::Cancelled {
            batch_id: id,
            target: Target::new("b"),
            at: Utc::now(),
        });
        agg.apply(&RunEvent::BatchCompleted {
            batch_id: id,
            summary: BatchSummary {
                total: 2,
                failed: 1,
                cancelled: 1,
                ..BatchSummary::default()
            },
            cancelled: true,
            at: Utc::now(),
        });

        let snap = agg.snapshot();
        assert!(snap.finished);
        assert_eq!((snap.failed, snap.cancelled), (1, 1));
        assert_eq!(snap.fraction(), 1.0);
        assert!(snap.results.iter().all(|o| !o.needs_review));
    }

    #[test]
    fn ignores_foreign_batches() {
        let mut agg = ProgressAggregator::new(BatchId::new(), 1);
        agg.apply(&succeeded(BatchId::new(), "a", 0.9));
        assert_eq!(agg.completed(), 0);
    }
}
