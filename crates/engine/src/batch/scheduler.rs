//! Bounded-concurrency batch scheduler.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinSet;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use semassist_core::{AssistError, BatchId, RunSnapshot, Target};
use semassist_signals::{ComputeError, SignalComputer, SignalResult};

use super::progress::{ProgressAggregator, ProgressSnapshot};
use super::types::{BatchRun, RunEvent, RunRecord, RunStatus, TransitionError};
use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::config::EngineConfig;

/// Runs batches of targets against a [`SignalComputer`], short-circuiting through a
/// shared [`CacheStore`].
///
/// Each submitted batch gets its own driver task and worker pool; batches share
/// nothing but the cache. Must be used from within a Tokio runtime.
pub struct BatchScheduler {
    dispatch: Arc<Dispatch>,
    batches: RwLock<HashMap<BatchId, BatchHandle>>,
    retention: Duration,
}

impl BatchScheduler {
    pub fn new(cache: Arc<dyn CacheStore>, computer: Arc<dyn SignalComputer>) -> Self {
        Self::from_config(&EngineConfig::default(), cache, computer)
    }

    pub fn from_config(
        config: &EngineConfig,
        cache: Arc<dyn CacheStore>,
        computer: Arc<dyn SignalComputer>,
    ) -> Self {
        Self {
            dispatch: Arc::new(Dispatch {
                cache,
                computer,
                target_timeout: config.target_timeout,
                cache_timeout: config.cache_timeout,
            }),
            batches: RwLock::new(HashMap::new()),
            retention: config.retention,
        }
    }

    /// Start a batch. Returns immediately; work proceeds on a background task.
    ///
    /// Repeated target ids are dropped (first occurrence wins) and recorded as
    /// diagnostics on the [`BatchRun`].
    pub fn submit(
        &self,
        targets: Vec<Target>,
        snapshot: RunSnapshot,
        concurrency: usize,
    ) -> Result<BatchHandle, AssistError> {
        if concurrency == 0 {
            return Err(AssistError::invalid_config("concurrency must be >= 1"));
        }

        let id = BatchId::new();
        let run = BatchRun::new(id, snapshot.clone(), targets, concurrency);
        for diagnostic in &run.diagnostics {
            warn!(batch_id = %id, diagnostic = ?diagnostic, "duplicate target dropped");
        }

        let total = run.records.len();
        // Each target emits at most two events, plus one completion: receivers never lag.
        let (sender, _) = broadcast::channel(total * 2 + 1);
        let (done, _) = watch::channel(false);

        let shared = Arc::new(BatchShared {
            id,
            snapshot: Arc::new(snapshot),
            state: Mutex::new(BatchState {
                progress: ProgressAggregator::new(id, total),
                run,
                history: Vec::new(),
                sender: Some(sender),
            }),
            cancel: CancellationToken::new(),
            done,
        });

        info!(
            batch_id = %id,
            targets = total,
            concurrency,
            template = %shared.snapshot.template(),
            sample_ratio = %shared.snapshot.sample_ratio(),
            force_recompute = shared.snapshot.force_recompute(),
            "batch submitted"
        );

        self.evict_expired();
        let handle = BatchHandle { shared };
        self.batches
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, handle.clone());

        tokio::spawn(drive(handle.shared.clone(), self.dispatch.clone(), concurrency));
        Ok(handle)
    }

    pub fn handle(&self, id: BatchId) -> Result<BatchHandle, AssistError> {
        self.batches
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .cloned()
            .ok_or(AssistError::UnknownBatch(id))
    }

    /// Request cooperative cancellation. Returns false if the batch already completed.
    pub fn cancel(&self, id: BatchId) -> Result<bool, AssistError> {
        Ok(self.handle(id)?.cancel())
    }

    /// Event stream for a batch; replays history first, then follows live.
    pub fn events(&self, id: BatchId) -> Result<BatchSubscription, AssistError> {
        Ok(self.handle(id)?.subscribe())
    }

    /// Drop a completed batch from the registry. Running batches are kept.
    pub fn forget(&self, id: BatchId) -> Result<bool, AssistError> {
        let mut batches = self.batches.write().unwrap_or_else(|p| p.into_inner());
        match batches.get(&id) {
            None => Err(AssistError::UnknownBatch(id)),
            Some(h) if !h.is_complete() => Ok(false),
            Some(_) => {
                batches.remove(&id);
                Ok(true)
            }
        }
    }

    /// Drop batches that completed more than the retention window ago. Runs on every
    /// submit; returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let mut batches = self.batches.write().unwrap_or_else(|p| p.into_inner());
        let before = batches.len();
        batches.retain(|_, handle| match handle.completed_at() {
            Some(at) => (now - at)
                .to_std()
                .map(|age| age < self.retention)
                .unwrap_or(true),
            None => true,
        });
        let evicted = before - batches.len();
        if evicted > 0 {
            debug!(evicted, retention_secs = self.retention.as_secs(), "completed batches evicted");
        }
        evicted
    }

    /// Ids of batches that have not completed yet.
    pub fn active(&self) -> Vec<BatchId> {
        let mut ids: Vec<_> = self
            .batches
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(_, h)| !h.is_complete())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("computer", &self.dispatch.computer.name())
            .field("target_timeout", &self.dispatch.target_timeout)
            .field("cache_timeout", &self.dispatch.cache_timeout)
            .field("retention", &self.retention)
            .finish()
    }
}

/// Cheap, cloneable handle to one batch.
#[derive(Clone)]
pub struct BatchHandle {
    shared: Arc<BatchShared>,
}

impl BatchHandle {
    pub fn id(&self) -> BatchId {
        self.shared.id
    }

    /// Point-in-time copy of the batch and its records.
    pub fn run(&self) -> BatchRun {
        self.shared.lock().run.clone()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.shared.lock().progress.snapshot()
    }

    pub fn subscribe(&self) -> BatchSubscription {
        let state = self.shared.lock();
        BatchSubscription {
            batch_id: self.shared.id,
            replay: state.history.iter().cloned().collect(),
            live: state.sender.as_ref().map(|tx| tx.subscribe()),
            done: false,
        }
    }

    pub fn cancel(&self) -> bool {
        if self.is_complete() {
            return false;
        }
        info!(batch_id = %self.shared.id, "batch cancellation requested");
        self.shared.cancel.cancel();
        true
    }

    pub fn is_complete(&self) -> bool {
        *self.shared.done.borrow()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().run.completed_at
    }

    /// Wait for the batch to complete and return its final state.
    pub async fn wait(&self) -> Result<BatchRun, AssistError> {
        let mut rx = self.shared.done.subscribe();
        rx.wait_for(|done| *done)
            .await
            .map_err(|_| AssistError::internal("batch driver dropped"))?;
        Ok(self.run())
    }
}

impl std::fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("id", &self.shared.id)
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Ordered feed of a batch's events.
///
/// Events already emitted are replayed first, then live events follow. The feed
/// ends after `BatchCompleted`.
#[derive(Debug)]
pub struct BatchSubscription {
    batch_id: BatchId,
    replay: VecDeque<RunEvent>,
    live: Option<broadcast::Receiver<RunEvent>>,
    done: bool,
}

impl BatchSubscription {
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Next event, or `None` once the batch has completed.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        if self.done {
            return None;
        }

        let event = match self.replay.pop_front() {
            Some(event) => event,
            None => loop {
                let rx = self.live.as_mut()?;
                match rx.recv().await {
                    Ok(event) => break event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(batch_id = %self.batch_id, skipped, "event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.live = None;
                        return None;
                    }
                }
            },
        };

        if event.is_batch_completed() {
            self.done = true;
            self.live = None;
        }
        Some(event)
    }

    /// Collect every remaining event.
    pub async fn collect(mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }

    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = RunEvent> + Send>> {
        let replay = tokio_stream::iter(self.replay);
        match self.live {
            Some(rx) if !self.done => {
                Box::pin(replay.chain(BroadcastStream::new(rx).filter_map(|r| r.ok())))
            }
            _ => Box::pin(replay),
        }
    }
}

struct BatchShared {
    id: BatchId,
    snapshot: Arc<RunSnapshot>,
    state: Mutex<BatchState>,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

struct BatchState {
    run: BatchRun,
    history: Vec<RunEvent>,
    progress: ProgressAggregator,
    /// Dropped on completion, which closes every live subscription.
    sender: Option<broadcast::Sender<RunEvent>>,
}

impl BatchState {
    fn emit(&mut self, event: RunEvent) {
        self.progress.apply(&event);
        self.history.push(event.clone());
        if let Some(tx) = &self.sender {
            // No receivers is fine: history covers late subscribers.
            let _ = tx.send(event);
        }
    }
}

impl BatchShared {
    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Apply a record transition and emit its event under one lock, so per-target
    /// event order always matches transition order.
    fn transition<F>(&self, idx: usize, f: F) -> bool
    where
        F: FnOnce(&mut RunRecord, DateTime<Utc>) -> Result<RunEvent, TransitionError>,
    {
        let mut state = self.lock();
        let Some(record) = state.run.records.get_mut(idx) else {
            error!(batch_id = %self.id, idx, "transition for unknown record");
            return false;
        };
        match f(record, Utc::now()) {
            Ok(event) => {
                state.emit(event);
                true
            }
            Err(e) => {
                error!(batch_id = %self.id, error = %e, "rejected state transition");
                false
            }
        }
    }

    fn cancel_pending(&self) -> usize {
        let id = self.id;
        let mut state = self.lock();
        let at = Utc::now();
        let mut events = Vec::new();
        for record in state.run.records.iter_mut() {
            if record.status == RunStatus::Pending && record.mark_cancelled(at).is_ok() {
                events.push(RunEvent::Cancelled {
                    batch_id: id,
                    target: record.target.clone(),
                    at,
                });
            }
        }
        let n = events.len();
        for event in events {
            state.emit(event);
        }
        n
    }

    /// Fail any record still running after its worker is gone (panicked task).
    fn fail_stranded(&self) {
        let id = self.id;
        let mut state = self.lock();
        let at = Utc::now();
        let mut events = Vec::new();
        for record in state.run.records.iter_mut() {
            if record.status != RunStatus::Running {
                continue;
            }
            let error = ComputeError::failed(&record.target.id, "worker task aborted");
            if record.mark_failed(error.clone(), at).is_ok() {
                events.push(RunEvent::Failed {
                    batch_id: id,
                    target: record.target.clone(),
                    error,
                    at,
                });
            }
        }
        for event in events {
            state.emit(event);
        }
    }

    fn complete(&self) {
        let mut state = self.lock();
        let at = Utc::now();
        state.run.completed_at = Some(at);
        state.run.cancelled = self.cancel.is_cancelled();
        let summary = state.run.summary();
        let cancelled = state.run.cancelled;
        state.emit(RunEvent::BatchCompleted {
            batch_id: self.id,
            summary,
            cancelled,
            at,
        });
        state.sender = None;
        drop(state);

        self.done.send_replace(true);
        info!(
            batch_id = %self.id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            cache_hits = summary.cache_hits,
            "batch completed"
        );
    }
}

/// What a worker needs to process one target.
struct Dispatch {
    cache: Arc<dyn CacheStore>,
    computer: Arc<dyn SignalComputer>,
    target_timeout: Duration,
    cache_timeout: Duration,
}

impl Dispatch {
    async fn lookup(&self, batch_id: BatchId, key: &CacheKey, ttl: chrono::Duration) -> Option<CacheEntry> {
        match tokio::time::timeout(self.cache_timeout, self.cache.lookup(key, ttl)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                warn!(batch_id = %batch_id, key = %key, error = %e, "cache lookup failed; treating as miss");
                None
            }
            Err(_) => {
                warn!(batch_id = %batch_id, key = %key, "cache lookup timed out; treating as miss");
                None
            }
        }
    }

    async fn invalidate(&self, batch_id: BatchId, key: &CacheKey) {
        match tokio::time::timeout(self.cache_timeout, self.cache.invalidate(key)).await {
            Ok(Ok(existed)) => {
                debug!(batch_id = %batch_id, key = %key, existed, "cache entry invalidated");
            }
            Ok(Err(e)) => {
                warn!(batch_id = %batch_id, key = %key, error = %e, "cache invalidate failed");
            }
            Err(_) => warn!(batch_id = %batch_id, key = %key, "cache invalidate timed out"),
        }
    }

    async fn store(&self, batch_id: BatchId, key: CacheKey, result: SignalResult) {
        let label = key.fingerprint();
        match tokio::time::timeout(self.cache_timeout, self.cache.store(key, result)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(batch_id = %batch_id, key = %label, error = %e, "cache write failed");
            }
            Err(_) => warn!(batch_id = %batch_id, key = %label, "cache write timed out"),
        }
    }

    async fn run_target(
        &self,
        shared: &BatchShared,
        idx: usize,
        target: &Target,
        key: CacheKey,
        snapshot: &RunSnapshot,
    ) {
        let id = shared.id;
        // Only an admitted target gives up its cached entry.
        if snapshot.force_recompute() {
            self.invalidate(id, &key).await;
        }

        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(self.target_timeout, self.computer.compute(target, snapshot))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ComputeError::timeout(&target.id, self.target_timeout)),
            };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                self.store(id, key, result.clone()).await;
                debug!(batch_id = %id, target = %target, elapsed_ms, "target succeeded");
                shared.transition(idx, |record, at| {
                    record.mark_succeeded(result.clone(), at)?;
                    Ok(RunEvent::Succeeded {
                        batch_id: id,
                        target: record.target.clone(),
                        result,
                        at,
                    })
                });
            }
            Err(error) => {
                warn!(batch_id = %id, target = %target, elapsed_ms, error = %error, "target failed");
                shared.transition(idx, |record, at| {
                    record.mark_failed(error.clone(), at)?;
                    Ok(RunEvent::Failed {
                        batch_id: id,
                        target: record.target.clone(),
                        error,
                        at,
                    })
                });
            }
        }
    }
}

/// Batch driver: admits targets in input order, resolving cache hits inline and
/// handing misses to at most `concurrency` workers.
async fn drive(shared: Arc<BatchShared>, dispatch: Arc<Dispatch>, concurrency: usize) {
    let id = shared.id;
    let snapshot = shared.snapshot.clone();
    let ttl = snapshot.ttl();
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut workers = JoinSet::new();
    let targets = shared.lock().run.targets.clone();

    for (idx, target) in targets.into_iter().enumerate() {
        if shared.cancel.is_cancelled() {
            break;
        }

        let key = CacheKey::for_target(&target.id, &snapshot);
        let hit = if snapshot.force_recompute() {
            None
        } else {
            dispatch.lookup(id, &key, ttl).await
        };
        if let Some(entry) = hit {
            debug!(batch_id = %id, target = %target, computed_at = %entry.computed_at, "cache hit");
            shared.transition(idx, |record, at| {
                record.mark_cache_hit(entry.result.clone(), at)?;
                Ok(RunEvent::CacheHit {
                    batch_id: id,
                    target: record.target.clone(),
                    result: entry.result,
                    computed_at: entry.computed_at,
                    at,
                })
            });
            continue;
        }

        let permit = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let admitted = shared.transition(idx, |record, at| {
            record.mark_running(at)?;
            Ok(RunEvent::Started {
                batch_id: id,
                target: record.target.clone(),
                at,
            })
        });
        if !admitted {
            continue;
        }
        debug!(batch_id = %id, target = %target, "target started");

        let shared = shared.clone();
        let dispatch = dispatch.clone();
        let snapshot = snapshot.clone();
        workers.spawn(async move {
            let _permit = permit;
            dispatch
                .run_target(&shared, idx, &target, key, &snapshot)
                .await;
        });
    }

    if shared.cancel.is_cancelled() {
        let n = shared.cancel_pending();
        if n > 0 {
            info!(batch_id = %id, cancelled = n, "pending targets cancelled");
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(batch_id = %id, error = %e, "signal worker aborted");
        }
    }

    shared.fail_stranded();
    shared.complete();
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use semassist_core::{ConfigResolver, RuntimeConfig, SystemConfig};

    use super::*;
    use crate::cache::InMemoryCacheStore;

    struct Fixed;

    #[async_trait]
    impl SignalComputer for Fixed {
        async fn compute(
            &self,
            _target: &Target,
            _snapshot: &RunSnapshot,
        ) -> Result<SignalResult, ComputeError> {
            Ok(SignalResult::new(0.9, 1.0))
        }
    }

    struct Slow(Duration, AtomicUsize);

    #[async_trait]
    impl SignalComputer for Slow {
        async fn compute(
            &self,
            _target: &Target,
            _snapshot: &RunSnapshot,
        ) -> Result<SignalResult, ComputeError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.0).await;
            Ok(SignalResult::new(0.9, 1.0))
        }
    }

    fn snapshot() -> RunSnapshot {
        ConfigResolver::default()
            .resolve_default(&SystemConfig::default(), &RuntimeConfig::default())
            .unwrap()
    }

    #[tokio::test]
    async fn zero_concurrency_is_invalid() {
        let scheduler = BatchScheduler::new(InMemoryCacheStore::arc(), Arc::new(Fixed));
        let err = scheduler
            .submit(vec![Target::new("a")], snapshot(), 0)
            .unwrap_err();
        assert!(matches!(err, AssistError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn empty_batch_completes_immediately() {
        let scheduler = BatchScheduler::new(InMemoryCacheStore::arc(), Arc::new(Fixed));
        let handle = scheduler.submit(Vec::new(), snapshot(), 2).unwrap();
        let run = handle.wait().await.unwrap();

        assert!(run.is_complete());
        assert_eq!(run.summary().total, 0);
        let events = handle.subscribe().collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_batch_completed());
    }

    #[tokio::test]
    async fn late_subscriber_sees_full_history() {
        let scheduler = BatchScheduler::new(InMemoryCacheStore::arc(), Arc::new(Fixed));
        let handle = scheduler
            .submit(vec![Target::new("a"), Target::new("b")], snapshot(), 1)
            .unwrap();
        handle.wait().await.unwrap();

        let events = scheduler.events(handle.id()).unwrap().collect().await;
        // 2 x (Started + Succeeded) + BatchCompleted
        assert_eq!(events.len(), 5);

        let streamed: Vec<_> = handle.subscribe().into_stream().collect().await;
        assert_eq!(streamed, events);
    }

    #[tokio::test]
    async fn compute_timeout_marks_target_error() {
        let config = EngineConfig::default().with_target_timeout(Duration::from_millis(20));
        let computer = Arc::new(Slow(Duration::from_secs(5), AtomicUsize::new(0)));
        let scheduler =
            BatchScheduler::from_config(&config, InMemoryCacheStore::arc(), computer.clone());

        let run = scheduler
            .submit(vec![Target::new("slow")], snapshot(), 1)
            .unwrap()
            .wait()
            .await
            .unwrap();

        let record = &run.records[0];
        assert_eq!(record.status, RunStatus::Error);
        assert!(record.error.as_ref().is_some_and(ComputeError::is_timeout));
        assert_eq!(computer.1.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completed_batches_expire_after_retention() {
        let config = EngineConfig::default().with_retention(Duration::ZERO);
        let computer = Arc::new(Slow(Duration::from_millis(50), AtomicUsize::new(0)));
        let scheduler = BatchScheduler::from_config(&config, InMemoryCacheStore::arc(), computer);

        let done = scheduler.submit(vec![Target::new("a")], snapshot(), 1).unwrap();
        done.wait().await.unwrap();
        assert!(done.completed_at().is_some());

        let running = scheduler.submit(vec![Target::new("b")], snapshot(), 1).unwrap();
        assert!(matches!(
            scheduler.handle(done.id()),
            Err(AssistError::UnknownBatch(_))
        ));
        assert_eq!(scheduler.evict_expired(), 0, "running batches are kept");
        assert!(scheduler.handle(running.id()).is_ok());

        running.wait().await.unwrap();
        assert_eq!(scheduler.evict_expired(), 1);
    }

    #[tokio::test]
    async fn default_retention_keeps_completed_batches() {
        let scheduler = BatchScheduler::new(InMemoryCacheStore::arc(), Arc::new(Fixed));
        let first = scheduler.submit(vec![Target::new("a")], snapshot(), 1).unwrap();
        first.wait().await.unwrap();

        scheduler.submit(vec![Target::new("b")], snapshot(), 1).unwrap();
        assert!(scheduler.handle(first.id()).is_ok());
    }

    #[tokio::test]
    async fn forget_only_drops_completed_batches() {
        let computer = Arc::new(Slow(Duration::from_millis(50), AtomicUsize::new(0)));
        let scheduler = BatchScheduler::new(InMemoryCacheStore::arc(), computer);
        let handle = scheduler.submit(vec![Target::new("a")], snapshot(), 1).unwrap();

        assert_eq!(scheduler.active(), vec![handle.id()]);
        assert!(!scheduler.forget(handle.id()).unwrap());

        handle.wait().await.unwrap();
        assert!(scheduler.active().is_empty());
        assert!(scheduler.forget(handle.id()).unwrap());
        assert!(matches!(
            scheduler.handle(handle.id()),
            Err(AssistError::UnknownBatch(_))
        ));
    }
}
