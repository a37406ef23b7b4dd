//! Submission and observation API consumed by presentation code.

use std::sync::Arc;

use tracing::{debug, info};

use semassist_core::{
    AssistError, AssistResult, BatchId, ConfigResolver, RunSnapshot, RuntimeConfig, SystemConfig,
    Target,
};
use semassist_signals::SignalComputer;

use crate::batch::{BatchRun, BatchScheduler, BatchSubscription, ProgressSnapshot, RunRecord};
use crate::cache::CacheStore;
use crate::config::EngineConfig;

/// Process-wide entry point.
///
/// Construct once at startup with the shared cache and the analysis backend, then
/// hand out references. Holds no global state of its own.
#[derive(Debug)]
pub struct AssistEngine {
    config: EngineConfig,
    resolver: ConfigResolver,
    scheduler: BatchScheduler,
}

impl AssistEngine {
    pub fn new(
        config: EngineConfig,
        cache: Arc<dyn CacheStore>,
        computer: Arc<dyn SignalComputer>,
    ) -> AssistResult<Self> {
        config.validate()?;
        info!(
            template = %config.template,
            concurrency = config.concurrency,
            computer = computer.name(),
            "assist engine initialised"
        );
        Ok(Self {
            resolver: ConfigResolver::new(config.template.clone()),
            scheduler: BatchScheduler::from_config(&config, cache, computer),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    /// Capture a snapshot against the deployment template.
    pub fn snapshot(
        &self,
        system: &SystemConfig,
        runtime: &RuntimeConfig,
    ) -> AssistResult<RunSnapshot> {
        self.resolver.resolve_default(system, runtime)
    }

    /// Start a batch with the configured default concurrency.
    pub fn start_batch(
        &self,
        targets: Vec<Target>,
        system: &SystemConfig,
        runtime: &RuntimeConfig,
    ) -> AssistResult<BatchId> {
        self.start_batch_with(targets, system, runtime, self.config.concurrency)
    }

    pub fn start_batch_with(
        &self,
        targets: Vec<Target>,
        system: &SystemConfig,
        runtime: &RuntimeConfig,
        concurrency: usize,
    ) -> AssistResult<BatchId> {
        let snapshot = self.snapshot(system, runtime)?;
        let handle = self.scheduler.submit(targets, snapshot, concurrency)?;
        Ok(handle.id())
    }

    /// Run one target as a batch of one and wait for its record.
    ///
    /// The batch is dropped from the registry afterwards. Failed targets come back
    /// as an `Error` record, not as an `Err`.
    pub async fn start_single(
        &self,
        target: Target,
        system: &SystemConfig,
        runtime: &RuntimeConfig,
    ) -> AssistResult<RunRecord> {
        let snapshot = self.snapshot(system, runtime)?;
        let handle = self.scheduler.submit(vec![target], snapshot, 1)?;
        let run = handle.wait().await?;
        self.scheduler.forget(handle.id())?;
        debug!(batch_id = %handle.id(), "single-target run finished");

        run.records
            .into_iter()
            .next()
            .ok_or_else(|| AssistError::internal("single-target batch has no record"))
    }

    pub fn subscribe(&self, id: BatchId) -> AssistResult<BatchSubscription> {
        self.scheduler.events(id)
    }

    pub fn progress(&self, id: BatchId) -> AssistResult<ProgressSnapshot> {
        Ok(self.scheduler.handle(id)?.progress())
    }

    pub fn cancel(&self, id: BatchId) -> AssistResult<bool> {
        self.scheduler.cancel(id)
    }

    pub fn batch(&self, id: BatchId) -> AssistResult<BatchRun> {
        Ok(self.scheduler.handle(id)?.run())
    }

    pub async fn wait(&self, id: BatchId) -> AssistResult<BatchRun> {
        self.scheduler.handle(id)?.wait().await
    }

    pub fn forget(&self, id: BatchId) -> AssistResult<bool> {
        self.scheduler.forget(id)
    }

    pub fn active_batches(&self) -> Vec<BatchId> {
        self.scheduler.active()
    }
}
