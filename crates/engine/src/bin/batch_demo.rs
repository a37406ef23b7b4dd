//! Drives two batches over synthetic table profiles and prints the event feed.
//!
//! The second batch runs against the same cache and is served from it.
//! Set `SEMASSIST_CACHE_DIR` to use the directory-backed cache instead of memory.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use semassist_core::{RuntimeConfig, SampleRatio, SystemConfig, Target};
use semassist_engine::{
    AssistEngine, CacheStore, EngineConfig, FileCacheStore, InMemoryCacheStore, ProgressAggregator,
};
use semassist_signals::{ColumnProfile, InMemoryProfileSource, ProfileSignalComputer, TableProfile};

fn demo_profiles() -> InMemoryProfileSource {
    let source = InMemoryProfileSource::new();
    source.insert(
        "sales.orders",
        TableProfile {
            row_count: 2_400_000,
            columns: vec![
                ColumnProfile::new("order_id", 0, 2_400_000),
                ColumnProfile::new("customer_id", 1_200, 310_000),
                ColumnProfile::new("coupon_code", 2_050_000, 140),
            ],
        },
    );
    source.insert(
        "crm.customers",
        TableProfile {
            row_count: 310_000,
            columns: vec![
                ColumnProfile::new("customer_id", 0, 310_000),
                ColumnProfile::new("email", 4_000, 305_500),
            ],
        },
    );
    source.insert(
        "ops.audit_log",
        TableProfile {
            row_count: 18_000_000,
            columns: vec![
                ColumnProfile::new("actor", 9_000_000, 2_000),
                ColumnProfile::new("payload", 12_000_000, 40_000),
            ],
        },
    );
    source
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    semassist_observability::init();

    let config = EngineConfig::from_env().context("engine config")?;
    let system = SystemConfig::from_env().context("system config")?;

    let cache: Arc<dyn CacheStore> = match std::env::var("SEMASSIST_CACHE_DIR") {
        Ok(dir) => Arc::new(
            FileCacheStore::open(&dir)
                .await
                .with_context(|| format!("open cache dir {dir}"))?,
        ),
        Err(_) => InMemoryCacheStore::arc(),
    };
    let computer = Arc::new(ProfileSignalComputer::new(demo_profiles()));
    let engine = AssistEngine::new(config, cache, computer)?;

    let targets = vec![
        Target::new("sales.orders").with_label("Orders"),
        Target::new("crm.customers").with_label("Customers"),
        Target::new("ops.audit_log").with_label("Audit log"),
        Target::new("finance.missing"),
    ];
    let runtime = RuntimeConfig::new(SampleRatio::OnePercent);

    for pass in 1..=2 {
        let id = engine.start_batch(targets.clone(), &system, &runtime)?;
        info!(batch_id = %id, pass, "batch started");

        let mut subscription = engine.subscribe(id)?;
        let mut progress = ProgressAggregator::new(id, targets.len());
        while let Some(event) = subscription.recv().await {
            progress.apply(&event);
            println!("{}", serde_json::to_string(&event)?);
        }

        let view = progress.snapshot();
        for outcome in &view.results {
            println!(
                "{:<14} {:<10} cache={:<5} review={:<5} score={}",
                outcome.target.display_name(),
                outcome.status,
                outcome.from_cache,
                outcome.needs_review,
                outcome
                    .result
                    .as_ref()
                    .map(|r| format!("{:.3}", r.quality_score))
                    .unwrap_or_else(|| "-".to_string()),
            );
        }
        engine.forget(id)?;
    }

    Ok(())
}
