use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use semassist_core::{RunSnapshot, Target, TargetId};

use crate::computer::SignalComputer;
use crate::result::{ColumnSignal, ComputeError, SignalResult};

/// Pre-aggregated statistics for one column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub null_count: u64,
    pub distinct_count: u64,
}

impl ColumnProfile {
    pub fn new(name: impl Into<String>, null_count: u64, distinct_count: u64) -> Self {
        Self {
            name: name.into(),
            null_count,
            distinct_count,
        }
    }
}

/// Table-level statistics supplied by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProfile {
    pub row_count: u64,
    pub columns: Vec<ColumnProfile>,
}

/// Source of table profiles.
///
/// The engine stays storage-agnostic: profiles are provided by callers.
#[async_trait]
pub trait ProfileSource: Send + Sync + 'static {
    /// `Ok(None)` when the source has never seen the target.
    async fn profile(&self, target: &TargetId) -> Result<Option<TableProfile>, String>;
}

/// In-memory profile source for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProfileSource {
    inner: RwLock<HashMap<TargetId, TableProfile>>,
}

impl InMemoryProfileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, target: impl Into<TargetId>, profile: TableProfile) {
        self.inner
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(target.into(), profile);
    }
}

#[async_trait]
impl ProfileSource for InMemoryProfileSource {
    async fn profile(&self, target: &TargetId) -> Result<Option<TableProfile>, String> {
        Ok(self
            .inner
            .read()
            .map_err(|_| "profile store lock poisoned".to_string())?
            .get(target)
            .cloned())
    }
}

/// Deterministic signal computer over column profiles.
///
/// Model:
/// - Sample size is `min(max_sample_rows, ceil(row_count * sample_ratio))`.
/// - Per column, over the sampled rows: null rate is the table's null share (a uniform
///   sample's expected value) and uniqueness is `min(distinct, sampled) / sampled`.
/// - Quality = `0.75 * completeness + 0.25 * key_strength`, where completeness is
///   `1 - mean(null_rate)` and key strength is the best column uniqueness.
/// - Confidence grows with sample size and saturates at [`Self::FULL_CONFIDENCE_ROWS`].
#[derive(Debug)]
pub struct ProfileSignalComputer<S> {
    source: S,
}

impl<S: ProfileSource> ProfileSignalComputer<S> {
    pub const FULL_CONFIDENCE_ROWS: u64 = 1_000;

    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: ProfileSource> SignalComputer for ProfileSignalComputer<S> {
    fn name(&self) -> &str {
        "profile-signals"
    }

    async fn compute(
        &self,
        target: &Target,
        snapshot: &RunSnapshot,
    ) -> Result<SignalResult, ComputeError> {
        let profile = self
            .source
            .profile(&target.id)
            .await
            .map_err(|e| ComputeError::failed(&target.id, format!("profile source: {e}")))?
            .ok_or_else(|| ComputeError::invalid_input(&target.id, "no profile available"))?;

        if profile.row_count == 0 {
            return Err(ComputeError::invalid_input(&target.id, "table is empty"));
        }
        if profile.columns.is_empty() {
            return Err(ComputeError::invalid_input(&target.id, "table has no columns"));
        }

        let sampled_rows = sample_size(
            profile.row_count,
            snapshot.sample_ratio().as_fraction(),
            snapshot.system().max_sample_rows,
        );

        let mut signals = Vec::with_capacity(profile.columns.len());
        for column in &profile.columns {
            if column.null_count > profile.row_count {
                return Err(ComputeError::invalid_input(
                    &target.id,
                    format!(
                        "column {} reports {} nulls for {} rows",
                        column.name, column.null_count, profile.row_count
                    ),
                ));
            }
            signals.push(column_signal(column, profile.row_count, sampled_rows));
        }

        let completeness = 1.0 - mean(signals.iter().map(|s| s.null_rate));
        let key_strength = signals
            .iter()
            .map(|s| s.uniqueness)
            .fold(0.0_f64, f64::max);
        let quality_score = (0.75 * completeness + 0.25 * key_strength).clamp(0.0, 1.0);
        let confidence =
            (sampled_rows as f64 / Self::FULL_CONFIDENCE_ROWS as f64).min(1.0);

        Ok(SignalResult::new(quality_score, confidence)
            .with_sampled_rows(sampled_rows)
            .with_explanation(format!(
                "profiled {} column(s) of {} on {} sampled row(s): completeness={completeness:.3}, key strength={key_strength:.3}",
                signals.len(),
                target.display_name(),
                sampled_rows,
            ))
            .with_metadata(json!({
                "kind": "semantic.profile_signals",
                "template": snapshot.template().as_str(),
                "sample_ratio_pct": snapshot.sample_ratio().as_percent(),
                "row_count": profile.row_count,
            }))
            .with_signals(signals))
    }
}

fn sample_size(row_count: u64, fraction: f64, max_rows: u64) -> u64 {
    let wanted = (row_count as f64 * fraction).ceil() as u64;
    wanted.clamp(1, max_rows.max(1)).min(row_count)
}

fn column_signal(column: &ColumnProfile, row_count: u64, sampled_rows: u64) -> ColumnSignal {
    let sampled = sampled_rows.max(1);
    ColumnSignal {
        column: column.name.clone(),
        null_rate: (column.null_count as f64 / row_count as f64).clamp(0.0, 1.0),
        uniqueness: (column.distinct_count.min(sampled) as f64 / sampled as f64).clamp(0.0, 1.0),
    }
}

fn mean(xs: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = xs.fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
    if n == 0 {
        return 0.0;
    }
    sum / n as f64
}

#[cfg(test)]
mod tests {
    use semassist_core::{ConfigResolver, RuntimeConfig, SampleRatio, SystemConfig};

    use super::*;

    fn snapshot(ratio: SampleRatio, max_rows: u64) -> RunSnapshot {
        ConfigResolver::default()
            .resolve_default(
                &SystemConfig {
                    max_sample_rows: max_rows,
                    ttl_hours: 24,
                },
                &RuntimeConfig::new(ratio),
            )
            .unwrap()
    }

    fn orders_profile() -> TableProfile {
        TableProfile {
            row_count: 100_000,
            columns: vec![
                ColumnProfile::new("order_id", 0, 100_000),
                ColumnProfile::new("coupon", 50_000, 12),
            ],
        }
    }

    #[test]
    fn sample_size_respects_ratio_and_cap() {
        assert_eq!(sample_size(100_000, 0.01, 1_000_000), 1_000);
        assert_eq!(sample_size(100_000, 0.05, 2_000), 2_000);
        assert_eq!(sample_size(10, 0.005, 1_000), 1);
        assert_eq!(sample_size(1, 0.05, 1_000), 1);
    }

    #[tokio::test]
    async fn computes_quality_from_profile() {
        let source = InMemoryProfileSource::new();
        source.insert("orders", orders_profile());
        let computer = ProfileSignalComputer::new(source);

        let result = computer
            .compute(&Target::new("orders"), &snapshot(SampleRatio::OnePercent, 100_000))
            .await
            .unwrap();

        // completeness = 1 - (0 + 0.5) / 2 = 0.75, key strength = 1.0
        assert!((result.quality_score - 0.8125).abs() < 1e-9);
        assert_eq!(result.sampled_rows, 1_000);
        assert!((result.confidence - 1.0).abs() < 1e-9);
        assert_eq!(result.signals.len(), 2);
        assert_eq!(result.metadata["sample_ratio_pct"], 1.0);
    }

    #[tokio::test]
    async fn uniqueness_is_measured_on_the_sample() {
        let source = InMemoryProfileSource::new();
        source.insert(
            "events",
            TableProfile {
                row_count: 1_000_000,
                columns: vec![
                    ColumnProfile::new("event_id", 0, 1_000_000),
                    ColumnProfile::new("kind", 250_000, 500),
                ],
            },
        );
        let computer = ProfileSignalComputer::new(source);

        let result = computer
            .compute(&Target::new("events"), &snapshot(SampleRatio::HalfPercent, 1_000))
            .await
            .unwrap();

        assert_eq!(result.sampled_rows, 1_000);
        let kind = &result.signals[1];
        assert!((kind.uniqueness - 0.5).abs() < 1e-9);
        assert!((kind.null_rate - 0.25).abs() < 1e-9);
        assert!((result.signals[0].uniqueness - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn is_idempotent_for_same_inputs() {
        let source = InMemoryProfileSource::new();
        source.insert("orders", orders_profile());
        let computer = ProfileSignalComputer::new(source);
        let target = Target::new("orders");
        let snap = snapshot(SampleRatio::HalfPercent, 100);

        let a = computer.compute(&target, &snap).await.unwrap();
        let b = computer.compute(&target, &snap).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.sampled_rows, 100);
    }

    #[tokio::test]
    async fn rejects_missing_and_malformed_profiles() {
        let source = InMemoryProfileSource::new();
        source.insert("empty", TableProfile { row_count: 0, columns: vec![] });
        source.insert(
            "broken",
            TableProfile {
                row_count: 10,
                columns: vec![ColumnProfile::new("a", 11, 1)],
            },
        );
        let computer = ProfileSignalComputer::new(source);
        let snap = snapshot(SampleRatio::OnePercent, 1_000);

        for id in ["missing", "empty", "broken"] {
            let err = computer.compute(&Target::new(id), &snap).await.unwrap_err();
            assert!(matches!(err, ComputeError::InvalidInput { .. }), "{id}: {err}");
            assert_eq!(err.target().as_str(), id);
        }
    }
}
