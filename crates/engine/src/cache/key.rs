use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use semassist_core::{RunSnapshot, SampleRatio, TargetId, TemplateId};
use semassist_signals::SignalResult;

/// Identity deciding whether two requests can share a cached result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub target: TargetId,
    pub template: TemplateId,
    pub sample_ratio: SampleRatio,
}

impl CacheKey {
    pub fn new(target: TargetId, template: TemplateId, sample_ratio: SampleRatio) -> Self {
        Self {
            target,
            template,
            sample_ratio,
        }
    }

    pub fn for_target(target: &TargetId, snapshot: &RunSnapshot) -> Self {
        Self::new(
            target.clone(),
            snapshot.template().clone(),
            snapshot.sample_ratio(),
        )
    }

    /// Deterministic string form, stable across processes.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.target,
            self.template,
            self.sample_ratio.key_token()
        )
    }
}

impl core::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

/// A stored result. Immutable once written; replaced wholesale on recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub result: SignalResult,
    pub computed_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, result: SignalResult, computed_at: DateTime<Utc>) -> Self {
        Self {
            key,
            result,
            computed_at,
        }
    }

    /// Fresh while `now - computed_at < ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.computed_at < ttl
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.computed_at
    }
}
