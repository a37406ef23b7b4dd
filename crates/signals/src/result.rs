use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use semassist_core::TargetId;

/// Per-column measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSignal {
    pub column: String,
    /// Share of sampled rows that are null, in \[0, 1\].
    pub null_rate: f64,
    /// Distinct values over sampled rows, in \[0, 1\].
    pub uniqueness: f64,
}

/// Result of a signal computation for one target.
///
/// This is an advisory measurement; it can be cached, displayed or discarded by
/// higher layers without affecting anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalResult {
    /// Overall quality score in \[0, 1\] (template-specific meaning).
    pub quality_score: f64,

    /// Confidence in \[0, 1\] (recommended convention; not enforced).
    pub confidence: f64,

    /// Rows the computation was based on.
    pub sampled_rows: u64,

    #[serde(default)]
    pub signals: Vec<ColumnSignal>,

    /// Optional human-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,

    /// Free-form metadata (template, sampling parameters, timings, etc).
    #[serde(default)]
    pub metadata: JsonValue,
}

impl SignalResult {
    pub fn new(quality_score: f64, confidence: f64) -> Self {
        Self {
            quality_score,
            confidence,
            sampled_rows: 0,
            signals: Vec::new(),
            explanation: None,
            metadata: JsonValue::Null,
        }
    }

    pub fn with_sampled_rows(mut self, rows: u64) -> Self {
        self.sampled_rows = rows;
        self
    }

    pub fn with_signals(mut self, signals: Vec<ColumnSignal>) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Failure of a single target's computation.
///
/// Always scoped to one target; the scheduler records it and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputeError {
    #[error("{target}: invalid input: {message}")]
    InvalidInput { target: TargetId, message: String },

    #[error("{target}: computation failed: {message}")]
    Failed { target: TargetId, message: String },

    #[error("{target}: timed out after {after_ms} ms")]
    Timeout { target: TargetId, after_ms: u64 },
}

impl ComputeError {
    pub fn invalid_input(target: &TargetId, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            target: target.clone(),
            message: message.into(),
        }
    }

    pub fn failed(target: &TargetId, message: impl Into<String>) -> Self {
        Self::Failed {
            target: target.clone(),
            message: message.into(),
        }
    }

    pub fn timeout(target: &TargetId, after: std::time::Duration) -> Self {
        Self::Timeout {
            target: target.clone(),
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn target(&self) -> &TargetId {
        match self {
            ComputeError::InvalidInput { target, .. }
            | ComputeError::Failed { target, .. }
            | ComputeError::Timeout { target, .. } => target,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ComputeError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn errors_are_target_scoped() {
        let t = TargetId::new("orders");
        let err = ComputeError::timeout(&t, Duration::from_secs(2));
        assert_eq!(err.target(), &t);
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "orders: timed out after 2000 ms");

        let err = ComputeError::failed(&t, "connection reset");
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "orders: computation failed: connection reset");
    }

    #[test]
    fn error_serializes_with_kind_tag() {
        let err = ComputeError::invalid_input(&TargetId::new("t"), "empty table");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "invalid_input");
        assert_eq!(json["target"], "t");
    }
}
