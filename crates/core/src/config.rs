//! Run configuration: user-editable runtime knobs, operator-owned system limits,
//! and the immutable snapshot that combines them.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::AssistError;

/// Sampling ratio applied to a target's rows.
///
/// Closed set; arbitrary ratios cannot be expressed. Serialized as a percentage
/// (`0.5`, `1`, `5`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum SampleRatio {
    HalfPercent,
    #[default]
    OnePercent,
    FivePercent,
}

impl SampleRatio {
    pub const ALL: [SampleRatio; 3] = [
        SampleRatio::HalfPercent,
        SampleRatio::OnePercent,
        SampleRatio::FivePercent,
    ];

    /// Parse a percentage (e.g. `5.0` for 5%).
    pub fn from_percent(percent: f64) -> Result<Self, AssistError> {
        Self::ALL
            .into_iter()
            .find(|r| (r.as_percent() - percent).abs() < 1e-9)
            .ok_or_else(|| {
                AssistError::invalid_config(format!(
                    "sample ratio {percent}% is not one of 0.5%, 1%, 5%"
                ))
            })
    }

    pub fn as_percent(&self) -> f64 {
        match self {
            SampleRatio::HalfPercent => 0.5,
            SampleRatio::OnePercent => 1.0,
            SampleRatio::FivePercent => 5.0,
        }
    }

    pub fn as_fraction(&self) -> f64 {
        self.as_percent() / 100.0
    }

    /// Stable token used in cache keys. Never changes for an existing variant.
    pub fn key_token(&self) -> &'static str {
        match self {
            SampleRatio::HalfPercent => "0.5pct",
            SampleRatio::OnePercent => "1pct",
            SampleRatio::FivePercent => "5pct",
        }
    }
}

impl TryFrom<f64> for SampleRatio {
    type Error = AssistError;

    fn try_from(percent: f64) -> Result<Self, Self::Error> {
        Self::from_percent(percent)
    }
}

impl From<SampleRatio> for f64 {
    fn from(value: SampleRatio) -> Self {
        value.as_percent()
    }
}

impl core::fmt::Display for SampleRatio {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}%", self.as_percent())
    }
}

/// User-editable knobs. Free to change between runs; captured by value into a
/// [`RunSnapshot`] when a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub sample_ratio: SampleRatio,
    #[serde(default)]
    pub force_recompute: bool,
}

impl RuntimeConfig {
    pub fn new(sample_ratio: SampleRatio) -> Self {
        Self {
            sample_ratio,
            force_recompute: false,
        }
    }

    /// Build from a raw percentage as it arrives from a form field.
    pub fn from_percent(percent: f64, force_recompute: bool) -> Result<Self, AssistError> {
        Ok(Self {
            sample_ratio: SampleRatio::from_percent(percent)?,
            force_recompute,
        })
    }

    pub fn with_force_recompute(mut self, force: bool) -> Self {
        self.force_recompute = force;
        self
    }
}

/// Operator-controlled limits. Never part of a user-submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Upper bound on rows sampled per target.
    pub max_sample_rows: u64,
    /// Cache entry lifetime.
    pub ttl_hours: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_sample_rows: 100_000,
            ttl_hours: 24,
        }
    }
}

impl SystemConfig {
    /// Read `SEMASSIST_MAX_SAMPLE_ROWS` / `SEMASSIST_TTL_HOURS`, falling back to
    /// defaults for unset variables. Values that are set but unparsable are errors.
    pub fn from_env() -> Result<Self, AssistError> {
        let defaults = Self::default();
        Ok(Self {
            max_sample_rows: env_or("SEMASSIST_MAX_SAMPLE_ROWS", defaults.max_sample_rows)?,
            ttl_hours: env_or("SEMASSIST_TTL_HOURS", defaults.ttl_hours)?,
        })
    }

    pub fn ttl(&self) -> Duration {
        Duration::hours(i64::from(self.ttl_hours))
    }

    pub(crate) fn validate(&self) -> Result<(), AssistError> {
        if self.max_sample_rows == 0 {
            return Err(AssistError::invalid_config("max_sample_rows must be >= 1"));
        }
        if self.ttl_hours == 0 {
            return Err(AssistError::invalid_config("ttl_hours must be >= 1"));
        }
        Ok(())
    }
}

fn env_or<T: core::str::FromStr>(name: &str, default: T) -> Result<T, AssistError>
where
    T::Err: core::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AssistError::invalid_config(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Identifier of the signal-computation template (a fixed, versioned bundle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    pub const DEFAULT: &'static str = "semantic-signals/v1";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl core::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable configuration captured when a run starts.
///
/// Only [`ConfigResolver`](crate::ConfigResolver) can build one, and there is no
/// mutation path afterwards: every target of a batch sees the same values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RunSnapshot {
    template: TemplateId,
    runtime: RuntimeConfig,
    system: SystemConfig,
}

impl RunSnapshot {
    pub(crate) fn new(template: TemplateId, runtime: RuntimeConfig, system: SystemConfig) -> Self {
        Self {
            template,
            runtime,
            system,
        }
    }

    pub fn template(&self) -> &TemplateId {
        &self.template
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn system(&self) -> &SystemConfig {
        &self.system
    }

    pub fn sample_ratio(&self) -> SampleRatio {
        self.runtime.sample_ratio
    }

    pub fn force_recompute(&self) -> bool {
        self.runtime.force_recompute
    }

    pub fn ttl(&self) -> Duration {
        self.system.ttl()
    }
}
