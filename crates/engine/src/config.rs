//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use semassist_core::{AssistError, TemplateId};

/// Engine-wide settings, fixed for the lifetime of an [`AssistEngine`](crate::AssistEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The deployment's pinned template.
    pub template: TemplateId,
    /// Default batch concurrency when the caller does not supply one.
    pub concurrency: usize,
    /// Upper bound on a single `SignalComputer::compute` call.
    pub target_timeout: Duration,
    /// Upper bound on a single cache read or write.
    pub cache_timeout: Duration,
    /// How long a completed batch stays observable before it is evicted.
    #[serde(default = "default_retention")]
    pub retention: Duration,
}

fn default_retention() -> Duration {
    Duration::from_secs(3600)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template: TemplateId::default(),
            concurrency: 4,
            target_timeout: Duration::from_secs(120),
            cache_timeout: Duration::from_millis(250),
            retention: default_retention(),
        }
    }
}

impl EngineConfig {
    /// Read overrides from `SEMASSIST_TEMPLATE`, `SEMASSIST_CONCURRENCY`,
    /// `SEMASSIST_TARGET_TIMEOUT_SECS`, `SEMASSIST_CACHE_TIMEOUT_MS` and
    /// `SEMASSIST_RETENTION_SECS`.
    pub fn from_env() -> Result<Self, AssistError> {
        let mut cfg = Self::default();

        if let Ok(template) = std::env::var("SEMASSIST_TEMPLATE") {
            cfg.template = TemplateId::new(template.trim());
        }
        if let Some(n) = parse_env::<usize>("SEMASSIST_CONCURRENCY")? {
            cfg.concurrency = n;
        }
        if let Some(secs) = parse_env::<u64>("SEMASSIST_TARGET_TIMEOUT_SECS")? {
            cfg.target_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_env::<u64>("SEMASSIST_CACHE_TIMEOUT_MS")? {
            cfg.cache_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_env::<u64>("SEMASSIST_RETENTION_SECS")? {
            cfg.retention = Duration::from_secs(secs);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_template(mut self, template: TemplateId) -> Self {
        self.template = template;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_target_timeout(mut self, timeout: Duration) -> Self {
        self.target_timeout = timeout;
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    /// Zero evicts a completed batch on the next submit.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn validate(&self) -> Result<(), AssistError> {
        if self.concurrency == 0 {
            return Err(AssistError::invalid_config("concurrency must be >= 1"));
        }
        if self.target_timeout.is_zero() {
            return Err(AssistError::invalid_config("target_timeout must be > 0"));
        }
        if self.cache_timeout.is_zero() {
            return Err(AssistError::invalid_config("cache_timeout must be > 0"));
        }
        Ok(())
    }
}

fn parse_env<T: core::str::FromStr>(name: &str) -> Result<Option<T>, AssistError>
where
    T::Err: core::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AssistError::invalid_config(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
