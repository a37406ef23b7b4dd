//! Cache store abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use semassist_core::{Clock, SystemClock};
use semassist_signals::SignalResult;

use super::key::{CacheEntry, CacheKey};

/// Cache storage error. Never surfaced past the scheduler; logged and treated as a miss.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(String),
    #[error("corrupt cache entry for {key}: {message}")]
    Corrupt { key: String, message: String },
    #[error("cache lock poisoned")]
    Poisoned,
}

impl From<std::io::Error> for CacheError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// Keyed store of signal results with read-time TTL.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Current time as seen by this store.
    fn now(&self) -> DateTime<Utc>;

    /// Read an entry regardless of age. Explicit "ignore TTL" path.
    async fn lookup_stale(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Replace the entry for `key` atomically (last write wins) and return it.
    async fn store(&self, key: CacheKey, result: SignalResult) -> Result<CacheEntry, CacheError>;

    /// Remove the entry for `key`. Returns whether one existed.
    async fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Drop every entry older than `ttl`. Returns how many were removed.
    async fn purge_expired(&self, ttl: Duration) -> Result<usize, CacheError>;

    /// Fresh entry for `key`, or `None` when absent or `now - computed_at >= ttl`.
    async fn lookup(&self, key: &CacheKey, ttl: Duration) -> Result<Option<CacheEntry>, CacheError> {
        let now = self.now();
        Ok(self
            .lookup_stale(key)
            .await?
            .filter(|entry| entry.is_fresh(ttl, now)))
    }
}

#[async_trait]
impl<S> CacheStore for Arc<S>
where
    S: CacheStore + ?Sized,
{
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    async fn lookup_stale(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        (**self).lookup_stale(key).await
    }

    async fn store(&self, key: CacheKey, result: SignalResult) -> Result<CacheEntry, CacheError> {
        (**self).store(key, result).await
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        (**self).invalidate(key).await
    }

    async fn purge_expired(&self, ttl: Duration) -> Result<usize, CacheError> {
        (**self).purge_expired(ttl).await
    }

    async fn lookup(&self, key: &CacheKey, ttl: Duration) -> Result<Option<CacheEntry>, CacheError> {
        (**self).lookup(key, ttl).await
    }
}

/// In-memory cache store.
///
/// Entries are held as `Arc<CacheEntry>`; a write swaps the pointer under the lock,
/// so a concurrent reader sees either the old or the new entry in full.
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCacheStore")
            .field("entries", &self.len())
            .finish()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn lookup_stale(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(key).map(|e| CacheEntry::clone(e)))
    }

    async fn store(&self, key: CacheKey, result: SignalResult) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry::new(key.clone(), result, self.clock.now());
        let shared = Arc::new(entry.clone());
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key, shared);
        Ok(entry)
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.remove(key).is_some())
    }

    async fn purge_expired(&self, ttl: Duration) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh(ttl, now));
        Ok(before - entries.len())
    }
}
