//! Directory-backed cache store.
//!
//! One JSON document per key. Writes go to a uniquely named temp file in the same
//! directory and are renamed over the target, so readers observe either the previous
//! document or the new one, never a torn write.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use semassist_core::{Clock, SystemClock};
use semassist_signals::SignalResult;

use super::key::{CacheEntry, CacheKey};
use super::store::{CacheError, CacheStore};

const ENTRY_EXT: &str = "json";

pub struct FileCacheStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileCacheStore {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::open_with_clock(dir, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        dir: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, clock })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{ENTRY_EXT}", file_stem(key)))
    }

    async fn read_entry(&self, path: &Path, key_hint: &str) -> Result<Option<CacheEntry>, CacheError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Corrupt {
                key: key_hint.to_string(),
                message: e.to_string(),
            })
    }
}

impl std::fmt::Debug for FileCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCacheStore").field("dir", &self.dir).finish()
    }
}

/// Hex encoding of the key fingerprint: filesystem-safe and collision-free.
fn file_stem(key: &CacheKey) -> String {
    key.fingerprint()
        .bytes()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[async_trait]
impl CacheStore for FileCacheStore {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn lookup_stale(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let entry = self.read_entry(&self.path_for(key), &key.fingerprint()).await?;
        // A renamed or hand-edited file must not answer for another key.
        Ok(entry.filter(|e| &e.key == key))
    }

    async fn store(&self, key: CacheKey, result: SignalResult) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry::new(key, result, self.clock.now());
        let bytes = serde_json::to_vec(&entry).map_err(|e| CacheError::Corrupt {
            key: entry.key.fingerprint(),
            message: e.to_string(),
        })?;

        let target = self.path_for(&entry.key);
        let tmp = self.dir.join(format!(".{}.tmp", Uuid::now_v7()));
        let written = match tokio::fs::write(&tmp, &bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // A failed write can leave a partial temp file behind.
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(entry)
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn purge_expired(&self, ttl: Duration) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let mut removed = 0;
        let mut dir = tokio::fs::read_dir(&self.dir).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            let hint = path.display().to_string();
            let expired = match self.read_entry(&path, &hint).await {
                Ok(Some(entry)) => !entry.is_fresh(ttl, now),
                Ok(None) => false,
                Err(e) => {
                    warn!(path = %hint, error = %e, "dropping unreadable cache entry");
                    true
                }
            };
            if expired {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(removed)
    }
}
