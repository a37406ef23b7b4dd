//! Signal result cache.
//!
//! ## Design
//!
//! - One entry per [`CacheKey`] (`target`, `template`, `sample ratio`)
//! - Freshness is decided at read time against the caller's TTL
//! - Writes replace whole entries; readers never see a partial entry
//! - Shared process-wide across batches; constructed once and passed by `Arc`
//!
//! Callers treat every [`CacheError`] as a miss. Caching is best-effort.

pub mod file;
pub mod key;
pub mod store;

pub use file::FileCacheStore;
pub use key::{CacheEntry, CacheKey};
pub use store::{CacheError, CacheStore, InMemoryCacheStore};
