//! The three-tier cache: exact (L1), semantic (L2) and the statistics that
//! make the tiers observable.
//!
//! L1 is a capability trait with two interchangeable implementations - an
//! in-memory LRU map and an external key-value (Redis) adapter - chosen at
//! construction time. L2 is an in-memory vector store scanned by cosine
//! similarity. The generative L3 "layer" is not a store; it is the SQL
//! generation path in [`crate::sqlgen`], and it only shows up here in the
//! statistics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::L1Config;

mod entry;
mod l1_memory;
mod l1_redis;
mod l2_semantic;
mod stats;

pub use entry::{CachedEntry, ColumnShape, ColumnType, ResultSchema};
pub use l1_memory::MemoryL1Cache;
pub use l1_redis::RedisL1Cache;
pub use l2_semantic::{FindOutcome, L2Entry, SemanticCache, SemanticMatch};
pub use stats::{CacheStatsReport, GenerativeStats, LayerStats, StatsTracker};

/// Cache-layer failures that matter to correctness.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("entry {0} is pinned and cannot be deleted")]
    Pinned(String),

    #[error("embedding dimension mismatch: store holds {expected}-dim vectors, got {actual} (changing the embedding provider mid-run requires a clear)")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("key-value store error: {0}")]
    Kv(String),

    #[error("cache entry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Kv(e.to_string())
    }
}

/// Exact-match (fingerprint → entry) cache capability.
///
/// Both implementations share the semantics the coordinator relies on:
/// `get` is a *use* (LRU touch + hit count, defensive copy), `peek` is a
/// read-only inspection, `set` evicts the least-recently-used unpinned
/// entry at capacity, and pinned entries survive everything short of
/// `set_pinned(false)` + `delete`.
#[async_trait]
pub trait L1Cache: Send + Sync {
    /// Look up and *use* an entry: bumps `hit_count`/`last_used_at` and
    /// moves the entry to the most-recently-used position.
    async fn get(&self, fingerprint: &str) -> Result<Option<CachedEntry>, CacheError>;

    /// Look up without recording a use.
    async fn peek(&self, fingerprint: &str) -> Result<Option<CachedEntry>, CacheError>;

    /// Insert or replace an entry, evicting if needed.
    async fn set(&self, entry: CachedEntry) -> Result<(), CacheError>;

    /// Append a natural-language example to an existing entry.
    async fn add_example(&self, fingerprint: &str, query: &str) -> Result<(), CacheError>;

    /// Remove an entry. Fails with [`CacheError::Pinned`] on pinned entries.
    /// Returns whether the entry existed.
    async fn delete(&self, fingerprint: &str) -> Result<bool, CacheError>;

    /// Pin or unpin an entry. Returns whether the entry existed.
    async fn set_pinned(&self, fingerprint: &str, pinned: bool) -> Result<bool, CacheError>;

    /// All entries, least-recently-used first. O(N) on the KV variant.
    async fn list(&self) -> Result<Vec<CachedEntry>, CacheError>;

    /// Remove all unpinned entries.
    async fn clear(&self) -> Result<(), CacheError>;

    async fn len(&self) -> usize;
}

/// Build the configured L1 implementation: Redis when a connection string
/// is present, the in-memory LRU map otherwise, nothing when disabled.
pub async fn build_l1(cfg: &L1Config) -> Result<Option<Arc<dyn L1Cache>>, CacheError> {
    if !cfg.enabled {
        return Ok(None);
    }
    match &cfg.external_kv_url {
        Some(url) => {
            let ttl = Duration::from_secs(cfg.ttl_secs);
            let cache = RedisL1Cache::connect(url, ttl).await?;
            log::info!("L1 cache: external KV at {url} (ttl {}s)", cfg.ttl_secs);
            Ok(Some(Arc::new(cache)))
        }
        None => {
            log::info!("L1 cache: in-memory (max {} entries)", cfg.max_size);
            Ok(Some(Arc::new(MemoryL1Cache::new(cfg.max_size))))
        }
    }
}
