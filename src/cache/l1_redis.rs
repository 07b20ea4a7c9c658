//! External-KV L1: Redis-backed exact cache with sliding TTL expiry.
//!
//! Entries live under `nttp:l1:<fingerprint>` as JSON with ISO-8601
//! timestamps. Reads refresh the TTL and bump `hit_count` by
//! read-modify-write; there is no cross-process atomicity, which is
//! acceptable because the statistics are approximate anyway.
//!
//! Connection failures degrade: a `get` becomes a miss and a `set` a no-op,
//! both logged, so an unavailable KV never takes the pipeline down.
//! Operations whose outcome matters to correctness (delete, pin) surface
//! their errors instead.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{CacheError, CachedEntry, L1Cache};

/// Key namespace for the exact cache.
const KEY_PREFIX: &str = "nttp:l1:";

pub struct RedisL1Cache {
    manager: ConnectionManager,
    ttl: Duration,
}

impl RedisL1Cache {
    /// Connect and validate the server is reachable.
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::from)?;
        let manager = ConnectionManager::new(client).await.map_err(CacheError::from)?;
        Ok(RedisL1Cache { manager, ttl })
    }

    fn key(fingerprint: &str) -> String {
        format!("{KEY_PREFIX}{fingerprint}")
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }

    async fn read(&self, fingerprint: &str) -> Result<Option<CachedEntry>, CacheError> {
        let mut con = self.manager.clone();
        let raw: Option<String> = con.get(Self::key(fingerprint)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, entry: &CachedEntry) -> Result<(), CacheError> {
        let mut con = self.manager.clone();
        let json = serde_json::to_string(entry)?;
        con.set_ex::<_, _, ()>(Self::key(&entry.fingerprint), json, self.ttl_secs())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl L1Cache for RedisL1Cache {
    async fn get(&self, fingerprint: &str) -> Result<Option<CachedEntry>, CacheError> {
        let mut entry = match self.read(fingerprint).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(e) => {
                log::warn!("L1 KV get failed for {fingerprint}: {e}; treating as miss");
                return Ok(None);
            }
        };

        entry.record_hit();
        // Writing back persists the hit bump and slides the TTL window.
        if let Err(e) = self.write(&entry).await {
            log::warn!("L1 KV hit write-back failed for {fingerprint}: {e}");
        }
        Ok(Some(entry))
    }

    async fn peek(&self, fingerprint: &str) -> Result<Option<CachedEntry>, CacheError> {
        match self.read(fingerprint).await {
            Ok(found) => Ok(found),
            Err(e) => {
                log::warn!("L1 KV peek failed for {fingerprint}: {e}; treating as miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, mut entry: CachedEntry) -> Result<(), CacheError> {
        // Preserve an existing pin across overwrites, same as the in-memory
        // implementation.
        if let Ok(Some(existing)) = self.read(&entry.fingerprint).await {
            entry.pinned = entry.pinned || existing.pinned;
        }
        if let Err(e) = self.write(&entry).await {
            log::warn!("L1 KV set failed for {}: {e}; entry not cached", entry.fingerprint);
        }
        Ok(())
    }

    async fn add_example(&self, fingerprint: &str, query: &str) -> Result<(), CacheError> {
        if let Ok(Some(mut entry)) = self.read(fingerprint).await {
            entry.add_example(query);
            if let Err(e) = self.write(&entry).await {
                log::warn!("L1 KV example write-back failed for {fingerprint}: {e}");
            }
        }
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<bool, CacheError> {
        match self.read(fingerprint).await? {
            Some(entry) if entry.pinned => Err(CacheError::Pinned(fingerprint.to_string())),
            Some(_) => {
                let mut con = self.manager.clone();
                let removed: u64 = con.del(Self::key(fingerprint)).await?;
                Ok(removed > 0)
            }
            None => Ok(false),
        }
    }

    async fn set_pinned(&self, fingerprint: &str, pinned: bool) -> Result<bool, CacheError> {
        match self.read(fingerprint).await? {
            Some(mut entry) => {
                entry.pinned = pinned;
                self.write(&entry).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<CachedEntry>, CacheError> {
        // Full prefix scan: O(N). Fine for the modest working sets this
        // cache is sized for.
        let keys = match self.scan_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("L1 KV scan failed: {e}; reporting empty cache");
                return Ok(Vec::new());
            }
        };

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let mut con = self.manager.clone();
            let raw: Option<String> = match con.get(&key).await {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!("L1 KV read of {key} failed during list: {e}");
                    continue;
                }
            };
            if let Some(json) = raw {
                match serde_json::from_str::<CachedEntry>(&json) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => log::warn!("L1 KV entry {key} is corrupt: {e}"),
                }
            }
        }
        entries.sort_by_key(|e| e.last_used_at);
        Ok(entries)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let keys = self.scan_keys().await?;
        for key in keys {
            let mut con = self.manager.clone();
            let raw: Option<String> = con.get(&key).await?;
            let pinned = raw
                .as_deref()
                .and_then(|json| serde_json::from_str::<CachedEntry>(json).ok())
                .map(|e| e.pinned)
                .unwrap_or(false);
            if !pinned {
                con.del::<_, ()>(&key).await?;
            }
        }
        Ok(())
    }

    async fn len(&self) -> usize {
        match self.scan_keys().await {
            Ok(keys) => keys.len(),
            Err(e) => {
                log::warn!("L1 KV scan failed while sizing: {e}");
                0
            }
        }
    }
}

impl RedisL1Cache {
    async fn scan_keys(&self) -> Result<Vec<String>, CacheError> {
        let mut con = self.manager.clone();
        let mut iter: redis::AsyncIter<String> =
            con.scan_match(format!("{KEY_PREFIX}*")).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}
