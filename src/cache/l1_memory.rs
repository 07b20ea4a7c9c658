//! In-memory L1: a bounded fingerprint → entry map with LRU eviction.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CacheError, CachedEntry, L1Cache};

/// In-memory exact cache.
///
/// `order` tracks access recency explicitly (front = least recently used);
/// every operation takes the single mutex once and never yields while
/// holding it.
pub struct MemoryL1Cache {
    max_size: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<String, CachedEntry>,
    order: Vec<String>,
}

impl Inner {
    fn touch(&mut self, fingerprint: &str) {
        if let Some(pos) = self.order.iter().position(|f| f == fingerprint) {
            let f = self.order.remove(pos);
            self.order.push(f);
        }
    }

    /// Evict the least-recently-used unpinned entry. When every entry is
    /// pinned the LRU entry goes anyway, with a warning: an all-pinned full
    /// cache is a configuration error, not something to hide.
    fn evict_one(&mut self) {
        let victim = self
            .order
            .iter()
            .find(|f| self.entries.get(*f).map(|e| !e.pinned).unwrap_or(true))
            .cloned();

        let victim = match victim {
            Some(f) => f,
            None => match self.order.first().cloned() {
                Some(f) => {
                    log::warn!(
                        "L1 cache full with every entry pinned; evicting pinned entry {f} - \
                         raise max_size or unpin entries"
                    );
                    f
                }
                None => return,
            },
        };

        self.entries.remove(&victim);
        self.order.retain(|f| *f != victim);
        log::debug!("L1 evicted {victim}");
    }
}

impl MemoryL1Cache {
    pub fn new(max_size: usize) -> Self {
        MemoryL1Cache {
            max_size: max_size.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means another thread panicked mid-operation; the
        // map itself is still structurally sound for our usage.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl L1Cache for MemoryL1Cache {
    async fn get(&self, fingerprint: &str) -> Result<Option<CachedEntry>, CacheError> {
        let mut inner = self.lock();
        match inner.entries.get_mut(fingerprint) {
            Some(entry) => {
                entry.record_hit();
                let copy = entry.clone();
                inner.touch(fingerprint);
                Ok(Some(copy))
            }
            None => Ok(None),
        }
    }

    async fn peek(&self, fingerprint: &str) -> Result<Option<CachedEntry>, CacheError> {
        Ok(self.lock().entries.get(fingerprint).cloned())
    }

    async fn set(&self, mut entry: CachedEntry) -> Result<(), CacheError> {
        let mut inner = self.lock();
        if let Some(existing) = inner.entries.get(&entry.fingerprint) {
            // Replacing a pinned entry must not silently unpin it.
            entry.pinned = entry.pinned || existing.pinned;
            let fingerprint = entry.fingerprint.clone();
            inner.entries.insert(fingerprint.clone(), entry);
            inner.touch(&fingerprint);
            return Ok(());
        }

        if inner.entries.len() >= self.max_size {
            inner.evict_one();
        }
        inner.order.push(entry.fingerprint.clone());
        inner.entries.insert(entry.fingerprint.clone(), entry);
        Ok(())
    }

    async fn add_example(&self, fingerprint: &str, query: &str) -> Result<(), CacheError> {
        if let Some(entry) = self.lock().entries.get_mut(fingerprint) {
            entry.add_example(query);
        }
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<bool, CacheError> {
        let mut inner = self.lock();
        match inner.entries.get(fingerprint) {
            Some(entry) if entry.pinned => Err(CacheError::Pinned(fingerprint.to_string())),
            Some(_) => {
                inner.entries.remove(fingerprint);
                inner.order.retain(|f| f != fingerprint);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_pinned(&self, fingerprint: &str, pinned: bool) -> Result<bool, CacheError> {
        match self.lock().entries.get_mut(fingerprint) {
            Some(entry) => {
                entry.pinned = pinned;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<CachedEntry>, CacheError> {
        let inner = self.lock();
        Ok(inner
            .order
            .iter()
            .filter_map(|f| inner.entries.get(f))
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut inner = self.lock();
        inner.entries.retain(|_, e| e.pinned);
        let kept: std::collections::HashSet<String> = inner.entries.keys().cloned().collect();
        inner.order.retain(|f| kept.contains(f));
        Ok(())
    }

    async fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(f: &str) -> CachedEntry {
        CachedEntry::new(f, "SELECT 1", vec![], format!("pattern:{f}"))
    }

    #[tokio::test]
    async fn test_get_bumps_hit_count_and_returns_copy() {
        let cache = MemoryL1Cache::new(10);
        cache.set(entry("a")).await.unwrap();

        let first = cache.get("a").await.unwrap().unwrap();
        assert_eq!(first.hit_count, 2); // creation + this use

        // Mutating the returned copy must not leak into the store.
        let mut copy = first;
        copy.sql = "SELECT 2".to_string();
        assert_eq!(cache.peek("a").await.unwrap().unwrap().sql, "SELECT 1");
    }

    #[tokio::test]
    async fn test_peek_does_not_record_a_use() {
        let cache = MemoryL1Cache::new(10);
        cache.set(entry("a")).await.unwrap();
        cache.peek("a").await.unwrap();
        assert_eq!(cache.peek("a").await.unwrap().unwrap().hit_count, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_keeps_the_most_recent_entries() {
        let cache = MemoryL1Cache::new(3);
        for f in ["a", "b", "c"] {
            cache.set(entry(f)).await.unwrap();
        }
        // Touch "a" so "b" becomes the LRU.
        cache.get("a").await.unwrap();
        cache.set(entry("d")).await.unwrap();

        assert_eq!(cache.len().await, 3);
        assert!(cache.peek("b").await.unwrap().is_none());
        for f in ["a", "c", "d"] {
            assert!(cache.peek(f).await.unwrap().is_some(), "{f} missing");
        }
    }

    #[tokio::test]
    async fn test_eviction_skips_pinned_entries() {
        let cache = MemoryL1Cache::new(2);
        cache.set(entry("a")).await.unwrap();
        cache.set(entry("b")).await.unwrap();
        cache.set_pinned("a", true).await.unwrap();

        cache.set(entry("c")).await.unwrap();

        assert!(cache.peek("a").await.unwrap().is_some());
        assert!(cache.peek("b").await.unwrap().is_none());
        assert!(cache.peek("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_all_pinned_cache_still_evicts_exactly_one() {
        let cache = MemoryL1Cache::new(2);
        cache.set(entry("a")).await.unwrap();
        cache.set(entry("b")).await.unwrap();
        cache.set_pinned("a", true).await.unwrap();
        cache.set_pinned("b", true).await.unwrap();

        cache.set(entry("c")).await.unwrap();

        assert_eq!(cache.len().await, 2);
        assert!(cache.peek("a").await.unwrap().is_none(), "LRU pinned entry should go");
        assert!(cache.peek("b").await.unwrap().is_some());
        assert!(cache.peek("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_refuses_pinned_entries() {
        let cache = MemoryL1Cache::new(10);
        cache.set(entry("a")).await.unwrap();
        cache.set_pinned("a", true).await.unwrap();

        assert!(matches!(
            cache.delete("a").await,
            Err(CacheError::Pinned(_))
        ));

        cache.set_pinned("a", false).await.unwrap();
        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_keeps_pinned_entries() {
        let cache = MemoryL1Cache::new(10);
        cache.set(entry("a")).await.unwrap();
        cache.set(entry("b")).await.unwrap();
        cache.set_pinned("b", true).await.unwrap();

        cache.clear().await.unwrap();

        assert_eq!(cache.len().await, 1);
        assert!(cache.peek("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replacing_a_pinned_entry_preserves_the_pin() {
        let cache = MemoryL1Cache::new(10);
        cache.set(entry("a")).await.unwrap();
        cache.set_pinned("a", true).await.unwrap();

        cache.set(entry("a")).await.unwrap();
        assert!(cache.peek("a").await.unwrap().unwrap().pinned);
    }

    #[tokio::test]
    async fn test_list_returns_lru_order() {
        let cache = MemoryL1Cache::new(10);
        for f in ["a", "b", "c"] {
            cache.set(entry(f)).await.unwrap();
        }
        cache.get("a").await.unwrap();

        let order: Vec<String> = cache
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.fingerprint)
            .collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }
}
