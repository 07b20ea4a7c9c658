//! Semantic (vector) L2 cache.
//!
//! A flat insertion-ordered sequence scanned linearly with inline cosine
//! similarity. The contract is recall at the configured threshold, not a
//! particular index structure.

use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::llm::Embedder;

use super::{CacheError, CachedEntry};

/// A cached entry plus the embedding of the query that produced it.
#[derive(Debug, Clone)]
pub struct L2Entry {
    pub entry: CachedEntry,
    pub embedding: Vec<f32>,
}

/// Best match of a [`SemanticCache::find`] scan.
#[derive(Debug, Clone)]
pub struct SemanticMatch {
    pub entry: CachedEntry,
    pub similarity: f32,
}

/// Outcome of a find: the embedding is always returned so the caller can
/// reuse it on the populate path instead of paying for a second embed call.
#[derive(Debug, Clone)]
pub struct FindOutcome {
    pub matched: Option<SemanticMatch>,
    pub embedding: Vec<f32>,
}

pub struct SemanticCache {
    embedder: Arc<dyn Embedder>,
    threshold: f32,
    max_size: usize,
    /// Front = least recently used, back = most recently used.
    inner: Mutex<Vec<L2Entry>>,
}

impl SemanticCache {
    pub fn new(embedder: Arc<dyn Embedder>, threshold: f32, max_size: usize) -> Self {
        SemanticCache {
            embedder,
            threshold,
            max_size: max_size.max(1),
            inner: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<L2Entry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Embed `query` and scan for the best match at or above the threshold.
    /// Ties go to the most recently used entry.
    pub async fn find(&self, query: &str) -> Result<FindOutcome, Error> {
        let embedding = self.embedder.embed(query).await?;

        let entries = self.lock();
        if let Some(first) = entries.first() {
            if first.embedding.len() != embedding.len() {
                return Err(CacheError::DimensionMismatch {
                    expected: first.embedding.len(),
                    actual: embedding.len(),
                }
                .into());
            }
        }

        let mut best: Option<(usize, f32)> = None;
        // Scan from the MRU end so that a strict `>` keeps the most recently
        // used entry on similarity ties.
        for (idx, candidate) in entries.iter().enumerate().rev() {
            let score = cosine_similarity(&embedding, &candidate.embedding);
            if score >= self.threshold && best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((idx, score));
            }
        }

        let matched = best.map(|(idx, similarity)| SemanticMatch {
            entry: entries[idx].entry.clone(),
            similarity,
        });
        drop(entries);

        if let Some(m) = &matched {
            log::debug!(
                "L2 match {} at similarity {:.4}",
                m.entry.fingerprint,
                m.similarity
            );
        }
        Ok(FindOutcome { matched, embedding })
    }

    /// Embed `query` and insert. Prefer [`Self::add_with_embedding`] when an
    /// embedding is already in hand.
    pub async fn add(&self, query: &str, entry: CachedEntry) -> Result<(), Error> {
        let embedding = self.embedder.embed(query).await?;
        self.add_with_embedding(embedding, entry)?;
        Ok(())
    }

    /// Insert with a pre-computed embedding (the L3 populate path).
    pub fn add_with_embedding(
        &self,
        embedding: Vec<f32>,
        entry: CachedEntry,
    ) -> Result<(), CacheError> {
        let mut entries = self.lock();
        if let Some(first) = entries.first() {
            if first.embedding.len() != embedding.len() {
                return Err(CacheError::DimensionMismatch {
                    expected: first.embedding.len(),
                    actual: embedding.len(),
                });
            }
        }

        // Re-adding a fingerprint replaces its entry and counts as a use.
        if let Some(pos) = entries
            .iter()
            .position(|e| e.entry.fingerprint == entry.fingerprint)
        {
            entries.remove(pos);
        } else if entries.len() >= self.max_size {
            let evicted = entries.remove(0);
            log::debug!("L2 evicted {}", evicted.entry.fingerprint);
        }

        entries.push(L2Entry { entry, embedding });
        Ok(())
    }

    /// Record a hit on a matched entry: bump counters and move it to the
    /// most-recently-used position.
    pub fn record_hit(&self, fingerprint: &str) {
        let mut entries = self.lock();
        if let Some(pos) = entries
            .iter()
            .position(|e| e.entry.fingerprint == fingerprint)
        {
            let mut item = entries.remove(pos);
            item.entry.record_hit();
            entries.push(item);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Cosine similarity without intermediate allocations.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::llm::LlmError;

    use super::*;

    /// Embedder returning fixed vectors per known query.
    struct FixedEmbedder {
        vectors: Vec<(&'static str, Vec<f32>)>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.vectors
                .iter()
                .find(|(q, _)| *q == text)
                .map(|(_, v)| v.clone())
                .ok_or(LlmError::Malformed {
                    provider: "fixed",
                    message: "unknown text".to_string(),
                })
        }
    }

    fn entry(f: &str) -> CachedEntry {
        CachedEntry::new(f, "SELECT 1", vec![], format!("pattern:{f}"))
    }

    fn cache_with(vectors: Vec<(&'static str, Vec<f32>)>) -> SemanticCache {
        SemanticCache::new(
            Arc::new(FixedEmbedder {
                vectors,
                calls: AtomicUsize::new(0),
            }),
            0.85,
            3,
        )
    }

    #[test]
    fn test_cosine_of_identical_vectors_is_one() {
        let v = [0.5f32, 0.5, 0.7];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_find_returns_match_above_threshold_and_the_embedding() {
        let cache = cache_with(vec![
            ("original", vec![1.0, 0.0, 0.0]),
            ("paraphrase", vec![0.98, 0.1, 0.0]),
            ("unrelated", vec![0.0, 1.0, 0.0]),
        ]);
        cache.add("original", entry("aaa")).await.unwrap();

        let hit = cache.find("paraphrase").await.unwrap();
        assert_eq!(hit.embedding, vec![0.98, 0.1, 0.0]);
        let matched = hit.matched.unwrap();
        assert_eq!(matched.entry.fingerprint, "aaa");
        assert!(matched.similarity >= 0.85);

        let miss = cache.find("unrelated").await.unwrap();
        assert!(miss.matched.is_none());
        assert_eq!(miss.embedding, vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_eviction_drops_the_least_recently_used() {
        let cache = cache_with(vec![]);
        for f in ["a", "b", "c"] {
            cache
                .add_with_embedding(vec![1.0, 0.0], entry(f))
                .unwrap();
        }
        cache.record_hit("a"); // "b" is now LRU

        cache.add_with_embedding(vec![0.0, 1.0], entry("d")).unwrap();

        let fingerprints: Vec<String> = cache
            .lock()
            .iter()
            .map(|e| e.entry.fingerprint.clone())
            .collect();
        assert_eq!(fingerprints, vec!["c", "a", "d"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let cache = cache_with(vec![]);
        cache
            .add_with_embedding(vec![1.0, 0.0, 0.0], entry("a"))
            .unwrap();

        let err = cache
            .add_with_embedding(vec![1.0, 0.0], entry("b"))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_similarity_ties_go_to_the_most_recently_used_entry() {
        let cache = cache_with(vec![("query", vec![1.0, 0.0, 0.0])]);
        cache
            .add_with_embedding(vec![1.0, 0.0, 0.0], entry("old"))
            .unwrap();
        cache
            .add_with_embedding(vec![1.0, 0.0, 0.0], entry("new"))
            .unwrap();

        let hit = cache.find("query").await.unwrap();
        assert_eq!(hit.matched.unwrap().entry.fingerprint, "new");

        // Touching "old" flips the tie the other way.
        cache.record_hit("old");
        let hit = cache.find("query").await.unwrap();
        assert_eq!(hit.matched.unwrap().entry.fingerprint, "old");
    }

    #[tokio::test]
    async fn test_readding_a_fingerprint_replaces_instead_of_growing() {
        let cache = cache_with(vec![]);
        cache.add_with_embedding(vec![1.0], entry("a")).unwrap();
        cache.add_with_embedding(vec![0.9], entry("a")).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
