//! Cache statistics: lock-free counters plus point-in-time reports.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::CostConfig;

/// Atomic counters shared across the pipeline. Exact consistency with the
/// underlying maps is not required; relaxed ordering is enough.
#[derive(Debug, Default)]
pub struct StatsTracker {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l3_calls: AtomicU64,
    total_queries: AtomicU64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l1_miss(&self) {
        self.l1_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_miss(&self) {
        self.l2_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l3_call(&self) {
        self.l3_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters into a report.
    pub fn report(&self, l1_size: usize, l2_size: usize, costs: &CostConfig) -> CacheStatsReport {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l1_misses = self.l1_misses.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let l2_misses = self.l2_misses.load(Ordering::Relaxed);
        let l3_calls = self.l3_calls.load(Ordering::Relaxed);
        let total_queries = self.total_queries.load(Ordering::Relaxed);

        // Savings formula: L1 hits are worth c1 apiece, L2 hits avoid a
        // generation but still pay for an embedding.
        let estimated_cost_saved = l1_hits as f64 * costs.l1_hit
            + l2_hits as f64 * (costs.generate - costs.embed);

        let overall_hits = l1_hits + l2_hits;
        CacheStatsReport {
            l1: LayerStats {
                size: l1_size,
                hits: l1_hits,
                misses: l1_misses,
                hit_rate: rate(l1_hits, l1_hits + l1_misses),
            },
            l2: LayerStats {
                size: l2_size,
                hits: l2_hits,
                misses: l2_misses,
                hit_rate: rate(l2_hits, l2_hits + l2_misses),
            },
            l3: GenerativeStats { calls: l3_calls },
            total_queries,
            overall_hit_rate: rate(overall_hits, total_queries),
            estimated_cost_saved,
        }
    }
}

fn rate(hits: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Per-layer hit accounting.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LayerStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// L3 is not a store; it only counts generations.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerativeStats {
    pub calls: u64,
}

/// Point-in-time view of the whole cache.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStatsReport {
    pub l1: LayerStats,
    pub l2: LayerStats,
    pub l3: GenerativeStats,
    pub total_queries: u64,
    pub overall_hit_rate: f64,
    pub estimated_cost_saved: f64,
}
