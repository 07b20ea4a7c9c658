//! Public request/response shapes for the resolve pipeline.

use serde::{Deserialize, Serialize};

use crate::cache::CachedEntry;
use crate::intent::Intent;

/// Dynamic JSON value used for filter values, SQL parameters and row cells:
/// null | bool | number | string | array | object.
pub type JsonValue = serde_json::Value;

/// One result row: column name → value, in SELECT order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Per-call options for [`crate::Nttp::resolve`].
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    /// If false, bypass L1 and L2 reads (writes still happen on success).
    pub use_cache: bool,
    /// If true, bypass all cache reads and regenerate; still populate on success.
    pub force_new_schema: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            use_cache: true,
            force_new_schema: false,
        }
    }
}

/// Which layer answered a resolve call. Serializes as the layer number
/// (1, 2 or 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLayer {
    /// Exact fingerprint match.
    L1,
    /// Semantic (vector similarity) match.
    L2,
    /// Generative path - SQL was produced by the LLM on this call.
    L3,
}

impl CacheLayer {
    pub fn as_number(&self) -> u8 {
        match self {
            CacheLayer::L1 => 1,
            CacheLayer::L2 => 2,
            CacheLayer::L3 => 3,
        }
    }
}

impl Serialize for CacheLayer {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_number())
    }
}

/// Execution metadata attached to every resolve result.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveMeta {
    pub layer: CacheLayer,
    /// Estimated dollar cost of the LLM work this call performed.
    pub cost: f64,
    pub latency_ms: f64,
    /// Cosine similarity of the matched entry; present only for L2 hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// Result of a resolve call.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    /// The original natural-language query.
    pub query: String,
    pub data: Vec<Row>,
    pub fingerprint: String,
    pub cache_hit: bool,
    pub sql: String,
    pub params: Vec<JsonValue>,
    pub intent: Intent,
    pub meta: ResolveMeta,
}

/// Result of an explain call. Never executes SQL.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub intent: Intent,
    pub sql: String,
    pub params: Vec<JsonValue>,
    pub fingerprint: String,
    /// Present when the fingerprint was already cached in L1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_entry: Option<CachedEntry>,
}
