//! The cache entry shape shared by every tier.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::JsonValue;

/// Most example queries retained per entry.
const MAX_EXAMPLE_QUERIES: usize = 10;

/// Primitive classification of a result column, sampled from the first row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

/// A column's inferred type plus an optional hint (currently only `date`
/// for ISO-prefixed strings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnShape {
    #[serde(rename = "type")]
    pub kind: ColumnType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hint: Option<String>,
}

impl ColumnShape {
    pub fn of(kind: ColumnType) -> Self {
        ColumnShape { kind, hint: None }
    }

    pub fn date() -> Self {
        ColumnShape {
            kind: ColumnType::String,
            hint: Some("date".to_string()),
        }
    }
}

/// Inferred JSON shape of result rows: column name → primitive type.
pub type ResultSchema = BTreeMap<String, ColumnShape>;

/// A cached query schema: generated SQL plus bookkeeping.
///
/// The same shape is stored in L1 (keyed by fingerprint) and, extended with
/// an embedding, in L2. Timestamps serialize as ISO-8601 so entries survive
/// the external-KV round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub fingerprint: String,
    pub sql: String,
    pub params: Vec<JsonValue>,
    /// The canonical normalized text this SQL answers.
    pub intent_pattern: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub hit_count: u64,
    /// Pinned entries are exempt from eviction and deletion.
    #[serde(default)]
    pub pinned: bool,
    /// Last distinct natural-language phrasings seen for this fingerprint.
    #[serde(default)]
    pub example_queries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_schema: Option<ResultSchema>,
}

impl CachedEntry {
    /// Create a fresh entry. The creating resolve counts as the first use,
    /// so `hit_count` starts at 1.
    pub fn new(
        fingerprint: impl Into<String>,
        sql: impl Into<String>,
        params: Vec<JsonValue>,
        intent_pattern: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        CachedEntry {
            fingerprint: fingerprint.into(),
            sql: sql.into(),
            params,
            intent_pattern: intent_pattern.into(),
            created_at: now,
            last_used_at: now,
            hit_count: 1,
            pinned: false,
            example_queries: Vec::new(),
            result_schema: None,
        }
    }

    /// Record a cache hit: bump the counter and the recency timestamp.
    pub fn record_hit(&mut self) {
        self.hit_count += 1;
        self.last_used_at = Utc::now();
    }

    /// Remember a natural-language phrasing, keeping the last
    /// [`MAX_EXAMPLE_QUERIES`] distinct strings.
    pub fn add_example(&mut self, query: &str) {
        let query = query.trim();
        if query.is_empty() {
            return;
        }
        if let Some(pos) = self.example_queries.iter().position(|q| q == query) {
            self.example_queries.remove(pos);
        }
        self.example_queries.push(query.to_string());
        if self.example_queries.len() > MAX_EXAMPLE_QUERIES {
            let excess = self.example_queries.len() - MAX_EXAMPLE_QUERIES;
            self.example_queries.drain(..excess);
        }
    }

    /// Copy of this entry re-keyed under another fingerprint (L2→L1
    /// promotion stores the matched entry under the *current* query's
    /// fingerprint).
    pub fn rekeyed(&self, fingerprint: &str) -> Self {
        let mut copy = self.clone();
        copy.fingerprint = fingerprint.to_string();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CachedEntry {
        CachedEntry::new("ab12", "SELECT 1", vec![], "entity:t|operation:list")
    }

    #[test]
    fn test_new_entry_counts_creation_as_first_use() {
        assert_eq!(entry().hit_count, 1);
    }

    #[test]
    fn test_record_hit_bumps_count_and_recency() {
        let mut e = entry();
        let before = e.last_used_at;
        e.record_hit();
        assert_eq!(e.hit_count, 2);
        assert!(e.last_used_at >= before);
    }

    #[test]
    fn test_examples_are_distinct_and_bounded() {
        let mut e = entry();
        for i in 0..15 {
            e.add_example(&format!("query {i}"));
        }
        e.add_example("query 14"); // duplicate, should not grow
        assert_eq!(e.example_queries.len(), 10);
        assert_eq!(e.example_queries.last().unwrap(), "query 14");
        assert_eq!(e.example_queries.first().unwrap(), "query 5");
    }

    #[test]
    fn test_rekeyed_changes_only_the_fingerprint() {
        let e = entry();
        let r = e.rekeyed("cd34");
        assert_eq!(r.fingerprint, "cd34");
        assert_eq!(r.sql, e.sql);
        assert_eq!(r.hit_count, e.hit_count);
    }

    #[test]
    fn test_entry_round_trips_through_json() {
        let mut e = entry();
        e.result_schema = Some(
            [
                ("id".to_string(), ColumnShape::of(ColumnType::Integer)),
                ("created".to_string(), ColumnShape::date()),
            ]
            .into_iter()
            .collect(),
        );
        let json = serde_json::to_string(&e).unwrap();
        let back: CachedEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
