//! Canonicalization of intents into a deterministic normalized text.
//!
//! The output of [`normalized_text`] is a cross-instance contract: any
//! deviation invalidates fingerprint compatibility between processes that
//! share an external cache. Changes here are wire-format changes.

use std::collections::BTreeMap;

use crate::models::JsonValue;

use super::{Operation, SortSpec};

/// Build the canonical pipe-delimited representation of an intent.
///
/// Layout (sections appear only when non-empty):
///
/// ```text
/// entity:<e>|operation:<o>[|filters:<k1>=<v1>,<k2>=<v2>][|limit:<n>][|fields:<a,b>][|sort:<field:dir>]
/// ```
///
/// Filter keys are sorted lexicographically; entity, operation, keys and
/// values are lowercased and trimmed. Fields are lowercased and sorted.
pub fn normalized_text(
    entity: &str,
    operation: Operation,
    filters: &BTreeMap<String, JsonValue>,
    limit: Option<u64>,
    fields: &[String],
    sort: Option<&SortSpec>,
) -> String {
    let mut parts = vec![
        format!("entity:{}", entity.trim().to_lowercase()),
        format!("operation:{}", operation.as_str()),
    ];

    if !filters.is_empty() {
        // BTreeMap iteration is already key-sorted.
        let rendered = filters
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    k.trim().to_lowercase(),
                    scalar_to_string(v).trim().to_lowercase()
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        parts.push(format!("filters:{rendered}"));
    }

    if let Some(n) = limit {
        if n > 0 {
            parts.push(format!("limit:{n}"));
        }
    }

    if !fields.is_empty() {
        let mut cols: Vec<String> = fields.iter().map(|f| f.trim().to_lowercase()).collect();
        cols.sort();
        parts.push(format!("fields:{}", cols.join(",")));
    }

    if let Some(s) = sort {
        parts.push(format!("sort:{}", s.canonical().to_lowercase()));
    }

    parts.join("|")
}

/// Stringify a filter value the way the canonicalization contract demands.
///
/// Booleans and numbers coerce via their display representation, lists join
/// their coerced elements with commas (element order is preserved - lists
/// are positional), objects fall back to compact JSON.
pub fn scalar_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(","),
        JsonValue::Object(_) => value.to_string(),
    }
}
