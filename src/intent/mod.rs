//! Intent normalization and fingerprinting.
//!
//! A raw natural-language query is parsed (via the configured LLM) into a
//! canonical [`Intent`] whose `normalized_text` is stable across trivially
//! varying phrasings of the same logical request. The 16-hex-char SHA-256
//! prefix of that text is the cache fingerprint shared by every cache layer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::JsonValue;

mod fingerprint;
mod normalize;
mod parser;

pub use fingerprint::{fingerprint, query_text_key};
pub use normalize::normalized_text;
pub use parser::IntentParser;

/// Errors produced while turning raw text into a canonical intent.
#[derive(Debug, Error)]
pub enum IntentError {
    #[error("query exceeds maximum length ({length} > {max})")]
    QueryTooLong { length: usize, max: usize },

    #[error("query must not be empty")]
    EmptyQuery,

    #[error("LLM did not produce a valid intent after {attempts} attempts: {message}")]
    Parse { attempts: usize, message: String },

    #[error("unknown table '{entity}'")]
    UnknownEntity {
        entity: String,
        known_tables: Vec<String>,
    },

    #[error("unknown operation '{0}' (expected list, count, aggregate or filter)")]
    UnknownOperation(String),

    #[error("invalid sort specification '{0}' (expected 'field:asc' or 'field:desc')")]
    InvalidSort(String),
}

impl IntentError {
    /// Machine-readable fix-up suggestions, when the error has any.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            IntentError::UnknownEntity { known_tables, .. } => known_tables
                .iter()
                .map(|t| format!("use table '{t}'"))
                .collect(),
            IntentError::UnknownOperation(_) => ["list", "count", "aggregate", "filter"]
                .iter()
                .map(|o| format!("use operation '{o}'"))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// The closed set of query operations the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    List,
    Count,
    Aggregate,
    Filter,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Count => "count",
            Operation::Aggregate => "aggregate",
            Operation::Filter => "filter",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = IntentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "list" => Ok(Operation::List),
            "count" => Ok(Operation::Count),
            "aggregate" => Ok(Operation::Aggregate),
            "filter" => Ok(Operation::Filter),
            other => Err(IntentError::UnknownOperation(other.to_string())),
        }
    }
}

/// Sort direction of a [`SortSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Parsed `field:direction` sort request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    /// Parse a `field:direction` pair. Direction defaults to ascending when
    /// omitted; anything other than asc/desc is rejected.
    pub fn parse(raw: &str) -> Result<Self, IntentError> {
        let lowered = raw.trim().to_lowercase();
        if lowered.is_empty() {
            return Err(IntentError::InvalidSort(raw.to_string()));
        }
        let (field, direction) = match lowered.split_once(':') {
            None => (lowered.as_str(), SortDirection::Asc),
            Some((f, "asc")) => (f, SortDirection::Asc),
            Some((f, "desc")) => (f, SortDirection::Desc),
            Some(_) => return Err(IntentError::InvalidSort(raw.to_string())),
        };
        let field = field.trim();
        if field.is_empty() {
            return Err(IntentError::InvalidSort(raw.to_string()));
        }
        Ok(SortSpec {
            field: field.to_string(),
            direction,
        })
    }

    /// Canonical `field:direction` rendering used in normalized text.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.field, self.direction.as_str())
    }
}

/// Canonical structured representation of a natural-language query.
///
/// Two queries that mean the same thing produce the same `Intent` (up to
/// filter ordering and letter case), and therefore the same fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Target table, lowercased and validated against the introspected schema.
    pub entity: String,
    pub operation: Operation,
    /// Filter field → primitive-or-list. BTreeMap keeps keys in the
    /// lexicographic order the canonicalization contract requires.
    pub filters: BTreeMap<String, JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Requested output columns, lowercased. Empty means "all".
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    /// Canonical pipe-delimited text; the sole input to the fingerprint.
    pub normalized_text: String,
}

impl Intent {
    /// Fingerprint of this intent (16-hex-char SHA-256 prefix of
    /// `normalized_text`).
    pub fn fingerprint(&self) -> String {
        fingerprint::fingerprint(&self.normalized_text)
    }
}
