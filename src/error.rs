//! Top-level error type: a flat enum of error kinds, each preserving the
//! originating module's error and, where it exists, the offending SQL and
//! machine-readable suggestions.

use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::db::DbError;
use crate::intent::IntentError;
use crate::llm::LlmError;
use crate::sqlgen::SqlGenError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("intent parsing failed: {0}")]
    IntentParse(#[from] IntentError),

    #[error("SQL generation failed: {0}")]
    SqlGeneration(#[from] SqlGenError),

    #[error("SQL execution failed: {0}")]
    SqlExecution(#[from] DbError),

    #[error("LLM failure: {0}")]
    Llm(#[from] LlmError),

    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// The SQL involved in this failure, when any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::SqlGeneration(e) => e.sql(),
            Error::SqlExecution(e) => e.sql(),
            _ => None,
        }
    }

    /// Machine-readable fix-up suggestions, empty when none apply.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Error::IntentParse(e) => e.suggestions(),
            Error::SqlGeneration(e) => e.suggestions(),
            Error::Cache(CacheError::DimensionMismatch { .. }) => {
                vec!["clear the semantic cache after changing the embedding provider".to_string()]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_is_surfaced_from_generation_errors() {
        let err = Error::SqlGeneration(SqlGenError::Unsafe {
            message: "forbidden keyword DROP".to_string(),
            sql: "DROP TABLE users".to_string(),
        });
        assert_eq!(err.sql(), Some("DROP TABLE users"));
        assert!(!err.suggestions().is_empty());
    }

    #[test]
    fn test_unknown_entity_suggests_known_tables() {
        let err = Error::IntentParse(IntentError::UnknownEntity {
            entity: "orders".to_string(),
            known_tables: vec!["users".to_string()],
        });
        assert_eq!(err.suggestions(), vec!["use table 'users'".to_string()]);
    }
}
