//! Prompt templates for SQL generation and correction.

use serde_json::json;

use crate::db::Dialect;
use crate::intent::Intent;
use crate::models::JsonValue;

/// JSON schema constraining the LLM's SQL output.
pub fn sql_response_schema() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "sql": {
                "type": "string",
                "description": "A single read-only SQL query using ? placeholders"
            },
            "params": {
                "type": "array",
                "items": {
                    "type": ["string", "number", "boolean", "null"]
                },
                "description": "One value per ? placeholder, in order"
            }
        },
        "required": ["sql", "params"],
        "additionalProperties": false
    })
}

/// System prompt for a fresh generation attempt.
pub fn system_prompt(dialect: Dialect, schema_description: &str, default_limit: u64) -> String {
    format!(
        "You write {dialect} SQL for a read-only query API.\n\
         Rules:\n\
         - Produce exactly one SELECT (or WITH...SELECT) statement.\n\
         - Never use data-modifying or DDL statements.\n\
         - Use ? placeholders for every literal value and list each value in `params` in order.\n\
         - Unless the request specifies a limit, add LIMIT {default_limit}.\n\
         {idioms}\n\n\
         Database schema:\n{schema_description}",
        dialect = dialect.display_name(),
        idioms = dialect_idioms(dialect),
    )
}

/// System prompt for a correction attempt after a failed execution or a
/// safety rejection. Carries the failed SQL and the error verbatim so the
/// model can repair rather than regenerate blindly.
pub fn correction_prompt(
    dialect: Dialect,
    schema_description: &str,
    default_limit: u64,
    failed_sql: &str,
    error: &str,
) -> String {
    format!(
        "{base}\n\n\
         Your previous query failed.\n\
         Failed SQL:\n{failed_sql}\n\
         Error:\n{error}\n\n\
         Produce a corrected query that satisfies all of the rules above.",
        base = system_prompt(dialect, schema_description, default_limit),
    )
}

/// User prompt: the canonical intent, serialized.
pub fn user_prompt(intent: &Intent) -> String {
    let payload = json!({
        "entity": intent.entity,
        "operation": intent.operation,
        "filters": intent.filters,
        "limit": intent.limit,
        "fields": intent.fields,
        "sort": intent.sort.as_ref().map(|s| s.canonical()),
    });
    format!("Write the SQL for this query intent:\n{payload}")
}

/// Dialect-specific phrasing baked into the prompt; the generator never
/// rewrites SQL after the fact.
fn dialect_idioms(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Postgres => {
            "- For fuzzy text matching use ILIKE with a %-wrapped ? parameter.\n\
             - Quote mixed-case identifiers with double quotes."
        }
        Dialect::Mysql => {
            "- For fuzzy text matching use LIKE with a %-wrapped ? parameter \
             (default collations are case-insensitive).\n\
             - Quote reserved-word identifiers with backticks."
        }
        Dialect::Sqlite => {
            "- For fuzzy text matching use UPPER(column) LIKE UPPER(?) with a %-wrapped parameter.\n\
             - Dates are ISO-8601 text; compare them lexically."
        }
        Dialect::Mssql => {
            "- For fuzzy text matching use UPPER(column) LIKE UPPER(?) with a %-wrapped parameter.\n\
             - Prefer TOP over LIMIT for row caps."
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::intent::{Operation, SortSpec};

    use super::*;

    #[test]
    fn test_system_prompt_mentions_dialect_schema_and_limit() {
        let prompt = system_prompt(Dialect::Sqlite, "users(id, name)", 100);
        assert!(prompt.contains("SQLite"));
        assert!(prompt.contains("users(id, name)"));
        assert!(prompt.contains("LIMIT 100"));
    }

    #[test]
    fn test_correction_prompt_carries_failure_context() {
        let prompt = correction_prompt(
            Dialect::Postgres,
            "users(id)",
            100,
            "SELECT nope FROM users",
            "column \"nope\" does not exist",
        );
        assert!(prompt.contains("SELECT nope FROM users"));
        assert!(prompt.contains("does not exist"));
    }

    #[test]
    fn test_user_prompt_serializes_the_intent() {
        let intent = Intent {
            entity: "users".to_string(),
            operation: Operation::Filter,
            filters: BTreeMap::from([("status".to_string(), serde_json::json!("active"))]),
            limit: Some(10),
            fields: vec![],
            sort: Some(SortSpec::parse("id:desc").unwrap()),
            normalized_text: String::new(),
        };
        let prompt = user_prompt(&intent);
        assert!(prompt.contains("\"entity\":\"users\""));
        assert!(prompt.contains("id:desc"));
    }
}
