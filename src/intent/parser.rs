//! LLM-backed intent parsing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::config::LimitsConfig;
use crate::db::SchemaInfo;
use crate::error::Error;
use crate::llm::Generator;
use crate::models::JsonValue;

use super::{normalize, Intent, IntentError, Operation, SortSpec};

/// How many times we re-ask the LLM when its output fails intent validation.
/// Transport-level retries (backoff) happen inside the provider.
const PARSE_ATTEMPTS: usize = 2;

/// Shape the LLM is asked to fill in. Loosely typed; strict validation
/// happens in [`IntentParser::build_intent`].
#[derive(Debug, Deserialize)]
struct RawIntent {
    entity: String,
    operation: String,
    #[serde(default)]
    filters: Option<HashMap<String, JsonValue>>,
    #[serde(default)]
    limit: Option<u64>,
    #[serde(default)]
    fields: Option<Vec<String>>,
    #[serde(default)]
    sort: Option<String>,
}

/// Turns raw query text into a canonical [`Intent`].
pub struct IntentParser {
    generator: Arc<dyn Generator>,
    max_query_length: usize,
    max_limit: u64,
}

impl IntentParser {
    pub fn new(generator: Arc<dyn Generator>, limits: &LimitsConfig) -> Self {
        IntentParser {
            generator,
            max_query_length: limits.max_query_length,
            max_limit: limits.max_limit,
        }
    }

    /// Parse `text` against the introspected schema.
    ///
    /// Length violations fail before any LLM traffic. Output that cannot be
    /// coerced into a valid intent is retried up to [`PARSE_ATTEMPTS`] times,
    /// then surfaced as [`IntentError::Parse`].
    pub async fn parse(&self, text: &str, schema: &SchemaInfo) -> Result<Intent, Error> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(IntentError::EmptyQuery.into());
        }
        if trimmed.len() > self.max_query_length {
            return Err(IntentError::QueryTooLong {
                length: trimmed.len(),
                max: self.max_query_length,
            }
            .into());
        }

        let system = self.system_prompt(schema);
        let response_schema = intent_response_schema();

        let mut last_failure = String::new();
        for attempt in 1..=PARSE_ATTEMPTS {
            let user = if attempt == 1 {
                trimmed.to_string()
            } else {
                // Re-ask with the validation failure so the model can correct itself.
                format!(
                    "{trimmed}\n\nYour previous intent was invalid: {last_failure}. \
                     Produce a corrected intent."
                )
            };

            let value = self
                .generator
                .generate_structured(&system, &user, &response_schema)
                .await?;

            let raw: RawIntent = match serde_json::from_value(value) {
                Ok(raw) => raw,
                Err(e) => {
                    log::debug!("intent attempt {attempt} failed deserialization: {e}");
                    last_failure = e.to_string();
                    continue;
                }
            };

            match self.build_intent(raw, schema) {
                Ok(intent) => return Ok(intent),
                // A nonexistent table is a semantic failure, not a formatting
                // one; retrying will not conjure the table into existence.
                Err(e @ IntentError::UnknownEntity { .. }) => return Err(e.into()),
                Err(e) => {
                    log::debug!("intent attempt {attempt} failed validation: {e}");
                    last_failure = e.to_string();
                }
            }
        }

        Err(IntentError::Parse {
            attempts: PARSE_ATTEMPTS,
            message: last_failure,
        }
        .into())
    }

    fn system_prompt(&self, schema: &SchemaInfo) -> String {
        format!(
            "You translate natural-language database questions into a structured query intent.\n\
             Pick the single best matching table for `entity`. Use `filters` for equality or \
             fuzzy text conditions mentioned in the question. Only include `limit`, `fields` \
             or `sort` when the question asks for them.\n\n\
             Database schema:\n{}",
            schema.description()
        )
    }

    fn build_intent(&self, raw: RawIntent, schema: &SchemaInfo) -> Result<Intent, IntentError> {
        let entity = raw.entity.trim().to_lowercase();
        if entity.is_empty() {
            return Err(IntentError::Parse {
                attempts: 1,
                message: "empty entity".to_string(),
            });
        }
        if !schema.has_table(&entity) {
            return Err(IntentError::UnknownEntity {
                entity,
                known_tables: schema.table_names(),
            });
        }

        let operation: Operation = raw.operation.parse()?;

        // A null `filters` from the LLM means "no filters".
        let filters: BTreeMap<String, JsonValue> = raw
            .filters
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();

        let limit = raw.limit.map(|n| n.min(self.max_limit)).filter(|n| *n > 0);

        let mut fields: Vec<String> = Vec::new();
        for field in raw.fields.unwrap_or_default() {
            let f = field.trim().to_lowercase();
            if !f.is_empty() && !fields.contains(&f) {
                fields.push(f);
            }
        }

        let sort = match raw.sort.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(SortSpec::parse(s)?),
        };

        let normalized_text = normalize::normalized_text(
            &entity,
            operation,
            &filters,
            limit,
            &fields,
            sort.as_ref(),
        );

        Ok(Intent {
            entity,
            operation,
            filters,
            limit,
            fields,
            sort,
            normalized_text,
        })
    }
}

/// JSON schema constraining the LLM's intent output to the six fields.
fn intent_response_schema() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "entity": {
                "type": "string",
                "description": "Name of the table the question is about"
            },
            "operation": {
                "type": "string",
                "enum": ["list", "count", "aggregate", "filter"]
            },
            "filters": {
                "type": ["object", "null"],
                "description": "Field -> value (or list of values) conditions",
                "additionalProperties": true
            },
            "limit": {
                "type": ["integer", "null"],
                "minimum": 1
            },
            "fields": {
                "type": ["array", "null"],
                "items": { "type": "string" }
            },
            "sort": {
                "type": ["string", "null"],
                "description": "field:asc or field:desc"
            }
        },
        "required": ["entity", "operation"],
        "additionalProperties": false
    })
}
