//! SQL generation with safety validation and error-driven retry.
//!
//! The generator asks the LLM for `{sql, params}` constrained by a JSON
//! schema, validates the result against the read-only safety rules, executes
//! it, and on failure re-prompts with the failed SQL and the driver error.
//! Prompts are templated per dialect; nothing rewrites SQL after the fact.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::db::{DbError, Dialect, Driver};
use crate::error::Error;
use crate::intent::Intent;
use crate::llm::Generator;
use crate::models::{JsonValue, Row};

mod prompts;
mod result_schema;
pub mod safety;

pub use result_schema::infer_result_schema;

/// Default number of generation attempts (initial + corrections).
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// SQL generation failures.
#[derive(Debug, Error)]
pub enum SqlGenError {
    #[error("generated SQL failed safety validation: {message}")]
    Unsafe { message: String, sql: String },

    #[error("parameter count mismatch: SQL has {placeholders} placeholders but {params} params")]
    ParamMismatch {
        placeholders: usize,
        params: usize,
        sql: String,
    },

    #[error("LLM SQL output is malformed: {0}")]
    Malformed(String),

    #[error("SQL generation failed after {attempts} attempts: {message}")]
    Exhausted {
        attempts: usize,
        message: String,
        sql: Option<String>,
    },
}

impl SqlGenError {
    /// The SQL that triggered this error, when one exists.
    pub fn sql(&self) -> Option<&str> {
        match self {
            SqlGenError::Unsafe { sql, .. } | SqlGenError::ParamMismatch { sql, .. } => Some(sql),
            SqlGenError::Exhausted { sql, .. } => sql.as_deref(),
            SqlGenError::Malformed(_) => None,
        }
    }

    /// Machine-readable fix-up suggestions.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            SqlGenError::Unsafe { .. } => vec![
                "only SELECT and WITH queries are allowed".to_string(),
                "remove data-modifying or DDL statements".to_string(),
            ],
            SqlGenError::ParamMismatch { .. } => {
                vec!["provide exactly one param per ? placeholder".to_string()]
            }
            _ => Vec::new(),
        }
    }
}

/// A validated, not-yet-executed query.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSql {
    pub sql: String,
    pub params: Vec<JsonValue>,
}

/// A generated, validated and executed query.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub sql: String,
    pub params: Vec<JsonValue>,
    pub rows: Vec<Row>,
    /// 1-based attempt count that produced the final SQL.
    pub attempts: usize,
}

/// Shape the LLM fills in.
#[derive(Debug, Deserialize)]
struct RawSqlOutput {
    sql: String,
    #[serde(default)]
    params: Vec<JsonValue>,
}

enum AttemptFailure {
    Gen(SqlGenError),
    Exec(DbError),
}

impl AttemptFailure {
    fn message(&self) -> String {
        match self {
            AttemptFailure::Gen(e) => e.to_string(),
            AttemptFailure::Exec(e) => e.to_string(),
        }
    }
}

pub struct SqlGenerator {
    generator: Arc<dyn Generator>,
    max_attempts: usize,
    default_limit: u64,
}

impl SqlGenerator {
    pub fn new(generator: Arc<dyn Generator>, max_attempts: usize, default_limit: u64) -> Self {
        SqlGenerator {
            generator,
            max_attempts: max_attempts.max(1),
            default_limit,
        }
    }

    /// Generate and validate SQL without executing it (the explain path).
    pub async fn generate(
        &self,
        intent: &Intent,
        schema_description: &str,
        dialect: Dialect,
    ) -> Result<GeneratedSql, Error> {
        let (generated, _, _) = self
            .attempt_loop(intent, schema_description, dialect, None)
            .await?;
        Ok(generated)
    }

    /// Generate, validate and execute, retrying with a correction prompt on
    /// safety rejections and execution errors.
    pub async fn generate_and_execute(
        &self,
        intent: &Intent,
        schema_description: &str,
        dialect: Dialect,
        driver: &dyn Driver,
    ) -> Result<ExecutionOutcome, Error> {
        let (generated, rows, attempts) = self
            .attempt_loop(intent, schema_description, dialect, Some(driver))
            .await?;
        Ok(ExecutionOutcome {
            sql: generated.sql,
            params: generated.params,
            rows: rows.unwrap_or_default(),
            attempts,
        })
    }

    async fn attempt_loop(
        &self,
        intent: &Intent,
        schema_description: &str,
        dialect: Dialect,
        driver: Option<&dyn Driver>,
    ) -> Result<(GeneratedSql, Option<Vec<Row>>, usize), Error> {
        let response_schema = prompts::sql_response_schema();
        let user = prompts::user_prompt(intent);

        let mut last_failure: Option<AttemptFailure> = None;
        let mut last_sql: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            let system = match (&last_failure, &last_sql) {
                (Some(failure), Some(sql)) => prompts::correction_prompt(
                    dialect,
                    schema_description,
                    self.default_limit,
                    sql,
                    &failure.message(),
                ),
                _ => prompts::system_prompt(dialect, schema_description, self.default_limit),
            };

            // Transport failures are not correctable by re-prompting; they
            // surface immediately (the provider already retried with backoff).
            let value = self
                .generator
                .generate_structured(&system, &user, &response_schema)
                .await?;

            let raw: RawSqlOutput = match serde_json::from_value(value) {
                Ok(raw) => raw,
                Err(e) => {
                    log::debug!("SQL attempt {attempt} returned malformed output: {e}");
                    last_failure = Some(AttemptFailure::Gen(SqlGenError::Malformed(e.to_string())));
                    last_sql = None;
                    continue;
                }
            };

            if let Err(e) = safety::validate_sql(&raw.sql, &raw.params) {
                log::warn!("SQL attempt {attempt} rejected: {e}");
                last_sql = Some(raw.sql);
                last_failure = Some(AttemptFailure::Gen(e));
                continue;
            }

            let generated = GeneratedSql {
                sql: raw.sql,
                params: raw.params,
            };

            let driver = match driver {
                None => return Ok((generated, None, attempt)),
                Some(driver) => driver,
            };

            match driver.query(&generated.sql, &generated.params).await {
                Ok(rows) => {
                    if attempt > 1 {
                        log::info!("SQL correction succeeded on attempt {attempt}");
                    }
                    return Ok((generated, Some(rows), attempt));
                }
                Err(e) => {
                    log::warn!("SQL attempt {attempt} failed at execution: {e}");
                    last_sql = Some(generated.sql);
                    last_failure = Some(AttemptFailure::Exec(e));
                }
            }
        }

        // Exhausted: surface the final failure with its original kind.
        match last_failure {
            Some(AttemptFailure::Exec(e)) => Err(Error::SqlExecution(e)),
            Some(AttemptFailure::Gen(e)) => Err(Error::SqlGeneration(SqlGenError::Exhausted {
                attempts: self.max_attempts,
                message: e.to_string(),
                sql: e.sql().map(str::to_string).or(last_sql),
            })),
            None => Err(Error::SqlGeneration(SqlGenError::Exhausted {
                attempts: self.max_attempts,
                message: "no attempt produced output".to_string(),
                sql: None,
            })),
        }
    }
}
