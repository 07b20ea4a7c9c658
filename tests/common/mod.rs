//! Shared test fixtures: scripted LLM providers, a call-counting driver
//! wrapper, and a seeded SQLite database.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use nttp::db::{ColumnDef, DbError, Dialect, Driver, ForeignKeyDef};
use nttp::llm::{Embedder, Generator, LlmError};
use nttp::{Config, DatabaseConfig, LlmConfig, LlmProvider, Row};

/// Generator that replays scripted responses, dispatching on the response
/// schema: requests whose schema describes an `entity` field are intent
/// parses, the rest are SQL generations. When a queue runs dry the last
/// response repeats, so one scripted intent serves any number of resolves.
pub struct ScriptedGenerator {
    intents: Mutex<Vec<Value>>,
    sqls: Mutex<Vec<Value>>,
    last_intent: Mutex<Option<Value>>,
    last_sql: Mutex<Option<Value>>,
    intent_calls: AtomicUsize,
    sql_calls: AtomicUsize,
    /// Artificial per-SQL-generation delay, for timeout tests.
    sql_delay_ms: u64,
}

impl ScriptedGenerator {
    pub fn new(intents: Vec<Value>, sqls: Vec<Value>) -> Arc<Self> {
        Self::with_sql_delay(intents, sqls, 0)
    }

    pub fn with_sql_delay(intents: Vec<Value>, sqls: Vec<Value>, delay_ms: u64) -> Arc<Self> {
        Arc::new(ScriptedGenerator {
            intents: Mutex::new(intents),
            sqls: Mutex::new(sqls),
            last_intent: Mutex::new(None),
            last_sql: Mutex::new(None),
            intent_calls: AtomicUsize::new(0),
            sql_calls: AtomicUsize::new(0),
            sql_delay_ms: delay_ms,
        })
    }

    pub fn intent_calls(&self) -> usize {
        self.intent_calls.load(Ordering::SeqCst)
    }

    pub fn sql_calls(&self) -> usize {
        self.sql_calls.load(Ordering::SeqCst)
    }

    fn next(queue: &Mutex<Vec<Value>>, last: &Mutex<Option<Value>>) -> Option<Value> {
        let mut queue = queue.lock().unwrap();
        if queue.is_empty() {
            return last.lock().unwrap().clone();
        }
        let value = queue.remove(0);
        *last.lock().unwrap() = Some(value.clone());
        Some(value)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate_structured(
        &self,
        _system: &str,
        _user: &str,
        response_schema: &Value,
    ) -> Result<Value, LlmError> {
        let is_intent = response_schema
            .pointer("/properties/entity")
            .is_some();

        let scripted = if is_intent {
            self.intent_calls.fetch_add(1, Ordering::SeqCst);
            Self::next(&self.intents, &self.last_intent)
        } else {
            self.sql_calls.fetch_add(1, Ordering::SeqCst);
            if self.sql_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.sql_delay_ms)).await;
            }
            Self::next(&self.sqls, &self.last_sql)
        };

        scripted.ok_or(LlmError::Malformed {
            provider: "scripted",
            message: "script exhausted".to_string(),
        })
    }
}

/// Embedder returning fixed vectors for known texts and a deterministic
/// byte-sum vector otherwise. Counts calls for the embed-once property.
pub struct ScriptedEmbedder {
    vectors: Vec<(String, Vec<f32>)>,
    calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new(vectors: Vec<(&str, Vec<f32>)>) -> Arc<Self> {
        Arc::new(ScriptedEmbedder {
            vectors: vectors
                .into_iter()
                .map(|(q, v)| (q.to_string(), v))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((_, v)) = self.vectors.iter().find(|(q, _)| q == text) {
            return Ok(v.clone());
        }
        // Unknown text gets a deterministic vector far from the fixtures.
        let sum: u32 = text.bytes().map(u32::from).sum();
        Ok(vec![0.0, (sum % 97) as f32 + 1.0, ((sum / 97) % 89) as f32])
    }
}

/// Embedder whose every call fails with a provider error.
pub struct FailingEmbedder {
    calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(FailingEmbedder {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LlmError::Api {
            provider: "scripted",
            status: 503,
            message: "embedding backend down".to_string(),
        })
    }
}

/// Driver wrapper counting `query` executions; introspection passes through
/// uncounted.
pub struct SpyDriver {
    inner: Arc<dyn Driver>,
    queries: AtomicUsize,
}

impl SpyDriver {
    pub fn wrap(inner: Arc<dyn Driver>) -> Arc<Self> {
        Arc::new(SpyDriver {
            inner,
            queries: AtomicUsize::new(0),
        })
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for SpyDriver {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(sql, params).await
    }

    async fn tables(&self) -> Result<Vec<String>, DbError> {
        self.inner.tables().await
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>, DbError> {
        self.inner.columns(table).await
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>, DbError> {
        self.inner.foreign_keys(table).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

/// Create and seed a SQLite database file with a small `users` table.
pub async fn seed_users_database(path: &Path) {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("create sqlite fixture");

    sqlx::query(
        "CREATE TABLE users (\
             id INTEGER PRIMARY KEY, \
             name TEXT NOT NULL, \
             status TEXT NOT NULL, \
             created_at TEXT\
         )",
    )
    .execute(&pool)
    .await
    .expect("create users table");

    for (id, name, status, created) in [
        (1, "Ada", "active", "2025-11-02"),
        (2, "Grace", "active", "2025-12-14"),
        (3, "Edsger", "inactive", "2026-01-20"),
    ] {
        sqlx::query("INSERT INTO users (id, name, status, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(status)
            .bind(created)
            .execute(&pool)
            .await
            .expect("insert user");
    }

    pool.close().await;
}

/// Config pointing at the seeded SQLite file; the scripted providers replace
/// the configured LLM so the key and model are never used.
pub fn sqlite_config(path: &Path) -> Config {
    Config::new(
        DatabaseConfig {
            driver: Dialect::Sqlite,
            url: format!("sqlite:{}", path.display()),
        },
        LlmConfig {
            provider: LlmProvider::OpenAi,
            model: "scripted".to_string(),
            api_key: "test-key".to_string(),
            ..LlmConfig::default()
        },
    )
}

/// Same, with the L2 semantic cache switched on.
pub fn sqlite_config_with_l2(path: &Path) -> Config {
    let mut config = sqlite_config(path);
    config.cache.l2.enabled = true;
    config.cache.l2.provider = Some(LlmProvider::OpenAi);
    config.cache.l2.model = Some("scripted-embedder".to_string());
    config
}

/// Canonical scripted intent: filter users by status = active.
pub fn intent_filter_active() -> Value {
    json!({
        "entity": "users",
        "operation": "filter",
        "filters": { "status": "active" },
        "limit": null,
        "fields": null,
        "sort": null
    })
}

/// A structurally different intent for the same logical question, so the
/// paraphrase lands on a different fingerprint and can only match in L2.
pub fn intent_list_active() -> Value {
    json!({
        "entity": "users",
        "operation": "list",
        "filters": { "status": "active" },
        "limit": null,
        "fields": null,
        "sort": null
    })
}

/// Valid scripted SQL for the active-users question.
pub fn sql_active_users() -> Value {
    json!({
        "sql": "SELECT id, name, status FROM users WHERE status = ?",
        "params": ["active"]
    })
}
