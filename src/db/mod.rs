//! Dialect-agnostic database access.
//!
//! One async [`Driver`] capability with sqlx-backed Postgres, MySQL and
//! SQLite implementations. Every driver normalizes its rows to ordered
//! `column → JSON value` maps and answers the three introspection calls the
//! schema snapshot is built from.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::models::{JsonValue, Row};

mod mysql;
mod postgres;
mod schema;
mod sqlite;

pub use mysql::MysqlDriver;
pub use postgres::PostgresDriver;
pub use schema::{ColumnDef, ForeignKeyDef, SchemaInfo, TableSchema};
pub use sqlite::SqliteDriver;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("unknown database driver '{0}' (expected pg, mysql, sqlite or mssql)")]
    UnknownDialect(String),

    #[error("the {0} driver is not supported by this build")]
    UnsupportedDialect(Dialect),

    #[error("database connection failed: {0}")]
    Connect(String),

    #[error("query execution failed: {message}")]
    Execute { message: String, sql: String },

    #[error("schema introspection failed: {0}")]
    Introspection(String),
}

impl DbError {
    pub fn sql(&self) -> Option<&str> {
        match self {
            DbError::Execute { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

/// SQL dialect selector.
///
/// `Mssql` is accepted by configuration for compatibility but has no driver
/// behind it in this build; constructing it yields
/// [`DbError::UnsupportedDialect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    #[serde(rename = "pg", alias = "postgres", alias = "postgresql")]
    Postgres,
    #[serde(rename = "mysql")]
    Mysql,
    #[serde(rename = "sqlite")]
    Sqlite,
    #[serde(rename = "mssql")]
    Mssql,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "pg",
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::Mssql => "mssql",
        }
    }

    /// Human-readable name used in prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "PostgreSQL",
            Dialect::Mysql => "MySQL",
            Dialect::Sqlite => "SQLite",
            Dialect::Mssql => "SQL Server",
        }
    }

    /// Whether this build ships a driver for the dialect.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Dialect::Mssql)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pg" | "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::Mysql),
            "sqlite" => Ok(Dialect::Sqlite),
            "mssql" => Ok(Dialect::Mssql),
            other => Err(DbError::UnknownDialect(other.to_string())),
        }
    }
}

/// Dialect-agnostic execution and introspection capability.
#[async_trait]
pub trait Driver: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run a parameterized read query; rows come back as ordered field maps.
    async fn query(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>, DbError>;

    async fn tables(&self) -> Result<Vec<String>, DbError>;

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>, DbError>;

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>, DbError>;

    /// Close the underlying pool.
    async fn close(&self);
}

/// Connect the driver named by the configuration.
pub async fn connect(cfg: &DatabaseConfig) -> Result<Arc<dyn Driver>, DbError> {
    match cfg.driver {
        Dialect::Postgres => Ok(Arc::new(PostgresDriver::connect(&cfg.url).await?)),
        Dialect::Mysql => Ok(Arc::new(MysqlDriver::connect(&cfg.url).await?)),
        Dialect::Sqlite => Ok(Arc::new(SqliteDriver::connect(&cfg.url).await?)),
        Dialect::Mssql => Err(DbError::UnsupportedDialect(Dialect::Mssql)),
    }
}
