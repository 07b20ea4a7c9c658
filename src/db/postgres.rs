//! PostgreSQL driver (sqlx).
//!
//! Generated SQL uses `?` placeholders uniformly; this driver rewrites them
//! to `$1..$n` positionals (quote-aware, shared scanner with the safety
//! validator) before binding.

use async_trait::async_trait;
use sqlx::postgres::{PgColumn, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as SqlxRow, TypeInfo, ValueRef};

use crate::models::{JsonValue, Row};
use crate::sqlgen::safety::rewrite_placeholders_positional;

use super::{ColumnDef, DbError, Dialect, Driver, ForeignKeyDef};

pub struct PostgresDriver {
    pool: PgPool,
}

impl PostgresDriver {
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| DbError::Connect(e.to_string()))?;
        Ok(PostgresDriver { pool })
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>, DbError> {
        let positional = rewrite_placeholders_positional(sql);
        let mut query = sqlx::query(&positional);
        for param in params {
            query = bind_param(query, param);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DbError::Execute {
                message: e.to_string(),
                sql: sql.to_string(),
            })?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn tables(&self) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DbError::Introspection(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("table_name")
                    .map_err(|e| DbError::Introspection(e.to_string()))
            })
            .collect()
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>, DbError> {
        let rows = sqlx::query(
            "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DbError::Introspection(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let name: String = row
                    .try_get("column_name")
                    .map_err(|e| DbError::Introspection(e.to_string()))?;
                let data_type: String = row
                    .try_get("data_type")
                    .map_err(|e| DbError::Introspection(e.to_string()))?;
                let is_nullable: String = row
                    .try_get("is_nullable")
                    .map_err(|e| DbError::Introspection(e.to_string()))?;
                Ok(ColumnDef {
                    name,
                    data_type,
                    nullable: is_nullable.eq_ignore_ascii_case("yes"),
                })
            })
            .collect()
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>, DbError> {
        let rows = sqlx::query(
            "SELECT kcu.column_name, ccu.table_name AS ref_table, ccu.column_name AS ref_column \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
             JOIN information_schema.constraint_column_usage ccu \
               ON tc.constraint_name = ccu.constraint_name \
              AND tc.table_schema = ccu.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' \
               AND tc.table_schema = 'public' AND tc.table_name = $1",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DbError::Introspection(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(ForeignKeyDef {
                    column: row
                        .try_get("column_name")
                        .map_err(|e| DbError::Introspection(e.to_string()))?,
                    ref_table: row
                        .try_get("ref_table")
                        .map_err(|e| DbError::Introspection(e.to_string()))?,
                    ref_column: row
                        .try_get("ref_column")
                        .map_err(|e| DbError::Introspection(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &JsonValue,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        JsonValue::Null => query.bind(Option::<String>::None),
        JsonValue::Bool(b) => query.bind(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        JsonValue::String(s) => query.bind(s.clone()),
        other => query.bind(sqlx::types::Json(other.clone())),
    }
}

fn row_to_json(row: &PgRow) -> Row {
    let mut out = Row::new();
    for column in row.columns() {
        out.insert(column.name().to_string(), decode_column(row, column));
    }
    out
}

fn decode_column(row: &PgRow, column: &PgColumn) -> JsonValue {
    let idx = column.ordinal();
    if let Ok(raw) = row.try_get_raw(idx) {
        if raw.is_null() {
            return JsonValue::Null;
        }
    }

    match column.type_info().name() {
        "BOOL" => {
            if let Ok(v) = row.try_get::<bool, _>(idx) {
                return JsonValue::Bool(v);
            }
        }
        "INT2" => {
            if let Ok(v) = row.try_get::<i16, _>(idx) {
                return JsonValue::from(v);
            }
        }
        "INT4" => {
            if let Ok(v) = row.try_get::<i32, _>(idx) {
                return JsonValue::from(v);
            }
        }
        "INT8" => {
            if let Ok(v) = row.try_get::<i64, _>(idx) {
                return JsonValue::from(v);
            }
        }
        "FLOAT4" => {
            if let Ok(v) = row.try_get::<f32, _>(idx) {
                return JsonValue::from(f64::from(v));
            }
        }
        "FLOAT8" => {
            if let Ok(v) = row.try_get::<f64, _>(idx) {
                return JsonValue::from(v);
            }
        }
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => {
            if let Ok(v) = row.try_get::<String, _>(idx) {
                return JsonValue::String(v);
            }
        }
        "UUID" => {
            if let Ok(v) = row.try_get::<uuid::Uuid, _>(idx) {
                return JsonValue::String(v.to_string());
            }
        }
        "DATE" => {
            if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(idx) {
                return JsonValue::String(v.to_string());
            }
        }
        "TIME" => {
            if let Ok(v) = row.try_get::<chrono::NaiveTime, _>(idx) {
                return JsonValue::String(v.to_string());
            }
        }
        "TIMESTAMP" => {
            if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
                return JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
            }
        }
        "TIMESTAMPTZ" => {
            if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx) {
                return JsonValue::String(v.to_rfc3339());
            }
        }
        "JSON" | "JSONB" => {
            if let Ok(v) = row.try_get::<JsonValue, _>(idx) {
                return v;
            }
        }
        "BYTEA" => {
            if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
                return JsonValue::String(hex::encode(v));
            }
        }
        _ => {}
    }

    // NUMERIC and exotic types land here; try the broad decodes before
    // giving up.
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return JsonValue::String(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return JsonValue::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return JsonValue::from(v);
    }

    log::warn!(
        "could not decode postgres column {} ({}); returning null",
        column.name(),
        column.type_info().name()
    );
    JsonValue::Null
}
