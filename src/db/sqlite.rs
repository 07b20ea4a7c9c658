//! SQLite driver (sqlx).

use async_trait::async_trait;
use sqlx::sqlite::{SqliteColumn, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as SqlxRow, TypeInfo, ValueRef};

use crate::models::{JsonValue, Row};

use super::{ColumnDef, DbError, Dialect, Driver, ForeignKeyDef};

pub struct SqliteDriver {
    pool: SqlitePool,
}

impl SqliteDriver {
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| DbError::Connect(e.to_string()))?;
        Ok(SqliteDriver { pool })
    }

    /// SQLite PRAGMA statements cannot take bound parameters, so table names
    /// are interpolated as quoted identifiers. Names come from
    /// `sqlite_master`, but quoting keeps odd identifiers intact anyway.
    fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>, DbError> {
        let mut query = sqlx::query(sql);
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
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DbError::Introspection(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("name")
                    .map_err(|e| DbError::Introspection(e.to_string()))
            })
            .collect()
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>, DbError> {
        let sql = format!("PRAGMA table_info({})", Self::quote_ident(table));
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DbError::Introspection(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let name: String = row
                    .try_get("name")
                    .map_err(|e| DbError::Introspection(e.to_string()))?;
                let data_type: String = row
                    .try_get("type")
                    .map_err(|e| DbError::Introspection(e.to_string()))?;
                let notnull: i64 = row
                    .try_get("notnull")
                    .map_err(|e| DbError::Introspection(e.to_string()))?;
                Ok(ColumnDef {
                    name,
                    data_type: data_type.to_lowercase(),
                    nullable: notnull == 0,
                })
            })
            .collect()
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>, DbError> {
        let sql = format!("PRAGMA foreign_key_list({})", Self::quote_ident(table));
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DbError::Introspection(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let column: String = row
                    .try_get("from")
                    .map_err(|e| DbError::Introspection(e.to_string()))?;
                let ref_table: String = row
                    .try_get("table")
                    .map_err(|e| DbError::Introspection(e.to_string()))?;
                // A NULL "to" means the referenced table's primary key.
                let ref_column: Option<String> = row
                    .try_get("to")
                    .map_err(|e| DbError::Introspection(e.to_string()))?;
                Ok(ForeignKeyDef {
                    column,
                    ref_table,
                    ref_column: ref_column.unwrap_or_else(|| "id".to_string()),
                })
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &JsonValue,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
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

fn row_to_json(row: &SqliteRow) -> Row {
    let mut out = Row::new();
    for column in row.columns() {
        out.insert(column.name().to_string(), decode_column(row, column));
    }
    out
}

fn decode_column(row: &SqliteRow, column: &SqliteColumn) -> JsonValue {
    let idx = column.ordinal();
    if let Ok(raw) = row.try_get_raw(idx) {
        if raw.is_null() {
            return JsonValue::Null;
        }
    }

    match column.type_info().name() {
        "INTEGER" | "INT" | "BIGINT" => {
            if let Ok(v) = row.try_get::<i64, _>(idx) {
                return JsonValue::from(v);
            }
        }
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
            if let Ok(v) = row.try_get::<f64, _>(idx) {
                return JsonValue::from(v);
            }
        }
        "BOOLEAN" | "BOOL" => {
            if let Ok(v) = row.try_get::<bool, _>(idx) {
                return JsonValue::Bool(v);
            }
        }
        "TEXT" | "DATE" | "DATETIME" | "TIME" => {
            if let Ok(v) = row.try_get::<String, _>(idx) {
                return JsonValue::String(v);
            }
        }
        "BLOB" => {
            if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
                return JsonValue::String(hex::encode(v));
            }
        }
        _ => {}
    }

    // Expression columns can carry surprising type names; fall through the
    // storage classes in affinity order.
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return JsonValue::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return JsonValue::from(v);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return JsonValue::String(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
        return JsonValue::String(hex::encode(v));
    }

    log::warn!(
        "could not decode sqlite column {} ({}); returning null",
        column.name(),
        column.type_info().name()
    );
    JsonValue::Null
}
