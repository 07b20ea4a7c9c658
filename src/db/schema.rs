//! Schema snapshot: tables, columns, foreign keys, and the rendered
//! description fed to LLM prompts.
//!
//! The snapshot is taken once at startup and cached in memory. Live schema
//! changes are out of scope; operators restart to pick them up.

use serde::{Deserialize, Serialize};

use super::{DbError, Driver};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub foreign_keys: Vec<ForeignKeyDef>,
}

/// In-memory snapshot of the introspected database schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: Vec<TableSchema>,
}

impl SchemaInfo {
    /// Snapshot the schema through a driver's introspection calls.
    pub async fn introspect(driver: &dyn Driver) -> Result<Self, DbError> {
        let mut tables = Vec::new();
        for name in driver.tables().await? {
            let columns = driver.columns(&name).await?;
            let foreign_keys = driver.foreign_keys(&name).await?;
            tables.push(TableSchema {
                name,
                columns,
                foreign_keys,
            });
        }
        log::info!("introspected {} tables", tables.len());
        Ok(SchemaInfo { tables })
    }

    /// Build a snapshot from `(table, columns)` pairs. Handy for embedders
    /// that already know their schema, and for tests.
    pub fn from_tables(tables: Vec<(&str, Vec<&str>)>) -> Self {
        SchemaInfo {
            tables: tables
                .into_iter()
                .map(|(name, columns)| TableSchema {
                    name: name.to_string(),
                    columns: columns
                        .into_iter()
                        .map(|c| ColumnDef {
                            name: c.to_string(),
                            data_type: "text".to_string(),
                            nullable: true,
                        })
                        .collect(),
                    foreign_keys: Vec::new(),
                })
                .collect(),
        }
    }

    /// Case-insensitive table existence check.
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Rendered text listing tables, columns and foreign keys, fed to
    /// intent-parsing and SQL-generation prompts.
    pub fn description(&self) -> String {
        if self.tables.is_empty() {
            return "(no tables)".to_string();
        }

        let mut out = String::new();
        for table in &self.tables {
            out.push_str(&format!("Table {}:\n", table.name));
            let columns = table
                .columns
                .iter()
                .map(|c| {
                    if c.nullable {
                        format!("{} {}", c.name, c.data_type)
                    } else {
                        format!("{} {} not null", c.name, c.data_type)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("  columns: {columns}\n"));
            if !table.foreign_keys.is_empty() {
                let fks = table
                    .foreign_keys
                    .iter()
                    .map(|fk| format!("{} -> {}.{}", fk.column, fk.ref_table, fk.ref_column))
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!("  foreign keys: {fks}\n"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_lists_tables_columns_and_fks() {
        let schema = SchemaInfo {
            tables: vec![TableSchema {
                name: "orders".to_string(),
                columns: vec![
                    ColumnDef {
                        name: "id".to_string(),
                        data_type: "integer".to_string(),
                        nullable: false,
                    },
                    ColumnDef {
                        name: "note".to_string(),
                        data_type: "text".to_string(),
                        nullable: true,
                    },
                ],
                foreign_keys: vec![ForeignKeyDef {
                    column: "user_id".to_string(),
                    ref_table: "users".to_string(),
                    ref_column: "id".to_string(),
                }],
            }],
        };
        let text = schema.description();
        assert!(text.contains("Table orders:"));
        assert!(text.contains("id integer not null"));
        assert!(text.contains("note text"));
        assert!(text.contains("user_id -> users.id"));
    }

    #[test]
    fn test_table_lookup_ignores_case() {
        let schema = SchemaInfo::from_tables(vec![("Users", vec!["id"])]);
        assert!(schema.has_table("users"));
        assert!(schema.has_table("USERS"));
        assert!(!schema.has_table("orders"));
    }
}
