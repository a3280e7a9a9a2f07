//! Schema Model Builder
//!
//! Introspects a SQLite database into an immutable snapshot of tables,
//! columns, primary keys and foreign keys. The snapshot is built once per
//! session and shared read-only with the retriever, prompt assembler and
//! validator.

use crate::error::{EngineError, Result};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub is_primary_key: bool,
    pub is_nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Complete database schema, immutable for the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Serialize the schema for LLM prompt injection. Deterministic: tables
    /// are stored in name order and rendered as-is.
    pub fn to_prompt_string(&self) -> String {
        let mut lines = vec!["DATABASE SCHEMA:".to_string(), String::new()];

        for table in &self.tables {
            lines.push(format!("Table: {}", table.name));
            for col in &table.columns {
                let pk_marker = if col.is_primary_key { " (PRIMARY KEY)" } else { "" };
                let nullable = if col.is_nullable { "" } else { " NOT NULL" };
                lines.push(format!("  - {} ({}{}{})", col.name, col.data_type, pk_marker, nullable));
            }
            lines.push(String::new());
        }

        if !self.foreign_keys.is_empty() {
            lines.push("RELATIONSHIPS:".to_string());
            for fk in &self.foreign_keys {
                lines.push(format!(
                    "  - {}.{} -> {}.{}",
                    fk.from_table, fk.from_column, fk.to_table, fk.to_column
                ));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

/// Extracts the schema model from a SQLite database file.
pub struct SchemaExtractor {
    db_path: PathBuf,
}

impl SchemaExtractor {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if !db_path.exists() {
            return Err(EngineError::Schema(format!(
                "database file not found: {}",
                db_path.display()
            )));
        }
        Ok(Self { db_path })
    }

    /// Build the complete schema in one pass. Fails when the database is
    /// unreadable or contains no user tables.
    pub fn extract(&self) -> Result<Schema> {
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| EngineError::Schema(format!("failed to open database: {}", e)))?;

        let table_names = self.table_names(&conn)?;
        if table_names.is_empty() {
            return Err(EngineError::Schema(format!(
                "database {} contains no user tables",
                self.db_path.display()
            )));
        }

        let mut tables = Vec::with_capacity(table_names.len());
        let mut all_foreign_keys = Vec::new();
        for name in table_names {
            let columns = self.extract_columns(&conn, &name)?;
            let foreign_keys = self.extract_foreign_keys(&conn, &name)?;
            let primary_keys = columns
                .iter()
                .filter(|c| c.is_primary_key)
                .map(|c| c.name.clone())
                .collect();

            all_foreign_keys.extend(foreign_keys.iter().cloned());
            tables.push(Table {
                name,
                columns,
                primary_keys,
                foreign_keys,
            });
        }

        info!("extracted schema: {} tables, {} foreign keys", tables.len(), all_foreign_keys.len());
        Ok(Schema {
            tables,
            foreign_keys: all_foreign_keys,
        })
    }

    fn table_names(&self, conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )
            .map_err(|e| EngineError::Schema(e.to_string()))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| EngineError::Schema(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngineError::Schema(e.to_string()))?;
        Ok(names)
    }

    fn extract_columns(&self, conn: &Connection, table: &str) -> Result<Vec<Column>> {
        let mut columns = Vec::new();
        // PRAGMA table_info returns: cid, name, type, notnull, dflt_value, pk
        conn.pragma(None, "table_info", table, |row| {
            let data_type: String = row.get(2)?;
            let notnull: i64 = row.get(3)?;
            let pk: i64 = row.get(5)?;
            columns.push(Column {
                name: row.get(1)?,
                data_type: if data_type.is_empty() { "TEXT".to_string() } else { data_type },
                is_nullable: notnull == 0,
                is_primary_key: pk > 0,
            });
            Ok(())
        })
        .map_err(|e| EngineError::Schema(format!("table_info({}): {}", table, e)))?;
        Ok(columns)
    }

    fn extract_foreign_keys(&self, conn: &Connection, table: &str) -> Result<Vec<ForeignKey>> {
        let mut foreign_keys = Vec::new();
        // PRAGMA foreign_key_list returns: id, seq, table, from, to, ...
        // The "to" column is NULL when the FK references the target's
        // implicit primary key.
        conn.pragma(None, "foreign_key_list", table, |row| {
            let to_column: Option<String> = row.get(4)?;
            foreign_keys.push(ForeignKey {
                from_table: table.to_string(),
                from_column: row.get(3)?,
                to_table: row.get(2)?,
                to_column: to_column.unwrap_or_else(|| "rowid".to_string()),
            });
            Ok(())
        })
        .map_err(|e| EngineError::Schema(format!("foreign_key_list({}): {}", table, e)))?;
        Ok(foreign_keys)
    }
}
