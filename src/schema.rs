//! Table introspection through `information_schema`.

use log::{debug, error, info};
use serde::Serialize;
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, Pool, Row};

use crate::db::Backend;
use crate::error::ToolError;

// information_schema columns come back as binary strings on some servers, so
// everything text-like is CAST before decoding.
const COLUMNS_QUERY: &str = "SELECT \
        CAST(COLUMN_NAME AS CHAR) AS column_name, \
        CAST(COLUMN_TYPE AS CHAR) AS column_type, \
        CAST(COLUMN_COMMENT AS CHAR) AS column_comment, \
        CAST(COLUMN_KEY AS CHAR) AS column_key, \
        CAST(IS_NULLABLE AS CHAR) AS is_nullable, \
        CAST(COLUMN_DEFAULT AS CHAR) AS column_default \
    FROM information_schema.COLUMNS \
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
    ORDER BY ORDINAL_POSITION";

const FOREIGN_KEYS_QUERY: &str = "SELECT \
        CAST(COLUMN_NAME AS CHAR) AS column_name, \
        CAST(REFERENCED_TABLE_NAME AS CHAR) AS referenced_table, \
        CAST(REFERENCED_COLUMN_NAME AS CHAR) AS referenced_column \
    FROM information_schema.KEY_COLUMN_USAGE \
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL";

const INDEXES_QUERY: &str = "SELECT \
        CAST(INDEX_NAME AS CHAR) AS index_name, \
        CAST(COLUMN_NAME AS CHAR) AS column_name, \
        CAST(NON_UNIQUE AS SIGNED) AS non_unique, \
        CAST(SEQ_IN_INDEX AS SIGNED) AS seq_in_index \
    FROM information_schema.STATISTICS \
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
    ORDER BY INDEX_NAME, SEQ_IN_INDEX";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub comment: String,
    /// `PRI`, `UNI`, `MUL` or empty.
    pub key: String,
    pub nullable: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexEntry {
    pub index_name: String,
    pub column: String,
    pub unique: bool,
    pub seq_in_index: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<Column>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexEntry>,
    pub description: String,
}

impl TableSchema {
    pub fn new(
        table: &str,
        columns: Vec<Column>,
        foreign_keys: Vec<ForeignKey>,
        indexes: Vec<IndexEntry>,
    ) -> Self {
        TableSchema {
            table: table.to_string(),
            columns,
            foreign_keys,
            indexes,
            description: format!(
                "表 {table} 的完整结构信息，包括字段名、类型、注释、主键、外键、索引等"
            ),
        }
    }
}

/// Runs the three catalog queries for `table` inside `schema_name`. A table
/// that does not exist comes back with empty lists.
pub async fn inspect(
    pool: &Pool<MySql>,
    schema_name: &str,
    table: &str,
) -> Result<TableSchema, sqlx::Error> {
    let columns = sqlx::query(COLUMNS_QUERY)
        .bind(schema_name)
        .bind(table)
        .fetch_all(pool)
        .await?
        .iter()
        .map(column_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let foreign_keys = sqlx::query(FOREIGN_KEYS_QUERY)
        .bind(schema_name)
        .bind(table)
        .fetch_all(pool)
        .await?
        .iter()
        .map(foreign_key_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let indexes = sqlx::query(INDEXES_QUERY)
        .bind(schema_name)
        .bind(table)
        .fetch_all(pool)
        .await?
        .iter()
        .map(index_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TableSchema::new(table, columns, foreign_keys, indexes))
}

fn column_from_row(row: &MySqlRow) -> Result<Column, sqlx::Error> {
    Ok(Column {
        name: row.try_get("column_name")?,
        column_type: row.try_get("column_type")?,
        comment: row.try_get::<Option<String>, _>("column_comment")?.unwrap_or_default(),
        key: row.try_get::<Option<String>, _>("column_key")?.unwrap_or_default(),
        nullable: row.try_get::<String, _>("is_nullable")? == "YES",
        default: row.try_get("column_default")?,
    })
}

fn foreign_key_from_row(row: &MySqlRow) -> Result<ForeignKey, sqlx::Error> {
    Ok(ForeignKey {
        column: row.try_get("column_name")?,
        referenced_table: row.try_get("referenced_table")?,
        referenced_column: row.try_get("referenced_column")?,
    })
}

fn index_from_row(row: &MySqlRow) -> Result<IndexEntry, sqlx::Error> {
    Ok(IndexEntry {
        index_name: row.try_get("index_name")?,
        column: row.try_get::<Option<String>, _>("column_name")?.unwrap_or_default(),
        unique: row.try_get::<i64, _>("non_unique")? == 0,
        seq_in_index: row.try_get("seq_in_index")?,
    })
}

pub async fn describe<B: Backend>(backend: &B, table: &str) -> Result<TableSchema, ToolError> {
    debug!("Getting schema for: {table}");
    match backend.describe_table(table).await {
        Ok(schema) => {
            info!(
                "Retrieved schema for table '{table}': {} columns, {} foreign keys, {} index entries",
                schema.columns.len(),
                schema.foreign_keys.len(),
                schema.indexes.len()
            );
            Ok(schema)
        }
        Err(e) => {
            error!("Database error getting schema for table '{table}': {e}");
            Err(ToolError::Schema(e))
        }
    }
}
