use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, info};
use serde_json::{json, Map, Value};
use sqlx::mysql::{MySqlArguments, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Decode, MySql, Pool, Row as _, Type, TypeInfo};

use crate::config::Config;
use crate::schema::{self, TableSchema};

/// One result row, keyed by column label in select order.
pub type Row = Map<String, Value>;

/// The two database operations the tools need.
#[allow(async_fn_in_trait)]
pub trait Backend {
    async fn describe_table(&self, table: &str) -> Result<TableSchema, sqlx::Error>;

    /// Runs `sql` with `params` bound to its `?` placeholders, in order.
    async fn fetch_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, sqlx::Error>;
}

pub struct MySqlBackend {
    pool: Pool<MySql>,
    schema_name: String,
}

impl MySqlBackend {
    pub fn new(pool: Pool<MySql>, schema_name: impl Into<String>) -> Self {
        MySqlBackend {
            pool,
            schema_name: schema_name.into(),
        }
    }

    /// Builds a lazily connected pool: nothing touches the network until the
    /// first statement, so a down server surfaces as a per-request error.
    pub fn connect_lazy(config: &Config) -> Self {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy_with(config.connect_options());
        info!(
            "Prepared MySQL pool for {}@{}:{}/{} (max {} connections)",
            config.username, config.host, config.port, config.database, config.max_connections
        );
        MySqlBackend::new(pool, config.database.clone())
    }

    pub fn pool(&self) -> &Pool<MySql> {
        &self.pool
    }
}

impl Backend for MySqlBackend {
    async fn describe_table(&self, table: &str) -> Result<TableSchema, sqlx::Error> {
        schema::inspect(&self.pool, &self.schema_name, table).await
    }

    async fn fetch_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, sqlx::Error> {
        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, value| bind_json(query, value));
        let rows = query.fetch_all(&self.pool).await?;
        debug!("Fetched {} rows", rows.len());
        Ok(rows.iter().map(row_to_json).collect())
    }
}

/// Binds a JSON value with the closest MySQL type so that comparisons
/// behave numerically where the client sent numbers.
pub fn bind_json<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(u) = n.as_u64() {
                query.bind(u)
            } else {
                query.bind(n.as_f64())
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

fn decode<'r, T>(row: &'r MySqlRow, index: usize) -> Option<T>
where
    T: Decode<'r, MySql> + Type<MySql>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

fn decode_json<'r, T>(row: &'r MySqlRow, index: usize) -> Value
where
    T: Decode<'r, MySql> + Type<MySql> + Into<Value>,
{
    decode::<T>(row, index).map(Into::into).unwrap_or(Value::Null)
}

fn decode_display<'r, T>(row: &'r MySqlRow, index: usize) -> Value
where
    T: Decode<'r, MySql> + Type<MySql> + ToString,
{
    decode::<T>(row, index)
        .map(|v| Value::String(v.to_string()))
        .unwrap_or(Value::Null)
}

pub fn value_to_json(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "BOOLEAN" => decode_json::<bool>(row, index),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" => {
            decode_json::<i64>(row, index)
        }
        name if name.ends_with("UNSIGNED") => decode_json::<u64>(row, index),
        "FLOAT" | "DOUBLE" | "REAL" => match decode::<f64>(row, index) {
            Some(v) => json!(v),
            None => decode::<f32>(row, index).map_or(Value::Null, |v| json!(v)),
        },
        // Serialize DECIMAL as string to preserve precision
        "DECIMAL" | "NUMERIC" => decode_display::<BigDecimal>(row, index),
        "DATE" => decode_display::<NaiveDate>(row, index),
        "TIME" => decode_display::<NaiveTime>(row, index),
        "DATETIME" | "TIMESTAMP" => decode_display::<NaiveDateTime>(row, index),
        "JSON" => decode::<Value>(row, index).unwrap_or(Value::Null),
        _ => {
            // Text types decode as String; binary ones fall back to lossy UTF-8
            if let Some(s) = decode::<String>(row, index) {
                Value::String(s)
            } else if let Some(bytes) = decode::<Vec<u8>>(row, index) {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            } else {
                Value::Null
            }
        }
    }
}

pub fn row_to_json(row: &MySqlRow) -> Row {
    let mut row_data = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = value_to_json(row, i, column.type_info().name());
        row_data.insert(column.name().to_string(), value);
    }
    row_data
}
