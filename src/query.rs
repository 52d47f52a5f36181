//! Structured SELECT builder.
//!
//! A [`QuerySpec`] arrives from the client as JSON and is turned into one
//! SELECT statement with `?` placeholders. Identifiers, operators, `order_by`
//! and `limit` are copied into the SQL text as given; only condition values
//! travel as bound parameters.

use log::{debug, error};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::{Backend, Row};
use crate::error::ToolError;

#[derive(Debug, Default, Deserialize)]
pub struct QuerySpec {
    /// The first table is the driving table of the FROM clause.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tables: Vec<String>,
    /// `table.column` expressions, selected in order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub conditions: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub joins: Vec<Join>,
    #[serde(default, deserialize_with = "raw_clause")]
    pub order_by: String,
    #[serde(default, deserialize_with = "raw_clause")]
    pub limit: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Join {
    #[serde(default)]
    pub left: Option<String>,
    #[serde(default)]
    pub right: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl Join {
    /// Renders `<type> <table> ON <left> = <right>`, where the joined table is
    /// whatever precedes the first `.` of `right`. `None` when either side is
    /// missing or empty.
    fn clause(&self) -> Option<String> {
        let left = self.left.as_deref().filter(|s| !s.is_empty())?;
        let right = self.right.as_deref().filter(|s| !s.is_empty())?;
        let kind = self.kind.as_deref().filter(|s| !s.is_empty()).unwrap_or("JOIN");
        let table = right.split('.').next().unwrap_or(right);
        Some(format!("{kind} {table} ON {left} = {right}"))
    }
}

/// A single WHERE term. Any JSON object is a comparison; everything else is
/// matched with `=`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Literal(Value),
    Compare { operator: String, value: Value },
}

impl Condition {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Condition::Compare {
                operator: map
                    .get("operator")
                    .and_then(Value::as_str)
                    .unwrap_or("=")
                    .to_string(),
                value: map
                    .get("value")
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new())),
            },
            other => Condition::Literal(other.clone()),
        }
    }

    fn render(self, column: &str) -> (String, Value) {
        match self {
            Condition::Literal(value) => (format!("{column} = ?"), value),
            Condition::Compare { operator, value } => (format!("{column} {operator} ?"), value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub success: bool,
    pub result: Vec<Row>,
    pub sql: String,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl QueryResult {
    pub fn new(sql: String, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        QueryResult {
            success: true,
            result: rows,
            sql,
            row_count,
            description: Some(format!("查询成功，返回 {row_count} 条记录")),
        }
    }

    /// Result of raw SQL from the command line, reported without a description.
    pub fn raw(sql: String, rows: Vec<Row>) -> Self {
        QueryResult {
            description: None,
            ..QueryResult::new(sql, rows)
        }
    }
}

pub fn build(spec: &QuerySpec) -> Result<BuiltQuery, ToolError> {
    let Some(from) = spec.tables.first() else {
        return Err(ToolError::MissingTablesOrFields);
    };
    if spec.fields.is_empty() {
        return Err(ToolError::MissingTablesOrFields);
    }

    let mut sql = format!("SELECT {} FROM {}", spec.fields.join(", "), from);

    let joins: Vec<String> = spec.joins.iter().filter_map(Join::clause).collect();
    if !joins.is_empty() {
        sql.push(' ');
        sql.push_str(&joins.join(" "));
    }

    let mut terms = Vec::with_capacity(spec.conditions.len());
    let mut params = Vec::with_capacity(spec.conditions.len());
    for (column, raw) in &spec.conditions {
        let (term, value) = Condition::from_value(raw).render(column);
        terms.push(term);
        params.push(value);
    }
    if !terms.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&terms.join(" AND "));
    }

    if !spec.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&spec.order_by);
    }
    if !spec.limit.is_empty() {
        sql.push_str(" LIMIT ");
        sql.push_str(&spec.limit);
    }

    Ok(BuiltQuery { sql, params })
}

pub async fn execute<B: Backend>(backend: &B, spec: &QuerySpec) -> Result<QueryResult, ToolError> {
    let built = build(spec)?;
    debug!("Executing query: {} (params: {:?})", built.sql, built.params);
    match backend.fetch_rows(&built.sql, &built.params).await {
        Ok(rows) => {
            debug!("Query returned {} rows", rows.len());
            Ok(QueryResult::new(built.sql, rows))
        }
        Err(e) => {
            error!("Query execution failed: {e}");
            Err(ToolError::Query(e))
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `order_by` / `limit` are spliced verbatim; clients send `"10"` as often as `10`.
fn raw_clause<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(de::Error::custom(format!(
            "expected a string or number, found {other}"
        ))),
    }
}
