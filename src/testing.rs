//! In-memory [`Backend`] for unit tests.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::db::{Backend, Row};
use crate::schema::TableSchema;

#[derive(Default)]
pub struct FakeBackend {
    tables: HashMap<String, TableSchema>,
    rows: Vec<Row>,
    failure: Option<String>,
    described: Mutex<Vec<String>>,
    queries: Mutex<Vec<(String, Vec<Value>)>>,
}

impl FakeBackend {
    pub fn with_rows(rows: Vec<Value>) -> Self {
        FakeBackend {
            rows: rows
                .into_iter()
                .filter_map(|row| match row {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.tables.insert(schema.table.clone(), schema);
        self
    }

    pub fn failing(message: &str) -> Self {
        FakeBackend {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn described(&self) -> Vec<String> {
        self.described.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.queries.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), sqlx::Error> {
        match &self.failure {
            Some(message) => Err(sqlx::Error::Protocol(message.clone())),
            None => Ok(()),
        }
    }
}

impl Backend for FakeBackend {
    async fn describe_table(&self, table: &str) -> Result<TableSchema, sqlx::Error> {
        self.described.lock().unwrap().push(table.to_string());
        self.check()?;
        Ok(self
            .tables
            .get(table)
            .cloned()
            .unwrap_or_else(|| TableSchema::new(table, Vec::new(), Vec::new(), Vec::new())))
    }

    async fn fetch_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, sqlx::Error> {
        self.queries
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        self.check()?;
        Ok(self.rows.clone())
    }
}
