//! MySQL MCP query server
//!
//! Exposes one MySQL database to an LLM client through two Model Context
//! Protocol tools, served as JSON-RPC 2.0 over stdio:
//!
//! - `get_table_schema`: columns, foreign keys and indexes of a table, read
//!   from `information_schema`
//! - `execute_query`: a SELECT assembled from structured JSON (tables, fields,
//!   joins, conditions, ordering, limit) with every condition value bound as a
//!   parameter
//!
//! Table, column, operator, `order_by` and `limit` text is spliced into the
//! statement unescaped. Only point this at clients you trust to send
//! well-formed identifiers.

pub mod config;
pub mod db;
pub mod error;
pub mod query;
pub mod rpc;
pub mod schema;
pub mod server;

#[cfg(test)]
mod testing;

pub use db::{Backend, MySqlBackend};
pub use error::ToolError;
pub use query::{BuiltQuery, QueryResult, QuerySpec};
pub use schema::TableSchema;
pub use server::McpServer;
