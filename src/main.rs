//! `mysql-query-mcp` binary: serves MCP on stdio with `--mcp`, or runs a
//! single `--query` / `--schema` lookup and prints the JSON result.

use clap::{CommandFactory, Parser};
use log::{error, info};
use serde::Serialize;

use mysql_query_mcp::config::{self, Args};
use mysql_query_mcp::db::Row;
use mysql_query_mcp::{query, schema, Backend, McpServer, MySqlBackend, ToolError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    let args = Args::parse();
    if !args.mcp && args.query.is_none() && args.schema.is_none() {
        Args::command().print_help()?;
        println!();
        return Ok(());
    }

    let config = config::load(args.config.as_deref())?;
    let backend = MySqlBackend::connect_lazy(&config);

    if let Some(sql) = args.query {
        let rows = run_raw_query(&backend, &sql).await;
        print_json(&rows.map(|rows| query::QueryResult::raw(sql, rows)))?;
    } else if let Some(table) = args.schema {
        print_json(&schema::describe(&backend, &table).await)?;
    } else {
        info!(
            "Serving MCP on stdio for database '{}' at {}:{}",
            config.database, config.host, config.port
        );
        McpServer::new(backend).serve_stdio().await?;
    }
    Ok(())
}

/// Raw SQL from the command line, sent without parameters.
async fn run_raw_query(
    backend: &MySqlBackend,
    sql: &str,
) -> Result<Vec<Row>, ToolError> {
    backend.fetch_rows(sql, &[]).await.map_err(|e| {
        error!("Query execution failed: {e}");
        ToolError::Query(e)
    })
}

fn print_json<T: Serialize>(result: &Result<T, ToolError>) -> Result<(), serde_json::Error> {
    let value = match result {
        Ok(value) => serde_json::to_value(value)?,
        Err(e) => e.to_payload(),
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
