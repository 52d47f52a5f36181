use clap::Parser;
use serde::Deserialize;
use sqlx::mysql::MySqlConnectOptions;
use std::path::{Path, PathBuf};

/// Command-line flags. Without `--mcp`, `--query` or `--schema` the binary
/// prints its help text.
#[derive(Debug, Parser)]
#[command(name = "mysql-query-mcp", version, about = "MySQL MCP server for structured queries")]
pub struct Args {
    /// Serve MCP (JSON-RPC 2.0) on stdin/stdout
    #[arg(long, visible_alias = "mcpcli")]
    pub mcp: bool,

    /// Execute a raw SQL statement once and print the result as JSON
    #[arg(long, value_name = "SQL", conflicts_with = "mcp")]
    pub query: Option<String>,

    /// Print the schema of a table as JSON
    #[arg(long, value_name = "TABLE", conflicts_with_all = ["mcp", "query"])]
    pub schema: Option<String>,

    /// Path to the configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    3306
}

fn default_password() -> String {
    String::new()
}

fn default_charset() -> String {
    "utf8mb4".into()
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// Default schema of every connection, and the `TABLE_SCHEMA` the
    /// metadata lookups filter on.
    pub database: String,

    #[serde(default = "default_charset")]
    pub charset: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Config {
    pub fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
            .charset(&self.charset)
    }
}

pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/root".into());
    PathBuf::from(home)
        .join(".config")
        .join("mysql-query-mcp")
        .join("config.toml")
}

pub fn parse(content: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(content)
}

pub fn load(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        format!(
            "Failed to read config file: {}\n\
             Create it with your MySQL connection settings.\n\
             Example:\n\n\
             host = \"localhost\"\n\
             port = 3306\n\
             username = \"admin\"\n\
             password = \"\"\n\
             database = \"mydb\"\n\n\
             Error: {e}",
            path.display()
        )
    })?;
    let config = parse(&content).map_err(|e| format!("Failed to parse {}: {e}", path.display()))?;
    Ok(config)
}
