use serde_json::{json, Value};
use std::fmt;

/// Failures reported back to the caller as an `{error}` payload inside a
/// successful `tools/call` response.
#[derive(Debug)]
pub enum ToolError {
    UnknownTool(String),
    InvalidArguments(serde_json::Error),
    MissingTablesOrFields,
    Schema(sqlx::Error),
    Query(sqlx::Error),
    Encode(serde_json::Error),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::UnknownTool(name) => write!(f, "未知工具: {name}"),
            ToolError::InvalidArguments(e) => write!(f, "参数无效: {e}"),
            ToolError::MissingTablesOrFields => write!(f, "缺少tables或fields参数"),
            ToolError::Schema(e) => write!(f, "获取表结构失败: {e}"),
            ToolError::Query(e) => write!(f, "查询执行失败: {e}"),
            ToolError::Encode(e) => write!(f, "结果序列化失败: {e}"),
        }
    }
}

impl std::error::Error for ToolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ToolError::Schema(e) | ToolError::Query(e) => Some(e),
            ToolError::InvalidArguments(e) | ToolError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl ToolError {
    pub fn to_payload(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}
