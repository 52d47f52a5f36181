use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::db::Backend;
use crate::error::ToolError;
use crate::query;
use crate::rpc::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, QueryArguments, SchemaArguments,
    ServerCapabilities, ServerInfo, Tool, ToolCallParams, ToolsCapability, ToolsList,
    INTERNAL_ERROR, METHOD_NOT_FOUND,
};
use crate::schema;

const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpServer<B> {
    backend: B,
}

impl<B: Backend> McpServer<B> {
    pub fn new(backend: B) -> Self {
        McpServer { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Serves requests from stdin until it closes.
    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        self.run(stdin, &mut stdout).await
    }

    /// Reads newline-delimited requests from `reader` and writes one response
    /// line per request to `writer`. Only EOF or a read error ends the loop.
    pub async fn run<R, W>(&self, mut reader: R, writer: &mut W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("MCP MySQL query server ready, PID {}", std::process::id());
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    info!("stdin closed - client disconnected, shutting down server");
                    break;
                }
                Ok(_) => {
                    let response = match std::str::from_utf8(&buf) {
                        Ok(line) if line.trim().is_empty() => continue,
                        Ok(line) => self.handle_line(line).await,
                        Err(e) => {
                            warn!("Received a line that is not valid UTF-8: {e}");
                            Some(internal_error(None, e))
                        }
                    };
                    let Some(response) = response else {
                        continue;
                    };
                    if let Err(e) = write_response(writer, &response).await {
                        error!("Failed to write response: {e}");
                    }
                }
                Err(e) => {
                    warn!("Error reading from stdin: {e} (error kind: {:?})", e.kind());
                    return Err(e);
                }
            }
        }

        info!("MCP MySQL query server shutdown complete");
        Ok(())
    }

    /// Handles one input line. `None` for notifications, which get no reply.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        debug!("Received message (len={}): {}", line.len(), line);
        let message: Value = match serde_json::from_str(line.trim()) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to parse request: {e}");
                return Some(internal_error(None, e));
            }
        };
        if !message.is_object() {
            warn!("Request is not a JSON object: {message}");
            return Some(internal_error(None, "request must be a JSON object"));
        }
        // Kept aside so a malformed request can still be answered by id.
        let id = message.get("id").filter(|id| !id.is_null()).cloned();
        let method = message.get("method").cloned();

        match serde_json::from_value::<JsonRpcRequest>(message) {
            Ok(request) => {
                if request.is_notification() {
                    debug!("Received notification: {}", request.method);
                    return None;
                }
                Some(self.handle_request(request).await)
            }
            Err(e) => match method {
                Some(Value::String(_)) => {
                    warn!("Failed to parse request: {e}");
                    Some(internal_error(id, e))
                }
                other => {
                    let method = other.map_or_else(|| "None".to_string(), |m| m.to_string());
                    warn!("Request without a usable method: {method}");
                    Some(JsonRpcResponse::error(
                        id,
                        METHOD_NOT_FOUND,
                        format!("方法未找到: {method}"),
                    ))
                }
            },
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!("Parsed request: method={}, id={:?}", request.method, request.id);
        match request.method.as_str() {
            "initialize" => match serde_json::to_value(initialize_result()) {
                Ok(result) => JsonRpcResponse::success(request.id, result),
                Err(e) => internal_error(request.id, e),
            },
            "ping" => JsonRpcResponse::success(request.id, json!({})),
            "tools/list" => match serde_json::to_value(ToolsList { tools: tools() }) {
                Ok(result) => JsonRpcResponse::success(request.id, result),
                Err(e) => internal_error(request.id, e),
            },
            "tools/call" => {
                let params = request.params.unwrap_or_else(|| json!({}));
                match serde_json::from_value::<ToolCallParams>(params) {
                    Ok(call) => {
                        let result = self.call_tool(&call.name, call.arguments).await;
                        match text_content(&result) {
                            Ok(content) => JsonRpcResponse::success(request.id, content),
                            Err(e) => internal_error(request.id, e),
                        }
                    }
                    Err(e) => internal_error(request.id, e),
                }
            }
            _ => {
                warn!("Unknown method: {}", request.method);
                JsonRpcResponse::error(
                    request.id,
                    METHOD_NOT_FOUND,
                    format!("方法未找到: {}", request.method),
                )
            }
        }
    }

    /// Runs a tool and returns its JSON result, or an `{error}` payload.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        debug!("Handling tool call: {name}");
        let outcome = match name {
            "get_table_schema" => self.get_table_schema(arguments).await,
            "execute_query" => self.execute_query(arguments).await,
            _ => Err(ToolError::UnknownTool(name.to_string())),
        };
        outcome.unwrap_or_else(|e| {
            debug!("Tool {name} failed: {e}");
            e.to_payload()
        })
    }

    async fn get_table_schema(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: SchemaArguments =
            serde_json::from_value(arguments).map_err(ToolError::InvalidArguments)?;
        let schema = schema::describe(&self.backend, &args.table).await?;
        serde_json::to_value(schema).map_err(ToolError::Encode)
    }

    async fn execute_query(&self, arguments: Value) -> Result<Value, ToolError> {
        let spec: QueryArguments =
            serde_json::from_value(arguments).map_err(ToolError::InvalidArguments)?;
        let result = query::execute(&self.backend, &spec).await?;
        serde_json::to_value(result).map_err(ToolError::Encode)
    }
}

async fn write_response<W>(writer: &mut W, response: &JsonRpcResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

fn internal_error(id: Option<Value>, e: impl std::fmt::Display) -> JsonRpcResponse {
    error!("Internal error: {e}");
    JsonRpcResponse::error(id, INTERNAL_ERROR, format!("内部错误: {e}"))
}

fn text_content(result: &Value) -> Result<Value, serde_json::Error> {
    Ok(json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string_pretty(result)?
        }]
    }))
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: false,
            }),
        },
        server_info: ServerInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    }
}

pub fn tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "get_table_schema".to_string(),
            description: "获取指定表的完整结构信息，供LLM分析自然语言时使用。返回字段名、类型、注释、主键、外键、索引等信息。".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table": {
                        "type": "string",
                        "description": "要查询的表名"
                    }
                },
                "required": ["table"]
            }),
        },
        Tool {
            name: "execute_query".to_string(),
            description: "根据LLM解析的自然语言执行数据库查询，支持多表关联、复杂条件、排序、分页等。".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tables": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "要查询的表名列表，第一个为主表"
                    },
                    "fields": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "要查询的字段列表，格式为table.column"
                    },
                    "conditions": {
                        "type": "object",
                        "description": "查询条件，支持简单条件(字段=值)和复杂条件(字段={operator: 'LIKE', value: '%test%'})"
                    },
                    "joins": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "left": {"type": "string", "description": "左表字段"},
                                "right": {"type": "string", "description": "右表字段"},
                                "type": {"type": "string", "description": "JOIN类型，默认JOIN"}
                            }
                        },
                        "description": "表关联条件"
                    },
                    "order_by": {
                        "type": "string",
                        "description": "排序字段，如'id DESC'"
                    },
                    "limit": {
                        "type": "string",
                        "description": "限制返回记录数，如'10'"
                    }
                },
                "required": ["tables", "fields"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, TableSchema};
    use crate::testing::FakeBackend;
    use tokio::io::BufReader;

    fn text_of(response: &JsonRpcResponse) -> Value {
        let text = response.result.as_ref().unwrap()["content"][0]["text"]
            .as_str()
            .unwrap();
        serde_json::from_str(text).unwrap()
    }

    async fn run_lines(server: &McpServer<FakeBackend>, input: &[u8]) -> Vec<Value> {
        let mut output = Vec::new();
        server.run(BufReader::new(input), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_tools_list() {
        let server = McpServer::new(FakeBackend::default());
        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#)
            .await
            .unwrap();

        assert_eq!(response.id, Some(json!(1)));
        let tools = &response.result.unwrap()["tools"];
        assert_eq!(tools[0]["name"], "get_table_schema");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["table"]));
        assert_eq!(tools[1]["name"], "execute_query");
        assert_eq!(tools[1]["inputSchema"]["required"], json!(["tables", "fields"]));
    }

    #[tokio::test]
    async fn test_get_table_schema_call() {
        let backend = FakeBackend::default().with_table(TableSchema::new(
            "users",
            vec![Column {
                name: "id".into(),
                column_type: "int".into(),
                comment: "主键".into(),
                key: "PRI".into(),
                nullable: false,
                default: None,
            }],
            Vec::new(),
            Vec::new(),
        ));
        let server = McpServer::new(backend);
        let response = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"get_table_schema","arguments":{"table":"users"}}}"#,
            )
            .await
            .unwrap();

        assert!(response.error.is_none());
        assert_eq!(response.result.as_ref().unwrap()["content"][0]["type"], "text");
        let schema = text_of(&response);
        assert_eq!(schema["table"], "users");
        assert_eq!(schema["columns"][0]["comment"], "主键");
        assert_eq!(server.backend().described(), vec!["users".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_query_call() {
        let server = McpServer::new(FakeBackend::with_rows(vec![json!({"id": 9})]));
        let response = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":"q","method":"tools/call","params":{"name":"execute_query","arguments":{"tables":["orders"],"fields":["orders.id"],"conditions":{"orders.status":"paid"},"limit":"1"}}}"#,
            )
            .await
            .unwrap();

        let result = text_of(&response);
        assert_eq!(result["success"], true);
        assert_eq!(result["row_count"], 1);
        assert_eq!(result["result"][0]["id"], 9);
        assert_eq!(
            result["sql"],
            "SELECT orders.id FROM orders WHERE orders.status = ? LIMIT 1"
        );
        assert_eq!(server.backend().queries()[0].1, vec![json!("paid")]);
    }

    #[tokio::test]
    async fn test_unknown_tool_never_touches_database() {
        let server = McpServer::new(FakeBackend::default());
        let response = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"drop_table","arguments":{}}}"#,
            )
            .await
            .unwrap();

        assert_eq!(text_of(&response), json!({"error": "未知工具: drop_table"}));
        assert!(server.backend().described().is_empty());
        assert!(server.backend().queries().is_empty());
    }

    #[tokio::test]
    async fn test_tool_errors_are_payloads_not_rpc_errors() {
        let server = McpServer::new(FakeBackend::failing("Lost connection to MySQL server"));

        let missing = server
            .call_tool("execute_query", json!({"tables": ["orders"]}))
            .await;
        assert_eq!(missing, json!({"error": "缺少tables或fields参数"}));

        let bad_args = server.call_tool("get_table_schema", json!({})).await;
        assert!(bad_args["error"].as_str().unwrap().starts_with("参数无效: "));

        let failed = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"get_table_schema","arguments":{"table":"users"}}}"#,
            )
            .await
            .unwrap();
        assert!(failed.error.is_none());
        assert!(text_of(&failed)["error"]
            .as_str()
            .unwrap()
            .contains("Lost connection"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = McpServer::new(FakeBackend::default());
        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","id":5,"method":"resources/list"}"#)
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert_eq!(error.message, "方法未找到: resources/list");
        assert_eq!(response.id, Some(json!(5)));
    }

    #[tokio::test]
    async fn test_initialize_and_notifications() {
        let server = McpServer::new(FakeBackend::default());
        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "mysql-query-mcp");
        assert!(result["capabilities"]["tools"].is_object());

        assert!(server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_loop_survives_garbage_lines() {
        let server = McpServer::new(FakeBackend::default());
        let input = concat!(
            "this is not json\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":8,\"method\":\"tools/call\",\"params\":\"oops\"}\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"tools/list\"}\n",
        );
        let responses = run_lines(&server, input.as_bytes()).await;

        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0]["error"]["code"], INTERNAL_ERROR);
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[1], json!({"jsonrpc": "2.0", "id": 7, "result": {}}));
        assert_eq!(responses[2]["error"]["code"], INTERNAL_ERROR);
        assert_eq!(responses[2]["id"], 8);
        assert_eq!(responses[3]["id"], 9);
        assert_eq!(responses[3]["result"]["tools"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_loop_survives_invalid_utf8() {
        let server = McpServer::new(FakeBackend::default());
        let mut input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n".to_vec();
        input.extend_from_slice(b"\xff\xfe garbage\n");
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n");
        let responses = run_lines(&server, &input).await;

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["error"]["code"], INTERNAL_ERROR);
        assert_eq!(responses[1]["id"], Value::Null);
        assert!(responses[1]["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("内部错误: "));
        assert_eq!(responses[2], json!({"jsonrpc": "2.0", "id": 2, "result": {}}));
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_its_id() {
        let server = McpServer::new(FakeBackend::default());

        let missing = server
            .handle_line(r#"{"jsonrpc":"2.0","id":42}"#)
            .await
            .unwrap();
        assert_eq!(missing.id, Some(json!(42)));
        let error = missing.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert_eq!(error.message, "方法未找到: None");

        let numeric = server
            .handle_line(r#"{"jsonrpc":"2.0","id":"a","method":7}"#)
            .await
            .unwrap();
        assert_eq!(numeric.id, Some(json!("a")));
        assert_eq!(numeric.error.unwrap().code, METHOD_NOT_FOUND);

        let bad_version = server
            .handle_line(r#"{"jsonrpc":5,"id":43,"method":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(bad_version.id, Some(json!(43)));
        assert_eq!(bad_version.error.unwrap().code, INTERNAL_ERROR);

        let not_an_object = server.handle_line("[1, 2]").await.unwrap();
        assert_eq!(not_an_object.id, None);
        assert_eq!(not_an_object.error.unwrap().code, INTERNAL_ERROR);
    }
}
