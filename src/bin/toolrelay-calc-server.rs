//! Arithmetic MCP server over stdin/stdout.
//!
//! Exposes `add`, `subtract`, `multiply` and `divide`. Results are shaped
//! like a FastMCP server's: the number as text plus a `{"result": n}`
//! structured payload announced by `x-fastmcp-wrap-result` in the output
//! schema. Useful as a local `process` server and in the process transport
//! tests.

use std::process::ExitCode;
use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, JsonObject, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData, RoleServer, ServerHandler, ServiceExt};
use serde_json::json;

const TOOLS: [(&str, &str); 4] = [
    ("add", "Add two numbers together"),
    ("subtract", "Subtract b from a"),
    ("multiply", "Multiply two numbers"),
    ("divide", "Divide a by b"),
];

fn schema(value: serde_json::Value) -> Arc<JsonObject> {
    match value {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(JsonObject::new()),
    }
}

fn tool(name: &'static str, description: &'static str) -> Tool {
    let mut tool = Tool::new(
        name,
        description,
        schema(json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" }
            },
            "required": ["a", "b"]
        })),
    );
    tool.output_schema = Some(schema(json!({
        "type": "object",
        "properties": { "result": { "type": "number" } },
        "required": ["result"],
        "x-fastmcp-wrap-result": true
    })));
    tool
}

/// Whole numbers go out as integers so `2 + 3` reads `5`, not `5.0`.
fn number(value: f64) -> serde_json::Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

fn operand(arguments: Option<&JsonObject>, key: &str) -> Result<f64, ErrorData> {
    arguments
        .and_then(|args| args.get(key))
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| ErrorData::invalid_params(format!("'{key}' must be a number"), None))
}

#[derive(Debug, Clone, Copy, Default)]
struct Calculator;

impl Calculator {
    fn evaluate(&self, request: &CallToolRequestParams) -> Result<CallToolResult, ErrorData> {
        let arguments = request.arguments.as_ref();
        let a = operand(arguments, "a")?;
        let b = operand(arguments, "b")?;
        let value = match &*request.name {
            "add" => a + b,
            "subtract" => a - b,
            "multiply" => a * b,
            "divide" if b == 0.0 => {
                return Ok(CallToolResult::error(vec![Content::text(
                    "Cannot divide by zero",
                )]))
            }
            "divide" => a / b,
            other => {
                return Err(ErrorData::invalid_params(
                    format!("unknown tool '{other}'"),
                    None,
                ))
            }
        };

        let value = number(value);
        let mut result = CallToolResult::success(vec![Content::text(value.to_string())]);
        result.structured_content = Some(json!({ "result": value }));
        Ok(result)
    }
}

impl ServerHandler for Calculator {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "Simple Calculator".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Implementation::from_build_env()
            },
            instructions: Some("Arithmetic on two numbers: add, subtract, multiply, divide.".into()),
            ..ServerInfo::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(
            TOOLS
                .iter()
                .map(|&(name, description)| tool(name, description))
                .collect(),
        ))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.evaluate(&request)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let service = match Calculator
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await
    {
        Ok(service) => service,
        Err(error) => {
            eprintln!("calc server failed to initialize: {error}");
            return ExitCode::FAILURE;
        }
    };
    match service.waiting().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("calc server stopped: {error}");
            ExitCode::FAILURE
        }
    }
}
