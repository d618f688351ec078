//! Operation descriptors and invocation payloads.

use serde::{Deserialize, Serialize};

/// One invokable capability discovered on a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Name as exposed in the flat namespace.
    pub name: String,
    pub description: String,
    /// Accepted arguments; passed through untouched.
    pub argument_schema: serde_json::Value,
    /// Display name of the owning server.
    pub server: String,
    /// The server boxes scalar returns as `{"result": value}` in its
    /// structured output (FastMCP's `x-fastmcp-wrap-result` marker).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wraps_result: bool,
}

/// A single call, as chosen by the decision step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub operation: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl InvocationRequest {
    pub fn new(operation: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            arguments,
        }
    }
}

/// Successful tool output.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub structured_content: Option<serde_json::Value>,
    pub text_content: Option<String>,
    pub content: Vec<serde_json::Value>,
}

impl InvocationResult {
    /// Structured content if present, then joined text, then the raw content items.
    pub fn value(&self) -> serde_json::Value {
        self.clone().into_value_or_text()
    }

    pub fn into_value_or_text(self) -> serde_json::Value {
        if let Some(structured) = self.structured_content {
            return structured;
        }
        if let Some(text) = self.text_content {
            return serde_json::Value::String(text);
        }
        serde_json::Value::Array(self.content)
    }

    /// Human-readable rendering for console output.
    pub fn display_text(&self) -> String {
        match self.value() {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        }
    }
}
