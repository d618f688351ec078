//! Decision collaborator boundary: requests, prompts, and defensive parsing.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::error::RelayError;
use crate::mcp::{InvocationRequest, Operation};

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*[ \t]*\n?(.*?)\s*```\s*$")
        .expect("code fence regex must compile")
});

/// What the decision collaborator is asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionRequest {
    /// Pick one operation for `user_text`, or answer directly.
    Select {
        catalog: Vec<Operation>,
        user_text: String,
    },
    /// Phrase a final answer from an operation's result.
    Respond {
        user_text: String,
        operation: String,
        arguments: serde_json::Value,
        result: serde_json::Value,
    },
}

impl DecisionRequest {
    /// Instructions for the collaborator.
    pub fn system_prompt(&self) -> String {
        match self {
            Self::Select { catalog, .. } => {
                let mut prompt = String::from(
                    "You are a helpful assistant with access to these tools:\n\n",
                );
                for operation in catalog {
                    prompt.push_str(&format!(
                        "- {}: {}\n  arguments schema: {}\n",
                        operation.name, operation.description, operation.argument_schema
                    ));
                }
                prompt.push_str(
                    "\nIf one tool answers the request, reply with only a JSON object of the form \
                     {\"operation\": \"<tool name>\", \"arguments\": {...}}. \
                     Otherwise reply with a direct answer in plain text.",
                );
                prompt
            }
            Self::Respond { .. } => "You are a helpful assistant. A tool was called on the \
                                     user's behalf; answer the user's request using its result."
                .to_string(),
        }
    }

    pub fn user_prompt(&self) -> String {
        match self {
            Self::Select { user_text, .. } => user_text.clone(),
            Self::Respond {
                user_text,
                operation,
                arguments,
                result,
            } => format!(
                "User request: {user_text}\n\nTool '{operation}' was called with {arguments} \
                 and returned: {result}\n\nProvide a concise answer."
            ),
        }
    }
}

/// External component that turns context into untrusted text.
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, request: DecisionRequest) -> Result<String, RelayError>;
}

/// Validated interpretation of a decider's output.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Invoke(InvocationRequest),
    /// Direct answer; the raw output, verbatim.
    Answer(String),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSelection {
    #[serde(alias = "tool", alias = "name")]
    operation: String,
    #[serde(default, alias = "args", alias = "parameters")]
    arguments: Option<serde_json::Value>,
}

/// Interpret decider output against the current catalog.
///
/// Only a well-formed selection naming a catalog entry with object (or
/// absent) arguments becomes an invocation. Everything else is answered
/// with `raw` unchanged.
pub fn parse_decision(raw: &str, catalog: &[Operation]) -> Decision {
    let answer = || Decision::Answer(raw.to_string());

    let body = strip_code_fence(raw);
    if !body.trim_start().starts_with('{') {
        return answer();
    }
    let Ok(selection) = serde_json::from_str::<RawSelection>(body) else {
        return answer();
    };
    if !catalog.iter().any(|op| op.name == selection.operation) {
        tracing::debug!(operation = %selection.operation, "decision named an unknown operation");
        return answer();
    }
    let arguments = match selection.arguments {
        None | Some(serde_json::Value::Null) => serde_json::Value::Object(Default::default()),
        Some(value @ serde_json::Value::Object(_)) => value,
        Some(_) => return answer(),
    };

    Decision::Invoke(InvocationRequest::new(selection.operation, arguments))
}

fn strip_code_fence(raw: &str) -> &str {
    CODE_FENCE_RE
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map_or(raw, |body| body.as_str())
}
