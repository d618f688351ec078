//! Single-shot dispatch loop: decide, invoke at most one operation, respond.

pub mod chat;
pub mod decision;

pub use chat::ChatCompletionsDecider;
pub use decision::{parse_decision, Decider, Decision, DecisionRequest};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::mcp::{InvocationRequest, Operation, SessionPool};

/// Console control inputs, recognized before any decision is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Exit,
    ListCatalog,
    Empty,
    Ask(String),
}

impl Intent {
    pub fn parse(line: &str) -> Self {
        let text = line.trim();
        if text.is_empty() {
            return Self::Empty;
        }
        match text.to_lowercase().as_str() {
            "exit" | "quit" => Self::Exit,
            "tools" => Self::ListCatalog,
            _ => Self::Ask(text.to_string()),
        }
    }
}

/// One processed user turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogueTurn {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub user_text: String,
    /// Present only when the decision selected an operation.
    pub invocation: Option<InvocationRequest>,
    /// Operation output, when the invocation succeeded.
    pub result: Option<serde_json::Value>,
    pub response_text: String,
}

impl DialogueTurn {
    fn new(user_text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            user_text: user_text.to_string(),
            invocation: None,
            result: None,
            response_text: String::new(),
        }
    }
}

/// Render the catalog one `  • name: description` line per operation.
pub fn render_catalog(catalog: &[Operation]) -> String {
    if catalog.is_empty() {
        return "  (no operations available)".to_string();
    }
    catalog
        .iter()
        .map(|operation| format!("  • {}: {}", operation.name, operation.description))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct Dispatcher {
    pool: Arc<SessionPool>,
    decider: Arc<dyn Decider>,
}

impl Dispatcher {
    pub fn new(pool: Arc<SessionPool>, decider: Arc<dyn Decider>) -> Self {
        Self { pool, decider }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Process one user turn. Never fails; errors become the response text.
    pub async fn run_turn(&self, user_text: &str) -> DialogueTurn {
        let mut turn = DialogueTurn::new(user_text);
        let catalog = self.pool.catalog().await;

        let raw = match self
            .decider
            .decide(DecisionRequest::Select {
                catalog: catalog.clone(),
                user_text: turn.user_text.clone(),
            })
            .await
        {
            Ok(raw) => raw,
            Err(error) => {
                warn!(turn_id = %turn.id, error = %error, "decision step failed");
                turn.response_text = format!("Error: {error}");
                return turn;
            }
        };

        match parse_decision(&raw, &catalog) {
            Decision::Answer(text) => turn.response_text = text,
            Decision::Invoke(request) => {
                info!(turn_id = %turn.id, operation = %request.operation, "invoking operation");
                turn.invocation = Some(request.clone());
                self.invoke_and_respond(&mut turn, request).await;
            }
        }
        turn
    }

    async fn invoke_and_respond(&self, turn: &mut DialogueTurn, request: InvocationRequest) {
        let result = match self
            .pool
            .invoke(&request.operation, request.arguments.clone())
            .await
        {
            Ok(result) => result,
            Err(RelayError::OperationNotFound(name)) => {
                turn.response_text = format!("Operation '{name}' is not available.");
                return;
            }
            Err(error) => {
                warn!(turn_id = %turn.id, operation = %request.operation, error = %error, "invocation failed");
                turn.response_text = format!("Error calling '{}': {error}", request.operation);
                return;
            }
        };

        let value = result.value();
        turn.result = Some(value.clone());
        turn.response_text = match self
            .decider
            .decide(DecisionRequest::Respond {
                user_text: turn.user_text.clone(),
                operation: request.operation.clone(),
                arguments: request.arguments,
                result: value,
            })
            .await
        {
            Ok(text) => text,
            Err(error) => {
                warn!(turn_id = %turn.id, error = %error, "response step failed; showing raw result");
                result.display_text()
            }
        };
    }

    /// Drive turns from `input` until exit, end of input, or cancellation.
    ///
    /// Cancellation abandons the in-flight turn; shutting the pool down is
    /// left to the caller.
    pub async fn run<R, W>(
        &self,
        input: R,
        mut output: W,
        cancel: CancellationToken,
    ) -> Result<(), RelayError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        loop {
            output.write_all(b"\nQuery: ").await?;
            output.flush().await?;

            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };

            match Intent::parse(&line) {
                Intent::Exit => break,
                Intent::Empty => continue,
                Intent::ListCatalog => {
                    let catalog = render_catalog(&self.pool.catalog().await);
                    output
                        .write_all(format!("\nAvailable tools:\n{catalog}\n").as_bytes())
                        .await?;
                }
                Intent::Ask(text) => {
                    let turn = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!("turn cancelled");
                            break;
                        }
                        turn = self.run_turn(&text) => turn,
                    };
                    info!(
                        turn_id = %turn.id,
                        started_at = %turn.started_at,
                        operation = turn.invocation.as_ref().map(|i| i.operation.as_str()),
                        "turn complete"
                    );
                    output
                        .write_all(format!("\n{}\n", turn.response_text).as_bytes())
                        .await?;
                }
            }
        }
        output.flush().await?;
        Ok(())
    }
}
