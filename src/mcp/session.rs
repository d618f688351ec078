//! One MCP session: handshake, operation catalog, single-flight invocation.

use rmcp::{
    model::{
        CallToolRequestParams, CallToolResult, ClientInfo, Content, JsonObject, ProtocolVersion,
        ResourceContents,
    },
    service::ServiceError,
};
use tracing::{debug, info, warn};

use super::schema::{InvocationResult, Operation};
use super::transport::{MCPRunningService, MCPTransport};
use crate::config::{SessionTimeouts, TransportKind};
use crate::error::{InvocationFailure, ProtocolFailure, RelayError};
use crate::util::with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake complete, catalog not fetched yet.
    Initialized,
    /// Catalog fetched; invocations allowed.
    Ready,
    Closed,
}

/// Result of [`Session::close`]. Closing never fails; problems are reported here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
    ClosedWithErrors(Vec<String>),
}

/// Protocol state over one live transport.
///
/// Every call takes `&mut self`, so a session has at most one request in
/// flight; callers sharing a session wrap it in a mutex.
pub struct Session {
    server: String,
    transport: Box<dyn MCPTransport>,
    service: Option<MCPRunningService>,
    state: SessionState,
    operations: Vec<Operation>,
    timeouts: SessionTimeouts,
}

impl Session {
    /// Perform the versioned handshake over an opened transport.
    ///
    /// On failure the transport is closed before the error is returned.
    pub async fn initialize(
        mut transport: Box<dyn MCPTransport>,
        timeouts: SessionTimeouts,
    ) -> Result<Self, RelayError> {
        let server = transport.server().to_string();

        let handshake = with_timeout(
            timeouts.handshake,
            connect_with_protocol_fallback(transport.as_mut()),
        )
        .await;

        let service = match handshake {
            Ok(service) => service,
            Err(error) => {
                let error = match error {
                    RelayError::Timeout(ms) => RelayError::protocol(
                        &server,
                        ProtocolFailure::HandshakeFailed,
                        format!("no initialize response within {ms}ms"),
                    ),
                    other => other,
                };
                if let Err(close_error) = transport.close().await {
                    warn!(server = %server, error = %close_error, "failed to release transport after handshake failure");
                }
                return Err(error);
            }
        };

        info!(server = %server, transport = %transport.kind(), "MCP session initialized");
        Ok(Self {
            server,
            transport,
            service: Some(service),
            state: SessionState::Initialized,
            operations: Vec::new(),
            timeouts,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Operations discovered by [`Session::list_operations`], in server order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Server-provided instructions from the handshake, when available.
    pub fn instructions(&self) -> Option<String> {
        self.service
            .as_ref()
            .and_then(|service| service.peer_info())
            .and_then(|info| info.instructions.clone())
    }

    /// Fetch the operation catalog. Allowed exactly once, after the handshake.
    pub async fn list_operations(&mut self) -> Result<Vec<Operation>, RelayError> {
        match self.state {
            SessionState::Initialized => {}
            SessionState::Ready => {
                return Err(RelayError::InvalidState(format!(
                    "operations for '{}' were already listed",
                    self.server
                )))
            }
            SessionState::Closed => {
                return Err(RelayError::protocol(
                    &self.server,
                    ProtocolFailure::CatalogFailed,
                    "session is closed",
                ))
            }
        }

        let server = self.server.clone();
        let timeout = self.timeouts.list;
        let service = self.service_mut()?;
        let tools = with_timeout(timeout, async {
            list_all_tools(service)
                .await
                .map_err(|error| map_catalog_error(&server, error))
        })
        .await
        .map_err(|error| match error {
            RelayError::Timeout(ms) => RelayError::protocol(
                &server,
                ProtocolFailure::CatalogFailed,
                format!("no tools/list response within {ms}ms"),
            ),
            other => other,
        })?;

        self.operations = tools
            .into_iter()
            .map(|tool| map_mcp_tool(&server, tool))
            .collect();
        self.state = SessionState::Ready;
        debug!(server = %server, count = self.operations.len(), "listed MCP operations");
        Ok(self.operations.clone())
    }

    /// Call one of this session's operations and wait for its single result.
    pub async fn invoke(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<InvocationResult, RelayError> {
        self.ensure_ready(name)?;
        let wraps_result = match self.operations.iter().find(|operation| operation.name == name) {
            Some(operation) => operation.wraps_result,
            None => {
                return Err(RelayError::invocation(
                    name,
                    InvocationFailure::UnknownOperation,
                    format!("'{}' does not expose this operation", self.server),
                ))
            }
        };
        let arguments = coerce_tool_arguments(arguments)?;

        debug!(server = %self.server, operation = name, "calling MCP operation");
        let timeout = self.timeouts.call;
        let service = self.service_mut()?;
        let result = with_timeout(timeout, async {
            call_tool(service, name, arguments)
                .await
                .map_err(|error| map_invocation_error(name, error))
        })
        .await
        .map_err(|error| match error {
            RelayError::Timeout(ms) => RelayError::invocation(
                name,
                InvocationFailure::Timeout,
                format!("no result within {ms}ms"),
            ),
            other => other,
        })?;

        map_call_result(name, result, wraps_result)
    }

    /// Release the session and its transport. Idempotent, never fails.
    pub async fn close(&mut self) -> CloseOutcome {
        if self.state == SessionState::Closed {
            return CloseOutcome::AlreadyClosed;
        }
        self.state = SessionState::Closed;

        let mut failures = Vec::new();
        if let Some(service) = self.service.take() {
            match service.cancel().await {
                Ok(reason) => debug!(server = %self.server, ?reason, "MCP service stopped"),
                Err(error) => failures.push(format!("MCP service task failed: {error}")),
            }
        }
        if let Err(error) = self.transport.close().await {
            failures.push(error.to_string());
        }

        if failures.is_empty() {
            info!(server = %self.server, "MCP session closed");
            CloseOutcome::Closed
        } else {
            for failure in &failures {
                warn!(server = %self.server, error = %failure, "error while closing MCP session");
            }
            CloseOutcome::ClosedWithErrors(failures)
        }
    }

    fn ensure_ready(&self, name: &str) -> Result<(), RelayError> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Closed => {
                return Err(RelayError::invocation(
                    name,
                    InvocationFailure::TransportLost,
                    format!("session for '{}' is closed", self.server),
                ))
            }
            SessionState::Initialized => {
                return Err(RelayError::InvalidState(format!(
                    "operations for '{}' must be listed before invoking",
                    self.server
                )))
            }
        }
        if self.service.as_ref().is_some_and(|service| service.is_closed()) {
            return Err(RelayError::invocation(
                name,
                InvocationFailure::TransportLost,
                format!("connection to '{}' was lost", self.server),
            ));
        }
        Ok(())
    }

    fn service_mut(&mut self) -> Result<&mut MCPRunningService, RelayError> {
        match self.service.as_mut() {
            Some(service) => Ok(service),
            None => Err(RelayError::InvalidState(format!(
                "missing MCP service for '{}'",
                self.server
            ))),
        }
    }
}

async fn connect_with_protocol_fallback(
    transport: &mut dyn MCPTransport,
) -> Result<MCPRunningService, RelayError> {
    let latest_client_info = ClientInfo {
        protocol_version: ProtocolVersion::LATEST,
        ..Default::default()
    };

    match transport.connect(latest_client_info).await {
        Ok(service) => return Ok(service),
        Err(error) if error.protocol_failure() == Some(ProtocolFailure::UnsupportedVersion) => {
            debug!(server = transport.server(), "retrying MCP handshake with 2024-11-05");
        }
        Err(error) => return Err(error),
    }

    let fallback_client_info = ClientInfo {
        protocol_version: ProtocolVersion::V_2024_11_05,
        ..Default::default()
    };
    transport.connect(fallback_client_info).await
}

async fn list_all_tools(
    service: &mut MCPRunningService,
) -> Result<Vec<rmcp::model::Tool>, ServiceError> {
    match service.list_all_tools().await {
        Ok(tools) => Ok(tools),
        Err(ServiceError::UnexpectedResponse) => {
            service.list_tools(None).await.map(|page| page.tools)
        }
        Err(error) => Err(error),
    }
}

async fn call_tool(
    service: &mut MCPRunningService,
    name: &str,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, ServiceError> {
    service
        .call_tool(CallToolRequestParams {
            meta: None,
            name: name.to_owned().into(),
            arguments,
            task: None,
        })
        .await
}

const WRAP_RESULT_MARKER: &str = "x-fastmcp-wrap-result";

fn map_mcp_tool(server: &str, tool: rmcp::model::Tool) -> Operation {
    let wraps_result = tool
        .output_schema
        .as_ref()
        .and_then(|schema| schema.get(WRAP_RESULT_MARKER))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    Operation {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
        argument_schema: serde_json::Value::Object((*tool.input_schema).clone()),
        server: server.to_string(),
        wraps_result,
    }
}

fn coerce_tool_arguments(value: serde_json::Value) -> Result<Option<JsonObject>, RelayError> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
                RelayError::InvalidArgument(format!("MCP tool arguments must be valid JSON: {e}"))
            })?;
            coerce_tool_arguments(parsed)
        }
        other => Err(RelayError::InvalidArgument(format!(
            "MCP tool arguments must be a JSON object; got {other}"
        ))),
    }
}

fn extract_text_content(content: &[Content]) -> Option<String> {
    let mut lines = Vec::new();
    for item in content {
        if let Some(text) = item.as_text() {
            lines.push(text.text.clone());
            continue;
        }
        if let Some(resource) = item.as_resource() {
            if let ResourceContents::TextResourceContents { text, .. } = &resource.resource {
                lines.push(text.clone());
            }
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn unwrap_structured_result(structured: serde_json::Value) -> serde_json::Value {
    match structured {
        serde_json::Value::Object(mut map) if map.len() == 1 && map.contains_key("result") => {
            map.remove("result").unwrap_or(serde_json::Value::Null)
        }
        other => other,
    }
}

fn map_call_result(
    name: &str,
    result: CallToolResult,
    wraps_result: bool,
) -> Result<InvocationResult, RelayError> {
    let text_content = extract_text_content(&result.content);
    let content = result
        .content
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect::<Vec<_>>();

    if result.is_error.unwrap_or(false) {
        let message = result
            .structured_content
            .as_ref()
            .map(|v| v.to_string())
            .or_else(|| text_content.clone())
            .unwrap_or_else(|| "MCP tool returned an error result".into());

        return Err(RelayError::invocation(
            name,
            InvocationFailure::RemoteFailure,
            message,
        ));
    }

    let structured_content = if wraps_result {
        result.structured_content.map(unwrap_structured_result)
    } else {
        result.structured_content
    };

    Ok(InvocationResult {
        structured_content,
        text_content,
        content,
    })
}

fn describe_service_error(error: &ServiceError) -> String {
    match error {
        ServiceError::McpError(error) => format!("MCP error {}: {}", error.code.0, error.message),
        ServiceError::TransportSend(error) => format!("MCP transport send failed: {error}"),
        ServiceError::TransportClosed => "MCP transport closed".to_string(),
        ServiceError::UnexpectedResponse => "unexpected MCP response".to_string(),
        ServiceError::Cancelled { reason } => {
            let suffix = reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default();
            format!("MCP request cancelled{suffix}")
        }
        ServiceError::Timeout { timeout } => {
            format!("MCP request timed out after {}ms", timeout.as_millis())
        }
        other => format!("MCP service error: {other}"),
    }
}

fn map_catalog_error(server: &str, error: ServiceError) -> RelayError {
    RelayError::protocol(
        server,
        ProtocolFailure::CatalogFailed,
        format!("tools/list: {}", describe_service_error(&error)),
    )
}

fn map_invocation_error(name: &str, error: ServiceError) -> RelayError {
    let failure = match &error {
        ServiceError::TransportSend(_)
        | ServiceError::TransportClosed
        | ServiceError::Cancelled { .. } => InvocationFailure::TransportLost,
        ServiceError::Timeout { .. } => InvocationFailure::Timeout,
        _ => InvocationFailure::RemoteFailure,
    };
    RelayError::invocation(name, failure, describe_service_error(&error))
}
