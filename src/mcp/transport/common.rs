use async_trait::async_trait;
use rmcp::model::{ClientInfo, ClientJsonRpcMessage, ServerJsonRpcMessage};
use rmcp::service::{
    ClientInitializeError, RoleClient, RxJsonRpcMessage, ServiceExt, TxJsonRpcMessage,
};
use rmcp::transport::Transport as RmcpTransport;

use super::MCPRunningService;
use crate::error::{ConnectionFailure, ProtocolFailure, RelayError};

fn map_transport_error(
    server: &str,
    failure: ConnectionFailure,
    operation: &'static str,
    error: impl std::fmt::Display,
) -> RelayError {
    RelayError::connection(
        server,
        failure,
        format!("mcp transport {operation} failed: {error}"),
    )
}

/// Object-safe view over an rmcp client transport.
#[async_trait]
pub(super) trait DynRoleClientTransport: Send {
    async fn send(&mut self, message: TxJsonRpcMessage<RoleClient>) -> Result<(), String>;
    async fn receive(&mut self) -> Option<RxJsonRpcMessage<RoleClient>>;
    async fn close(&mut self) -> Result<(), String>;
    /// Consume the transport and run the client handshake over it.
    async fn serve(
        self: Box<Self>,
        client_info: ClientInfo,
    ) -> Result<MCPRunningService, ClientInitializeError>;
}

pub(super) struct ErasedRoleClientTransport<T>
where
    T: RmcpTransport<RoleClient> + Send + 'static,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    inner: T,
    closed: bool,
}

impl<T> ErasedRoleClientTransport<T>
where
    T: RmcpTransport<RoleClient> + Send + 'static,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    pub(super) fn new(inner: T) -> Self {
        Self {
            inner,
            closed: false,
        }
    }
}

#[async_trait]
impl<T> DynRoleClientTransport for ErasedRoleClientTransport<T>
where
    T: RmcpTransport<RoleClient> + Send + 'static,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    async fn send(&mut self, message: TxJsonRpcMessage<RoleClient>) -> Result<(), String> {
        if self.closed {
            return Err("MCP transport closed".into());
        }

        RmcpTransport::send(&mut self.inner, message)
            .await
            .map_err(|error| error.to_string())
    }

    async fn receive(&mut self) -> Option<RxJsonRpcMessage<RoleClient>> {
        if self.closed {
            return None;
        }

        RmcpTransport::receive(&mut self.inner).await
    }

    async fn close(&mut self) -> Result<(), String> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        RmcpTransport::close(&mut self.inner)
            .await
            .map_err(|error| error.to_string())
    }

    async fn serve(
        self: Box<Self>,
        client_info: ClientInfo,
    ) -> Result<MCPRunningService, ClientInitializeError> {
        if self.closed {
            return Err(ClientInitializeError::ConnectionClosed(
                "MCP transport closed".into(),
            ));
        }
        client_info.into_dyn().serve(self.inner).await
    }
}

/// Holds the opened-but-not-yet-served resource of one transport.
///
/// Once [`TransportSlot::serve`] hands the resource to rmcp, the slot is
/// empty; the running service owns the resource from then on.
pub(super) struct TransportSlot {
    server: String,
    failure: ConnectionFailure,
    inner: Option<Box<dyn DynRoleClientTransport>>,
    closed: bool,
}

impl TransportSlot {
    pub(super) fn new(server: impl Into<String>, failure: ConnectionFailure) -> Self {
        Self {
            server: server.into(),
            failure,
            inner: None,
            closed: false,
        }
    }

    pub(super) fn server(&self) -> &str {
        &self.server
    }

    pub(super) fn is_filled(&self) -> bool {
        self.inner.is_some()
    }

    pub(super) fn ensure_usable(&self) -> Result<(), RelayError> {
        if self.closed {
            return Err(RelayError::connection(
                &self.server,
                self.failure,
                "MCP transport closed",
            ));
        }
        Ok(())
    }

    pub(super) fn put(&mut self, inner: Box<dyn DynRoleClientTransport>) {
        self.inner = Some(inner);
    }

    pub(super) fn take(&mut self) -> Option<Box<dyn DynRoleClientTransport>> {
        self.inner.take()
    }

    pub(super) async fn serve(
        &mut self,
        inner: Box<dyn DynRoleClientTransport>,
        client_info: ClientInfo,
    ) -> Result<MCPRunningService, RelayError> {
        inner
            .serve(client_info)
            .await
            .map_err(|error| map_initialize_error(&self.server, self.failure, error))
    }

    pub(super) async fn send(&mut self, message: serde_json::Value) -> Result<(), RelayError> {
        self.ensure_usable()?;
        let message: ClientJsonRpcMessage = serde_json::from_value(message)?;
        let (server, failure) = (self.server.clone(), self.failure);
        self.inner_mut()?
            .send(message)
            .await
            .map_err(|error| map_transport_error(&server, failure, "send", error))
    }

    pub(super) async fn receive(&mut self) -> Result<serde_json::Value, RelayError> {
        self.ensure_usable()?;
        let (server, failure) = (self.server.clone(), self.failure);
        let message: ServerJsonRpcMessage = self.inner_mut()?.receive().await.ok_or_else(|| {
            RelayError::connection(&server, failure, "MCP transport closed by peer")
        })?;
        Ok(serde_json::to_value(message)?)
    }

    pub(super) async fn close(&mut self) -> Result<(), RelayError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(mut inner) = self.inner.take() {
            inner
                .close()
                .await
                .map_err(|error| map_transport_error(&self.server, self.failure, "close", error))?;
        }
        Ok(())
    }

    fn inner_mut(&mut self) -> Result<&mut dyn DynRoleClientTransport, RelayError> {
        match self.inner.as_mut() {
            Some(inner) => Ok(inner.as_mut()),
            None => Err(RelayError::InvalidState(format!(
                "MCP transport for '{}' is not open",
                self.server
            ))),
        }
    }
}

fn is_protocol_version_rejection(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("protocol") && message.contains("version")
}

/// Classify a failed initialize exchange.
///
/// Transport-level failures keep the transport's own connection failure kind;
/// anything the server said back is a protocol failure.
pub(super) fn map_initialize_error(
    server: &str,
    failure: ConnectionFailure,
    error: ClientInitializeError,
) -> RelayError {
    match error {
        ClientInitializeError::ConnectionClosed(context) => RelayError::connection(
            server,
            failure,
            format!("connection closed during initialize: {context}"),
        ),
        ClientInitializeError::TransportError { error, context } => RelayError::connection(
            server,
            failure,
            format!("initialize transport error ({context}): {error}"),
        ),
        ClientInitializeError::JsonRpcError(error) => {
            let kind = if is_protocol_version_rejection(&error.message) {
                ProtocolFailure::UnsupportedVersion
            } else {
                ProtocolFailure::HandshakeFailed
            };
            RelayError::protocol(
                server,
                kind,
                format!(
                    "initialize JSON-RPC error {}: {}",
                    error.code.0, error.message
                ),
            )
        }
        ClientInitializeError::Cancelled => RelayError::protocol(
            server,
            ProtocolFailure::HandshakeFailed,
            "initialize cancelled",
        ),
        other => RelayError::protocol(
            server,
            ProtocolFailure::HandshakeFailed,
            format!("initialize error: {other}"),
        ),
    }
}
