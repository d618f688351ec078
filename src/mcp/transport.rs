//! MCP transport layer.
//!
//! A [`MCPTransport`] owns the OS-level resource behind one server
//! connection (a child process or an HTTP stream). [`open`] is the only
//! place that looks at [`TransportKind`]; everything above works against
//! the trait.

use async_trait::async_trait;
use rmcp::model::ClientInfo;
use rmcp::service::{DynService, RoleClient, RunningService};

use crate::config::{ServerConfig, TransportConfig, TransportKind};
use crate::error::RelayError;

pub type DynClientService = Box<dyn DynService<RoleClient>>;
pub type MCPRunningService = RunningService<RoleClient, DynClientService>;

/// Transport trait for MCP communication.
#[async_trait]
pub trait MCPTransport: Send {
    /// Display name of the server this transport reaches.
    fn server(&self) -> &str;

    fn kind(&self) -> TransportKind;

    /// Acquire the underlying resource (spawn the process, build the HTTP stream).
    async fn open(&mut self) -> Result<(), RelayError>;

    /// Hand the opened resource to rmcp and perform the initialize handshake.
    ///
    /// Reopens the resource if a previous attempt consumed it.
    async fn connect(&mut self, client_info: ClientInfo) -> Result<MCPRunningService, RelayError>;

    /// Send a raw JSON-RPC message over a resource not yet handed to a session.
    async fn send(&mut self, message: serde_json::Value) -> Result<(), RelayError>;

    /// Receive a raw JSON-RPC message.
    async fn receive(&mut self) -> Result<serde_json::Value, RelayError>;

    /// Close the transport. Idempotent.
    async fn close(&mut self) -> Result<(), RelayError>;
}

mod common;
mod process;
mod stream;

pub use process::ProcessTransport;
pub use stream::StreamTransport;

/// Build and open the transport for one server configuration.
pub async fn open(config: &ServerConfig) -> Result<Box<dyn MCPTransport>, RelayError> {
    config.validate()?;
    let mut transport: Box<dyn MCPTransport> = match &config.transport {
        TransportConfig::Process {
            command,
            args,
            env,
            cwd,
        } => {
            let mut transport = ProcessTransport::new(&config.name, command, args.clone());
            for (key, value) in env {
                transport = transport.env(key, value);
            }
            if let Some(cwd) = cwd {
                transport = transport.cwd(cwd);
            }
            Box::new(transport)
        }
        TransportConfig::Stream {
            url,
            headers,
            bearer_token,
        } => {
            let mut transport = StreamTransport::new(&config.name, url);
            for (name, value) in headers {
                transport = transport.header(name, value);
            }
            if let Some(token) = bearer_token {
                transport = transport.bearer_token(token);
            }
            Box::new(transport)
        }
    };
    transport.open().await?;
    tracing::debug!(server = %config.name, transport = %config.kind(), "transport opened");
    Ok(transport)
}

#[cfg(test)]
pub(crate) mod test_support;
