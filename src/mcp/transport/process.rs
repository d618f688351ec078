use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rmcp::model::ClientInfo;
use rmcp::transport::TokioChildProcess;
use tokio::process::Command;

use super::common::{DynRoleClientTransport, ErasedRoleClientTransport, TransportSlot};
use super::{MCPRunningService, MCPTransport};
use crate::config::TransportKind;
use crate::error::{ConnectionFailure, RelayError};

/// Process-backed MCP transport (local servers over stdin/stdout).
pub struct ProcessTransport {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    slot: TransportSlot,
}

impl ProcessTransport {
    /// Create a process transport from command and args.
    pub fn new(server: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: Vec::new(),
            cwd: None,
            slot: TransportSlot::new(server, ConnectionFailure::SpawnFailed),
        }
    }

    /// Set an environment variable for the child, on top of the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the child's working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn spawn(&self) -> Result<Box<dyn DynRoleClientTransport>, RelayError> {
        let mut command = Command::new(&self.command);
        command.args(&self.args);
        command.envs(self.env.iter().map(|(key, value)| (key, value)));
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let transport = TokioChildProcess::new(command).map_err(|error| {
            RelayError::connection(
                self.slot.server(),
                ConnectionFailure::SpawnFailed,
                format!("failed to spawn '{}': {error}", self.command),
            )
        })?;
        tracing::debug!(server = self.slot.server(), command = %self.command, "spawned MCP server process");
        Ok(Box::new(ErasedRoleClientTransport::new(transport)))
    }
}

#[async_trait]
impl MCPTransport for ProcessTransport {
    fn server(&self) -> &str {
        self.slot.server()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Process
    }

    async fn open(&mut self) -> Result<(), RelayError> {
        self.slot.ensure_usable()?;
        if !self.slot.is_filled() {
            let inner = self.spawn()?;
            self.slot.put(inner);
        }
        Ok(())
    }

    async fn connect(&mut self, client_info: ClientInfo) -> Result<MCPRunningService, RelayError> {
        self.slot.ensure_usable()?;
        let inner = match self.slot.take() {
            Some(inner) => inner,
            None => self.spawn()?,
        };
        self.slot.serve(inner, client_info).await
    }

    async fn send(&mut self, message: serde_json::Value) -> Result<(), RelayError> {
        MCPTransport::open(self).await?;
        self.slot.send(message).await
    }

    async fn receive(&mut self) -> Result<serde_json::Value, RelayError> {
        MCPTransport::open(self).await?;
        self.slot.receive().await
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.slot.close().await
    }
}
