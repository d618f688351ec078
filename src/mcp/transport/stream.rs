use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use rmcp::model::ClientInfo;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;

use super::common::{DynRoleClientTransport, ErasedRoleClientTransport, TransportSlot};
use super::{MCPRunningService, MCPTransport};
use crate::config::TransportKind;
use crate::error::{ConnectionFailure, RelayError};

/// Network-stream MCP transport (remote servers over streamable HTTP).
///
/// Responses and server-pushed messages arrive on a long-lived stream;
/// rmcp correlates them to requests by JSON-RPC id.
pub struct StreamTransport {
    url: String,
    headers: Vec<(String, String)>,
    bearer_token: Option<String>,
    slot: TransportSlot,
}

impl StreamTransport {
    pub fn new(server: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            bearer_token: None,
            slot: TransportSlot::new(server, ConnectionFailure::NetworkFailed),
        }
    }

    /// Send a static header with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Forward a bearer credential as `Authorization: Bearer <token>`.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn custom_headers(&self) -> Result<HashMap<HeaderName, HeaderValue>, RelayError> {
        let server = self.slot.server();
        let mut headers = HashMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|error| {
                RelayError::Configuration(format!(
                    "server '{server}' has an invalid header name '{name}': {error}"
                ))
            })?;
            let mut value = HeaderValue::from_str(value).map_err(|error| {
                RelayError::Configuration(format!(
                    "server '{server}' has an invalid value for header '{name}': {error}"
                ))
            })?;
            if name == AUTHORIZATION {
                value.set_sensitive(true);
            }
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn transport_config(&self) -> Result<StreamableHttpClientTransportConfig, RelayError> {
        let server = self.slot.server();
        reqwest::Url::parse(&self.url).map_err(|error| {
            RelayError::Configuration(format!(
                "server '{server}' has an invalid url '{}': {error}",
                self.url
            ))
        })?;
        if let Some(token) = &self.bearer_token {
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                RelayError::Configuration(format!(
                    "server '{server}' has a bearer token that is not a valid header value"
                ))
            })?;
        }

        let mut config = StreamableHttpClientTransportConfig::with_uri(self.url.clone())
            .custom_headers(self.custom_headers()?);
        if let Some(token) = &self.bearer_token {
            config = config.auth_header(token.clone());
        }
        Ok(config)
    }

    fn build(&self) -> Result<Box<dyn DynRoleClientTransport>, RelayError> {
        let transport = StreamableHttpClientTransport::from_config(self.transport_config()?);
        Ok(Box::new(ErasedRoleClientTransport::new(transport)))
    }
}

#[async_trait]
impl MCPTransport for StreamTransport {
    fn server(&self) -> &str {
        self.slot.server()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    async fn open(&mut self) -> Result<(), RelayError> {
        self.slot.ensure_usable()?;
        if !self.slot.is_filled() {
            let inner = self.build()?;
            self.slot.put(inner);
        }
        Ok(())
    }

    async fn connect(&mut self, client_info: ClientInfo) -> Result<MCPRunningService, RelayError> {
        self.slot.ensure_usable()?;
        let inner = match self.slot.take() {
            Some(inner) => inner,
            None => self.build()?,
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
