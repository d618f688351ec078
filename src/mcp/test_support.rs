//! In-process MCP peers for unit tests.

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use rmcp::{
    model::{ClientInfo, ProtocolVersion, ServerJsonRpcMessage},
    service::{serve_directly, RoleClient, RxJsonRpcMessage, ServiceExt, TxJsonRpcMessage},
    transport::Transport as RmcpTransport,
};
use serde_json::json;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::config::TransportKind;
use crate::error::{ConnectionFailure, RelayError};
use crate::mcp::transport::{MCPRunningService, MCPTransport};

pub(crate) type CallLog = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

/// What a scripted server does when one of its tools is called.
#[derive(Debug, Clone)]
pub(crate) enum CallBehavior {
    Structured(serde_json::Value),
    /// FastMCP-style scalar: text plus `{"result": value}` structured output.
    WrappedScalar(serde_json::Value),
    Text(String),
    ToolError(String),
    RpcError(String),
    Disconnect,
    Hang,
}

/// What a scripted server does on `tools/list`.
#[derive(Debug, Clone)]
pub(crate) enum ListBehavior {
    Tools,
    RpcError(String),
    Disconnect,
}

#[derive(Debug, Clone)]
pub(crate) struct ScriptedServer {
    pub(crate) name: String,
    pub(crate) tools: Vec<(String, String)>,
    pub(crate) list: ListBehavior,
    pub(crate) calls: HashMap<String, CallBehavior>,
    pub(crate) call_log: CallLog,
}

impl ScriptedServer {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tools: Vec::new(),
            list: ListBehavior::Tools,
            calls: HashMap::new(),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn tool(mut self, name: &str, behavior: CallBehavior) -> Self {
        self.tools
            .push((name.to_string(), format!("{name} from {}", self.name)));
        self.calls.insert(name.to_string(), behavior);
        self
    }

    pub(crate) fn list_behavior(mut self, behavior: ListBehavior) -> Self {
        self.list = behavior;
        self
    }

    pub(crate) fn call_log(&self) -> CallLog {
        Arc::clone(&self.call_log)
    }
}

struct ChannelRmcpTransport {
    outbound: UnboundedSender<TxJsonRpcMessage<RoleClient>>,
    inbound: UnboundedReceiver<RxJsonRpcMessage<RoleClient>>,
}

impl RmcpTransport<RoleClient> for ChannelRmcpTransport {
    type Error = io::Error;

    fn send(
        &mut self,
        item: TxJsonRpcMessage<RoleClient>,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send + 'static {
        let tx = self.outbound.clone();
        async move {
            tx.send(item).map_err(|_| {
                io::Error::new(io::ErrorKind::BrokenPipe, "mock rmcp channel closed")
            })
        }
    }

    async fn receive(&mut self) -> Option<RxJsonRpcMessage<RoleClient>> {
        self.inbound.recv().await
    }

    fn close(&mut self) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        self.inbound.close();
        std::future::ready(Ok(()))
    }
}

fn reply(id: serde_json::Value, body: serde_json::Value) -> ServerJsonRpcMessage {
    let mut message = json!({ "jsonrpc": "2.0", "id": id });
    if let (Some(target), Some(fields)) = (message.as_object_mut(), body.as_object()) {
        target.extend(fields.clone());
    }
    serde_json::from_value(message).expect("scripted response should deserialize")
}

/// Run `server` behind an already-initialized rmcp client service.
pub(crate) fn scripted_running_service(server: ScriptedServer) -> MCPRunningService {
    let (outbound_tx, mut outbound_rx) = unbounded_channel::<TxJsonRpcMessage<RoleClient>>();
    let (inbound_tx, inbound_rx) = unbounded_channel::<RxJsonRpcMessage<RoleClient>>();
    let transport = ChannelRmcpTransport {
        outbound: outbound_tx,
        inbound: inbound_rx,
    };

    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let Ok(value) = serde_json::to_value(message) else {
                continue;
            };
            let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
                continue;
            };
            let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);

            let response = match method {
                "tools/list" => match &server.list {
                    ListBehavior::Disconnect => return,
                    ListBehavior::RpcError(message) => reply(
                        id,
                        json!({ "error": { "code": -32603, "message": message } }),
                    ),
                    ListBehavior::Tools => {
                        let tools: Vec<_> = server
                            .tools
                            .iter()
                            .map(|(name, description)| {
                                let mut tool = json!({
                                    "name": name,
                                    "description": description,
                                    "inputSchema": {
                                        "type": "object",
                                        "properties": {
                                            "a": { "type": "number" },
                                            "b": { "type": "number" }
                                        }
                                    }
                                });
                                if let Some(CallBehavior::WrappedScalar(_)) = server.calls.get(name) {
                                    tool["outputSchema"] = json!({
                                        "type": "object",
                                        "properties": { "result": { "type": "number" } },
                                        "required": ["result"],
                                        "x-fastmcp-wrap-result": true
                                    });
                                }
                                tool
                            })
                            .collect();
                        reply(id, json!({ "result": { "tools": tools, "nextCursor": null } }))
                    }
                },
                "tools/call" => {
                    let params = value.get("params").cloned().unwrap_or_default();
                    let name = params
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
                    server
                        .call_log
                        .lock()
                        .expect("call log lock should not be poisoned")
                        .push((name.clone(), arguments));

                    match server.calls.get(&name).cloned() {
                        Some(CallBehavior::Structured(value)) => reply(
                            id,
                            json!({ "result": {
                                "content": [{ "type": "text", "text": value.to_string() }],
                                "structuredContent": value,
                                "isError": false
                            }}),
                        ),
                        Some(CallBehavior::WrappedScalar(value)) => reply(
                            id,
                            json!({ "result": {
                                "content": [{ "type": "text", "text": value.to_string() }],
                                "structuredContent": { "result": value },
                                "isError": false
                            }}),
                        ),
                        Some(CallBehavior::Text(text)) => reply(
                            id,
                            json!({ "result": {
                                "content": [{ "type": "text", "text": text }],
                                "isError": false
                            }}),
                        ),
                        Some(CallBehavior::ToolError(text)) => reply(
                            id,
                            json!({ "result": {
                                "content": [{ "type": "text", "text": text }],
                                "isError": true
                            }}),
                        ),
                        Some(CallBehavior::RpcError(message)) => reply(
                            id,
                            json!({ "error": { "code": -32602, "message": message } }),
                        ),
                        None => reply(
                            id,
                            json!({ "error": { "code": -32602, "message": format!("unknown tool {name}") } }),
                        ),
                        Some(CallBehavior::Disconnect) => return,
                        Some(CallBehavior::Hang) => continue,
                    }
                }
                _ => continue,
            };

            if inbound_tx.send(response).is_err() {
                return;
            }
        }
    });

    serve_directly(().into_dyn(), transport, None)
}

/// Planned outcome of one `connect` attempt.
pub(crate) enum ConnectPlan {
    Serve(ScriptedServer),
    Fail(RelayError),
    /// Never answers the handshake.
    Hang,
}

/// Transport double that hands out scripted running services.
pub(crate) struct MockTransport {
    server: String,
    kind: TransportKind,
    plans: VecDeque<ConnectPlan>,
    attempted_protocols: Arc<Mutex<Vec<ProtocolVersion>>>,
    close_calls: Arc<AtomicUsize>,
    close_error: Option<String>,
}

impl MockTransport {
    pub(crate) fn new(server: &str, plans: Vec<ConnectPlan>) -> Self {
        Self {
            server: server.to_string(),
            kind: TransportKind::Process,
            plans: plans.into(),
            attempted_protocols: Arc::new(Mutex::new(Vec::new())),
            close_calls: Arc::new(AtomicUsize::new(0)),
            close_error: None,
        }
    }

    pub(crate) fn serving(server: ScriptedServer) -> Self {
        let name = server.name.clone();
        Self::new(&name, vec![ConnectPlan::Serve(server)])
    }

    pub(crate) fn failing_close(mut self, message: &str) -> Self {
        self.close_error = Some(message.to_string());
        self
    }

    pub(crate) fn attempted_protocols(&self) -> Arc<Mutex<Vec<ProtocolVersion>>> {
        Arc::clone(&self.attempted_protocols)
    }

    pub(crate) fn close_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_calls)
    }
}

#[async_trait]
impl MCPTransport for MockTransport {
    fn server(&self) -> &str {
        &self.server
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn open(&mut self) -> Result<(), RelayError> {
        Ok(())
    }

    async fn connect(&mut self, client_info: ClientInfo) -> Result<MCPRunningService, RelayError> {
        self.attempted_protocols
            .lock()
            .expect("protocol mutex should lock")
            .push(client_info.protocol_version);

        match self.plans.pop_front() {
            Some(ConnectPlan::Serve(server)) => Ok(scripted_running_service(server)),
            Some(ConnectPlan::Fail(error)) => Err(error),
            Some(ConnectPlan::Hang) => std::future::pending().await,
            None => Err(RelayError::connection(
                &self.server,
                ConnectionFailure::SpawnFailed,
                "missing mock connect plan",
            )),
        }
    }

    async fn send(&mut self, _message: serde_json::Value) -> Result<(), RelayError> {
        Ok(())
    }

    async fn receive(&mut self) -> Result<serde_json::Value, RelayError> {
        Ok(serde_json::Value::Null)
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        match &self.close_error {
            Some(message) => Err(RelayError::InvalidState(message.clone())),
            None => Ok(()),
        }
    }
}
