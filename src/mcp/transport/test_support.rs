use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use serde_json::json;

use rmcp::model::ClientInfo;
use rmcp::service::{ClientInitializeError, RoleClient, RxJsonRpcMessage, TxJsonRpcMessage};

use super::common::DynRoleClientTransport;
use super::MCPRunningService;
use crate::mcp::test_support::{scripted_running_service, ScriptedServer};

pub(crate) struct MockInnerTransport {
    receive_queue: VecDeque<Option<RxJsonRpcMessage<RoleClient>>>,
    send_calls: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
    serve_calls: Arc<AtomicUsize>,
}

impl MockInnerTransport {
    pub(crate) fn new(
        receive_queue: Vec<Option<RxJsonRpcMessage<RoleClient>>>,
    ) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let send_calls = Arc::new(AtomicUsize::new(0));
        let close_calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                receive_queue: receive_queue.into(),
                send_calls: Arc::clone(&send_calls),
                close_calls: Arc::clone(&close_calls),
                serve_calls: Arc::new(AtomicUsize::new(0)),
            },
            send_calls,
            close_calls,
        )
    }

    pub(crate) fn serve_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.serve_calls)
    }
}

#[async_trait]
impl DynRoleClientTransport for MockInnerTransport {
    async fn send(&mut self, _message: TxJsonRpcMessage<RoleClient>) -> Result<(), String> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn receive(&mut self) -> Option<RxJsonRpcMessage<RoleClient>> {
        self.receive_queue.pop_front().unwrap_or(None)
    }

    async fn close(&mut self) -> Result<(), String> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn serve(
        self: Box<Self>,
        _client_info: ClientInfo,
    ) -> Result<MCPRunningService, ClientInitializeError> {
        self.serve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(scripted_running_service(ScriptedServer::new("mock")))
    }
}

pub(crate) fn test_client_request() -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/list",
        "params": {}
    })
}

pub(crate) fn test_server_response() -> RxJsonRpcMessage<RoleClient> {
    serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "tools": []
        }
    }))
    .expect("test server response should deserialize")
}
