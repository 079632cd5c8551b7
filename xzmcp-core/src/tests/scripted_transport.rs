//! A scripted `Transport` double used only by the end-to-end scenarios in
//! `tests/mod.rs`: answers `tools/list` from a fixed catalog and `tools/call`
//! through a caller-supplied (non-capturing) handler function, with an
//! optional knob to simulate a downstream that never answers.

use crate::error::{XzError, XzResult};
use crate::protocol::jsonrpc::{error_codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::protocol::{Tool, ToolsCallResult, ToolsListResult};
use crate::transport::{Transport, TransportHealth};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub struct ScriptedTransport {
    tools: Vec<Tool>,
    handler: fn(&str, serde_json::Value) -> Result<String, String>,
    connected: AtomicBool,
    pending: Mutex<Option<JsonRpcRequest>>,
    /// When set, `receive` never resolves — stands in for a downstream that
    /// stopped answering, so a caller racing it against a timeout always loses.
    /// Cleared on the next successful `connect`, matching a fresh transport.
    hang_receive: AtomicBool,
}

impl ScriptedTransport {
    pub fn new(tools: Vec<Tool>, handler: fn(&str, serde_json::Value) -> Result<String, String>) -> Self {
        Self {
            tools,
            handler,
            connected: AtomicBool::new(false),
            pending: Mutex::new(None),
            hang_receive: AtomicBool::new(false),
        }
    }

    pub fn set_hang_receive(&self, hang: bool) {
        self.hang_receive.store(hang, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> XzResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        self.hang_receive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&mut self, request: JsonRpcRequest) -> XzResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(XzError::transport("not connected"));
        }
        *self.pending.lock().unwrap() = Some(request);
        Ok(())
    }

    async fn receive(&mut self) -> XzResult<JsonRpcResponse> {
        if self.hang_receive.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let request = self
            .pending
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| XzError::transport("no pending request"))?;
        let id = request.id.clone();
        match request.method.as_str() {
            "tools/list" => {
                let result = ToolsListResult { tools: self.tools.clone(), next_cursor: None };
                Ok(JsonRpcResponse::success(id, serde_json::to_value(result)?))
            }
            "tools/call" => {
                let params = request.params.unwrap_or_default();
                let name = params.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let args = params.get("arguments").cloned().unwrap_or_default();
                match (self.handler)(&name, args) {
                    Ok(text) => Ok(JsonRpcResponse::success(id, serde_json::to_value(ToolsCallResult::ok(text))?)),
                    Err(message) => Ok(JsonRpcResponse::failure(id, JsonRpcError::new(error_codes::INTERNAL_ERROR, message))),
                }
            }
            other => Ok(JsonRpcResponse::failure(
                id,
                JsonRpcError::new(error_codes::METHOD_NOT_FOUND, format!("scripted transport: unsupported method '{other}'")),
            )),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn health(&self) -> TransportHealth {
        if self.is_connected() {
            TransportHealth::Healthy
        } else {
            TransportHealth::Unhealthy
        }
    }

    async fn close(&mut self) -> XzResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
