//! MCP Service: one downstream MCP client. Owns a transport, runs the
//! connect/ping/reconnect state machine, and caches the last `tools/list`
//! result for `callTool` resolution.

use crate::config::ServiceConfig;
use crate::error::{XzError, XzResult};
use crate::protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::protocol::{Tool, ToolsCallResult, ToolsListResult};
use crate::recovery::{PingTracker, ReconnectManager, ReconnectState};
use crate::transport::{build_transport, Transport};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl From<&ReconnectState> for ConnectionState {
    fn from(state: &ReconnectState) -> Self {
        match state {
            ReconnectState::Connected => ConnectionState::Connected,
            ReconnectState::Reconnecting { .. } => ConnectionState::Reconnecting,
            ReconnectState::Disconnected => ConnectionState::Disconnected,
            ReconnectState::Failed { .. } => ConnectionState::Failed,
        }
    }
}

struct RequestIdAllocator(AtomicU64);

impl RequestIdAllocator {
    fn next(&self) -> Value {
        Value::from(self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// One downstream connection. `name` is the service key used everywhere else
/// (cache, `xzcli` prefix, tool-sync reconciliation).
pub struct McpService {
    pub name: String,
    config: ServiceConfig,
    transport: Mutex<Box<dyn Transport>>,
    reconnect: Arc<ReconnectManager>,
    ping: Arc<PingTracker>,
    tools: RwLock<Vec<Tool>>,
    ids: RequestIdAllocator,
    ping_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Set for the duration of a `connect()`/reconnect dial so `state()` can
    /// report the transient `Connecting` state the design's diagram names;
    /// `ReconnectState` itself only distinguishes connected/reconnecting/failed.
    connecting: AtomicBool,
}

/// Clears the `connecting` flag on every exit path of `connect()`
/// (success, transport error, or tools/list failure), not just the happy one.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl McpService {
    pub fn new(name: impl Into<String>, config: ServiceConfig, modelscope_token: Option<String>) -> XzResult<Self> {
        let timeout = config.timeout();
        let transport = build_transport(&config, timeout, modelscope_token)?;
        let reconnect = Arc::new(ReconnectManager::new(config.reconnect().clone()));
        let ping = Arc::new(PingTracker::new(config.ping().clone()));
        Ok(Self {
            name: name.into(),
            config,
            transport: Mutex::new(transport),
            reconnect,
            ping,
            tools: RwLock::new(Vec::new()),
            ids: RequestIdAllocator(AtomicU64::new(1)),
            ping_task: Mutex::new(None),
            connecting: AtomicBool::new(false),
        })
    }

    /// Test-only seam: lets integration tests swap in a mock `Transport`
    /// instead of going through `build_transport`.
    #[cfg(test)]
    pub(crate) fn with_transport(name: impl Into<String>, config: ServiceConfig, transport: Box<dyn Transport>) -> Self {
        let reconnect = Arc::new(ReconnectManager::new(config.reconnect().clone()));
        let ping = Arc::new(PingTracker::new(config.ping().clone()));
        Self {
            name: name.into(),
            config,
            transport: Mutex::new(transport),
            reconnect,
            ping,
            tools: RwLock::new(Vec::new()),
            ids: RequestIdAllocator(AtomicU64::new(1)),
            ping_task: Mutex::new(None),
            connecting: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub(crate) async fn reconnect_attempts(&self) -> u32 {
        self.reconnect.attempts().await
    }

    #[cfg(test)]
    pub(crate) fn ping_failure_count(&self) -> u32 {
        self.ping.failure_count()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn state(&self) -> ConnectionState {
        if self.connecting.load(Ordering::SeqCst) {
            return ConnectionState::Connecting;
        }
        ConnectionState::from(&self.reconnect.state().await)
    }

    pub async fn connect(self: &Arc<Self>) -> XzResult<()> {
        self.connecting.store(true, Ordering::SeqCst);
        let _connecting_guard = ConnectingGuard(&self.connecting);
        {
            let mut transport = self.transport.lock().await;
            transport.connect().await?;
        }
        self.reconnect.mark_connected().await;
        self.refresh_tools().await?;
        self.ping.reset();
        self.schedule_ping().await;
        Ok(())
    }

    pub async fn disconnect(&self) -> XzResult<()> {
        self.reconnect.mark_manual_disconnect().await;
        if let Some(task) = self.ping_task.lock().await.take() {
            task.abort();
        }
        let mut transport = self.transport.lock().await;
        transport.close().await
    }

    /// On entry to `connected`: run `tools/list`, store descriptors.
    async fn refresh_tools(&self) -> XzResult<()> {
        let result = self.request_tools_list().await?;
        let mut tools = self.tools.write().await;
        *tools = result.tools;
        Ok(())
    }

    async fn request_tools_list(&self) -> XzResult<ToolsListResult> {
        let request = JsonRpcRequest::new("tools/list", None, Some(self.ids.next()));
        let response = self.roundtrip(request).await?;
        if let Some(error) = response.error {
            return Err(XzError::transport(error.message));
        }
        let result = response.result.ok_or_else(|| XzError::transport("tools/list: empty result"))?;
        Ok(serde_json::from_value(result)?)
    }

    async fn roundtrip(&self, request: JsonRpcRequest) -> XzResult<JsonRpcResponse> {
        let mut transport = self.transport.lock().await;
        transport.send(request).await?;
        transport.receive().await
    }

    pub async fn tools(&self) -> Vec<Tool> {
        self.tools.read().await.clone()
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        self.tools.read().await.iter().any(|t| t.name == name)
    }

    /// Fails `NotConnected` outside `connected`, `NotFound`
    /// if the name isn't in the cached catalog, otherwise forwards.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> XzResult<ToolsCallResult> {
        if self.state().await != ConnectionState::Connected {
            return Err(XzError::NotConnected { service: self.name.clone() });
        }
        if !self.has_tool(name).await {
            return Err(XzError::not_found(format!("tool '{name}' on service '{}'", self.name)));
        }
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let request = JsonRpcRequest::new("tools/call", Some(params), Some(self.ids.next()));
        let response = self.roundtrip(request).await?;
        if let Some(error) = response.error {
            return Err(XzError::DownstreamTool { message: error.message });
        }
        let result = response.result.ok_or_else(|| XzError::transport("tools/call: empty result"))?;
        Ok(serde_json::from_value(result)?)
    }

    /// One liveness-probe cycle: races `tools/list` against `ping.timeout()`.
    /// Returns `true` once consecutive failures have reached `maxFailures`,
    /// at which point the caller should enter the reconnect loop.
    pub(crate) async fn probe_once(self: &Arc<Self>) -> bool {
        let outcome = tokio::time::timeout(self.ping.timeout(), self.request_tools_list()).await;
        match outcome {
            Ok(Ok(_)) => {
                self.ping.record_success().await;
                false
            }
            _ => self.ping.record_failure(),
        }
    }

    /// Periodic `tools/list` liveness probe. Spawned once per
    /// successful connect; aborted on disconnect.
    async fn schedule_ping(self: &Arc<Self>) {
        if !self.ping.enabled() {
            return;
        }
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(service.ping.start_delay()).await;
            loop {
                tokio::time::sleep(service.ping.interval()).await;
                if service.state().await != ConnectionState::Connected {
                    return;
                }
                if service.probe_once().await {
                    tracing::warn!(service = %service.name, "ping failures reached threshold, reconnecting");
                    service.enter_reconnect_loop().await;
                    return;
                }
            }
        });
        *self.ping_task.lock().await = Some(handle);
    }

    pub(crate) async fn enter_reconnect_loop(self: &Arc<Self>) {
        loop {
            let Some(delay) = self.reconnect.on_failure().await else { return };
            tokio::time::sleep(delay).await;
            let mut transport = self.transport.lock().await;
            match transport.connect().await {
                Ok(()) => {
                    drop(transport);
                    self.reconnect.mark_connected().await;
                    if self.refresh_tools().await.is_ok() {
                        self.ping.reset();
                        self.schedule_ping().await;
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!(service = %self.name, error = %e, "reconnect attempt failed");
                }
            }
        }
    }
}
