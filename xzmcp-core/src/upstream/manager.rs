//! Endpoint Manager: owns every `EndpointConnection` keyed by url,
//! supports adding/removing endpoints at runtime, and fans
//! `notifications/tools/list_changed` out to all of them whenever the
//! Service Manager's tool catalog changes.

use crate::config::{McpEndpoint, RuntimeConfig};
use crate::error::{XzError, XzResult};
use crate::event_bus::EventBus;
use crate::message_handler::MessageHandler;
use crate::service_manager::ServiceManager;
use crate::upstream::connection::{EndpointConnection, EndpointState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One row of a `reconnectAll()` report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectOutcome {
    pub endpoint: String,
    pub success: bool,
    pub error: Option<String>,
}

/// `reconnectAll()`'s return shape: `{successCount, failureCount, results}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconnectAllReport {
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<ReconnectOutcome>,
}

pub struct EndpointManager {
    endpoints: RwLock<HashMap<String, Arc<EndpointConnection>>>,
    message_handler: Arc<MessageHandler>,
    service_manager: RwLock<Option<Arc<ServiceManager>>>,
    events: Arc<EventBus>,
    initialized: RwLock<bool>,
}

impl EndpointManager {
    pub fn new(message_handler: Arc<MessageHandler>, events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            endpoints: RwLock::new(HashMap::new()),
            message_handler,
            service_manager: RwLock::new(None),
            events,
            initialized: RwLock::new(false),
        })
    }

    pub async fn set_service_manager(&self, service_manager: Arc<ServiceManager>) {
        *self.service_manager.write().await = Some(service_manager);
    }

    /// Sets up one `EndpointConnection` per url named in `mcpEndpoint` but
    /// does **not** connect them — dialing out is `connect()`'s job.
    /// Idempotent — calling it again just registers whatever urls are missing.
    pub async fn initialize(self: &Arc<Self>, config: &RuntimeConfig) {
        for url in config.mcp_endpoint.as_vec() {
            self.add_endpoint(url).await;
        }
        *self.initialized.write().await = true;
    }

    /// Registers a connection for `url` without dialing it. A caller that
    /// wants it online calls `connect()` (all endpoints) or
    /// `reconnect_endpoint(url)` (just this one) afterwards.
    pub async fn add_endpoint(self: &Arc<Self>, url: String) -> Arc<EndpointConnection> {
        if let Some(existing) = self.endpoints.read().await.get(&url) {
            return Arc::clone(existing);
        }
        let connection = Arc::new(EndpointConnection::new(url.clone(), Arc::clone(&self.message_handler)));
        self.endpoints.write().await.insert(url.clone(), Arc::clone(&connection));
        self.emit_status_changed(&url).await;
        connection
    }

    /// Parallel dial-out of every currently registered endpoint; returns
    /// once each connection attempt has completed. Partial success is
    /// allowed — a failing endpoint is logged and left disconnected rather
    /// than aborting the others.
    pub async fn connect(self: &Arc<Self>) {
        let connections: Vec<Arc<EndpointConnection>> = self.endpoints.read().await.values().cloned().collect();
        let mut handles = Vec::with_capacity(connections.len());
        for connection in connections {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let url = connection.url.clone();
                if let Err(e) = connection.connect().await {
                    tracing::warn!(url = %url, error = %e, "endpoint connect failed");
                }
                this.emit_status_changed(&url).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub async fn remove_endpoint(&self, url: &str) {
        if let Some(connection) = self.endpoints.write().await.remove(url) {
            let _ = connection.disconnect().await;
        }
        self.emit_status_changed(url).await;
    }

    pub async fn clear_endpoints(&self) {
        let urls: Vec<String> = self.endpoints.read().await.keys().cloned().collect();
        for url in urls {
            self.remove_endpoint(&url).await;
        }
    }

    pub async fn disconnect_endpoint(&self, url: &str) -> bool {
        if let Some(connection) = self.endpoints.read().await.get(url) {
            let _ = connection.disconnect().await;
            self.emit_status_changed(url).await;
            return true;
        }
        false
    }

    /// Fails `NotInitialized` if `initialize()` was never called,
    /// `NotFound` if `url` was never added; otherwise propagates the
    /// underlying reconnect outcome.
    pub async fn reconnect_endpoint(self: &Arc<Self>, url: &str) -> XzResult<()> {
        if !*self.initialized.read().await {
            return Err(XzError::NotInitialized { what: "endpoint manager".into() });
        }
        let connection = self.endpoints.read().await.get(url).cloned();
        let connection = connection.ok_or_else(|| XzError::not_found(format!("endpoint '{url}'")))?;
        let result = connection.reconnect().await;
        self.emit_status_changed(url).await;
        result
    }

    /// Parallel forced reconnect of every configured
    /// endpoint; partial success is allowed and reported per-endpoint.
    pub async fn reconnect_all(self: &Arc<Self>) -> ReconnectAllReport {
        let urls: Vec<String> = self.endpoints.read().await.keys().cloned().collect();
        let mut handles = Vec::with_capacity(urls.len());
        for url in urls {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let result = this.reconnect_endpoint(&url).await;
                ReconnectOutcome { endpoint: url, success: result.is_ok(), error: result.err().map(|e| e.to_string()) }
            }));
        }
        let mut report = ReconnectAllReport::default();
        for handle in handles {
            if let Ok(outcome) = handle.await {
                if outcome.success {
                    report.success_count += 1;
                } else {
                    report.failure_count += 1;
                }
                report.results.push(outcome);
            }
        }
        report
    }

    pub async fn disconnect(&self) {
        let connections: Vec<Arc<EndpointConnection>> = self.endpoints.read().await.values().cloned().collect();
        for connection in connections {
            let _ = connection.disconnect().await;
        }
    }

    pub async fn get_endpoints(&self) -> Vec<String> {
        self.endpoints.read().await.keys().cloned().collect()
    }

    /// The endpoint set this manager is currently configured with, as a
    /// `RuntimeConfig`-shaped fragment an admin API could persist back —
    /// `mcpEndpoint` is the only slice `EndpointManager` owns.
    pub async fn get_current_config(&self) -> McpEndpoint {
        let mut urls = self.get_endpoints().await;
        urls.sort();
        McpEndpoint::Many(urls)
    }

    pub async fn get_connection_status(&self) -> HashMap<String, EndpointState> {
        let mut out = HashMap::new();
        for (url, connection) in self.endpoints.read().await.iter() {
            out.insert(url.clone(), connection.state().await);
        }
        out
    }

    pub async fn is_any_connected(&self) -> bool {
        for connection in self.endpoints.read().await.values() {
            if connection.is_connected().await {
                return true;
            }
        }
        false
    }

    pub async fn is_endpoint_connected(&self, url: &str) -> bool {
        match self.endpoints.read().await.get(url) {
            Some(connection) => connection.is_connected().await,
            None => false,
        }
    }

    /// Diffs the current catalog and pushes a synthetic
    /// `notifications/tools/list_changed` to every connected endpoint whose
    /// last-known snapshot differs.
    pub async fn broadcast_tools_changed(&self, config: &RuntimeConfig) {
        let Some(service_manager) = self.service_manager.read().await.clone() else { return };
        let tools = service_manager.get_all_tools(config).await;
        for connection in self.endpoints.read().await.values() {
            if let Err(e) = connection.notify_if_tools_changed(tools.clone()).await {
                tracing::warn!(url = %connection.url, error = %e, "failed to push tools/list_changed");
            }
        }
    }

    pub async fn update_options(self: &Arc<Self>, config: &RuntimeConfig) {
        let desired: std::collections::HashSet<String> = config.mcp_endpoint.as_vec().into_iter().collect();
        let current: std::collections::HashSet<String> = self.get_endpoints().await.into_iter().collect();
        for stale in current.difference(&desired) {
            self.remove_endpoint(stale).await;
        }
        for url in desired.difference(&current) {
            self.add_endpoint(url.clone()).await;
        }
    }

    pub async fn cleanup(&self) {
        self.disconnect().await;
        self.endpoints.write().await.clear();
    }

    /// A dedicated observability event, not one of the Event Bus's
    /// well-known topics — emitted after every connect/disconnect/reconnect
    /// transition.
    async fn emit_status_changed(&self, url: &str) {
        let connected = self.is_endpoint_connected(url).await;
        let initialized = match self.endpoints.read().await.get(url) {
            Some(connection) => connection.is_initialized().await,
            None => false,
        };
        self.events
            .emit("endpointStatusChanged", serde_json::json!({ "endpoint": url, "connected": connected, "initialized": initialized }))
            .await;
    }
}
