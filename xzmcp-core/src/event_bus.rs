//! Event Bus: a process-wide typed pub/sub. One `tokio::sync::broadcast`
//! channel per well-known topic, dispatched synchronously and inline on the
//! emitter's own task. Handler exceptions are caught and logged, never
//! allowed to abort the emit.

use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::OnceLock;
use tokio::sync::broadcast;

pub const TOPIC_CONFIG_UPDATED: &str = "config:updated";
pub const TOPIC_CONFIG_ERROR: &str = "config:error";
pub const TOPIC_MCP_SERVER_ADDED: &str = "mcp:server:added";
pub const TOPIC_MCP_SERVER_REMOVED: &str = "mcp:server:removed";
pub const TOPIC_SERVICE_RESTART_STARTED: &str = "service:restart:started";
pub const TOPIC_SERVICE_RESTART_COMPLETED: &str = "service:restart:completed";
pub const TOPIC_SERVICE_RESTART_FAILED: &str = "service:restart:failed";
pub const TOPIC_TOOL_SYNC_REQUEST_SERVICE_TOOLS: &str = "tool-sync:request-service-tools";
pub const TOPIC_TOOL_SYNC_SERVER_TOOLS_UPDATED: &str = "tool-sync:server-tools-updated";
pub const TOPIC_TOOL_SYNC_GENERAL_CONFIG_UPDATED: &str = "tool-sync:general-config-updated";
pub const TOPIC_TOOL_SYNC_SERVICE_TOOLS_REMOVED: &str = "tool-sync:service-tools-removed";
pub const TOPIC_NPM_INSTALL_STARTED: &str = "npm:install:started";
pub const TOPIC_NPM_INSTALL_LOG: &str = "npm:install:log";
pub const TOPIC_NPM_INSTALL_COMPLETED: &str = "npm:install:completed";
pub const TOPIC_NPM_INSTALL_FAILED: &str = "npm:install:failed";
pub const TOPIC_STATUS_UPDATED: &str = "status:updated";
pub const TOPIC_STATUS_ERROR: &str = "status:error";

const ALL_TOPICS: &[&str] = &[
    TOPIC_CONFIG_UPDATED,
    TOPIC_CONFIG_ERROR,
    TOPIC_MCP_SERVER_ADDED,
    TOPIC_MCP_SERVER_REMOVED,
    TOPIC_SERVICE_RESTART_STARTED,
    TOPIC_SERVICE_RESTART_COMPLETED,
    TOPIC_SERVICE_RESTART_FAILED,
    TOPIC_TOOL_SYNC_REQUEST_SERVICE_TOOLS,
    TOPIC_TOOL_SYNC_SERVER_TOOLS_UPDATED,
    TOPIC_TOOL_SYNC_GENERAL_CONFIG_UPDATED,
    TOPIC_TOOL_SYNC_SERVICE_TOOLS_REMOVED,
    TOPIC_NPM_INSTALL_STARTED,
    TOPIC_NPM_INSTALL_LOG,
    TOPIC_NPM_INSTALL_COMPLETED,
    TOPIC_NPM_INSTALL_FAILED,
    TOPIC_STATUS_UPDATED,
    TOPIC_STATUS_ERROR,
];

#[derive(Debug, Clone)]
pub struct Event {
    pub topic: &'static str,
    pub payload: Value,
}

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

pub struct EventBus {
    channels: std::collections::HashMap<&'static str, broadcast::Sender<Event>>,
    handlers: std::sync::Mutex<std::collections::HashMap<&'static str, Vec<Handler>>>,
}

static GLOBAL: OnceLock<std::sync::Arc<EventBus>> = OnceLock::new();

impl EventBus {
    pub fn new() -> Self {
        let mut channels = std::collections::HashMap::new();
        for topic in ALL_TOPICS {
            let (tx, _rx) = broadcast::channel(256);
            channels.insert(*topic, tx);
        }
        Self { channels, handlers: std::sync::Mutex::new(std::collections::HashMap::new()) }
    }

    pub fn global() -> std::sync::Arc<EventBus> {
        GLOBAL.get_or_init(|| std::sync::Arc::new(EventBus::new())).clone()
    }

    pub fn subscribe(&self, topic: &'static str) -> Option<broadcast::Receiver<Event>> {
        self.channels.get(topic).map(|tx| tx.subscribe())
    }

    /// Registers a synchronous callback invoked inline during `emit`.
    pub fn on(&self, topic: &'static str, handler: impl Fn(&Event) + Send + Sync + 'static) {
        self.handlers.lock().unwrap().entry(topic).or_default().push(Box::new(handler));
    }

    /// Handlers run synchronously on the emitter's path; a panicking handler
    /// is isolated with `catch_unwind` and logged, never aborts the emit.
    pub async fn emit(&self, topic: &'static str, payload: Value) {
        let event = Event { topic, payload };
        if let Some(handlers) = self.handlers.lock().unwrap().get(topic) {
            for handler in handlers {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
                if result.is_err() {
                    tracing::error!(topic, "event handler panicked");
                }
            }
        }
        if let Some(tx) = self.channels.get(topic) {
            let _ = tx.send(event);
        }
    }

    pub async fn emit_server_added(&self, service_name: &str) {
        self.emit(TOPIC_MCP_SERVER_ADDED, serde_json::json!({ "serviceName": service_name })).await;
    }

    pub async fn emit_server_removed(&self, service_name: &str) {
        self.emit(TOPIC_MCP_SERVER_REMOVED, serde_json::json!({ "serviceName": service_name })).await;
    }

    pub async fn emit_config_updated(&self, kind: &str) {
        self.emit(TOPIC_CONFIG_UPDATED, serde_json::json!({ "type": kind })).await;
    }

    pub async fn emit_status_updated(&self, payload: Value) {
        self.emit(TOPIC_STATUS_UPDATED, payload).await;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
