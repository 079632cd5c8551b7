//! Core engine for the xzmcp MCP aggregating proxy.
//!
//! Wires together the downstream Service Manager, the Custom-Tool Handler,
//! the upstream Endpoint Manager, and the shared Event Bus / Status Service
//! into the object graph a binary entry point actually runs.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod custom_tool;
pub mod downstream;
pub mod error;
pub mod event_bus;
pub mod message_handler;
pub mod protocol;
pub mod recovery;
pub mod service_manager;
pub mod status;
pub mod tool_sync;
pub mod transport;
pub mod upstream;

#[cfg(test)]
mod tests;

pub use config::RuntimeConfig;
pub use error::{XzError, XzResult};

/// Default per-request transport timeout when a service config omits one.
pub const DEFAULT_TRANSPORT_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(30_000);

/// JSON-RPC frames above this size are rejected before parsing, guarding
/// against a misbehaving downstream or upstream flooding memory.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 10 * 1024 * 1024;

use crate::custom_tool::CustomToolHandlerManager;
use crate::event_bus::EventBus;
use crate::message_handler::MessageHandler;
use crate::service_manager::ServiceManager;
use crate::status::StatusService;
use crate::tool_sync::ToolSyncManager;
use crate::upstream::EndpointManager;
use std::sync::Arc;

/// The fully wired runtime: every long-lived component an `xzmcp-server`
/// process needs, built from one `RuntimeConfig`. Construction never fails;
/// individual downstream connections and endpoints are best-effort and log
/// rather than abort startup.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub events: Arc<EventBus>,
    pub service_manager: Arc<ServiceManager>,
    pub tool_sync: Arc<ToolSyncManager>,
    pub message_handler: Arc<MessageHandler>,
    pub endpoint_manager: Arc<EndpointManager>,
    pub status: Arc<StatusService>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let events = EventBus::global();
        let platform_token = config.platforms.coze.token.clone();
        let custom_tools = Arc::new(CustomToolHandlerManager::new(platform_token));
        let cache = cache::ToolCache::new(RuntimeConfig::cache_path());
        let service_manager = ServiceManager::new(custom_tools.clone(), cache, Arc::clone(&events));
        let tool_sync = Arc::new(ToolSyncManager::new(custom_tools));
        let message_handler = Arc::new(MessageHandler::new(Arc::clone(&service_manager)));
        let endpoint_manager = EndpointManager::new(Arc::clone(&message_handler), Arc::clone(&events));
        let status = StatusService::new(Arc::clone(&events), config.mcp_endpoint.as_vec());
        Self { config, events, service_manager, tool_sync, message_handler, endpoint_manager, status }
    }

    /// Brings every downstream service up, reconciles tool-sync for each,
    /// then dials out to every configured upstream endpoint.
    pub async fn start(self: &Arc<Self>) {
        self.service_manager.start_all_services(&self.config).await;
        self.custom_mcp_from_config().await;
        self.reconcile_tool_sync().await;
        self.endpoint_manager.set_service_manager(Arc::clone(&self.service_manager)).await;
        self.endpoint_manager.initialize(&self.config).await;
        self.endpoint_manager.connect().await;
    }

    /// Runs once per started service rather than over a live `mcp:server:added`
    /// subscription: the Event Bus dispatches synchronously on the emitter's
    /// path, and `start_all_services` already has every service handle
    /// in scope, so a direct call avoids spawning detached reconciliation
    /// tasks off a sync handler for no benefit.
    async fn reconcile_tool_sync(&self) {
        for name in self.service_manager.service_names().await {
            if let Some(service) = self.service_manager.service(&name).await {
                self.tool_sync.reconcile_service(&self.config, &name, &service).await;
            }
        }
    }

    async fn custom_mcp_from_config(&self) {
        self.service_manager.custom_tools().initialize(self.config.custom_mcp.tools.clone()).await;
    }

    pub async fn shutdown(&self) {
        self.endpoint_manager.cleanup().await;
        for name in self.service_manager.service_names().await {
            self.service_manager.remove_service(&name).await;
        }
    }
}
