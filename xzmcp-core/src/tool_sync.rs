//! Tool Sync Manager: reconciles the configured per-service enabled
//! tools with the materialised custom-MCP tool catalog. Triggered directly
//! by whatever changes the service set (startup, `addService`,
//! `removeService`) rather than via an `mcp:server:added`/`removed`
//! subscription — the Event Bus's handlers run synchronously on the
//! emitter's path, and every caller here already holds the service
//! handle it would otherwise have to look back up.

use crate::config::RuntimeConfig;
use crate::custom_tool::{CustomTool, CustomToolHandler, CustomToolHandlerManager};
use crate::downstream::McpService;
use dashmap::DashSet;
use std::sync::Arc;

/// Tool-sync's own naming convention is `${serviceName}__${toolName}`
/// (double underscore), distinct from the upstream-facing `xzcli` prefix.
fn synced_name(service_name: &str, tool_name: &str) -> String {
    format!("{service_name}__{tool_name}")
}

pub struct ToolSyncManager {
    custom_tools: Arc<CustomToolHandlerManager>,
    in_flight: DashSet<String>,
}

impl ToolSyncManager {
    pub fn new(custom_tools: Arc<CustomToolHandlerManager>) -> Self {
        Self { custom_tools, in_flight: DashSet::new() }
    }

    /// For each enabled `(serviceName, toolName)` not already present as
    /// `${serviceName}__${toolName}`, add an `mcp`-handler entry. A per-service
    /// in-flight guard coalesces re-entrant triggers to one reconcile at a
    /// time.
    pub async fn reconcile_service(&self, config: &RuntimeConfig, service_name: &str, service: &McpService) {
        if !self.in_flight.insert(service_name.to_string()) {
            return;
        }
        let live_tools = service.tools().await;
        for tool in live_tools {
            if !config.is_tool_enabled(service_name, &tool.name) {
                continue;
            }
            let name = synced_name(service_name, &tool.name);
            if self.custom_tools.has_tool(&name).await {
                continue;
            }
            let _ = self
                .custom_tools
                .add_tool(CustomTool {
                    name,
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                    handler: CustomToolHandler::Mcp { service_name: service_name.to_string(), tool_name: tool.name.clone() },
                })
                .await;
        }
        self.in_flight.remove(service_name);
    }

    /// On `mcp:server:removed`: drop every custom tool whose name starts
    /// with `${serviceName}__`.
    pub async fn remove_service(&self, service_name: &str) {
        self.custom_tools.remove_tools_for_service(service_name).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, CustomMcpConfig, McpEndpoint, ModelScopeConfig, PlatformsConfig, WebUiConfig};
    use std::collections::HashMap;

    fn config_with_enabled(service: &str, tool: &str, enabled: bool) -> RuntimeConfig {
        let mut per_service = HashMap::new();
        per_service.insert(tool.to_string(), enabled);
        let mut server_config = HashMap::new();
        server_config.insert(service.to_string(), per_service);
        RuntimeConfig {
            mcp_endpoint: McpEndpoint::Single("wss://example".into()),
            mcp_servers: HashMap::new(),
            mcp_server_config: server_config,
            custom_mcp: CustomMcpConfig::default(),
            platforms: PlatformsConfig::default(),
            web_ui: WebUiConfig::default(),
            connection: ConnectionConfig::default(),
            modelscope: ModelScopeConfig::default(),
        }
    }

    #[test]
    fn synced_name_uses_double_underscore() {
        assert_eq!(synced_name("calculator", "add"), "calculator__add");
    }

    #[tokio::test]
    async fn removal_drops_only_synced_prefix() {
        let custom_tools = Arc::new(CustomToolHandlerManager::new(String::new()));
        custom_tools
            .add_tool(CustomTool {
                name: "calculator__add".into(),
                description: None,
                input_schema: serde_json::json!({"type":"object"}),
                handler: CustomToolHandler::Mcp { service_name: "calculator".into(), tool_name: "add".into() },
            })
            .await
            .unwrap();
        let sync = ToolSyncManager::new(custom_tools.clone());
        sync.remove_service("calculator").await;
        assert!(custom_tools.get_tools().await.is_empty());
    }

    #[test]
    fn disabled_tool_config_recognised() {
        let config = config_with_enabled("calculator", "add", false);
        assert!(!config.is_tool_enabled("calculator", "add"));
    }
}
