//! Service Manager: owns every downstream `McpService` plus the
//! Custom-Tool Handler, and is the single place that resolves a public tool
//! name to an invocation.

use crate::aggregate;
use crate::cache::ToolCache;
use crate::config::RuntimeConfig;
use crate::custom_tool::{CustomToolHandlerManager, DownstreamDispatch, ToolStats};
use crate::downstream::{ConnectionState, McpService};
use crate::error::{XzError, XzResult};
use crate::event_bus::EventBus;
use crate::protocol::{Tool, ToolsCallResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct ServiceManager {
    services: RwLock<HashMap<String, Arc<McpService>>>,
    custom_tools: Arc<CustomToolHandlerManager>,
    cache: ToolCache,
    events: Arc<EventBus>,
    /// Usage stats for resolved downstream calls, keyed by the public
    /// `xzcli`-encoded name — custom tools keep their own copy in
    /// `CustomToolHandlerManager`.
    downstream_stats: dashmap::DashMap<String, ToolStats>,
}

impl ServiceManager {
    pub fn new(custom_tools: Arc<CustomToolHandlerManager>, cache: ToolCache, events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            services: RwLock::new(HashMap::new()),
            custom_tools,
            cache,
            events,
            downstream_stats: dashmap::DashMap::new(),
        })
    }

    /// Stats recorded for a resolved downstream tool call, keyed by its
    /// public `xzcli`-encoded name. `None` if the tool was never called.
    pub fn downstream_stats_for(&self, public_name: &str) -> Option<ToolStats> {
        self.downstream_stats.get(public_name).map(|entry| entry.clone())
    }

    fn record_downstream_usage(&self, public_name: &str) {
        let mut entry = self.downstream_stats.entry(public_name.to_string()).or_default();
        entry.usage_count += 1;
        entry.last_used_time = Some(Utc::now());
    }

    pub fn custom_tools(&self) -> &Arc<CustomToolHandlerManager> {
        &self.custom_tools
    }

    /// Builds each configured service and connects in
    /// parallel; failures don't abort the others.
    pub async fn start_all_services(self: &Arc<Self>, config: &RuntimeConfig) {
        let token = config.modelscope.api_key.clone();
        let mut handles = Vec::new();
        for (name, service_config) in &config.mcp_servers {
            let service = match McpService::new(name.clone(), service_config.clone(), token.clone()) {
                Ok(service) => Arc::new(service),
                Err(e) => {
                    tracing::warn!(service = %name, error = %e, "failed to construct transport");
                    continue;
                }
            };
            self.services.write().await.insert(name.clone(), Arc::clone(&service));
            let this = Arc::clone(self);
            let name = name.clone();
            let config_snapshot = serde_json::to_value(service_config).unwrap_or(serde_json::json!({}));
            handles.push(tokio::spawn(async move {
                match service.connect().await {
                    Ok(()) => {
                        let tools = service.tools().await;
                        this.cache.record_service(&name, tools, config_snapshot).await;
                        this.events.emit_server_added(&name).await;
                    }
                    Err(e) => tracing::warn!(service = %name, error = %e, "initial connect failed"),
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub async fn add_service(self: &Arc<Self>, name: String, service: Arc<McpService>) {
        self.services.write().await.insert(name.clone(), service.clone());
        if service.connect().await.is_ok() {
            self.events.emit_server_added(&name).await;
        }
    }

    pub async fn remove_service(self: &Arc<Self>, name: &str) {
        if let Some(service) = self.services.write().await.remove(name) {
            let _ = service.disconnect().await;
        }
        self.custom_tools.remove_tools_for_service(name).await;
        self.events.emit_server_removed(name).await;
    }

    /// Downstream tools under their `xzcli` prefix,
    /// filtered by enable flags, plus every custom tool; custom names shadow
    /// prefixed collisions.
    pub async fn get_all_tools(&self, config: &RuntimeConfig) -> Vec<Tool> {
        let mut by_name: HashMap<String, Tool> = HashMap::new();
        let services = self.services.read().await;
        for (service_name, service) in services.iter() {
            for tool in service.tools().await {
                if !config.is_tool_enabled(service_name, &tool.name) {
                    continue;
                }
                let public_name = aggregate::encode(service_name, &tool.name);
                by_name.insert(
                    public_name.clone(),
                    Tool {
                        name: public_name,
                        description: tool.description.clone(),
                        input_schema: tool.input_schema.clone(),
                        service_name: Some(service_name.clone()),
                        original_name: Some(tool.name.clone()),
                    },
                );
            }
        }
        for custom in self.custom_tools.get_tools().await {
            by_name.insert(
                custom.name.clone(),
                Tool {
                    name: custom.name,
                    description: custom.description,
                    input_schema: custom.input_schema,
                    service_name: None,
                    original_name: None,
                },
            );
        }
        by_name.into_values().collect()
    }

    pub async fn has_tool(&self, config: &RuntimeConfig, name: &str) -> bool {
        if self.custom_tools.has_tool(name).await {
            return true;
        }
        self.get_all_tools(config).await.iter().any(|t| t.name == name)
    }

    /// Resolution order: (1) custom-tool exact match, then
    /// (2) `xzcli` reverse mapping with the enable-flag check.
    pub async fn call_tool(self: &Arc<Self>, config: &RuntimeConfig, public_name: &str, args: Value) -> XzResult<ToolsCallResult> {
        if self.custom_tools.has_tool(public_name).await {
            return self.custom_tools.call_tool(public_name, args, self.as_ref()).await;
        }
        let (service_name, tool_name) = aggregate::decode(public_name)
            .ok_or_else(|| XzError::not_found(format!("tool '{public_name}'")))?;
        if !config.is_tool_enabled(&service_name, &tool_name) {
            return Err(XzError::not_found(format!("tool '{public_name}'")));
        }
        self.dispatch_downstream(&service_name, &tool_name, args).await
    }

    async fn dispatch_downstream(&self, service_name: &str, tool_name: &str, args: Value) -> XzResult<ToolsCallResult> {
        let service = {
            let services = self.services.read().await;
            services.get(service_name).cloned()
        };
        let service = service.ok_or_else(|| XzError::not_found(format!("service '{service_name}'")))?;
        let result = service.call_tool(tool_name, args).await;
        if result.is_ok() {
            self.record_downstream_usage(&aggregate::encode(service_name, tool_name));
        }
        result
    }

    /// Adapter surface for admin APIs: never let a handler-layer panic
    /// or error surface as a 500.
    pub async fn has_custom_mcp_tool(&self, name: &str) -> bool {
        self.custom_tools.has_tool(name).await
    }

    pub async fn get_custom_mcp_tools(&self) -> Vec<String> {
        self.custom_tools.get_tools().await.into_iter().map(|t| t.name).collect()
    }

    pub async fn connection_states(&self) -> HashMap<String, ConnectionState> {
        let services = self.services.read().await;
        let mut out = HashMap::with_capacity(services.len());
        for (name, service) in services.iter() {
            out.insert(name.clone(), service.state().await);
        }
        out
    }

    pub async fn service_names(&self) -> Vec<String> {
        self.services.read().await.keys().cloned().collect()
    }

    pub async fn service(&self, name: &str) -> Option<Arc<McpService>> {
        self.services.read().await.get(name).cloned()
    }
}

#[async_trait]
impl DownstreamDispatch for ServiceManager {
    async fn call_tool(&self, service_name: &str, tool_name: &str, args: Value) -> XzResult<ToolsCallResult> {
        self.dispatch_downstream(service_name, tool_name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{McpEndpoint, PlatformsConfig, ConnectionConfig, CustomMcpConfig, ModelScopeConfig, WebUiConfig};

    fn empty_config() -> RuntimeConfig {
        RuntimeConfig {
            mcp_endpoint: McpEndpoint::Single("wss://example".into()),
            mcp_servers: HashMap::new(),
            mcp_server_config: HashMap::new(),
            custom_mcp: CustomMcpConfig::default(),
            platforms: PlatformsConfig::default(),
            web_ui: WebUiConfig::default(),
            connection: ConnectionConfig::default(),
            modelscope: ModelScopeConfig::default(),
        }
    }

    #[tokio::test]
    async fn unresolvable_name_is_not_found() {
        let events = Arc::new(EventBus::new());
        let custom_tools = Arc::new(CustomToolHandlerManager::new(String::new()));
        let cache = ToolCache::new(std::env::temp_dir().join("xzmcp-test-cache.json"));
        let manager = ServiceManager::new(custom_tools, cache, events);
        let config = empty_config();
        let err = manager.call_tool(&config, "nope", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, XzError::NotFound { .. }));
    }

    #[tokio::test]
    async fn custom_tool_shadows_downstream_mapping() {
        let events = Arc::new(EventBus::new());
        let custom_tools = Arc::new(CustomToolHandlerManager::new(String::new()));
        custom_tools
            .add_tool(crate::custom_tool::CustomTool {
                name: "calculator_xzcli_add".into(),
                description: None,
                input_schema: serde_json::json!({"type":"object"}),
                handler: crate::custom_tool::CustomToolHandler::Mcp { service_name: "calculator".into(), tool_name: "sub".into() },
            })
            .await
            .unwrap();
        let cache = ToolCache::new(std::env::temp_dir().join("xzmcp-test-cache2.json"));
        let manager = ServiceManager::new(custom_tools, cache, events);
        assert!(manager.has_custom_mcp_tool("calculator_xzcli_add").await);
    }
}
