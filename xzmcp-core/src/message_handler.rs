//! Message Handler: a stateless-per-message function of
//! `(sessionState, incoming JSON-RPC)`. One `SessionState` per upstream
//! connection; methods are dispatched against the Service Manager's catalog.

use crate::config::RuntimeConfig;
use crate::protocol::jsonrpc::{error_codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::protocol::{
    ClientInfo, InitializeParams, InitializeResult, PingResult, PromptsListResult, ResourcesListResult,
    ServerCapabilities, ServerInfo, ToolsCallParams, ToolsListParams, ToolsListResult,
};
use crate::service_manager::ServiceManager;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub initialized: bool,
    pub protocol_version: Option<String>,
    pub client_info: Option<ClientInfo>,
}

pub struct MessageHandler {
    session: RwLock<SessionState>,
    service_manager: Arc<ServiceManager>,
}

impl MessageHandler {
    pub fn new(service_manager: Arc<ServiceManager>) -> Self {
        Self { session: RwLock::new(SessionState::default()), service_manager }
    }

    pub async fn session(&self) -> SessionState {
        self.session.read().await.clone()
    }

    /// Dispatches one JSON-RPC request. `id` always round-trips verbatim.
    pub async fn handle(&self, config: &RuntimeConfig, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request).await,
            "tools/list" => self.handle_tools_list(config, id).await,
            "tools/call" => self.handle_tools_call(config, id, request).await,
            "ping" => JsonRpcResponse::success(id, serde_json::to_value(PingResult::now()).unwrap()),
            "resources/list" => JsonRpcResponse::success(id, serde_json::to_value(ResourcesListResult::default()).unwrap()),
            "prompts/list" => JsonRpcResponse::success(id, serde_json::to_value(PromptsListResult::default()).unwrap()),
            _ => JsonRpcResponse::failure(id, JsonRpcError::method_not_found()),
        }
    }

    async fn handle_initialize(&self, id: Option<serde_json::Value>, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: InitializeParams = match request.params.clone().map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => return JsonRpcResponse::failure(id, JsonRpcError::invalid_params("missing params")),
            Err(e) => return JsonRpcResponse::failure(id, JsonRpcError::invalid_params(e)),
        };
        {
            let mut session = self.session.write().await;
            session.initialized = true;
            session.protocol_version = Some(params.protocol_version.clone());
            session.client_info = Some(params.client_info.clone());
        }
        let result = InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo::xiaozhi(),
        };
        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap())
    }

    async fn handle_tools_list(&self, config: &RuntimeConfig, id: Option<serde_json::Value>) -> JsonRpcResponse {
        let _: ToolsListParams = ToolsListParams::default();
        let tools = self.service_manager.get_all_tools(config).await;
        let result = ToolsListResult { tools, next_cursor: None };
        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap())
    }

    async fn handle_tools_call(
        &self,
        config: &RuntimeConfig,
        id: Option<serde_json::Value>,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let params: ToolsCallParams = match request.params.clone().map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => return JsonRpcResponse::failure(id, JsonRpcError::invalid_params("missing params")),
            Err(e) => return JsonRpcResponse::failure(id, JsonRpcError::invalid_params(e)),
        };
        if let Err(e) = self.validate_arguments(config, &params).await {
            return JsonRpcResponse::failure(id, JsonRpcError::invalid_params(e));
        }
        match self.service_manager.call_tool(config, &params.name, params.arguments).await {
            Ok(result) => JsonRpcResponse::success(id, serde_json::to_value(result).unwrap()),
            Err(e) if matches!(e, crate::error::XzError::NotFound { .. }) => {
                JsonRpcResponse::failure(id, JsonRpcError::new(error_codes::METHOD_NOT_FOUND, format!("{e}")))
            }
            Err(e) => {
                let result = crate::protocol::ToolsCallResult::error(format!("{e}"));
                JsonRpcResponse::success(id, serde_json::to_value(result).unwrap())
            }
        }
    }

    /// Validates `arguments` against the resolved tool's `inputSchema`
    /// before dispatch.
    async fn validate_arguments(&self, config: &RuntimeConfig, params: &ToolsCallParams) -> Result<(), String> {
        let tools = self.service_manager.get_all_tools(config).await;
        let Some(tool) = tools.iter().find(|t| t.name == params.name) else {
            return Ok(()); // unknown name: let call_tool surface NotFound uniformly
        };
        let compiled = match jsonschema::validator_for(&tool.input_schema) {
            Ok(compiled) => compiled,
            Err(_) => return Ok(()), // malformed schema on our side shouldn't block the caller
        };
        let errors: Vec<String> = compiled.iter_errors(&params.arguments).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ToolCache;
    use crate::config::{ConnectionConfig, CustomMcpConfig, McpEndpoint, ModelScopeConfig, PlatformsConfig, WebUiConfig};
    use crate::custom_tool::CustomToolHandlerManager;
    use crate::event_bus::EventBus;
    use std::collections::HashMap;

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

    fn handler() -> MessageHandler {
        let events = Arc::new(EventBus::new());
        let custom_tools = Arc::new(CustomToolHandlerManager::new(String::new()));
        let cache = ToolCache::new(std::env::temp_dir().join("xzmcp-test-msg-cache.json"));
        let service_manager = ServiceManager::new(custom_tools, cache, events);
        MessageHandler::new(service_manager)
    }

    #[tokio::test]
    async fn unknown_method_returns_chinese_error() {
        let handler = handler();
        let config = empty_config();
        let request = JsonRpcRequest::new("bogus", None, Some(serde_json::json!(1)));
        let response = handler.handle(&config, request).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "未知的方法");
    }

    #[tokio::test]
    async fn id_round_trips_through_dispatch() {
        let handler = handler();
        let config = empty_config();
        let request = JsonRpcRequest::new("ping", None, Some(serde_json::json!("req-1")));
        let response = handler.handle(&config, request).await;
        assert_eq!(response.id, Some(serde_json::json!("req-1")));
    }

    #[tokio::test]
    async fn initialize_records_session_state() {
        let handler = handler();
        let config = empty_config();
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "voicebox", "version": "1.0"}
        });
        let request = JsonRpcRequest::new("initialize", Some(params), Some(serde_json::json!(1)));
        let response = handler.handle(&config, request).await;
        assert!(response.result.is_some());
        assert!(handler.session().await.initialized);
    }

    #[tokio::test]
    async fn unknown_tool_call_maps_to_not_found_style_error() {
        let handler = handler();
        let config = empty_config();
        let params = serde_json::json!({"name": "does_not_exist", "arguments": {}});
        let request = JsonRpcRequest::new("tools/call", Some(params), Some(serde_json::json!(1)));
        let response = handler.handle(&config, request).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert!(error.message.contains("does_not_exist"));
    }
}
