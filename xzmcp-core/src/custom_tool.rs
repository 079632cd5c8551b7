//! Custom-Tool Handler: the in-memory catalog of user-defined tools,
//! each backed by one of three handler shapes.

use crate::config::{CustomToolHandlerRecord, CustomToolRecord};
use crate::error::{XzError, XzResult};
use crate::protocol::ToolsCallResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// The `mcp` handler shape can't hold an owned reference to the
/// `ServiceManager` that holds it back —
/// it resolves `(serviceName, toolName)` against whatever implements this at
/// call time.
#[async_trait]
pub trait DownstreamDispatch: Send + Sync {
    async fn call_tool(&self, service_name: &str, tool_name: &str, args: Value) -> XzResult<ToolsCallResult>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStats {
    pub usage_count: u64,
    pub last_used_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum CustomToolHandler {
    Proxy { workflow_id: String, base_url: Option<String> },
    Mcp { service_name: String, tool_name: String },
    Function,
}

#[derive(Debug, Clone)]
pub struct CustomTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub handler: CustomToolHandler,
}

impl From<CustomToolRecord> for CustomTool {
    fn from(record: CustomToolRecord) -> Self {
        let handler = match record.handler {
            CustomToolHandlerRecord::Proxy { config, .. } => {
                CustomToolHandler::Proxy { workflow_id: config.workflow_id, base_url: config.base_url }
            }
            CustomToolHandlerRecord::Mcp { config } => {
                CustomToolHandler::Mcp { service_name: config.service_name, tool_name: config.tool_name }
            }
            CustomToolHandlerRecord::Function => CustomToolHandler::Function,
        };
        let input_schema = if record.input_schema.is_null() {
            serde_json::json!({ "type": "object" })
        } else {
            record.input_schema
        };
        CustomTool { name: record.name, description: record.description, input_schema, handler }
    }
}

const DEFAULT_COZE_BASE_URL: &str = "https://api.coze.cn/v1/workflow/run";

struct CachedResult {
    result: ToolsCallResult,
    expires_at: Instant,
}

pub struct CustomToolHandlerManager {
    tools: RwLock<HashMap<String, CustomTool>>,
    stats: dashmap::DashMap<String, ToolStats>,
    http: reqwest::Client,
    platform_token: RwLock<String>,
    cache: dashmap::DashMap<String, CachedResult>,
    cache_ttl: Duration,
}

impl CustomToolHandlerManager {
    pub fn new(platform_token: String) -> Self {
        Self::with_cache_ttl(platform_token, Duration::from_secs(60))
    }

    pub fn with_cache_ttl(platform_token: String, cache_ttl: Duration) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            stats: dashmap::DashMap::new(),
            http: reqwest::Client::new(),
            platform_token: RwLock::new(platform_token),
            cache: dashmap::DashMap::new(),
            cache_ttl,
        }
    }

    /// `initialize`: replaces the map atomically.
    pub async fn initialize(&self, records: Vec<CustomToolRecord>) {
        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            let tool: CustomTool = record.into();
            map.insert(tool.name.clone(), tool);
        }
        *self.tools.write().await = map;
    }

    pub async fn set_platform_token(&self, token: String) {
        *self.platform_token.write().await = token;
    }

    pub async fn get_tools(&self) -> Vec<CustomTool> {
        self.tools.read().await.values().cloned().collect()
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn add_tool(&self, tool: CustomTool) -> XzResult<()> {
        let mut map = self.tools.write().await;
        if map.contains_key(&tool.name) {
            return Err(XzError::conflict(format!("custom tool '{}' already exists", tool.name)));
        }
        map.insert(tool.name.clone(), tool);
        Ok(())
    }

    pub async fn remove_tool(&self, name: &str) -> XzResult<()> {
        let mut map = self.tools.write().await;
        map.remove(name).map(|_| ()).ok_or_else(|| XzError::not_found(format!("custom tool '{name}'")))
    }

    /// Drops every custom tool whose name starts with `${serviceName}__`,
    /// the tool-sync reconciliation prefix, on service removal.
    pub async fn remove_tools_for_service(&self, service_name: &str) {
        let prefix = format!("{service_name}__");
        self.tools.write().await.retain(|name, _| !name.starts_with(&prefix));
    }

    pub async fn stats_for(&self, name: &str) -> Option<ToolStats> {
        self.stats.get(name).map(|entry| entry.clone())
    }

    fn record_usage(&self, name: &str) {
        let mut entry = self.stats.entry(name.to_string()).or_default();
        entry.usage_count += 1;
        entry.last_used_time = Some(Utc::now());
    }

    pub async fn call_tool(&self, name: &str, arguments: Value, dispatch: &dyn DownstreamDispatch) -> XzResult<ToolsCallResult> {
        let tool = {
            let map = self.tools.read().await;
            map.get(name).cloned().ok_or_else(|| XzError::not_found(format!("custom tool '{name}'")))?
        };
        let result = match &tool.handler {
            CustomToolHandler::Proxy { workflow_id, base_url } => {
                self.call_proxy(name, workflow_id, base_url.as_deref(), arguments).await
            }
            CustomToolHandler::Mcp { service_name, tool_name } => {
                dispatch.call_tool(service_name, tool_name, arguments).await
            }
            CustomToolHandler::Function => Err(XzError::NotImplemented { what: format!("custom tool '{name}'") }),
        };
        if result.is_ok() {
            self.record_usage(name);
        }
        result
    }

    async fn call_proxy(
        &self,
        name: &str,
        workflow_id: &str,
        base_url: Option<&str>,
        arguments: Value,
    ) -> XzResult<ToolsCallResult> {
        let cache_key = proxy_cache_key(name, &arguments);
        if let Some(entry) = self.cache.get(&cache_key) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.result.clone());
            }
        }
        let token = self.platform_token.read().await.clone();
        let url = base_url.unwrap_or(DEFAULT_COZE_BASE_URL);
        let body = serde_json::json!({ "workflow_id": workflow_id, "parameters": arguments });
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(XzError::DownstreamTool { message: format!("coze workflow http {}", response.status()) });
        }
        let body: Value = response.json().await?;
        let text = serde_json::to_string(&body.get("result").cloned().unwrap_or(body))?;
        let result = ToolsCallResult::ok(text);
        self.cache.insert(cache_key, CachedResult { result: result.clone(), expires_at: Instant::now() + self.cache_ttl });
        Ok(result)
    }
}

/// `sha256(name + canonicalJSON(args))`; `serde_json::to_vec` over a
/// parsed `Value` yields deterministic key order because maps are already
/// normalised on parse.
fn proxy_cache_key(name: &str, args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(serde_json::to_vec(args).unwrap_or_default());
    hex::encode(hasher.finalize())
}

pub struct NullDispatch;

#[async_trait]
impl DownstreamDispatch for NullDispatch {
    async fn call_tool(&self, service_name: &str, _tool_name: &str, _args: Value) -> XzResult<ToolsCallResult> {
        Err(XzError::not_found(format!("service '{service_name}' not wired to a dispatcher")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoDispatch;

    #[async_trait]
    impl DownstreamDispatch for EchoDispatch {
        async fn call_tool(&self, service_name: &str, tool_name: &str, _args: Value) -> XzResult<ToolsCallResult> {
            Ok(ToolsCallResult::ok(format!("{service_name}/{tool_name}")))
        }
    }

    #[tokio::test]
    async fn function_handler_is_not_implemented() {
        let manager = CustomToolHandlerManager::new(String::new());
        manager
            .add_tool(CustomTool {
                name: "placeholder".into(),
                description: None,
                input_schema: serde_json::json!({"type":"object"}),
                handler: CustomToolHandler::Function,
            })
            .await
            .unwrap();
        let err = manager.call_tool("placeholder", serde_json::json!({}), &NullDispatch).await.unwrap_err();
        assert!(matches!(err, XzError::NotImplemented { .. }));
    }

    #[tokio::test]
    async fn mcp_handler_routes_through_dispatch() {
        let manager = CustomToolHandlerManager::new(String::new());
        manager
            .add_tool(CustomTool {
                name: "calculator_xzcli_add".into(),
                description: None,
                input_schema: serde_json::json!({"type":"object"}),
                handler: CustomToolHandler::Mcp { service_name: "calculator".into(), tool_name: "sub".into() },
            })
            .await
            .unwrap();
        let result = manager.call_tool("calculator_xzcli_add", serde_json::json!({"a":10,"b":3}), &EchoDispatch).await.unwrap();
        assert_eq!(result.content[0].text, "calculator/sub");
    }

    #[tokio::test]
    async fn adding_duplicate_name_conflicts() {
        let manager = CustomToolHandlerManager::new(String::new());
        let tool = || CustomTool {
            name: "dup".into(),
            description: None,
            input_schema: serde_json::json!({"type":"object"}),
            handler: CustomToolHandler::Function,
        };
        manager.add_tool(tool()).await.unwrap();
        assert!(manager.add_tool(tool()).await.is_err());
    }

    #[tokio::test]
    async fn add_then_remove_restores_empty_catalog() {
        let manager = CustomToolHandlerManager::new(String::new());
        let tool = CustomTool {
            name: "temp".into(),
            description: None,
            input_schema: serde_json::json!({"type":"object"}),
            handler: CustomToolHandler::Function,
        };
        manager.add_tool(tool).await.unwrap();
        manager.remove_tool("temp").await.unwrap();
        assert!(manager.get_tools().await.is_empty());
    }

    #[tokio::test]
    async fn removing_for_service_drops_only_matching_prefix() {
        let manager = CustomToolHandlerManager::new(String::new());
        manager
            .add_tool(CustomTool {
                name: "calculator__add".into(),
                description: None,
                input_schema: serde_json::json!({"type":"object"}),
                handler: CustomToolHandler::Mcp { service_name: "calculator".into(), tool_name: "add".into() },
            })
            .await
            .unwrap();
        manager
            .add_tool(CustomTool {
                name: "coze_hello".into(),
                description: None,
                input_schema: serde_json::json!({"type":"object"}),
                handler: CustomToolHandler::Function,
            })
            .await
            .unwrap();
        manager.remove_tools_for_service("calculator").await;
        let remaining: Vec<_> = manager.get_tools().await.into_iter().map(|t| t.name).collect();
        assert_eq!(remaining, vec!["coze_hello".to_string()]);
    }
}
