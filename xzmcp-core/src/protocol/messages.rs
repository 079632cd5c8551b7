//! Typed payload shapes for the MCP methods this proxy speaks, both as a
//! server (upstream side) and as a client (downstream side).

use super::capabilities::ServerCapabilities;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub metadata: HashMap<String, Value>,
}

impl ServerInfo {
    /// The identity this proxy advertises to every upstream endpoint.
    pub fn xiaozhi() -> Self {
        Self { name: "xiaozhi-mcp-server".to_string(), version: "1.0.0".to_string(), metadata: HashMap::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// A tool as advertised over the wire: the aggregated upstream-facing view
/// carries `service_name`/`original_name` so the reverse `xzcli` mapping can
/// be recovered without re-parsing the public name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(skip)]
    pub service_name: Option<String>,
    #[serde(skip)]
    pub original_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsListParams {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolsListResult {
    pub tools: Vec<Tool>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolContentKind {
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: ToolContentKind,
    pub text: String,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self { kind: ToolContentKind::Text, text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallResult {
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError", skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolsCallResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self { content: vec![ToolContent::text(text)], is_error: false }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { content: vec![ToolContent::text(text)], is_error: true }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PingResult {
    pub status: &'static str,
    pub timestamp: String,
}

impl PingResult {
    pub fn now() -> Self {
        Self { status: "ok", timestamp: chrono::Local::now().to_rfc3339() }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourcesListResult {
    pub resources: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptsListResult {
    pub prompts: Vec<Value>,
}
