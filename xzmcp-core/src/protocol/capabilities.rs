//! Capability negotiation shapes exchanged during `initialize`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default)]
    pub experimental: HashMap<String, Value>,
}

/// Wire shape is the literal `{}` — `listChanged` is tracked internally but
/// never advertised, so it's skipped whenever false rather than surfaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", default, skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Default for ToolsCapability {
    fn default() -> Self {
        Self { list_changed: false }
    }
}

/// What this proxy advertises as an MCP server. Only `tools` is populated —
/// resources/prompts are served empty so their capability stays absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}
