//! Configuration loading and validation.
//!
//! `from_file`/`from_env`/`validate` load the on-disk JSON config,
//! falling back to an environment-only config when no file is present.

use crate::error::{XzError, XzResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential
    }
}

fn default_max_attempts() -> u32 {
    10
}
fn default_initial_interval() -> u64 {
    1000
}
fn default_max_interval() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_reconnect_timeout() -> u64 {
    10_000
}

/// Reconnect knobs shared by every transport variant: which of the three
/// backoff strategies to use and the bounds around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_interval")]
    pub initial_interval: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval: u64,
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_reconnect_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            initial_interval: default_initial_interval(),
            max_interval: default_max_interval(),
            backoff_strategy: BackoffStrategy::default(),
            backoff_multiplier: default_backoff_multiplier(),
            timeout: default_reconnect_timeout(),
            jitter: true,
        }
    }
}

fn default_ping_interval() -> u64 {
    30_000
}
fn default_ping_timeout() -> u64 {
    5_000
}
fn default_ping_max_failures() -> u32 {
    3
}
fn default_ping_start_delay() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ping_interval")]
    pub interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub timeout: u64,
    #[serde(default = "default_ping_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_ping_start_delay")]
    pub start_delay: u64,
}

impl Default for PingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_ping_interval(),
            timeout: default_ping_timeout(),
            max_failures: default_ping_max_failures(),
            start_delay: default_ping_start_delay(),
        }
    }
}

fn default_service_timeout() -> u64 {
    30_000
}

/// One entry of `mcpServers`: a tagged variant plus the shared reconnect/ping
/// policies and timeout every transport carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServiceConfig {
    #[serde(rename_all = "camelCase")]
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        reconnect: ReconnectPolicy,
        #[serde(default)]
        ping: PingPolicy,
        #[serde(default = "default_service_timeout")]
        timeout: u64,
    },
    #[serde(rename_all = "camelCase")]
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        reconnect: ReconnectPolicy,
        #[serde(default)]
        ping: PingPolicy,
        #[serde(default = "default_service_timeout")]
        timeout: u64,
    },
    #[serde(rename = "streamableHttp", rename_all = "camelCase")]
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        reconnect: ReconnectPolicy,
        #[serde(default)]
        ping: PingPolicy,
        #[serde(default = "default_service_timeout")]
        timeout: u64,
    },
}

impl ServiceConfig {
    pub fn reconnect(&self) -> &ReconnectPolicy {
        match self {
            ServiceConfig::Stdio { reconnect, .. }
            | ServiceConfig::Sse { reconnect, .. }
            | ServiceConfig::StreamableHttp { reconnect, .. } => reconnect,
        }
    }

    pub fn ping(&self) -> &PingPolicy {
        match self {
            ServiceConfig::Stdio { ping, .. }
            | ServiceConfig::Sse { ping, .. }
            | ServiceConfig::StreamableHttp { ping, .. } => ping,
        }
    }

    pub fn timeout(&self) -> Duration {
        let ms = match self {
            ServiceConfig::Stdio { timeout, .. }
            | ServiceConfig::Sse { timeout, .. }
            | ServiceConfig::StreamableHttp { timeout, .. } => *timeout,
        };
        Duration::from_millis(ms)
    }

    /// stdio needs a command, SSE/HTTP need a url.
    pub fn validate(&self, name: &str) -> XzResult<()> {
        match self {
            ServiceConfig::Stdio { command, .. } if command.trim().is_empty() => {
                Err(XzError::configuration(format!("service '{name}': stdio transport requires a command")))
            }
            ServiceConfig::Sse { url, .. } | ServiceConfig::StreamableHttp { url, .. } if url.trim().is_empty() => {
                Err(XzError::configuration(format!("service '{name}': transport requires a url")))
            }
            _ => Ok(()),
        }
    }

    /// ModelScope is recognised by host, not by a distinct config variant.
    pub fn is_modelscope(&self) -> bool {
        match self {
            ServiceConfig::Sse { url, .. } => url_is_modelscope(url),
            _ => false,
        }
    }
}

pub fn url_is_modelscope(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.contains("modelscope.net") || h.contains("modelscope.cn")))
        .unwrap_or(false)
}

/// Per-service per-tool enable-flag table (`mcpServerConfig`).
pub type ServerToolsConfig = HashMap<String, HashMap<String, bool>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomToolRecord {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    pub handler: CustomToolHandlerRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CustomToolHandlerRecord {
    #[serde(rename = "proxy")]
    Proxy {
        #[serde(default)]
        platform: String,
        config: ProxyHandlerConfig,
    },
    #[serde(rename = "mcp")]
    Mcp { config: McpHandlerConfig },
    #[serde(rename = "function")]
    Function,
}

impl Default for CustomToolHandlerRecord {
    fn default() -> Self {
        CustomToolHandlerRecord::Function
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyHandlerConfig {
    pub workflow_id: String,
    #[serde(default, rename = "baseUrl")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpHandlerConfig {
    pub service_name: String,
    pub tool_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomMcpConfig {
    #[serde(default)]
    pub tools: Vec<CustomToolRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozePlatformConfig {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformsConfig {
    #[serde(default)]
    pub coze: CozePlatformConfig,
}

fn default_web_ui_port() -> u16 {
    9999
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebUiConfig {
    #[serde(default = "default_web_ui_port")]
    pub port: u16,
}

impl Default for WebUiConfig {
    fn default() -> Self {
        Self { port: default_web_ui_port() }
    }
}

fn default_heartbeat_timeout_ms() -> u64 {
    35_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { heartbeat_timeout_ms: default_heartbeat_timeout_ms() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelScopeConfig {
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Either a single endpoint url or an array of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpEndpoint {
    Single(String),
    Many(Vec<String>),
}

impl McpEndpoint {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            McpEndpoint::Single(s) => vec![s.clone()],
            McpEndpoint::Many(v) => v.clone(),
        }
    }
}

/// The root on-disk config document (`xiaozhi.config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(rename = "mcpEndpoint")]
    pub mcp_endpoint: McpEndpoint,
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: HashMap<String, ServiceConfig>,
    #[serde(default, rename = "mcpServerConfig")]
    pub mcp_server_config: ServerToolsConfig,
    #[serde(default, rename = "customMCP")]
    pub custom_mcp: CustomMcpConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    #[serde(default, rename = "webUI")]
    pub web_ui: WebUiConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub modelscope: ModelScopeConfig,
}

impl RuntimeConfig {
    /// `$XIAOZHI_CONFIG_DIR/xiaozhi.config.json`, falling back to CWD.
    pub fn default_path() -> PathBuf {
        config_dir().join("xiaozhi.config.json")
    }

    pub fn cache_path() -> PathBuf {
        config_dir().join("xiaozhi.cache.json")
    }

    pub async fn from_file(path: impl AsRef<Path>) -> XzResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| XzError::configuration(format!("reading {}: {e}", path.display())))?;
        let config: RuntimeConfig = serde_json::from_str(&contents)
            .map_err(|e| XzError::configuration(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to a minimal config built
    /// entirely from environment variables when no file is present.
    pub async fn load(path: Option<impl AsRef<Path>>) -> XzResult<Self> {
        let path = path.map(|p| p.as_ref().to_path_buf()).unwrap_or_else(Self::default_path);
        if path.exists() {
            Self::from_file(path).await
        } else {
            Self::from_env()
        }
    }

    pub fn from_env() -> XzResult<Self> {
        let endpoint = std::env::var("XIAOZHI_MCP_ENDPOINT")
            .map_err(|_| XzError::configuration("no config file found and XIAOZHI_MCP_ENDPOINT is unset"))?;
        let config = RuntimeConfig {
            mcp_endpoint: McpEndpoint::Single(endpoint),
            mcp_servers: HashMap::new(),
            mcp_server_config: HashMap::new(),
            custom_mcp: CustomMcpConfig::default(),
            platforms: PlatformsConfig::default(),
            web_ui: WebUiConfig::default(),
            connection: ConnectionConfig::default(),
            modelscope: ModelScopeConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> XzResult<()> {
        if self.mcp_endpoint.as_vec().iter().all(|e| e.trim().is_empty()) {
            return Err(XzError::configuration("mcpEndpoint must not be empty"));
        }
        for (name, service) in &self.mcp_servers {
            service.validate(name)?;
        }
        Ok(())
    }

    /// True for a tool as long as its enable flag is not explicitly `false`;
    /// services/tools absent from the table default to enabled.
    pub fn is_tool_enabled(&self, service_name: &str, tool_name: &str) -> bool {
        self.mcp_server_config
            .get(service_name)
            .and_then(|tools| tools.get(tool_name))
            .copied()
            .unwrap_or(true)
    }
}

pub fn config_dir() -> PathBuf {
    std::env::var("XIAOZHI_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}
