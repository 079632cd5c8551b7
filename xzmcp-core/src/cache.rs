//! Tool cache: a persisted, advisory snapshot of `{service -> tool list +
//! config hash}` next to the config file. Writes are atomic
//! (serialize, write `*.tmp`, rename); reads tolerate malformed content by
//! rebuilding empty rather than propagating an error — the cache is never
//! load-bearing for correctness, only for admin/UI queries.

use crate::protocol::Tool;
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const CACHE_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub tools: Vec<Tool>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
    #[serde(rename = "serverConfig")]
    pub server_config: serde_json::Value,
    #[serde(rename = "configHash")]
    pub config_hash: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    #[serde(rename = "lastGlobalUpdate")]
    pub last_global_update: String,
    #[serde(rename = "totalWrites")]
    pub total_writes: u64,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

impl Default for CacheMetadata {
    fn default() -> Self {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        Self { last_global_update: now.clone(), total_writes: 0, created_at: now }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheFile {
    pub version: String,
    #[serde(rename = "mcpServers")]
    pub mcp_servers: std::collections::HashMap<String, CacheEntry>,
    pub metadata: CacheMetadata,
}

impl Default for CacheFile {
    fn default() -> Self {
        Self { version: CACHE_VERSION.to_string(), mcp_servers: Default::default(), metadata: CacheMetadata::default() }
    }
}

/// SHA-256 over a stable (serde-canonical key order is not guaranteed by
/// `serde_json::Value`, so callers must pass an already-canonical `Value`,
/// e.g. one produced by `serde_json::to_value` on a struct with deterministic
/// field order) serialisation of the service config. Identical config ->
/// identical hash across runs and processes.
pub fn config_hash(config: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(config).expect("Value always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

pub struct ToolCache {
    path: PathBuf,
}

impl ToolCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> CacheFile {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %self.path.display(), "tool cache malformed, rebuilding empty");
                CacheFile::default()
            }),
            Err(_) => CacheFile::default(),
        }
    }

    /// Never raises: any I/O or serialization failure is logged and swallowed.
    pub async fn record_service(
        &self,
        service_name: &str,
        tools: Vec<Tool>,
        server_config: serde_json::Value,
    ) {
        let hash = config_hash(&server_config);
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut file = self.load().await;
        file.mcp_servers.insert(
            service_name.to_string(),
            CacheEntry {
                tools,
                last_updated: now.clone(),
                server_config,
                config_hash: hash,
                version: CACHE_VERSION.to_string(),
            },
        );
        file.metadata.last_global_update = now;
        file.metadata.total_writes += 1;
        if let Err(e) = self.write_atomic(&file).await {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to persist tool cache");
        }
    }

    async fn write_atomic(&self, file: &CacheFile) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let serialized = serde_json::to_vec_pretty(file)?;
        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, &serialized).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
