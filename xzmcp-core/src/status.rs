//! Status Service: a single process-wide record of upstream-client
//! liveness. Each heartbeat arms a 35s timer; firing it flips status to
//! disconnected and emits `status:updated`. Restart status is tracked
//! independently.

use crate::event_bus::EventBus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: LivenessStatus,
    #[serde(rename = "mcpEndpoint")]
    pub mcp_endpoint: Vec<String>,
    #[serde(rename = "activeMCPServers")]
    pub active_mcp_servers: Vec<String>,
    #[serde(rename = "lastHeartbeat")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPhase {
    Restarting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartStatus {
    pub phase: RestartPhase,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

const HEARTBEAT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(35);

struct Inner {
    status: LivenessStatus,
    mcp_endpoint: Vec<String>,
    active_mcp_servers: Vec<String>,
    last_heartbeat: Option<DateTime<Utc>>,
    restart: Option<RestartStatus>,
}

pub struct StatusService {
    inner: RwLock<Inner>,
    events: Arc<EventBus>,
    timeout_task: Mutex<Option<JoinHandle<()>>>,
}

impl StatusService {
    pub fn new(events: Arc<EventBus>, mcp_endpoint: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                status: LivenessStatus::Disconnected,
                mcp_endpoint,
                active_mcp_servers: Vec::new(),
                last_heartbeat: None,
                restart: None,
            }),
            events,
            timeout_task: Mutex::new(None),
        })
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read().await;
        StatusSnapshot {
            status: inner.status,
            mcp_endpoint: inner.mcp_endpoint.clone(),
            active_mcp_servers: inner.active_mcp_servers.clone(),
            last_heartbeat: inner.last_heartbeat,
        }
    }

    pub async fn set_active_servers(&self, servers: Vec<String>) {
        self.inner.write().await.active_mcp_servers = servers;
    }

    /// Stamps `lastHeartbeat = now`, flips to connected, and (re)arms the
    /// 35s disconnect timer.
    pub async fn heartbeat(self: &Arc<Self>) {
        {
            let mut inner = self.inner.write().await;
            inner.last_heartbeat = Some(Utc::now());
            inner.status = LivenessStatus::Connected;
        }
        if let Some(task) = self.timeout_task.lock().await.take() {
            task.abort();
        }
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(HEARTBEAT_TIMEOUT).await;
            this.fire_timeout().await;
        });
        *self.timeout_task.lock().await = Some(task);
    }

    async fn fire_timeout(&self) {
        let snapshot = {
            let mut inner = self.inner.write().await;
            inner.status = LivenessStatus::Disconnected;
            StatusSnapshot {
                status: inner.status,
                mcp_endpoint: inner.mcp_endpoint.clone(),
                active_mcp_servers: inner.active_mcp_servers.clone(),
                last_heartbeat: inner.last_heartbeat,
            }
        };
        self.events.emit_status_updated(serde_json::to_value(snapshot).unwrap()).await;
    }

    pub async fn set_restart_status(&self, phase: RestartPhase, error: Option<String>) {
        self.inner.write().await.restart = Some(RestartStatus { phase, error, timestamp: Utc::now() });
    }

    pub async fn restart_status(&self) -> Option<RestartStatus> {
        self.inner.read().await.restart.clone()
    }
}
