//! Endpoint Connection: one persistent connection this proxy dials
//! out to an upstream endpoint URL. Unlike a downstream `McpService`, this
//! proxy plays the MCP *server* role over the socket — it receives requests
//! and sends responses/notifications — even though the connection itself is
//! client-initiated, so it speaks raw `JsonRpcMessage` frames rather than
//! reusing the downstream `Transport` trait's request/response asymmetry.

use crate::config::RuntimeConfig;
use crate::error::{XzError, XzResult};
use crate::message_handler::MessageHandler;
use crate::protocol::jsonrpc::{JsonRpcMessage, JsonRpcResponse};
use crate::protocol::Tool;
use crate::recovery::ReconnectManager;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_stream::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

const OUTGOING_QUEUE_CAP: usize = 256;

/// Endpoint Connections reuse the MCP Service backoff shape but with their
/// own, longer defaults — endpoints are user-facing, not transient plumbing.
pub fn default_endpoint_reconnect_policy() -> crate::config::ReconnectPolicy {
    crate::config::ReconnectPolicy {
        enabled: true,
        max_attempts: 50,
        initial_interval: 5_000,
        max_interval: 120_000,
        backoff_strategy: crate::config::BackoffStrategy::Exponential,
        backoff_multiplier: 1.5,
        timeout: 15_000,
        jitter: true,
    }
}

struct Streams {
    reader: tokio::task::JoinHandle<()>,
    inbox: mpsc::Receiver<JsonRpcMessage>,
}

pub struct EndpointConnection {
    pub url: String,
    client: reqwest::Client,
    message_handler: Arc<MessageHandler>,
    reconnect: Arc<ReconnectManager>,
    streams: Mutex<Option<Streams>>,
    outgoing: Mutex<VecDeque<JsonRpcMessage>>,
    last_tools_snapshot: RwLock<Vec<Tool>>,
    initialized: RwLock<bool>,
}

impl EndpointConnection {
    pub fn new(url: String, message_handler: Arc<MessageHandler>) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            message_handler,
            reconnect: Arc::new(ReconnectManager::new(default_endpoint_reconnect_policy())),
            streams: Mutex::new(None),
            outgoing: Mutex::new(VecDeque::new()),
            last_tools_snapshot: RwLock::new(Vec::new()),
            initialized: RwLock::new(false),
        }
    }

    pub async fn state(&self) -> EndpointState {
        use crate::recovery::ReconnectState;
        match self.reconnect.state().await {
            ReconnectState::Connected => EndpointState::Connected,
            ReconnectState::Reconnecting { .. } => EndpointState::Reconnecting,
            ReconnectState::Disconnected => EndpointState::Disconnected,
            ReconnectState::Failed { .. } => EndpointState::Failed,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == EndpointState::Connected
    }

    pub async fn is_initialized(&self) -> bool {
        *self.initialized.read().await
    }

    pub async fn connect(self: &Arc<Self>) -> XzResult<()> {
        let response = self
            .client
            .get(&self.url)
            .header(http::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(XzError::transport(format!("endpoint connect: http {}", response.status())));
        }
        let (tx, rx) = mpsc::channel(64);
        let mut stream = response.bytes_stream();
        let reader = tokio::spawn(async move {
            let mut buffer = String::new();
            while let Some(chunk) = stream.next().await {
                let Ok(bytes) = chunk else { break };
                let Ok(text) = std::str::from_utf8(&bytes) else { continue };
                buffer.push_str(text);
                while let Some(idx) = buffer.find('\n') {
                    let line = buffer[..idx].trim_end_matches('\r').to_string();
                    buffer.drain(..=idx);
                    if let Some(data) = line.strip_prefix("data:") {
                        let data = data.trim();
                        if data.is_empty() {
                            continue;
                        }
                        let message = match serde_json::from_str::<JsonRpcMessage>(data) {
                            Ok(message) => message,
                            // Malformed JSON-RPC: best-effort recover whatever `id` is
                            // present so the caller still gets a correlated response.
                            Err(_) => {
                                let id = serde_json::from_str::<serde_json::Value>(data)
                                    .ok()
                                    .and_then(|v| v.get("id").cloned());
                                JsonRpcMessage::Response(JsonRpcResponse::failure(
                                    id,
                                    crate::protocol::jsonrpc::JsonRpcError::parse_error("invalid JSON-RPC frame"),
                                ))
                            }
                        };
                        if tx.send(message).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        *self.streams.lock().await = Some(Streams { reader, inbox: rx });
        self.reconnect.mark_connected().await;
        self.drain_outgoing_queue().await;
        Ok(())
    }

    pub async fn disconnect(&self) -> XzResult<()> {
        self.reconnect.mark_manual_disconnect().await;
        *self.initialized.write().await = false;
        if let Some(streams) = self.streams.lock().await.take() {
            streams.reader.abort();
        }
        Ok(())
    }

    pub async fn reconnect(self: &Arc<Self>) -> XzResult<()> {
        self.disconnect().await.ok();
        self.connect().await
    }

    /// Outgoing frames are queued while disconnected; the queue is
    /// bounded and drops the oldest entry beyond capacity, which is a
    /// logged-not-escalated failure mode.
    pub async fn send(&self, message: JsonRpcMessage) -> XzResult<()> {
        if self.is_connected().await {
            return self.post(message).await;
        }
        let mut queue = self.outgoing.lock().await;
        if queue.len() >= OUTGOING_QUEUE_CAP {
            tracing::warn!(url = %self.url, "outgoing queue full, dropping oldest frame");
            queue.pop_front();
        }
        queue.push_back(message);
        Ok(())
    }

    async fn drain_outgoing_queue(&self) {
        let drained: Vec<_> = self.outgoing.lock().await.drain(..).collect();
        for message in drained {
            if let Err(e) = self.post(message).await {
                tracing::warn!(url = %self.url, error = %e, "failed to flush queued outgoing frame");
            }
        }
    }

    async fn post(&self, message: JsonRpcMessage) -> XzResult<()> {
        let response = self.client.post(&self.url).json(&message).send().await?;
        if !response.status().is_success() {
            return Err(XzError::transport(format!("endpoint post: http {}", response.status())));
        }
        Ok(())
    }

    /// Pulls the next inbound frame, dispatches `initialize` requests
    /// through to the Message Handler, and answers directly. A frame that
    /// failed to parse upstream arrives as a synthetic `-32700` response,
    /// which is sent back as-is rather than run through the handler.
    pub async fn process_next(&self, config: &RuntimeConfig) -> XzResult<()> {
        let message = {
            let mut streams = self.streams.lock().await;
            let streams = streams.as_mut().ok_or_else(|| XzError::NotConnected { service: self.url.clone() })?;
            streams.inbox.recv().await
        };
        let request = match message {
            Some(JsonRpcMessage::Request(request)) => request,
            Some(response @ JsonRpcMessage::Response(_)) => return self.send(response).await,
            None => return Ok(()),
        };
        if request.method == "initialize" {
            *self.initialized.write().await = true;
        }
        let response = self.message_handler.handle(config, request).await;
        self.send(JsonRpcMessage::Response(response)).await
    }

    /// Diffs the Service Manager's current tool set against the last
    /// snapshot sent to this endpoint; pushes a synthetic
    /// `notifications/tools/list_changed` when it changed.
    pub async fn notify_if_tools_changed(&self, current: Vec<Tool>) -> XzResult<()> {
        let changed = {
            let snapshot = self.last_tools_snapshot.read().await;
            tool_names(&snapshot) != tool_names(&current)
        };
        if changed {
            *self.last_tools_snapshot.write().await = current;
            let notification = crate::protocol::jsonrpc::JsonRpcRequest::new("notifications/tools/list_changed", None, None);
            self.send(JsonRpcMessage::Request(notification)).await?;
        }
        Ok(())
    }
}

fn tool_names(tools: &[Tool]) -> std::collections::BTreeSet<&str> {
    tools.iter().map(|t| t.name.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_reconnect_defaults_are_longer_than_downstream() {
        let policy = default_endpoint_reconnect_policy();
        assert!(policy.initial_interval >= 5_000);
        assert!(policy.max_interval >= 60_000);
    }

    #[test]
    fn tool_name_diff_detects_addition() {
        let before: Vec<Tool> = vec![];
        let after = vec![Tool {
            name: "calculator_xzcli_add".into(),
            description: None,
            input_schema: serde_json::json!({"type":"object"}),
            service_name: None,
            original_name: None,
        }];
        assert_ne!(tool_names(&before), tool_names(&after));
    }
}
