//! Server-Sent-Events transport: requests are POSTed to the service URL,
//! responses arrive on a long-lived `text/event-stream` GET that this
//! transport keeps draining on a background task.

use super::{Transport, TransportHealth};
use crate::error::{XzError, XzResult};
use crate::protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

pub struct SseTransport {
    url: String,
    headers: HashMap<String, String>,
    timeout: Duration,
    client: reqwest::Client,
    connected: bool,
    inbox: Option<mpsc::Receiver<JsonRpcResponse>>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl SseTransport {
    pub fn new(url: String, headers: HashMap<String, String>, timeout: Duration) -> Self {
        Self {
            url,
            headers,
            timeout,
            client: reqwest::Client::new(),
            connected: false,
            inbox: None,
            reader_task: None,
        }
    }

    fn build_headers(&self) -> XzResult<http::HeaderMap> {
        let mut map = http::HeaderMap::new();
        for (key, value) in &self.headers {
            let name = http::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| XzError::configuration(format!("invalid header name '{key}': {e}")))?;
            let value = http::HeaderValue::from_str(value)
                .map_err(|e| XzError::configuration(format!("invalid header value for '{key}': {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&mut self) -> XzResult<()> {
        let headers = self.build_headers()?;
        let response = self
            .client
            .get(&self.url)
            .header(http::header::ACCEPT, "text/event-stream")
            .headers(headers)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(XzError::transport(format!("sse connect: http {}", response.status())));
        }
        let (tx, rx) = mpsc::channel(64);
        let mut stream = response.bytes_stream();
        let task = tokio::spawn(async move {
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
                        if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(data) {
                            if tx.send(response).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });
        self.inbox = Some(rx);
        self.reader_task = Some(task);
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, request: JsonRpcRequest) -> XzResult<()> {
        if !self.connected {
            return Err(XzError::transport("not connected"));
        }
        let headers = self.build_headers()?;
        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&self.url).headers(headers).json(&request).send(),
        )
        .await
        .map_err(|_| XzError::ConnectionTimeout { timeout: self.timeout })??;
        if !response.status().is_success() {
            return Err(XzError::transport(format!("sse post: http {}", response.status())));
        }
        Ok(())
    }

    async fn receive(&mut self) -> XzResult<JsonRpcResponse> {
        let inbox = self.inbox.as_mut().ok_or_else(|| XzError::transport("not connected"))?;
        tokio::time::timeout(self.timeout, inbox.recv())
            .await
            .map_err(|_| XzError::ConnectionTimeout { timeout: self.timeout })?
            .ok_or_else(|| XzError::transport("sse stream closed"))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn health(&self) -> TransportHealth {
        if self.connected && self.reader_task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            TransportHealth::Healthy
        } else {
            TransportHealth::Unhealthy
        }
    }

    async fn close(&mut self) -> XzResult<()> {
        self.connected = false;
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.inbox = None;
        Ok(())
    }
}
