//! Streamable-HTTP transport: each request is a single POST whose response
//! body is the JSON-RPC response, no separate event stream to drain.

use super::{Transport, TransportHealth};
use crate::error::{XzError, XzResult};
use crate::protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

pub struct StreamableHttpTransport {
    url: String,
    headers: HashMap<String, String>,
    timeout: Duration,
    client: reqwest::Client,
    connected: bool,
    pending: VecDeque<JsonRpcResponse>,
}

impl StreamableHttpTransport {
    pub fn new(url: String, headers: HashMap<String, String>, timeout: Duration) -> Self {
        Self { url, headers, timeout, client: reqwest::Client::new(), connected: false, pending: VecDeque::new() }
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
impl Transport for StreamableHttpTransport {
    async fn connect(&mut self) -> XzResult<()> {
        // Streamable HTTP is connectionless at the socket level; a cheap
        // reachability probe is left to the ping loop's first `tools/list`.
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
            return Err(XzError::transport(format!("streamable-http post: http {}", response.status())));
        }
        let body: JsonRpcResponse = response.json().await?;
        self.pending.push_back(body);
        Ok(())
    }

    async fn receive(&mut self) -> XzResult<JsonRpcResponse> {
        self.pending.pop_front().ok_or_else(|| XzError::transport("no response pending"))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn health(&self) -> TransportHealth {
        if self.connected {
            TransportHealth::Healthy
        } else {
            TransportHealth::Unhealthy
        }
    }

    async fn close(&mut self) -> XzResult<()> {
        self.connected = false;
        self.pending.clear();
        Ok(())
    }
}
