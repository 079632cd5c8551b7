//! ModelScope-SSE: plain SSE with a platform auth token injected into every
//! request header. Not a distinct transport kind — the Transport
//! Factory selects this purely by sniffing the configured URL's host.

use super::{Transport, TransportHealth};
use crate::error::XzResult;
use crate::protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub struct ModelScopeTransport {
    inner: super::sse::SseTransport,
}

impl ModelScopeTransport {
    /// `token` comes from `RuntimeConfig::modelscope.api_key`, resolved by the
    /// caller before building the transport.
    pub fn with_token(url: String, mut headers: HashMap<String, String>, timeout: Duration, token: Option<String>) -> Self {
        if let Some(token) = token {
            headers.entry("Authorization".to_string()).or_insert_with(|| format!("Bearer {token}"));
        }
        Self { inner: super::sse::SseTransport::new(url, headers, timeout) }
    }
}

#[async_trait]
impl Transport for ModelScopeTransport {
    async fn connect(&mut self) -> XzResult<()> {
        self.inner.connect().await
    }

    async fn send(&mut self, request: JsonRpcRequest) -> XzResult<()> {
        self.inner.send(request).await
    }

    async fn receive(&mut self) -> XzResult<JsonRpcResponse> {
        self.inner.receive().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn health(&self) -> TransportHealth {
        self.inner.health().await
    }

    async fn close(&mut self) -> XzResult<()> {
        self.inner.close().await
    }
}
