//! Transport Factory: builds a boxed `Transport` from a service
//! config variant. The four wire shapes (stdio / SSE / streamable-HTTP /
//! ModelScope-SSE) are tagged data dispatched here, not a class hierarchy
//! — ModelScope is plain SSE with token injection, not a
//! fifth transport kind, so it lives behind the same `Sse` variant.

pub mod modelscope;
pub mod sse;
pub mod stdio;
pub mod streamable_http;

use crate::config::ServiceConfig;
use crate::error::{XzError, XzResult};
use crate::protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHealth {
    Healthy,
    Unhealthy,
}

/// One downstream connection's wire-level contract. The four variants
/// (`transport::stdio`, `transport::sse`, `transport::streamable_http`,
/// `transport::modelscope`) all implement this uniformly; `MCPService`
/// (downstream::service) only ever talks to `dyn Transport`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&mut self) -> XzResult<()>;
    async fn send(&mut self, request: JsonRpcRequest) -> XzResult<()>;
    async fn receive(&mut self) -> XzResult<JsonRpcResponse>;
    fn is_connected(&self) -> bool;
    async fn health(&self) -> TransportHealth;
    async fn close(&mut self) -> XzResult<()>;
}

pub fn build_transport(
    config: &ServiceConfig,
    timeout: Duration,
    modelscope_token: Option<String>,
) -> XzResult<Box<dyn Transport>> {
    match config {
        ServiceConfig::Stdio { command, args, env, .. } => {
            if command.trim().is_empty() {
                return Err(XzError::configuration("stdio transport requires a command"));
            }
            Ok(Box::new(stdio::StdioTransport::new(command.clone(), args.clone(), env.clone(), timeout)))
        }
        ServiceConfig::Sse { url, headers, .. } => {
            if url.trim().is_empty() {
                return Err(XzError::configuration("sse transport requires a url"));
            }
            if config.is_modelscope() {
                Ok(Box::new(modelscope::ModelScopeTransport::with_token(url.clone(), headers.clone(), timeout, modelscope_token)))
            } else {
                Ok(Box::new(sse::SseTransport::new(url.clone(), headers.clone(), timeout)))
            }
        }
        ServiceConfig::StreamableHttp { url, headers, .. } => {
            if url.trim().is_empty() {
                return Err(XzError::configuration("streamable-http transport requires a url"));
            }
            Ok(Box::new(streamable_http::StreamableHttpTransport::new(url.clone(), headers.clone(), timeout)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PingPolicy, ReconnectPolicy};
    use std::collections::HashMap;

    #[test]
    fn stdio_without_command_is_configuration_error() {
        let config = ServiceConfig::Stdio {
            command: "".into(),
            args: vec![],
            env: HashMap::new(),
            reconnect: ReconnectPolicy::default(),
            ping: PingPolicy::default(),
            timeout: 1000,
        };
        assert!(build_transport(&config, Duration::from_secs(1), None).is_err());
    }

    #[test]
    fn modelscope_url_selects_modelscope_transport() {
        let config = ServiceConfig::Sse {
            url: "https://mcp.api-inference.modelscope.net/sse".into(),
            headers: HashMap::new(),
            reconnect: ReconnectPolicy::default(),
            ping: PingPolicy::default(),
            timeout: 1000,
        };
        assert!(build_transport(&config, Duration::from_secs(1), None).is_ok());
    }
}
