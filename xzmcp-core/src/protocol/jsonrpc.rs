//! JSON-RPC 2.0 envelope types shared by both the downstream client side and
//! the upstream server side of the proxy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Well-known JSON-RPC error codes this system emits. `MethodNotFound` is the
/// one the message handler uses verbatim for the `"未知的方法"` case.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// May be a string, number, or absent; round-tripped verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), method: method.into(), params, id }
    }

    /// A request with no `id` is a notification per the JSON-RPC spec.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self { code, message: message.into(), data: Some(data) }
    }

    pub fn method_not_found() -> Self {
        Self::new(error_codes::METHOD_NOT_FOUND, "未知的方法")
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, detail.into())
    }

    pub fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self::with_data(
            error_codes::INVALID_PARAMS,
            format!("参数验证失败: {detail}"),
            serde_json::json!({ "code": "INVALID_ARGUMENTS" }),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), result: Some(result), error: None, id }
    }

    pub fn failure(id: Option<Value>, error: JsonRpcError) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), result: None, error: Some(error), id }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Either half of the wire protocol; used by transports that don't
/// distinguish request/response framing ahead of time (SSE event bodies).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    pub fn id(&self) -> Option<&Value> {
        match self {
            JsonRpcMessage::Request(r) => r.id.as_ref(),
            JsonRpcMessage::Response(r) => r.id.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trips_as_given() {
        let req = JsonRpcRequest::new("ping", None, Some(Value::String("abc".into())));
        let json = serde_json::to_string(&req).unwrap();
        let back: JsonRpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, Some(Value::String("abc".into())));
    }

    #[test]
    fn method_not_found_uses_literal_chinese_text() {
        let err = JsonRpcError::method_not_found();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "未知的方法");
    }
}
