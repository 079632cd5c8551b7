//! The MCP wire protocol: JSON-RPC envelope, method payload shapes, and
//! capability negotiation. Shared verbatim between the downstream client
//! side and the upstream server side of the proxy.

pub mod capabilities;
pub mod jsonrpc;
pub mod messages;

pub use capabilities::{ClientCapabilities, ServerCapabilities};
pub use jsonrpc::{error_codes, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
pub use messages::*;

/// The protocol version this proxy speaks to both sides.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
