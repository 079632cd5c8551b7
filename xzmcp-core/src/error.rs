//! Error taxonomy for the aggregating proxy.
//!
//! `XzError` collapses the eight error kinds of the design into a single
//! `thiserror` enum. Each variant carries the machine code and short
//! human-readable message that crosses the JSON-RPC boundary; conversions from
//! the library errors we actually touch (`serde_json`, `reqwest`, `std::io`)
//! live at the bottom so call sites can use `?` freely.

use std::time::Duration;
use thiserror::Error;

pub type XzResult<T> = Result<T, XzError>;

#[derive(Error, Debug)]
pub enum XzError {
    /// Caller sent structurally invalid input (bad JSON-RPC, args fail inputSchema).
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Tool / service / endpoint absent.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Name collision on custom-tool add.
    #[error("conflict: {what}")]
    Conflict { what: String },

    /// Caller invoked an operation before the component reached the required state.
    #[error("not connected: {service}")]
    NotConnected { service: String },

    #[error("not initialized: {what}")]
    NotInitialized { what: String },

    /// Connect failures, read/write errors, ping timeouts — drives reconnection.
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("connection timed out after {timeout:?}")]
    ConnectionTimeout { timeout: Duration },

    /// Reconnect attempts exhausted; component is terminally failed.
    #[error("connection permanently failed after {attempts} attempts: {reason}")]
    Fatal { attempts: u32, reason: String },

    /// Downstream returned `isError: true` or threw; forwarded verbatim.
    #[error("downstream tool error: {message}")]
    DownstreamTool { message: String },

    /// Missing required field for a transport, bad token, bad JSON.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("serialization error: {details}")]
    Serialization { details: String },

    /// Reserved placeholder handler kind.
    #[error("not implemented: {what}")]
    NotImplemented { what: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl XzError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict { what: what.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Stable machine code for the error taxonomy. Used on the JSON-RPC
    /// `error.data.code` slot and is what an admin API would key HTTP status off.
    pub fn code(&self) -> &'static str {
        match self {
            XzError::Validation { .. } => "INVALID_ARGUMENTS",
            XzError::NotFound { .. } => "NOT_FOUND",
            XzError::Conflict { .. } => "CONFLICT",
            XzError::NotConnected { .. } => "NOT_CONNECTED",
            XzError::NotInitialized { .. } => "NOT_INITIALIZED",
            XzError::Transport { .. } => "TRANSPORT_ERROR",
            XzError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            XzError::Fatal { .. } => "CONNECTION_FAILED",
            XzError::DownstreamTool { .. } => "DOWNSTREAM_ERROR",
            XzError::Configuration { .. } => "CONFIGURATION_ERROR",
            XzError::Serialization { .. } => "SERIALIZATION_ERROR",
            XzError::NotImplemented { .. } => "NOT_IMPLEMENTED",
            XzError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// HTTP status an admin API would map this onto; nothing in
    /// this crate serves HTTP, but the mapping is part of the error's contract.
    pub fn admin_status_code(&self) -> u16 {
        match self {
            XzError::Validation { .. } => 400,
            XzError::NotFound { .. } => 404,
            XzError::Conflict { .. } => 409,
            XzError::NotConnected { .. } | XzError::NotInitialized { .. } => 503,
            XzError::Configuration { .. } => 422,
            XzError::NotImplemented { .. } => 501,
            _ => 500,
        }
    }

    /// Whether the reconnect state machine should keep retrying on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            XzError::Transport { .. } | XzError::ConnectionTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for XzError {
    fn from(err: serde_json::Error) -> Self {
        XzError::Serialization { details: err.to_string() }
    }
}

impl From<reqwest::Error> for XzError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            XzError::ConnectionTimeout { timeout: Duration::from_secs(30) }
        } else if err.is_connect() {
            XzError::Transport { message: err.to_string() }
        } else {
            XzError::Transport { message: err.to_string() }
        }
    }
}

impl From<std::io::Error> for XzError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => XzError::ConnectionTimeout { timeout: Duration::from_secs(30) },
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => XzError::Transport { message: err.to_string() },
            _ => XzError::Transport { message: err.to_string() },
        }
    }
}
