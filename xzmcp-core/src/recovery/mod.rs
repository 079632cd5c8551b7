//! Reconnect backoff and ping-liveness bookkeeping, factored out of the MCP
//! Service/Endpoint Connection state machines so both can share it.

pub mod ping;
pub mod reconnect;

pub use ping::PingTracker;
pub use reconnect::{calculate_backoff_delay, ReconnectManager, ReconnectState};
