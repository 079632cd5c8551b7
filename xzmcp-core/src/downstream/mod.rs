//! Downstream Service Manager building blocks: one `McpService` per
//! configured downstream, aggregated by `service_manager::ServiceManager`.

pub mod service;

pub use service::{ConnectionState, McpService};
