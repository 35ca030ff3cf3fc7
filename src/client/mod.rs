//! MCP client stack: transports (stdio, Streamable HTTP, legacy SSE), health
//! monitoring, and the Server Manager that owns their lifecycle.

mod core;
mod health;
mod http;
mod manager;
mod sse;
mod stdio;

pub use core::McpClient;
pub use health::{HealthCheckResult, HealthMonitor, HealthProbe};
pub use manager::{ClientManagerError, McpClientManager};
