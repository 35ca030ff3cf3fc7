//! LlamaGate: an OpenAI-compatible HTTP gateway fronting a local Ollama backend,
//! composing tool execution from Model Context Protocol (MCP) servers.
//!
//! This crate provides the MCP client stack (transports, health monitoring,
//! server management), the gateway's request pipeline, tool orchestration loop,
//! completions cache, and the axum router tying it all together.

pub mod backend;
pub mod cache;
pub mod client;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod state;
pub mod toolloop;
pub mod types;

pub use config::{ConfigError, McpConfig, McpServer};
pub use state::AppState;
pub use types::{EnvVar, GatewayError, HealthStatus, LogEntry, McpError, PluginStatus};

pub use rmcp::{
    model::{CallToolResult, Content, Tool},
    service::{Service, ServiceExt},
};
