//! Core domain types shared across the MCP client stack and the gateway itself.

pub mod env;
pub mod errors;
pub mod gateway_error;
pub mod openai;
pub mod plugin;
pub mod status;
pub mod tools;

pub use env::{EnvSource, EnvVar, is_secret};
pub use errors::{LogError, McpError};
pub use gateway_error::GatewayError;
pub use openai::{
    ChatCompletionChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ModelEntry, ModelListResponse, ToolCall,
    ToolCallFunction, ToolFunctionSpec, ToolSpec,
};
pub use plugin::{LogEntry, LogLevel, LogSource, PluginStatus};
pub use status::{HealthState, HealthStatus, TransportStatus, UNHEALTHY_THRESHOLD};
pub use tools::{McpToolMetadata, PromptDescriptor, ResourceDescriptor, ToolDescriptor, split_qualified_name};
