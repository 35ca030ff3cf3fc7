//! Transport/client-level error type shared by every MCP transport implementation.
//!
//! Kept distinct from `rmcp::ErrorData` (re-exported from the crate root as `RpcError`)
//! so that call sites are never ambiguous about which error they are handling: `McpError`
//! here is this crate's own domain error, constructed with the same
//! `McpError::transport(msg)`-style helper methods used throughout the codebase.

use thiserror::Error;

/// Errors produced by the Transport and MCP Client layers (`spec.md` §4.1, §4.2).
#[derive(Debug, Error)]
pub enum McpError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("transport closed")]
    TransportClosed,

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("handshake error: {message}")]
    Handshake { message: String },

    #[error("tool invocation error: {tool_name} - {message}")]
    ToolInvocation { tool_name: String, message: String },

    #[error("frame too large: {size} bytes exceeds ceiling {ceiling} bytes")]
    FrameTooLarge { size: usize, ceiling: usize },

    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("rpc error: {0}")]
    Rpc(#[from] rmcp::ErrorData),
}

impl McpError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake { message: message.into() }
    }

    pub fn tool_invocation(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolInvocation {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }

    /// Transient errors are worth one retry in the Tool Loop (`spec.md` §4.8, §7).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::TransportClosed | Self::Timeout { .. })
    }
}

/// Errors produced by the logging subsystem (ring buffer, audit log, export).
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log buffer full: {plugin_name}")]
    BufferFull { plugin_name: String },

    #[error("log rotation failed: {reason}")]
    RotationFailed { reason: String },

    #[error("log export failed: {reason}")]
    ExportFailed { reason: String },

    #[error("log parsing error: {reason}")]
    ParsingError { reason: String },

    #[error("log redaction error: {reason}")]
    RedactionError { reason: String },
}

impl LogError {
    pub fn buffer_full(plugin_name: impl Into<String>) -> Self {
        Self::BufferFull { plugin_name: plugin_name.into() }
    }

    pub fn rotation_failed(reason: impl Into<String>) -> Self {
        Self::RotationFailed { reason: reason.into() }
    }

    pub fn export_failed(reason: impl Into<String>) -> Self {
        Self::ExportFailed { reason: reason.into() }
    }

    pub fn parsing_error(reason: impl Into<String>) -> Self {
        Self::ParsingError { reason: reason.into() }
    }

    pub fn redaction_error(reason: impl Into<String>) -> Self {
        Self::RedactionError { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(McpError::transport("x").is_transient());
        assert!(McpError::TransportClosed.is_transient());
        assert!(McpError::timeout("tools/call", 500).is_transient());
        assert!(!McpError::handshake("bad version").is_transient());
        assert!(!McpError::tool_invocation("t", "schema mismatch").is_transient());
    }
}
