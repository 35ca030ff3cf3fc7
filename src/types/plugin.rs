//! Lifecycle status and log-entry types shared by the MCP client stack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single MCP client connection (`spec.md` §3's "MCP client session").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl PluginStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, PluginStatus::Running)
    }
}

/// Severity of a captured log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Where a captured log line originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Emitted by the gateway itself (request pipeline, tool loop, ...).
    System,
    /// Captured from a stdio MCP server's stderr stream.
    Stderr,
    /// Forwarded from an HTTP/SSE MCP server's own structured log event.
    Remote,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogSource::System => "system",
            LogSource::Stderr => "stderr",
            LogSource::Remote => "remote",
        };
        write!(f, "{s}")
    }
}

/// One buffered log line, scoped to a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: LogSource,
    pub server: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: String, source: LogSource, server: String) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message,
            source,
            server,
        }
    }
}
