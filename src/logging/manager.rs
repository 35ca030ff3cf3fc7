//! Core log manager behavior: per-server ring buffers, audit trail, and
//! stderr capture from stdio MCP child processes.

use crate::logging::audit::{AuditEntry, AuditLogger};
use crate::logging::formatter::LogFormatter;
use crate::logging::ring_buffer::LogRingBuffer;
use crate::types::{LogEntry, LogError, LogLevel, LogSource};
use dirs_next::config_dir;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const DEFAULT_MAX_LOG_ENTRIES_PER_SERVER: usize = 1000;

/// Stores and manages logs for every MCP server the gateway manages.
#[derive(Debug)]
pub struct LogManager {
    buffers: Arc<Mutex<HashMap<String, LogRingBuffer>>>,
    audit_logger: AuditLogger,
    formatter: LogFormatter,
    max_entries_per_server: usize,
}

impl LogManager {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            buffers: Arc::new(Mutex::new(HashMap::new())),
            audit_logger: AuditLogger::new()?,
            formatter: LogFormatter::new(),
            max_entries_per_server: DEFAULT_MAX_LOG_ENTRIES_PER_SERVER,
        })
    }

    /// Adds a log entry to a server's ring buffer.
    pub async fn add_log(&self, server_name: &str, entry: LogEntry) {
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers.entry(server_name.to_string()).or_insert_with(|| LogRingBuffer::new(self.max_entries_per_server));
        buffer.add_entry(entry);
    }

    /// Captures a single stderr line from a stdio MCP server's child process.
    ///
    /// Called from the stderr-reading task spawned alongside the child; every
    /// line becomes a [`LogEntry`] at [`LogLevel::Info`] under [`LogSource::Stderr`].
    pub async fn add_stderr_line(&self, server_name: &str, line: String) {
        tracing::debug!(server = server_name, "{line}");
        self.add_log(server_name, LogEntry::new(LogLevel::Info, line, LogSource::Stderr, server_name.to_string())).await;
    }

    pub async fn get_recent_logs(&self, server_name: &str, count: usize) -> Vec<LogEntry> {
        let buffers = self.buffers.lock().await;
        buffers.get(server_name).map_or_else(Vec::new, |buffer| buffer.get_recent(count))
    }

    pub async fn get_all_logs(&self, server_name: &str) -> Vec<LogEntry> {
        let buffers = self.buffers.lock().await;
        buffers.get(server_name).map_or_else(Vec::new, LogRingBuffer::get_all)
    }

    pub async fn clear_logs(&self, server_name: &str) {
        let mut buffers = self.buffers.lock().await;
        if let Some(buffer) = buffers.get_mut(server_name) {
            buffer.clear();
        }
    }

    /// Exports all logs for `server_name` with default redaction applied.
    pub async fn export_logs(&self, server_name: &str, path: &Path) -> Result<(), LogError> {
        self.export_logs_with_redaction(server_name, path, true).await
    }

    pub async fn export_logs_with_redaction(&self, server_name: &str, path: &Path, redact: bool) -> Result<(), LogError> {
        let logs = self.get_all_logs(server_name).await;
        let content = self.build_export_content(logs, redact);
        tokio::fs::write(path, content).await.map_err(|error| LogError::export_failed(error.to_string()))?;
        Ok(())
    }

    fn build_export_content(&self, logs: Vec<LogEntry>, redact: bool) -> String {
        let mut content = String::new();
        for log_entry in logs {
            let line = if redact { self.formatter.format(&log_entry) } else { self.formatter.format_for_export(&log_entry) };
            content.push_str(&line);
            content.push('\n');
        }
        content
    }

    pub async fn log_audit(&self, entry: AuditEntry) -> Result<(), LogError> {
        self.audit_logger.log(entry).await
    }

    pub fn audit_logger(&self) -> &AuditLogger {
        &self.audit_logger
    }

    pub fn formatter(&self) -> &LogFormatter {
        &self.formatter
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new().expect("failed to create log manager")
    }
}

/// Default path for the gateway's audit log, under the OS config directory.
pub fn default_audit_log_path() -> PathBuf {
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("llamagate").join("mcp-audit.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_manager_stores_recent_entries() {
        let manager = LogManager::new().unwrap();
        let entry = LogEntry::new(LogLevel::Info, "Test message".to_string(), LogSource::System, "test-server".to_string());

        manager.add_log("test-server", entry).await;

        let logs = manager.get_recent_logs("test-server", 10).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "Test message");
    }

    #[tokio::test]
    async fn stderr_line_is_tagged_with_stderr_source() {
        let manager = LogManager::new().unwrap();
        manager.add_stderr_line("srv", "panic: out of memory".to_string()).await;

        let logs = manager.get_all_logs("srv").await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].source, LogSource::Stderr);
    }

    #[tokio::test]
    async fn export_logs_respects_redaction_flag() {
        let manager = LogManager::new().unwrap();
        let secret_message = "API key: abc123def456".to_string();
        let entry = LogEntry::new(LogLevel::Info, secret_message.clone(), LogSource::System, "server".to_string());
        manager.add_log("server", entry).await;

        let mut redacted_path = std::env::temp_dir();
        redacted_path.push("llamagate_log_redacted.txt");
        let mut raw_path = std::env::temp_dir();
        raw_path.push("llamagate_log_raw.txt");

        manager.export_logs_with_redaction("server", &redacted_path, true).await.unwrap();
        manager.export_logs_with_redaction("server", &raw_path, false).await.unwrap();

        let redacted = tokio::fs::read_to_string(&redacted_path).await.unwrap();
        let raw = tokio::fs::read_to_string(&raw_path).await.unwrap();

        assert!(redacted.contains("[REDACTED]"));
        assert!(raw.contains(&secret_message));

        let _ = tokio::fs::remove_file(redacted_path).await;
        let _ = tokio::fs::remove_file(raw_path).await;
    }
}
