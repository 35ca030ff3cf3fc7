//! Audit trail for MCP server lifecycle events and tool invocations.

use crate::logging::formatter::redact_json_value;
use crate::types::LogError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::fs::OpenOptions;
use tracing::debug;

/// Appends newline-delimited JSON audit entries to a rotating log file.
#[derive(Debug)]
pub struct AuditLogger {
    log_path: PathBuf,
    max_size: u64,
    max_age_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub server_name: String,
    pub action: AuditAction,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub result: AuditResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Start,
    Stop,
    Restart,
    ConfigUpdate,
    ToolInvoke,
    HealthCheck,
    SecretAccess,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Skipped,
    InProgress,
}

impl AuditLogger {
    pub fn new() -> anyhow::Result<Self> {
        let log_path = crate::logging::default_audit_log_path();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            log_path,
            max_size: 10 * 1024 * 1024,
            max_age_days: 7,
        })
    }

    pub fn with_settings(log_path: PathBuf, max_size: u64, max_age_days: u64) -> Self {
        Self { log_path, max_size, max_age_days }
    }

    pub async fn log(&self, entry: AuditEntry) -> Result<(), LogError> {
        if self.should_rotate().await? {
            self.rotate_log().await?;
        }

        let redacted_entry = redact_audit_entry(entry);
        let json_line = serde_json::to_string(&redacted_entry).map_err(|error| LogError::parsing_error(error.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .map_err(|error| LogError::export_failed(error.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.log_path, permissions)
                .await
                .map_err(|error| LogError::export_failed(error.to_string()))?;
        }

        file.write_all(json_line.as_bytes())
            .await
            .map_err(|error| LogError::export_failed(error.to_string()))?;
        file.write_all(b"\n").await.map_err(|error| LogError::export_failed(error.to_string()))?;

        debug!(server = %redacted_entry.server_name, action = ?redacted_entry.action, result = ?redacted_entry.result, "audit entry");
        Ok(())
    }

    async fn should_rotate(&self) -> Result<bool, LogError> {
        if !self.log_path.exists() {
            return Ok(false);
        }
        let metadata = tokio::fs::metadata(&self.log_path).await.map_err(|error| LogError::rotation_failed(error.to_string()))?;
        if metadata.len() > self.max_size {
            return Ok(true);
        }
        let modified = metadata.modified().map_err(|error| LogError::rotation_failed(error.to_string()))?;
        let age = std::time::SystemTime::now()
            .duration_since(modified)
            .map_err(|error| LogError::rotation_failed(error.to_string()))?;
        Ok(age.as_secs() > self.max_age_days * 24 * 60 * 60)
    }

    async fn rotate_log(&self) -> Result<(), LogError> {
        if !self.log_path.exists() {
            return Ok(());
        }
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let rotated_path = self.log_path.with_extension(format!("{timestamp}.jsonl"));
        tokio::fs::rename(&self.log_path, &rotated_path)
            .await
            .map_err(|error| LogError::rotation_failed(error.to_string()))?;
        debug!(from = %self.log_path.display(), to = %rotated_path.display(), "rotated audit log");
        Ok(())
    }

    pub async fn read_recent(&self, count: usize) -> Result<Vec<AuditEntry>, LogError> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.log_path).await.map_err(|error| LogError::export_failed(error.to_string()))?;

        let mut entries: Vec<AuditEntry> = content.lines().rev().take(count).filter_map(|line| serde_json::from_str(line).ok()).collect();
        entries.reverse();
        Ok(entries)
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }
}

fn redact_audit_entry(mut entry: AuditEntry) -> AuditEntry {
    let mut redacted = serde_json::Map::new();
    for (key, value) in entry.metadata {
        redacted.insert(key, redact_json_value(value));
    }
    entry.metadata = redacted;
    entry
}

impl AuditEntry {
    pub fn server_start(server_name: String, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            server_name,
            action: AuditAction::Start,
            metadata,
            result: AuditResult::Success,
        }
    }

    pub fn server_stop(server_name: String, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            server_name,
            action: AuditAction::Stop,
            metadata,
            result: AuditResult::Success,
        }
    }

    pub fn tool_invoke(server_name: String, tool_name: String, result: AuditResult) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("tool_name".to_string(), serde_json::Value::String(tool_name));
        Self {
            timestamp: Utc::now(),
            server_name,
            action: AuditAction::ToolInvoke,
            metadata,
            result,
        }
    }

    pub fn health_check(server_name: String, healthy: bool, latency_ms: Option<u64>) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("healthy".to_string(), serde_json::Value::Bool(healthy));
        if let Some(latency) = latency_ms {
            metadata.insert("latency_ms".to_string(), serde_json::Value::Number(latency.into()));
        }
        Self {
            timestamp: Utc::now(),
            server_name,
            action: AuditAction::HealthCheck,
            metadata,
            result: if healthy { AuditResult::Success } else { AuditResult::Failure },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_and_reads_back_entry() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.jsonl");
        let logger = AuditLogger::with_settings(log_path, 1024, 1);

        logger.log(AuditEntry::server_start("test-server".to_string(), serde_json::Map::new())).await.unwrap();

        let entries = logger.read_recent(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].server_name, "test-server");
        assert_eq!(entries[0].action, AuditAction::Start);
    }

    #[tokio::test]
    async fn redacts_sensitive_metadata_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.jsonl");
        let logger = AuditLogger::with_settings(log_path, 1024, 1);

        let mut metadata = serde_json::Map::new();
        metadata.insert("api_key".to_string(), serde_json::Value::String("sk-live-abc123".to_string()));
        logger
            .log(AuditEntry {
                timestamp: Utc::now(),
                server_name: "test-server".to_string(),
                action: AuditAction::SecretAccess,
                metadata,
                result: AuditResult::Success,
            })
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(logger.log_path()).await.unwrap();
        assert!(!raw.contains("sk-live-abc123"));
        assert!(raw.contains("[REDACTED]"));
    }

    #[test]
    fn tool_invoke_entry_carries_tool_name() {
        let entry = AuditEntry::tool_invoke("srv".to_string(), "search".to_string(), AuditResult::Success);
        assert_eq!(entry.metadata["tool_name"], "search");
    }
}
