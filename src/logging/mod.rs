//! Logging system for MCP servers: per-server ring buffers, redaction,
//! and an append-only audit trail for lifecycle and tool-invocation events.

pub(crate) mod audit;
pub(crate) mod formatter;
mod manager;
pub(crate) mod ring_buffer;

pub use audit::{AuditAction, AuditEntry, AuditLogger, AuditResult};
pub use formatter::{LogFormatter, RedactionRules, redact_json_value, redact_sensitive_with};
pub use manager::{LogManager, default_audit_log_path};
pub use ring_buffer::LogRingBuffer;
