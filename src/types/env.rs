//! Environment-variable and HTTP-header value types shared by the MCP config model.
//!
//! Kept as a small, crate-local type rather than a free-floating `(String, String)`
//! tuple so the config loader can record *where* a value came from (literal, `${env:}`,
//! `${secret:}`) without losing that provenance once interpolation has run.

use serde::{Deserialize, Serialize};

/// Where an env var / header value's content originated, as recorded at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvSource {
    /// A literal value written directly in the config file.
    Raw,
    /// Sourced from `${env:NAME}` at interpolation time.
    Env,
    /// Sourced from `${secret:NAME}` via the OS keyring at interpolation time.
    Secret,
    /// Sourced from a file reference (reserved for future `${file:...}` support).
    File,
}

/// A single environment variable or HTTP header entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
    #[serde(default = "default_source")]
    pub source: EnvSource,
    #[serde(default = "default_effective")]
    pub effective: bool,
}

fn default_source() -> EnvSource {
    EnvSource::Raw
}

fn default_effective() -> bool {
    true
}

/// Heuristic used when a config entry's source wasn't recorded explicitly: a value
/// that is itself still an unresolved `${env:...}` / `${secret:...}` placeholder is
/// classified by its placeholder kind; anything else is `Raw`.
pub fn is_secret(value: &str) -> bool {
    value.trim_start().starts_with("${secret:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_secret_detects_placeholder() {
        assert!(is_secret("${secret:GITHUB_TOKEN}"));
        assert!(!is_secret("${env:GITHUB_TOKEN}"));
        assert!(!is_secret("plain-value"));
    }
}
