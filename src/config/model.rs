//! Data models for MCP server configuration (`spec.md` §3, `SPEC_FULL.md` A.1).

use crate::types::{EnvSource, EnvVar};
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// MCP configuration containing all configured servers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// Map of server names to server configurations.
    #[serde(rename = "mcpServers")]
    pub mcp_servers: HashMap<String, McpServer>,
}

/// Configuration for a single MCP server (`spec.md` §3's "Server descriptor").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct McpServer {
    /// Command to execute for stdio transport (required for stdio).
    pub command: Option<String>,

    /// Arguments to pass to the command.
    pub args: Option<Vec<String>>,

    /// Environment variables to set for the process.
    #[serde(
        default,
        deserialize_with = "deserialize_environment_variables",
        skip_serializing_if = "Option::is_none"
    )]
    pub env: Option<Vec<EnvVar>>,

    /// Working directory for the process.
    pub cwd: Option<PathBuf>,

    /// Base URL for HTTP/SSE transport (required for remote servers).
    pub base_url: Option<Url>,

    /// For the legacy `sse` transport, the paired endpoint requests are POSTed to,
    /// if different from `base_url` (`spec.md` §4.1).
    pub post_url: Option<Url>,

    /// Explicit transport selection. When omitted, inferred from `command`/`base_url`
    /// (`is_sse` discriminates `http` vs `sse` when a `base_url` is present).
    pub transport: Option<TransportType>,

    /// HTTP headers to include in requests.
    #[serde(
        default,
        deserialize_with = "deserialize_environment_variables",
        skip_serializing_if = "Option::is_none"
    )]
    pub headers: Option<Vec<EnvVar>>,

    /// Optional authorization configuration (e.g., Basic/Bearer/OAuth credentials).
    pub auth: Option<McpAuthConfig>,

    /// Whether this server is disabled.
    pub disabled: Option<bool>,

    /// Per-call deadline override for this server (seconds). Falls back to the
    /// gateway-wide tool-loop default when unset (`spec.md` §4.8).
    pub timeout_secs: Option<u64>,

    /// Glob patterns matched against a tool's *original* (unnamespaced) name; if
    /// non-empty, only matching tools are advertised (`spec.md` §3, §4.5).
    #[serde(default)]
    pub allow_tools: Vec<String>,

    /// Glob patterns matched against a tool's original name; matching tools are
    /// dropped even if they also match `allow_tools` (`spec.md` §3, §4.5).
    #[serde(default)]
    pub deny_tools: Vec<String>,

    /// Optional tags for display/filtering in the UI.
    pub tags: Option<Vec<String>>,

    /// Set when this server's configuration failed to load/interpolate/validate.
    pub err: Option<String>,
}

fn default_effective_flag() -> bool {
    true
}

fn deserialize_environment_variables<'de, D>(deserializer: D) -> Result<Option<Vec<EnvVar>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw_collection = Option::<RawEnvironmentVariableCollection>::deserialize(deserializer)?;
    Ok(raw_collection.map(|collection| collection.into_environment_variables()))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnvironmentVariableCollection {
    List(Vec<RawEnvironmentVariable>),
    Map(HashMap<String, RawEnvironmentVariableValue>),
}

impl RawEnvironmentVariableCollection {
    fn into_environment_variables(self) -> Vec<EnvVar> {
        match self {
            RawEnvironmentVariableCollection::List(list) => {
                list.into_iter().map(RawEnvironmentVariable::into_environment_variable).collect()
            }
            RawEnvironmentVariableCollection::Map(map) => {
                let mut variables: Vec<EnvVar> = map.into_iter().map(|(key, value)| value.into_environment_variable(key)).collect();
                variables.sort_by(|a, b| a.key.cmp(&b.key));
                variables
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvironmentVariable {
    key: String,
    value: String,
    #[serde(default)]
    source: Option<EnvSource>,
    #[serde(default)]
    effective: Option<bool>,
}

impl RawEnvironmentVariable {
    fn into_environment_variable(self) -> EnvVar {
        let RawEnvironmentVariable {
            key,
            value,
            source,
            effective,
        } = self;

        let environment_source = compute_environment_source(source, &value);
        EnvVar {
            key,
            value,
            source: environment_source,
            effective: effective.unwrap_or_else(default_effective_flag),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnvironmentVariableValue {
    Simple(String),
    Detailed(RawEnvironmentVariableDetail),
}

impl RawEnvironmentVariableValue {
    fn into_environment_variable(self, key: String) -> EnvVar {
        match self {
            RawEnvironmentVariableValue::Simple(value) => {
                let environment_source = compute_environment_source(None, &value);
                EnvVar {
                    key,
                    value,
                    source: environment_source,
                    effective: default_effective_flag(),
                }
            }
            RawEnvironmentVariableValue::Detailed(detail) => detail.into_environment_variable(key),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvironmentVariableDetail {
    value: String,
    #[serde(default)]
    source: Option<EnvSource>,
    #[serde(default)]
    effective: Option<bool>,
}

impl RawEnvironmentVariableDetail {
    fn into_environment_variable(self, key: String) -> EnvVar {
        let environment_source = compute_environment_source(self.source, &self.value);
        EnvVar {
            key,
            value: self.value,
            source: environment_source,
            effective: self.effective.unwrap_or_else(default_effective_flag),
        }
    }
}

fn compute_environment_source(provided_source: Option<EnvSource>, value: &str) -> EnvSource {
    if let Some(source) = provided_source {
        return source;
    }
    super::interpolation::determine_env_source(value)
}

impl Default for McpServer {
    fn default() -> Self {
        Self {
            command: None,
            args: None,
            env: None,
            cwd: None,
            base_url: None,
            post_url: None,
            transport: None,
            headers: None,
            auth: None,
            disabled: Some(false),
            timeout_secs: None,
            allow_tools: Vec::new(),
            deny_tools: Vec::new(),
            tags: None,
            err: None,
        }
    }
}

impl McpServer {
    pub fn is_stdio(&self) -> bool {
        matches!(self.transport, Some(TransportType::Stdio)) || (self.transport.is_none() && self.command.is_some())
    }

    pub fn is_http(&self) -> bool {
        matches!(self.transport, Some(TransportType::Http)) || (self.transport.is_none() && self.command.is_none() && self.base_url.is_some())
    }

    pub fn is_sse(&self) -> bool {
        matches!(self.transport, Some(TransportType::Sse))
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(false)
    }

    pub fn transport_type(&self) -> TransportType {
        if self.is_sse() {
            TransportType::Sse
        } else if self.is_stdio() {
            TransportType::Stdio
        } else if self.is_http() {
            TransportType::Http
        } else {
            TransportType::Unknown
        }
    }

    /// Per-call deadline for this server, falling back to `default` when unset.
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }

    /// Whether `tool_name` (the server's own, unnamespaced name) passes this
    /// server's allow/deny glob policy (`spec.md` §3, §4.5). Deny wins over allow.
    pub fn permits_tool(&self, tool_name: &str) -> bool {
        let denied = self.deny_tools.iter().any(|pattern| glob_matches(pattern, tool_name));
        if denied {
            return false;
        }
        if self.allow_tools.is_empty() {
            return true;
        }
        self.allow_tools.iter().any(|pattern| glob_matches(pattern, tool_name))
    }
}

fn glob_matches(pattern: &str, name: &str) -> bool {
    glob::Pattern::new(pattern).map(|p| p.matches(name)).unwrap_or(false)
}

/// Authorization configuration for MCP servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct McpAuthConfig {
    /// Authorization scheme: "basic", "bearer", or "oauth"/"oauth2".
    pub scheme: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Token (supports interpolation). If present without username/password,
    /// used directly as a Bearer token (or OAuth access token).
    pub token: Option<String>,
    pub header_name: Option<String>,
    pub interactive: Option<bool>,
}

/// Transport type for MCP servers (`spec.md` §3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Stdio,
    Http,
    Sse,
    Unknown,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Stdio => write!(f, "stdio"),
            TransportType::Http => write!(f, "http"),
            TransportType::Sse => write!(f, "sse"),
            TransportType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Interpolation error: {0}")]
    Interpolation(#[from] crate::config::InterpolationError),

    #[error("Validation error: {0}")]
    Validation(#[from] crate::config::ValidationError),

    #[error("Configuration error: {message}")]
    Invalid { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_spec_style_config() {
        let yaml = r#"
mcpServers:
  server-name:
    command: node
    args: ["-e", "require('@mcp/server').start()"]
    env:
      - key: FOO
        value: bar
      - key: API_TOKEN
        value: "${env:API_TOKEN}"
    cwd: /path/optional
    disabled: false
    tags: ["code", "gh"]
    allowTools: ["read_*"]
  remote-example:
    baseUrl: "https://mcp.example.com"
    headers:
      Authorization: "Bearer ${secret:EXAMPLE_TOKEN}"
    disabled: false
"#;

        let cfg: McpConfig = serde_yaml::from_str(yaml).expect("config deserializes");
        assert!(cfg.mcp_servers.contains_key("server-name"));
        assert!(cfg.mcp_servers.contains_key("remote-example"));

        let stdio = cfg.mcp_servers.get("server-name").unwrap();
        assert!(stdio.is_stdio());
        assert_eq!(stdio.command.as_deref(), Some("node"));
        assert!(stdio.permits_tool("read_file"));
        assert!(!stdio.permits_tool("write_file"));

        let http = cfg.mcp_servers.get("remote-example").unwrap();
        assert!(http.is_http());
        assert_eq!(http.base_url.as_ref().unwrap().as_str(), "https://mcp.example.com/");
    }

    #[test]
    fn deny_wins_over_allow() {
        let mut server = McpServer {
            command: Some("node".into()),
            ..Default::default()
        };
        server.allow_tools = vec!["*".to_string()];
        server.deny_tools = vec!["danger_*".to_string()];
        assert!(server.permits_tool("read_file"));
        assert!(!server.permits_tool("danger_delete"));
    }

    #[test]
    fn serialize_uses_camel_case_keys() {
        let mut cfg = McpConfig::default();
        let server = McpServer {
            base_url: Some(Url::parse("https://api.example").unwrap()),
            ..Default::default()
        };
        cfg.mcp_servers.insert("svc".to_string(), server);

        let json = serde_json::to_string(&cfg).expect("serialize");
        assert!(json.contains("\"mcpServers\""));
        assert!(json.contains("\"baseUrl\""));
    }
}
