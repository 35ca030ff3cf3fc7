//! Configuration management for MCP servers and the gateway process.
//!
//! Two independent surfaces (`SPEC_FULL.md` A.1): the process-wide [`GatewayConfig`]
//! read once from environment variables, and the declarative [`McpConfig`] describing
//! the MCP servers to connect to, loaded from a YAML (or JSON) file.

mod gateway;
mod interpolation;
mod model;
mod validation;

pub use gateway::GatewayConfig;
pub use interpolation::{InterpolationError, interpolate_config};
pub use model::{ConfigError, McpAuthConfig, McpConfig, McpServer, TransportType};
pub use validation::{ValidationError, validate_config, validate_server_name};

use std::env;
use std::path::{Path, PathBuf};

/// Resolve the MCP server config path: `$LLAMAGATE_CONFIG_PATH`, else `./llamagate.yaml`,
/// else `$HOME/.llamagate/config.yaml` (`spec.md` §6).
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var("LLAMAGATE_CONFIG_PATH")
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    let cwd_candidate = PathBuf::from("llamagate.yaml");
    if cwd_candidate.exists() {
        return cwd_candidate;
    }

    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".llamagate")
        .join("config.yaml")
}

/// Load and parse the MCP configuration from the default location.
pub async fn load_config() -> anyhow::Result<McpConfig> {
    let path = default_config_path();
    load_config_from_path(&path).await
}

/// Load and parse the MCP configuration from a specific path. A missing file is not
/// an error — it yields an empty server set (MCP features degrade gracefully).
pub async fn load_config_from_path(path: &Path) -> anyhow::Result<McpConfig> {
    if !path.exists() {
        return Ok(McpConfig::default());
    }

    let content = tokio::fs::read_to_string(path).await?;
    let mut config: McpConfig = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };

    interpolate_config(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Save the MCP configuration to the default location.
pub async fn save_config(config: &McpConfig) -> anyhow::Result<()> {
    let path = default_config_path();
    save_config_to_path(config, &path).await
}

/// Save the MCP configuration to a specific path.
pub async fn save_config_to_path(config: &McpConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let content = serde_yaml::to_string(config)?;
    tokio::fs::write(path, content).await?;

    Ok(())
}

fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_honors_env_override() {
        let override_path = "~/custom/llamagate/config.yaml";
        unsafe {
            env::set_var("LLAMAGATE_CONFIG_PATH", override_path);
        }
        let path = default_config_path();
        let expected = expand_tilde(override_path);
        assert_eq!(path, expected);
        unsafe {
            env::remove_var("LLAMAGATE_CONFIG_PATH");
        }
    }
}
