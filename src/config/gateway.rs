//! Process-wide gateway configuration, read once at startup from environment
//! variables (`spec.md` §6, `SPEC_FULL.md` A.1).
//!
//! Unset variables fall back to the documented defaults; a *set* variable that
//! fails to parse is a hard startup error rather than a silent fallback.

use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum GatewayConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue { name: &'static str, value: String, reason: String },
}

/// Process configuration (`SPEC_FULL.md` A.1's `GatewayConfig`).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub ollama_host: Url,
    pub port: u16,
    /// Empty string disables authentication entirely.
    pub api_key: String,
    pub rate_limit_rps: u32,
    /// Backend HTTP request timeout, clamped to 30 minutes.
    pub backend_timeout: Duration,
    /// `None` means log to stderr.
    pub log_file: Option<String>,
    pub debug: bool,

    pub max_rounds: u32,
    pub max_calls_per_round: u32,
    pub max_total_calls: u32,
    pub result_size_ceiling_bytes: usize,

    pub completions_cache_ttl: Duration,
    pub completions_cache_max_bytes: usize,
}

const MAX_BACKEND_TIMEOUT: Duration = Duration::from_secs(30 * 60);

impl GatewayConfig {
    /// Load from the process environment, per `spec.md` §6's enumerated keys.
    pub fn from_env() -> Result<Self, GatewayConfigError> {
        let ollama_host = parse_env("OLLAMA_HOST", "http://localhost:11434", |v| {
            Url::parse(v).map_err(|e| e.to_string())
        })?;
        let port = parse_env("PORT", "11435", |v| v.parse::<u16>().map_err(|e| e.to_string()))?;
        let api_key = env::var("API_KEY").unwrap_or_default();
        let rate_limit_rps = parse_env("RATE_LIMIT_RPS", "50", |v| v.parse::<u32>().map_err(|e| e.to_string()))?;

        let timeout_secs = parse_env("TIMEOUT", "300", |v| v.parse::<u64>().map_err(|e| e.to_string()))?;
        let backend_timeout = Duration::from_secs(timeout_secs).min(MAX_BACKEND_TIMEOUT);

        let log_file = env::var("LOG_FILE").ok().filter(|v| !v.trim().is_empty());
        let debug = parse_bool_env("DEBUG", false)?;

        let max_rounds = parse_env("MAX_ROUNDS", "10", |v| v.parse::<u32>().map_err(|e| e.to_string()))?;
        let max_calls_per_round = parse_env("MAX_CALLS_PER_ROUND", "5", |v| v.parse::<u32>().map_err(|e| e.to_string()))?;
        let max_total_calls = parse_env("MAX_TOTAL_CALLS", "25", |v| v.parse::<u32>().map_err(|e| e.to_string()))?;
        let result_size_ceiling_bytes = parse_env("RESULT_SIZE_CEILING_BYTES", "1048576", |v| {
            v.parse::<usize>().map_err(|e| e.to_string())
        })?;

        let completions_cache_ttl_secs = parse_env("COMPLETIONS_CACHE_TTL_SECS", "300", |v| v.parse::<u64>().map_err(|e| e.to_string()))?;
        let completions_cache_max_bytes = parse_env("COMPLETIONS_CACHE_MAX_BYTES", "67108864", |v| {
            v.parse::<usize>().map_err(|e| e.to_string())
        })?;

        Ok(Self {
            ollama_host,
            port,
            api_key,
            rate_limit_rps,
            backend_timeout,
            log_file,
            debug,
            max_rounds,
            max_calls_per_round,
            max_total_calls,
            result_size_ceiling_bytes,
            completions_cache_ttl: Duration::from_secs(completions_cache_ttl_secs),
            completions_cache_max_bytes,
        })
    }

    pub fn auth_disabled(&self) -> bool {
        self.api_key.is_empty()
    }
}

fn parse_env<T>(name: &'static str, default: &str, parse: impl Fn(&str) -> Result<T, String>) -> Result<T, GatewayConfigError> {
    match env::var(name) {
        Ok(value) => parse(&value).map_err(|reason| GatewayConfigError::InvalidValue { name, value, reason }),
        Err(_) => parse(default).map_err(|reason| GatewayConfigError::InvalidValue {
            name,
            value: default.to_string(),
            reason,
        }),
    }
}

fn parse_bool_env(name: &'static str, default: bool) -> Result<bool, GatewayConfigError> {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(GatewayConfigError::InvalidValue {
                name,
                value,
                reason: "expected a boolean".to_string(),
            }),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_env::with_vars;

    #[test]
    fn defaults_when_unset() {
        with_vars(
            Vec::<(&str, Option<&str>)>::from([
                ("OLLAMA_HOST", None),
                ("PORT", None),
                ("API_KEY", None),
                ("TIMEOUT", None),
                ("DEBUG", None),
            ]),
            || {
                let cfg = GatewayConfig::from_env().expect("defaults parse");
                assert_eq!(cfg.port, 11435);
                assert_eq!(cfg.rate_limit_rps, 50);
                assert!(cfg.auth_disabled());
                assert!(!cfg.debug);
            },
        );
    }

    #[test]
    fn clamps_timeout_to_30_minutes() {
        with_vars(vec![("TIMEOUT", Some("999999"))], || {
            let cfg = GatewayConfig::from_env().expect("parses");
            assert_eq!(cfg.backend_timeout, Duration::from_secs(30 * 60));
        });
    }

    #[test]
    fn rejects_malformed_set_value() {
        with_vars(vec![("PORT", Some("not-a-port"))], || {
            assert!(GatewayConfig::from_env().is_err());
        });
    }
}
