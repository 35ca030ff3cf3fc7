//! Shared application state, built once at startup and cloned cheaply (every
//! field is an `Arc`) into every request handler (`SPEC_FULL.md` A.1).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::backend::BackendProxy;
use crate::cache::CompletionsCache;
use crate::client::McpClientManager;
use crate::config::{GatewayConfig, McpConfig};
use crate::pipeline::RateLimiter;
use crate::pool::ConnectionPool;
use crate::registry::{MetadataCache, ToolRegistry};

/// Everything a request handler needs, wired together once in `main.rs`.
#[derive(Clone)]
pub struct AppState {
    pub mcp_manager: Arc<McpClientManager>,
    pub tool_registry: Arc<ToolRegistry>,
    pub metadata_cache: Arc<MetadataCache>,
    /// Bounded connection pools for HTTP-transport MCP servers only (`spec.md` §4.3).
    pub pools: Arc<RwLock<HashMap<String, Arc<ConnectionPool>>>>,
    pub completions_cache: Arc<CompletionsCache>,
    pub backend: Arc<BackendProxy>,
    pub rate_limiter: Arc<RateLimiter>,
    pub gateway_config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(gateway_config: GatewayConfig, mcp_config: McpConfig) -> anyhow::Result<Self> {
        let mcp_manager = Arc::new(McpClientManager::new(mcp_config.clone())?);
        let backend = Arc::new(BackendProxy::new(gateway_config.ollama_host.clone(), gateway_config.backend_timeout)?);
        let completions_cache = Arc::new(CompletionsCache::new(gateway_config.completions_cache_ttl, gateway_config.completions_cache_max_bytes));

        let mut pools = HashMap::new();
        for (name, server) in &mcp_config.mcp_servers {
            if server.is_http() && !server.is_disabled() {
                pools.insert(name.clone(), Arc::new(ConnectionPool::new(name.clone(), server.clone(), Arc::clone(mcp_manager.log_manager()))));
            }
        }

        let rate_limiter = Arc::new(RateLimiter::new(gateway_config.rate_limit_rps));

        Ok(Self {
            mcp_manager,
            tool_registry: Arc::new(ToolRegistry::new()),
            metadata_cache: Arc::new(MetadataCache::default()),
            pools: Arc::new(RwLock::new(pools)),
            completions_cache,
            backend,
            rate_limiter,
            gateway_config: Arc::new(gateway_config),
        })
    }

    /// Start the Server Manager and seed the Tool Registry with every
    /// currently-connected server's tools (`spec.md` §4.6).
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        self.mcp_manager.start().await?;
        for name in self.mcp_manager.list_servers().await {
            if let Some(tools) = self.mcp_manager.list_tools(&name).await
                && let Err(err) = self.tool_registry.replace_server_tools(&name, &tools)
            {
                tracing::warn!("failed to register tools for server '{}': {}", name, err);
            }
        }

        let pools = self.pools.read().await;
        for pool in pools.values() {
            ConnectionPool::spawn_janitor(Arc::clone(pool), std::time::Duration::from_secs(30));
        }

        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.mcp_manager.stop().await?;
        let pools = self.pools.read().await;
        for pool in pools.values() {
            pool.close_all().await;
        }
        Ok(())
    }

    pub async fn pool_for(&self, server_name: &str) -> Option<Arc<ConnectionPool>> {
        self.pools.read().await.get(server_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gateway_config() -> GatewayConfig {
        temp_env::with_vars(Vec::<(&str, Option<&str>)>::new(), || crate::config::GatewayConfig::from_env().unwrap())
    }

    #[test]
    fn new_builds_empty_pools_without_http_servers() {
        let state = AppState::new(test_gateway_config(), McpConfig::default()).unwrap();
        assert!(state.pools.try_read().unwrap().is_empty());
    }
}
