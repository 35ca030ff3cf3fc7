//! The Server Manager: registry and lifecycle owner for every configured MCP
//! server, plus the single place that actually dispatches tool calls.

use crate::client::core::McpClient;
use crate::client::health::{HealthCheckResult, HealthMonitor, HealthProbe};
use crate::config::McpConfig;
use crate::logging::LogManager;
use crate::types::{HealthStatus, McpToolMetadata, PluginStatus};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Registry and lifecycle manager for MCP servers.
#[derive(Clone)]
pub struct McpClientManager {
    active_clients: Arc<Mutex<HashMap<String, Arc<Mutex<McpClient>>>>>,
    starting: Arc<Mutex<HashSet<String>>>,
    config: Arc<RwLock<McpConfig>>,
    health_monitor: HealthMonitor,
    log_manager: Arc<LogManager>,
}

impl McpClientManager {
    pub fn new(config: McpConfig) -> anyhow::Result<Self> {
        Ok(Self {
            active_clients: Arc::new(Mutex::new(HashMap::new())),
            starting: Arc::new(Mutex::new(HashSet::new())),
            config: Arc::new(RwLock::new(config)),
            health_monitor: HealthMonitor::new(),
            log_manager: Arc::new(LogManager::new()?),
        })
    }

    /// Start health monitoring and auto-start every non-disabled configured server.
    pub async fn start(self: &Arc<Self>) -> Result<(), ClientManagerError> {
        self.health_monitor.start(Arc::clone(self) as Arc<dyn HealthProbe>).await;

        let snapshot = self.config.read().await.clone();
        for (name, server) in &snapshot.mcp_servers {
            if !server.is_disabled()
                && let Err(err) = self.start_server(name).await
            {
                warn!("auto-start of server '{}' failed: {}", name, err);
            }
        }
        debug!("server manager started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ClientManagerError> {
        self.disconnect_all().await;
        self.health_monitor.stop().await;
        debug!("server manager stopped");
        Ok(())
    }

    async fn disconnect_all(&self) {
        let mut clients = self.active_clients.lock().await;
        for (name, handle) in clients.iter() {
            let mut client = handle.lock().await;
            if let Err(err) = client.disconnect().await {
                warn!("failed to disconnect server '{}': {}", name, err);
            }
        }
        clients.clear();
    }

    /// Start (connect) a single configured server by name.
    pub async fn start_server(&self, name: &str) -> Result<Arc<Vec<McpToolMetadata>>, ClientManagerError> {
        let server = {
            let config = self.config.read().await;
            config
                .mcp_servers
                .get(name)
                .cloned()
                .ok_or_else(|| ClientManagerError::NotFound { name: name.to_string() })?
        };

        if server.is_disabled() {
            return Err(ClientManagerError::Disabled { name: name.to_string() });
        }

        {
            let active = self.active_clients.lock().await;
            if active.contains_key(name) {
                return Err(ClientManagerError::AlreadyRunning { name: name.to_string() });
            }
        }
        {
            let mut starting = self.starting.lock().await;
            if !starting.insert(name.to_string()) {
                return Err(ClientManagerError::AlreadyRunning { name: name.to_string() });
            }
        }

        let mut client = McpClient::new(name.to_string(), server, Arc::clone(&self.log_manager));
        let connect_result = client.connect().await;

        self.starting.lock().await.remove(name);

        match connect_result {
            Ok(tools) => {
                self.health_monitor.register_server(name.to_string()).await;
                self.active_clients.lock().await.insert(name.to_string(), Arc::new(Mutex::new(client)));
                debug!("started server '{}'", name);
                Ok(tools)
            }
            Err(err) => Err(ClientManagerError::Connection { message: err.to_string() }),
        }
    }

    pub async fn stop_server(&self, name: &str) -> Result<(), ClientManagerError> {
        let removed = self.active_clients.lock().await.remove(name);
        if let Some(handle) = removed {
            let mut client = handle.lock().await;
            client
                .disconnect()
                .await
                .map_err(|err| ClientManagerError::Connection { message: err.to_string() })?;
            self.health_monitor.unregister_server(name).await;
            debug!("stopped server '{}'", name);
        }
        Ok(())
    }

    pub async fn restart_server(&self, name: &str) -> Result<Arc<Vec<McpToolMetadata>>, ClientManagerError> {
        self.stop_server(name).await?;
        self.start_server(name).await
    }

    pub async fn get_status(&self, name: &str) -> PluginStatus {
        if self.starting.lock().await.contains(name) {
            return PluginStatus::Starting;
        }
        let clients = self.active_clients.lock().await;
        match clients.get(name) {
            Some(handle) => handle.lock().await.status(),
            None => PluginStatus::Stopped,
        }
    }

    pub async fn get_health(&self, name: &str) -> Option<HealthStatus> {
        self.health_monitor.get_health(name).await
    }

    pub async fn get_all_health(&self) -> HashMap<String, HealthStatus> {
        self.health_monitor.get_all_health().await
    }

    pub async fn get_client(&self, name: &str) -> Option<Arc<Mutex<McpClient>>> {
        self.active_clients.lock().await.get(name).cloned()
    }

    pub async fn list_servers(&self) -> Vec<String> {
        self.active_clients.lock().await.keys().cloned().collect()
    }

    pub async fn list_configured_servers(&self) -> Vec<String> {
        self.config.read().await.mcp_servers.keys().cloned().collect()
    }

    /// Tools exposed by a connected server, filtered by that server's
    /// allow/deny glob policy.
    pub async fn list_tools(&self, name: &str) -> Option<Vec<McpToolMetadata>> {
        let handle = self.get_client(name).await?;
        let client = handle.lock().await;
        let server = client.server_config().clone();
        let tools = client
            .tools()
            .iter()
            .filter(|tool| server.permits_tool(&tool.name))
            .cloned()
            .collect();
        Some(tools)
    }

    /// List resources exposed by a connected server.
    pub async fn list_resources(&self, name: &str) -> Result<Vec<crate::types::ResourceDescriptor>, ClientManagerError> {
        let handle = self.get_client(name).await.ok_or_else(|| ClientManagerError::NotFound { name: name.to_string() })?;
        let client = handle.lock().await;
        client.list_resources().await.map_err(|err| ClientManagerError::Connection { message: err.to_string() })
    }

    /// Read a single resource by URI from a named server (`resources/read`).
    pub async fn read_resource(&self, server_name: &str, uri: &str) -> Result<rmcp::model::ReadResourceResult, ClientManagerError> {
        let handle = self.get_client(server_name).await.ok_or_else(|| ClientManagerError::NotFound { name: server_name.to_string() })?;
        let client = handle.lock().await;
        client.read_resource(uri).await.map_err(|err| ClientManagerError::Connection { message: err.to_string() })
    }

    /// List prompts exposed by a connected server.
    pub async fn list_prompts(&self, name: &str) -> Result<Vec<crate::types::PromptDescriptor>, ClientManagerError> {
        let handle = self.get_client(name).await.ok_or_else(|| ClientManagerError::NotFound { name: name.to_string() })?;
        let client = handle.lock().await;
        client.list_prompts().await.map_err(|err| ClientManagerError::Connection { message: err.to_string() })
    }

    /// Render a prompt on a named server (`prompts/get`).
    pub async fn get_prompt(
        &self,
        server_name: &str,
        prompt_name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<rmcp::model::GetPromptResult, ClientManagerError> {
        let handle = self.get_client(server_name).await.ok_or_else(|| ClientManagerError::NotFound { name: server_name.to_string() })?;
        let client = handle.lock().await;
        client.get_prompt(prompt_name, arguments).await.map_err(|err| ClientManagerError::Connection { message: err.to_string() })
    }

    /// Invoke a tool (by its original, unnamespaced name) on a named server.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<rmcp::model::CallToolResult, ClientManagerError> {
        let handle = self
            .get_client(server_name)
            .await
            .ok_or_else(|| ClientManagerError::NotFound { name: server_name.to_string() })?;

        let client = handle.lock().await;
        if !client.server_config().permits_tool(tool_name) {
            return Err(ClientManagerError::ToolDenied {
                server: server_name.to_string(),
                tool: tool_name.to_string(),
            });
        }

        let start = std::time::Instant::now();
        let result = client.call_tool(tool_name, arguments).await;
        drop(client);

        match &result {
            Ok(_) => self.health_monitor.record_success(server_name, start.elapsed().as_millis() as u64).await,
            Err(err) => self.health_monitor.record_failure(server_name, err.to_string()).await,
        }

        result.map_err(|err| ClientManagerError::Connection { message: err.to_string() })
    }

    pub async fn update_config(&self, new_config: McpConfig) -> Result<(), ClientManagerError> {
        self.disconnect_all().await;
        *self.config.write().await = new_config;
        debug!("configuration updated, all servers disconnected pending restart");
        Ok(())
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.health_monitor
    }
}

#[async_trait]
impl HealthProbe for McpClientManager {
    async fn probe(&self, server_name: &str) -> HealthCheckResult {
        let Some(handle) = self.get_client(server_name).await else {
            return HealthCheckResult {
                healthy: false,
                latency_ms: None,
                error: Some("server not connected".to_string()),
            };
        };
        let mut client = handle.lock().await;
        client.health_check().await.unwrap_or(HealthCheckResult {
            healthy: false,
            latency_ms: None,
            error: Some("health check failed".to_string()),
        })
    }
}

#[derive(Debug, Error)]
pub enum ClientManagerError {
    #[error("server not found in configuration: {name}")]
    NotFound { name: String },
    #[error("server is already running: {name}")]
    AlreadyRunning { name: String },
    #[error("server is disabled: {name}")]
    Disabled { name: String },
    #[error("connection error: {message}")]
    Connection { message: String },
    #[error("tool '{tool}' is not permitted on server '{server}'")]
    ToolDenied { server: String, tool: String },
}

impl ClientManagerError {
    /// Worth one retry in the Tool Loop (`spec.md` §4.8). Connection-layer
    /// failures (transport drops, timeouts) are retried once; policy and
    /// lifecycle errors are not, since retrying would not change the outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_manager_has_no_active_servers() {
        let manager = McpClientManager::new(McpConfig::default()).expect("manager constructs");
        assert!(manager.list_servers().await.is_empty());
    }

    #[tokio::test]
    async fn starting_unknown_server_is_not_found() {
        let manager = McpClientManager::new(McpConfig::default()).expect("manager constructs");
        let err = manager.start_server("missing").await.expect_err("unknown server errors");
        assert!(matches!(err, ClientManagerError::NotFound { .. }));
    }
}
