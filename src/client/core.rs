//! `McpClient`: lifecycle and connection state for a single MCP server.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rmcp::model::{CallToolResult, InitializeResult};
use rmcp::{
    RoleClient,
    model::CallToolRequestParam,
    service::{RunningService, ServiceExt as _},
    transport::{StreamableHttpClientTransport, TokioChildProcess, streamable_http_client::StreamableHttpClientTransportConfig},
};
use tokio::time::timeout;

use crate::client::health::HealthCheckResult;
use crate::client::http::{build_http_client_with_auth, resolve_streamable_endpoint};
use crate::client::sse::SseSession;
use crate::client::stdio::{build_stdio_command, spawn_stderr_logger};
use crate::config::McpServer;
use crate::logging::LogManager;
use crate::types::{HealthStatus, McpToolMetadata, PluginStatus};

const TOOL_INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);

/// The underlying transport session. Streamable-HTTP and stdio both speak
/// rmcp's JSON-RPC framing and yield a `RunningService`; the legacy SSE
/// transport is hand-rolled and yields an `SseSession` instead.
enum Session {
    Rmcp(RunningService<RoleClient, ()>),
    Sse(SseSession),
}

/// Lifecycle wrapper around a connected (or not-yet-connected) MCP server.
pub struct McpClient {
    name: String,
    server: McpServer,
    status: PluginStatus,
    health: HealthStatus,
    session: Option<Session>,
    log_manager: Arc<LogManager>,
    tools: Arc<Vec<McpToolMetadata>>,
}

impl McpClient {
    pub fn new(name: String, server: McpServer, log_manager: Arc<LogManager>) -> Self {
        Self {
            name,
            server,
            status: PluginStatus::Stopped,
            health: HealthStatus::new(),
            session: None,
            log_manager,
            tools: Arc::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_config(&self) -> &McpServer {
        &self.server
    }

    /// Connect using the transport implied by this server's configuration,
    /// then fetch the tool catalog.
    pub async fn connect(&mut self) -> Result<Arc<Vec<McpToolMetadata>>> {
        self.status = PluginStatus::Starting;
        let start = std::time::Instant::now();

        let result = if self.server.is_stdio() {
            self.connect_stdio().await.map(Session::Rmcp)
        } else if self.server.is_http() {
            self.connect_http().await.map(Session::Rmcp)
        } else if self.server.is_sse() {
            SseSession::connect(&self.server).await.map(Session::Sse)
        } else {
            Err(anyhow::anyhow!(
                "unsupported transport for server '{}': must be stdio, http, or sse",
                self.name
            ))
        };

        match result {
            Ok(session) => {
                self.session = Some(session);
                match self.refresh_tools().await {
                    Ok(tools) => {
                        self.status = PluginStatus::Running;
                        self.health.record_success(start.elapsed().as_millis() as u64);
                        Ok(tools)
                    }
                    Err(err) => {
                        self.status = PluginStatus::Error;
                        self.health.record_failure(err.to_string());
                        Err(err)
                    }
                }
            }
            Err(err) => {
                self.status = PluginStatus::Error;
                self.health.record_failure(err.to_string());
                Err(err)
            }
        }
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        match self.session.take() {
            Some(Session::Rmcp(running)) => {
                let _ = running.cancel().await;
            }
            Some(Session::Sse(sse)) => sse.close(),
            None => {}
        }
        self.status = PluginStatus::Stopped;
        self.tools = Arc::new(Vec::new());
        Ok(())
    }

    pub fn tools(&self) -> Arc<Vec<McpToolMetadata>> {
        Arc::clone(&self.tools)
    }

    pub fn status(&self) -> PluginStatus {
        self.status
    }

    pub fn health(&self) -> &HealthStatus {
        &self.health
    }

    /// Initialize-handshake metadata, when connected over an rmcp transport.
    pub fn peer_info(&self) -> Option<&InitializeResult> {
        match &self.session {
            Some(Session::Rmcp(running)) => running.peer_info(),
            _ => None,
        }
    }

    pub async fn health_check(&mut self) -> Result<HealthCheckResult> {
        let healthy = matches!(self.status, PluginStatus::Running);
        Ok(HealthCheckResult {
            healthy,
            latency_ms: self.health.latency_ms,
            error: (!healthy).then(|| "not running".to_string()),
        })
    }

    async fn connect_stdio(&self) -> Result<RunningService<RoleClient, ()>> {
        let command = build_stdio_command(&self.server)?;
        let (transport, stderr_opt) = TokioChildProcess::builder(command).stderr(Stdio::piped()).spawn()?;

        if let Some(stderr) = stderr_opt {
            spawn_stderr_logger(self.name.clone(), Arc::clone(&self.log_manager), stderr);
        }

        Ok(().serve(transport).await?)
    }

    async fn connect_http(&self) -> Result<RunningService<RoleClient, ()>> {
        let endpoint = resolve_streamable_endpoint(&self.server)?;
        let http_client = build_http_client_with_auth(&self.server).await?;
        let config = StreamableHttpClientTransportConfig::with_uri(endpoint);
        let transport = StreamableHttpClientTransport::with_client(http_client, config);
        Ok(().serve(transport).await?)
    }

    async fn refresh_tools(&mut self) -> Result<Arc<Vec<McpToolMetadata>>> {
        let tools = match &self.session {
            Some(Session::Rmcp(running)) => running
                .list_all_tools()
                .await
                .map_err(|err| anyhow::anyhow!("list_tools failed for '{}': {err}", self.name))?
                .into_iter()
                .map(McpToolMetadata::from)
                .collect::<Vec<_>>(),
            Some(Session::Sse(sse)) => sse
                .list_tools()
                .await
                .map_err(|err| anyhow::anyhow!("list_tools failed for '{}': {err}", self.name))?
                .iter()
                .map(McpToolMetadata::from_rmcp)
                .collect::<Vec<_>>(),
            None => return Err(anyhow::anyhow!("server '{}' is not connected", self.name)),
        };

        let snapshot = Arc::new(tools);
        self.tools = Arc::clone(&snapshot);
        Ok(snapshot)
    }

    /// Invoke a tool by its original (unnamespaced) name.
    pub async fn call_tool(&self, tool_name: &str, arguments: &serde_json::Map<String, serde_json::Value>) -> Result<CallToolResult> {
        match &self.session {
            Some(Session::Rmcp(running)) => {
                let call = running.call_tool(CallToolRequestParam {
                    name: tool_name.to_string().into(),
                    arguments: Some(arguments.clone()),
                });
                match timeout(TOOL_INVOCATION_TIMEOUT, call).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(err)) => Err(anyhow::anyhow!("tool '{}' failed: {err}", tool_name)),
                    Err(_) => Err(anyhow::anyhow!("tool '{}' timed out after {:?}", tool_name, TOOL_INVOCATION_TIMEOUT)),
                }
            }
            Some(Session::Sse(sse)) => match timeout(TOOL_INVOCATION_TIMEOUT, sse.call_tool(tool_name, arguments)).await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(err)) => Err(anyhow::anyhow!("tool '{}' failed: {err}", tool_name)),
                Err(_) => Err(anyhow::anyhow!("tool '{}' timed out after {:?}", tool_name, TOOL_INVOCATION_TIMEOUT)),
            },
            None => Err(anyhow::anyhow!("server '{}' is not connected", self.name)),
        }
    }

    /// List resources exposed by the server, converted to this crate's descriptor type.
    pub async fn list_resources(&self) -> Result<Vec<crate::types::ResourceDescriptor>> {
        let resources = match &self.session {
            Some(Session::Rmcp(running)) => running
                .list_resources(Default::default())
                .await
                .map_err(|err| anyhow::anyhow!("resources/list failed for '{}': {err}", self.name))?
                .resources,
            Some(Session::Sse(sse)) => sse.list_resources().await?,
            None => return Err(anyhow::anyhow!("server '{}' is not connected", self.name)),
        };

        Ok(resources
            .into_iter()
            .map(|resource| crate::types::ResourceDescriptor {
                uri: resource.uri.to_string(),
                name: Some(resource.name.to_string()),
                mime_type: resource.mime_type.as_ref().map(|m| m.to_string()),
                server: self.name.clone(),
            })
            .collect())
    }

    /// Read a single resource by URI (`resources/read`, `spec.md` §4.2, §4.7).
    pub async fn read_resource(&self, uri: &str) -> Result<rmcp::model::ReadResourceResult> {
        match &self.session {
            Some(Session::Rmcp(running)) => running
                .read_resource(rmcp::model::ReadResourceRequestParam { uri: uri.to_string().into() })
                .await
                .map_err(|err| anyhow::anyhow!("resources/read failed for '{}': {err}", uri)),
            Some(Session::Sse(sse)) => sse.read_resource(uri).await,
            None => Err(anyhow::anyhow!("server '{}' is not connected", self.name)),
        }
    }

    /// List prompts exposed by the server, converted to this crate's descriptor type.
    pub async fn list_prompts(&self) -> Result<Vec<crate::types::PromptDescriptor>> {
        let prompts = match &self.session {
            Some(Session::Rmcp(running)) => running
                .list_prompts(Default::default())
                .await
                .map_err(|err| anyhow::anyhow!("prompts/list failed for '{}': {err}", self.name))?
                .prompts,
            Some(Session::Sse(sse)) => sse.list_prompts().await?,
            None => return Err(anyhow::anyhow!("server '{}' is not connected", self.name)),
        };

        Ok(prompts
            .into_iter()
            .map(|prompt| crate::types::PromptDescriptor {
                name: prompt.name.to_string(),
                description: prompt.description.as_ref().map(|d| d.to_string()),
                server: self.name.clone(),
            })
            .collect())
    }

    /// Render a prompt (`prompts/get`).
    pub async fn get_prompt(&self, name: &str, arguments: &serde_json::Map<String, serde_json::Value>) -> Result<rmcp::model::GetPromptResult> {
        match &self.session {
            Some(Session::Rmcp(running)) => running
                .get_prompt(rmcp::model::GetPromptRequestParam {
                    name: name.to_string().into(),
                    arguments: Some(arguments.clone()),
                })
                .await
                .map_err(|err| anyhow::anyhow!("prompts/get failed for '{}': {err}", name)),
            Some(Session::Sse(sse)) => sse.get_prompt(name, arguments).await,
            None => Err(anyhow::anyhow!("server '{}' is not connected", self.name)),
        }
    }
}
