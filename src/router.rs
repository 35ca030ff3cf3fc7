//! HTTP surface (`spec.md` §6): the axum `Router` tying the Request Pipeline,
//! Backend Proxy, Tool Loop, and MCP management endpoints together.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response, Sse};
use axum::response::sse::Event;
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::pipeline::{auth_layer, logging_layer, rate_limit_layer, request_id_layer, RequestId};
use crate::state::AppState;
use crate::toolloop::{ToolLoop, ToolLoopLimits};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, GatewayError, ToolFunctionSpec, ToolSpec};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/v1/hardware/recommendations", get(hardware_recommendations))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/mcp/servers", get(list_servers))
        .route("/v1/mcp/servers/health", get(all_servers_health))
        .route("/v1/mcp/servers/{name}", get(server_detail))
        .route("/v1/mcp/servers/{name}/health", get(server_health))
        .route("/v1/mcp/servers/{name}/stats", get(server_stats))
        .route("/v1/mcp/servers/{name}/refresh", post(refresh_server))
        .route("/v1/mcp/servers/{name}/tools", get(server_tools))
        .route("/v1/mcp/servers/{name}/resources", get(server_resources))
        .route("/v1/mcp/servers/{name}/prompts", get(server_prompts))
        .route("/v1/mcp/servers/{name}/resources/{*uri}", get(read_server_resource))
        .route("/v1/mcp/servers/{name}/prompts/{promptName}", post(render_server_prompt))
        .route("/v1/mcp/execute", post(execute_tool))
        .layer(axum::middleware::from_fn(logging_layer))
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_layer))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_layer))
        .layer(axum::middleware::from_fn(request_id_layer))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"status": "healthy", "ollama_host": state.gateway_config.ollama_host.to_string()}))
}

/// Out-of-scope content, served as-is (`spec.md` §6, §2's Non-goals).
async fn hardware_recommendations() -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [
            {"min_vram_gb": 4, "recommended_models": ["llama3.2:1b", "qwen2.5:1.5b"]},
            {"min_vram_gb": 8, "recommended_models": ["llama3.2:3b", "mistral:7b"]},
            {"min_vram_gb": 16, "recommended_models": ["llama3.1:8b", "qwen2.5:14b"]},
            {"min_vram_gb": 24, "recommended_models": ["mixtral:8x7b", "qwen2.5:32b"]},
            {"min_vram_gb": 48, "recommended_models": ["llama3.1:70b"]},
        ],
    }))
}

async fn list_models(State(state): State<AppState>, request_id: RequestIdExt) -> Result<Json<crate::types::ModelListResponse>, Response> {
    state.backend.list_models(&request_id.0).await.map(Json).map_err(|err| err.into_response_with_request_id(request_id.0))
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    server: String,
    tool: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

async fn execute_tool(State(state): State<AppState>, request_id: RequestIdExt, Json(body): Json<ExecuteRequest>) -> Response {
    match state.mcp_manager.call_tool(&body.server, &body.tool, &body.arguments).await {
        Ok(result) => Json(json!({"result": crate::toolloop::render_tool_result(&result), "is_error": result.is_error.unwrap_or(false)})).into_response(),
        Err(err) => GatewayError::Transport(err.to_string()).into_response_with_request_id(request_id.0),
    }
}

/// Extracts the request ID stamped by the Request Pipeline's first layer.
struct RequestIdExt(String);

impl<S> axum::extract::FromRequestParts<S> for RequestIdExt
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<RequestId>().map(|id| id.0.clone()).unwrap_or_default()))
    }
}

async fn chat_completions(State(state): State<AppState>, request_id: RequestIdExt, Json(body): Json<ChatCompletionRequest>) -> Response {
    let request_id = request_id.0;

    let resolution = crate::resolver::resolve_resources(&state.mcp_manager, &body.messages).await;
    if !resolution.warnings.is_empty() {
        tracing::warn!(request_id = %request_id, warnings = ?resolution.warnings, "resource resolution warnings");
    }

    let resource_texts: Vec<String> = resolution.injected_messages.iter().filter_map(|m| m.content.clone()).collect();

    let mut messages = body.messages.clone();
    if let Some(position) = messages.iter().position(|m| m.role == "system") {
        for (offset, injected) in resolution.injected_messages.into_iter().enumerate() {
            messages.insert(position + 1 + offset, injected);
        }
    } else {
        for injected in resolution.injected_messages.into_iter().rev() {
            messages.insert(0, injected);
        }
    }

    let tools = if body.tools.is_empty() { default_tool_set(&state).await } else { body.tools.clone() };
    let has_healthy_server = state.mcp_manager.get_all_health().await.values().any(|h| h.is_usable());
    let tool_names: Vec<String> = tools.iter().map(|spec| spec.function.name.clone()).collect();

    if body.stream {
        return stream_completion(state, request_id, body, messages, tools, has_healthy_server).await;
    }

    if tools.is_empty() || !has_healthy_server {
        return non_stream_direct(state, request_id, body, messages, tool_names, resource_texts).await;
    }

    run_tool_loop(state, request_id, body, messages, tools, tool_names, resource_texts).await
}

async fn default_tool_set(state: &AppState) -> Vec<ToolSpec> {
    state
        .tool_registry
        .list()
        .into_iter()
        .map(|descriptor| ToolSpec {
            kind: "function".to_string(),
            function: ToolFunctionSpec {
                name: descriptor.qualified_name,
                description: descriptor.description,
                parameters: descriptor.input_schema,
            },
        })
        .collect()
}

async fn non_stream_direct(
    state: AppState,
    request_id: String,
    body: ChatCompletionRequest,
    messages: Vec<crate::types::ChatMessage>,
    tool_names: Vec<String>,
    resource_texts: Vec<String>,
) -> Response {
    let tool_fingerprint = crate::cache::tool_set_fingerprint(&tool_names);
    let resource_digest = crate::cache::resource_digest(&resource_texts);
    let fingerprint_input = crate::cache::FingerprintInput {
        model: &body.model,
        messages: &messages,
        temperature: body.temperature,
        top_p: body.top_p,
        max_tokens: body.max_tokens,
        tool_fingerprint: &tool_fingerprint,
        resource_digest: &resource_digest,
    };
    let key = crate::cache::fingerprint(&fingerprint_input);

    let request = ChatCompletionRequest {
        model: body.model.clone(),
        messages,
        stream: false,
        temperature: body.temperature,
        top_p: body.top_p,
        max_tokens: body.max_tokens,
        tools: vec![],
        tool_choice: None,
    };
    let backend = state.backend.clone();
    let request_id_for_compute = request_id.clone();

    let result = state
        .completions_cache
        .get_or_compute(key, || async move {
            backend.chat_completion(&request, &request_id_for_compute).await.map_err(|err| crate::cache::CacheError::Upstream(err.to_string()))
        })
        .await;

    match result {
        Ok(response) => Json(response).into_response(),
        Err(err) => GatewayError::Backend(err.to_string()).into_response_with_request_id(request_id),
    }
}

async fn run_tool_loop(
    state: AppState,
    request_id: String,
    body: ChatCompletionRequest,
    messages: Vec<crate::types::ChatMessage>,
    tools: Vec<ToolSpec>,
    tool_names: Vec<String>,
    resource_texts: Vec<String>,
) -> Response {
    // Consulted on the initial message set before any tool round runs, and
    // populated below when the run turns out not to have invoked a tool —
    // same cache the no-tool path uses, so a re-issued request that happens
    // to need no tools this time still gets a hit (`spec.md` §4.9, §8).
    let tool_fingerprint = crate::cache::tool_set_fingerprint(&tool_names);
    let resource_digest = crate::cache::resource_digest(&resource_texts);
    let fingerprint_input = crate::cache::FingerprintInput {
        model: &body.model,
        messages: &messages,
        temperature: body.temperature,
        top_p: body.top_p,
        max_tokens: body.max_tokens,
        tool_fingerprint: &tool_fingerprint,
        resource_digest: &resource_digest,
    };
    let key = crate::cache::fingerprint(&fingerprint_input);

    if let Some(cached) = state.completions_cache.get(&key).await {
        return Json(cached).into_response();
    }

    let limits = ToolLoopLimits {
        max_rounds: state.gateway_config.max_rounds,
        max_calls_per_round: state.gateway_config.max_calls_per_round,
        max_total_calls: state.gateway_config.max_total_calls,
        per_call_deadline: state.gateway_config.backend_timeout,
        result_size_ceiling_bytes: state.gateway_config.result_size_ceiling_bytes,
    };
    let tool_loop = ToolLoop::new(&state.backend, &state.mcp_manager, limits);

    match tool_loop.run(&body.model, messages, tools, body.temperature, body.top_p, body.max_tokens, &request_id).await {
        Ok(outcome) => {
            if outcome.total_calls == 0 {
                state.completions_cache.put(key, outcome.final_response.clone()).await;
            }
            Json(outcome.final_response).into_response()
        }
        Err(err) => err.into_response_with_request_id(request_id),
    }
}

async fn stream_completion(
    state: AppState,
    request_id: String,
    body: ChatCompletionRequest,
    messages: Vec<crate::types::ChatMessage>,
    tools: Vec<ToolSpec>,
    has_healthy_server: bool,
) -> Response {
    // Tool rounds always run as non-streaming completions internally; only the
    // terminating turn is re-issued as a true stream (`spec.md` §4.8).
    let final_messages = if !tools.is_empty() && has_healthy_server {
        let limits = ToolLoopLimits {
            max_rounds: state.gateway_config.max_rounds,
            max_calls_per_round: state.gateway_config.max_calls_per_round,
            max_total_calls: state.gateway_config.max_total_calls,
            per_call_deadline: state.gateway_config.backend_timeout,
            result_size_ceiling_bytes: state.gateway_config.result_size_ceiling_bytes,
        };
        let tool_loop = ToolLoop::new(&state.backend, &state.mcp_manager, limits);
        match tool_loop.run(&body.model, messages, tools, body.temperature, body.top_p, body.max_tokens, &request_id).await {
            Ok(outcome) => outcome.messages,
            Err(err) => return err.into_response_with_request_id(request_id),
        }
    } else {
        messages
    };

    let stream_request = ChatCompletionRequest {
        model: body.model.clone(),
        messages: final_messages,
        stream: true,
        temperature: body.temperature,
        top_p: body.top_p,
        max_tokens: body.max_tokens,
        tools: vec![],
        tool_choice: None,
    };

    match state.backend.chat_completion_stream(&stream_request, &request_id).await {
        Ok(byte_stream) => {
            let event_stream = byte_stream.map(|chunk| {
                let bytes = chunk.unwrap_or_else(|err| bytes::Bytes::from(format!("data: {{\"error\":\"{err}\"}}\n\n")));
                Ok::<_, std::convert::Infallible>(Event::default().data(String::from_utf8_lossy(&bytes).trim_start_matches("data: ").trim_end().to_string()))
            });
            Sse::new(event_stream).into_response()
        }
        Err(err) => err.into_response_with_request_id(request_id),
    }
}

#[derive(Serialize)]
struct ServerSummary {
    name: String,
    transport: String,
    status: crate::types::PluginStatus,
    health: crate::types::HealthStatus,
    tool_count: usize,
}

async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerSummary>> {
    let mut summaries = Vec::new();
    for name in state.mcp_manager.list_configured_servers().await {
        summaries.push(build_summary(&state, &name).await);
    }
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    Json(summaries)
}

async fn build_summary(state: &AppState, name: &str) -> ServerSummary {
    let status = state.mcp_manager.get_status(name).await;
    let health = state.mcp_manager.get_health(name).await.unwrap_or_default();
    let transport = match state.mcp_manager.get_client(name).await {
        Some(handle) => handle.lock().await.server_config().transport_type().to_string(),
        None => "unknown".to_string(),
    };
    let tool_count = state.tool_registry.list_for_server(name).len();
    ServerSummary {
        name: name.to_string(),
        transport,
        status,
        health,
        tool_count,
    }
}

async fn server_detail(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if !state.mcp_manager.list_configured_servers().await.contains(&name) {
        return GatewayError::NotFound(format!("unknown server '{name}'")).into_response();
    }
    Json(build_summary(&state, &name).await).into_response()
}

async fn server_health(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.mcp_manager.get_health(&name).await {
        Some(health) => Json(health).into_response(),
        None => GatewayError::NotFound(format!("unknown server '{name}'")).into_response(),
    }
}

async fn all_servers_health(State(state): State<AppState>) -> Json<HashMap<String, crate::types::HealthStatus>> {
    Json(state.mcp_manager.get_all_health().await)
}

#[derive(Serialize, Default)]
struct PoolStatsResponse {
    total: usize,
    in_use: usize,
    idle: usize,
    max_allowed: usize,
    wait_queue_depth: usize,
}

async fn server_stats(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.pool_for(&name).await {
        Some(pool) => {
            let stats = pool.stats();
            Json(PoolStatsResponse {
                total: stats.total,
                in_use: stats.in_use,
                idle: stats.idle,
                max_allowed: stats.max_allowed,
                wait_queue_depth: stats.wait_queue_depth,
            })
            .into_response()
        }
        None => Json(PoolStatsResponse::default()).into_response(),
    }
}

#[derive(Serialize)]
struct RefreshResponse {
    status: &'static str,
    errors: Vec<String>,
}

async fn refresh_server(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let configured = state.mcp_manager.list_configured_servers().await;
    if configured.is_empty() {
        return GatewayError::McpDisabled.into_response();
    }
    if !configured.contains(&name) {
        return GatewayError::NotFound(format!("unknown server '{name}'")).into_response();
    }

    let mut errors = Vec::new();

    match state.mcp_manager.list_tools(&name).await {
        Some(tools) => {
            if let Err(err) = state.tool_registry.replace_server_tools(&name, &tools) {
                errors.push(format!("tools: {err}"));
            }
        }
        None => errors.push("tools: server not connected".to_string()),
    }

    match state.mcp_manager.list_resources(&name).await {
        Ok(resources) => state.metadata_cache.put_resources(&name, resources).await,
        Err(err) => errors.push(format!("resources: {err}")),
    }

    match state.mcp_manager.list_prompts(&name).await {
        Ok(prompts) => state.metadata_cache.put_prompts(&name, prompts).await,
        Err(err) => errors.push(format!("prompts: {err}")),
    }

    if errors.is_empty() {
        Json(RefreshResponse { status: "ok", errors }).into_response()
    } else {
        (StatusCode::PARTIAL_CONTENT, Json(RefreshResponse { status: "partial", errors })).into_response()
    }
}

async fn server_tools(State(state): State<AppState>, Path(name): Path<String>) -> Json<Vec<crate::types::ToolDescriptor>> {
    Json(state.tool_registry.list_for_server(&name))
}

async fn server_resources(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if let Some(resources) = state.metadata_cache.resources(&name).await {
        return Json(resources).into_response();
    }
    match state.mcp_manager.list_resources(&name).await {
        Ok(resources) => {
            state.metadata_cache.put_resources(&name, resources.clone()).await;
            Json(resources).into_response()
        }
        Err(err) => GatewayError::Transport(err.to_string()).into_response(),
    }
}

async fn server_prompts(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if let Some(prompts) = state.metadata_cache.prompts(&name).await {
        return Json(prompts).into_response();
    }
    match state.mcp_manager.list_prompts(&name).await {
        Ok(prompts) => {
            state.metadata_cache.put_prompts(&name, prompts.clone()).await;
            Json(prompts).into_response()
        }
        Err(err) => GatewayError::Transport(err.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct ResourceQuery {
    uri: Option<String>,
}

async fn read_server_resource(
    State(state): State<AppState>,
    Path((name, uri)): Path<(String, String)>,
    Query(query): Query<ResourceQuery>,
) -> Response {
    let uri = query.uri.unwrap_or(uri);
    match state.mcp_manager.read_resource(&name, &uri).await {
        Ok(result) => Json(result.contents).into_response(),
        Err(err) => GatewayError::Transport(err.to_string()).into_response(),
    }
}

#[derive(Deserialize, Default)]
struct RenderPromptRequest {
    #[serde(default)]
    arguments: Map<String, Value>,
}

async fn render_server_prompt(
    State(state): State<AppState>,
    Path((name, prompt_name)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Response {
    let arguments = if body.is_empty() {
        Map::new()
    } else {
        match serde_json::from_slice::<RenderPromptRequest>(&body) {
            Ok(parsed) => parsed.arguments,
            Err(err) => return GatewayError::Validation(format!("invalid request body: {err}")).into_response(),
        }
    };
    match state.mcp_manager.get_prompt(&name, &prompt_name, &arguments).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => GatewayError::Transport(err.to_string()).into_response(),
    }
}
