//! Tool Loop (`spec.md` §4.8): the bounded multi-round orchestration that
//! turns a chat request with a tool set into a sequence of non-streaming
//! completions interleaved with MCP tool calls, until the model stops asking
//! for tools or a round/call limit is hit.

use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;

use crate::backend::BackendProxy;
use crate::client::McpClientManager;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, GatewayError, ToolCall, ToolSpec, split_qualified_name};

const RETRY_BACKOFF: Duration = Duration::from_millis(200);
const TRUNCATION_SUFFIX: &str = "…[truncated]";

/// The bounded parameters of one tool loop run (`spec.md` §4.8, §6's env vars).
#[derive(Debug, Clone, Copy)]
pub struct ToolLoopLimits {
    pub max_rounds: u32,
    pub max_calls_per_round: u32,
    pub max_total_calls: u32,
    pub per_call_deadline: Duration,
    pub result_size_ceiling_bytes: usize,
}

/// What a completed (or limit-terminated) tool loop run produced.
pub struct ToolLoopOutcome {
    /// The full message history, including every tool call/result pair appended.
    pub messages: Vec<ChatMessage>,
    pub final_response: ChatCompletionResponse,
    pub rounds: u32,
    pub total_calls: u32,
}

pub struct ToolLoop<'a> {
    backend: &'a BackendProxy,
    manager: &'a McpClientManager,
    limits: ToolLoopLimits,
}

impl<'a> ToolLoop<'a> {
    pub fn new(backend: &'a BackendProxy, manager: &'a McpClientManager, limits: ToolLoopLimits) -> Self {
        Self { backend, manager, limits }
    }

    /// Run the loop to completion. `messages` is consumed as the initial
    /// history and grown with every assistant turn and tool result.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        model: &str,
        mut messages: Vec<ChatMessage>,
        tools: Vec<ToolSpec>,
        temperature: Option<f32>,
        top_p: Option<f32>,
        max_tokens: Option<u32>,
        request_id: &str,
    ) -> Result<ToolLoopOutcome, GatewayError> {
        let mut total_calls = 0u32;
        let mut rounds = 0u32;

        loop {
            let request = ChatCompletionRequest {
                model: model.to_string(),
                messages: messages.clone(),
                stream: false,
                temperature,
                top_p,
                max_tokens,
                tools: tools.clone(),
                tool_choice: None,
            };
            let response = self.backend.chat_completion(&request, request_id).await?;
            let assistant_message = response.choices[0].message.clone();

            let has_tool_calls = assistant_message.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty());
            if !has_tool_calls {
                messages.push(assistant_message);
                return Ok(ToolLoopOutcome {
                    messages,
                    final_response: response,
                    rounds,
                    total_calls,
                });
            }

            let tool_calls = assistant_message.tool_calls.clone().unwrap_or_default();
            messages.push(assistant_message);
            rounds += 1;

            let accepted_count = (self.limits.max_calls_per_round as usize).min(tool_calls.len());
            let (accepted, overflow) = tool_calls.split_at(accepted_count);

            // Dispatch this round's calls concurrently, but fold results back
            // in the order the model emitted them (`spec.md` §4.8 ordering guarantee).
            let dispatches = accepted.iter().map(|call| self.dispatch_one(call));
            let results = join_all(dispatches).await;

            for (call, result_text) in accepted.iter().zip(results) {
                messages.push(ChatMessage::tool_result(call.id.clone(), result_text));
                total_calls += 1;
            }
            for call in overflow {
                messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    "error: too many tool calls requested in one round, this call was dropped".to_string(),
                ));
            }

            // Checked after this round's calls are dispatched, not before, so a
            // request landing exactly on `max_rounds` still gets that round's
            // tool calls executed (`spec.md` §8's exact-boundary property).
            if rounds >= self.limits.max_rounds {
                return Ok(self.terminate(model, messages, total_calls, rounds, "round limit"));
            }

            if total_calls >= self.limits.max_total_calls {
                return Ok(self.terminate(model, messages, total_calls, rounds, "call limit"));
            }
        }
    }

    fn terminate(&self, model: &str, mut messages: Vec<ChatMessage>, total_calls: u32, rounds: u32, reason: &str) -> ToolLoopOutcome {
        let notice = ChatMessage::assistant(format!(
            "Tool loop terminated after reaching the {reason} (rounds={rounds}, calls={total_calls})."
        ));
        messages.push(notice.clone());
        let final_response = ChatCompletionResponse::single(model.to_string(), notice, "stop");
        ToolLoopOutcome {
            messages,
            final_response,
            rounds,
            total_calls,
        }
    }

    async fn dispatch_one(&self, call: &ToolCall) -> String {
        let Some((server, tool)) = split_qualified_name(&call.function.name) else {
            return format!("error: malformed tool name '{}', expected mcp.<server>.<tool>", call.function.name);
        };

        let arguments = match serde_json::from_str::<Value>(&call.function.arguments) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return format!("error: arguments for '{}' must be a JSON object", call.function.name),
            Err(err) => return format!("error: malformed JSON arguments for '{}': {err}", call.function.name),
        };

        match self.call_with_retry(server, tool, &arguments).await {
            Ok(result) => self.truncate(render_tool_result(&result)),
            Err(message) => format!("error: {message}"),
        }
    }

    /// Execute one tool call with the per-call deadline, retrying once with a
    /// fixed backoff for transient transport errors (`spec.md` §4.8).
    async fn call_with_retry(&self, server: &str, tool: &str, arguments: &serde_json::Map<String, Value>) -> Result<rmcp::model::CallToolResult, String> {
        match self.call_once(server, tool, arguments).await {
            Ok(result) => Ok(result),
            Err((err, transient)) if transient => {
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.call_once(server, tool, arguments).await.map_err(|(err, _)| err.to_string())
            }
            Err((err, _)) => Err(err.to_string()),
        }
    }

    async fn call_once(
        &self,
        server: &str,
        tool: &str,
        arguments: &serde_json::Map<String, Value>,
    ) -> Result<rmcp::model::CallToolResult, (crate::client::ClientManagerError, bool)> {
        match tokio::time::timeout(self.limits.per_call_deadline, self.manager.call_tool(server, tool, arguments)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => {
                let transient = err.is_transient();
                Err((err, transient))
            }
            Err(_) => Err((
                crate::client::ClientManagerError::Connection {
                    message: format!("call to 'mcp.{server}.{tool}' exceeded its per-call deadline"),
                },
                true,
            )),
        }
    }

    fn truncate(&self, text: String) -> String {
        if text.len() <= self.limits.result_size_ceiling_bytes {
            return text;
        }
        let mut boundary = self.limits.result_size_ceiling_bytes;
        while boundary > 0 && !text.is_char_boundary(boundary) {
            boundary -= 1;
        }
        format!("{}{TRUNCATION_SUFFIX}", &text[..boundary])
    }
}

/// Flatten a `CallToolResult`'s content blocks into a single text rendering.
pub(crate) fn render_tool_result(result: &rmcp::model::CallToolResult) -> String {
    let is_error = result.is_error.unwrap_or(false);
    let mut parts = Vec::new();
    for content in &result.content {
        let text = match &content.raw {
            rmcp::model::RawContent::Text(text) => text.text.clone(),
            rmcp::model::RawContent::Image(image) => format!("[image: {}]", image.mime_type),
            rmcp::model::RawContent::Audio(audio) => format!("[audio: {}]", audio.mime_type),
            rmcp::model::RawContent::Resource(resource) => match &resource.resource {
                rmcp::model::ResourceContents::TextResourceContents { uri, text, .. } => {
                    if text.is_empty() { format!("[resource: {uri}]") } else { text.clone() }
                }
                rmcp::model::ResourceContents::BlobResourceContents { uri, .. } => format!("[blob resource: {uri}]"),
            },
            rmcp::model::RawContent::ResourceLink(link) => format!("[resource link: {}]", link.uri),
        };
        parts.push(text);
    }
    let rendered = parts.join("\n");
    if is_error { format!("tool reported an error: {rendered}") } else { rendered }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_appends_suffix_only_when_over_ceiling() {
        let limits = ToolLoopLimits {
            max_rounds: 10,
            max_calls_per_round: 5,
            max_total_calls: 25,
            per_call_deadline: Duration::from_secs(30),
            result_size_ceiling_bytes: 5,
        };
        let manager = McpClientManager::new(crate::config::McpConfig::default()).unwrap();
        let backend = BackendProxy::new(url::Url::parse("http://localhost:11434").unwrap(), Duration::from_secs(30)).unwrap();
        let tool_loop = ToolLoop::new(&backend, &manager, limits);

        assert_eq!(tool_loop.truncate("short".to_string()), "short");
        assert_eq!(tool_loop.truncate("this is long".to_string()), format!("this {TRUNCATION_SUFFIX}"));
    }

    #[test]
    fn render_tool_result_joins_text_blocks() {
        let result = rmcp::model::CallToolResult {
            content: vec![rmcp::model::Content::text("hello"), rmcp::model::Content::text("world")],
            structured_content: None,
            is_error: Some(false),
            meta: None,
        };
        assert_eq!(render_tool_result(&result), "hello\nworld");
    }

    #[test]
    fn render_tool_result_flags_error_results() {
        let result = rmcp::model::CallToolResult {
            content: vec![rmcp::model::Content::text("bad input")],
            structured_content: None,
            is_error: Some(true),
            meta: None,
        };
        assert!(render_tool_result(&result).starts_with("tool reported an error"));
    }
}
