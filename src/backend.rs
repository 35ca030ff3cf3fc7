//! Backend Proxy (`spec.md` §4.10): translates OpenAI-shape chat requests to
//! Ollama's native `/api/chat` and `/api/tags`, and translates responses back
//! bit-exact for success. Streaming responses are Ollama's newline-delimited
//! JSON chunks, re-emitted to the gateway's own client as Server-Sent Events.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{Map, Value, json};

use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, GatewayError, ModelListResponse, ToolCall, ToolCallFunction};

/// Talks to a single Ollama host. Cloned cheaply (wraps a pooled `reqwest::Client`).
#[derive(Clone)]
pub struct BackendProxy {
    client: Client,
    host: url::Url,
}

impl BackendProxy {
    pub fn new(host: url::Url, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Internal(anyhow::anyhow!("failed to build backend client: {err}")))?;
        Ok(Self { client, host })
    }

    /// `GET /api/tags`, translated into the OpenAI-shape model list.
    pub async fn list_models(&self, request_id: &str) -> Result<ModelListResponse, GatewayError> {
        let url = self.host.join("api/tags").map_err(|err| GatewayError::Backend(err.to_string()))?;
        let response = self
            .client
            .get(url)
            .header("X-Request-ID", request_id)
            .send()
            .await
            .map_err(|err| backend_send_error(&err))?;

        if !response.status().is_success() {
            return Err(backend_status_error(response.status()));
        }

        let body: Value = response.json().await.map_err(|err| GatewayError::Backend(err.to_string()))?;
        let names = body
            .get("models")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.get("name").or_else(|| entry.get("model")).and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        Ok(ModelListResponse::from_names(names))
    }

    /// A single non-streaming completion, used both for direct `stream:false`
    /// requests and by the Tool Loop's internal per-round completions.
    pub async fn chat_completion(&self, request: &ChatCompletionRequest, request_id: &str) -> Result<ChatCompletionResponse, GatewayError> {
        let body = translate_request(request, false);
        let url = self.host.join("api/chat").map_err(|err| GatewayError::Backend(err.to_string()))?;

        let response = self
            .client
            .post(url)
            .header("X-Request-ID", request_id)
            .json(&body)
            .send()
            .await
            .map_err(|err| backend_send_error(&err))?;

        if !response.status().is_success() {
            return Err(backend_status_error(response.status()));
        }

        let payload: Value = response.json().await.map_err(|err| GatewayError::Backend(err.to_string()))?;
        translate_response(&payload, &request.model)
    }

    /// Issue a streaming completion, returning a stream of ready-to-forward
    /// SSE frames (`data: {...}\n\n`, terminated by `data: [DONE]\n\n`).
    pub async fn chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
        request_id: &str,
    ) -> Result<impl Stream<Item = Result<Bytes, GatewayError>>, GatewayError> {
        let body = translate_request(request, true);
        let url = self.host.join("api/chat").map_err(|err| GatewayError::Backend(err.to_string()))?;

        let response = self
            .client
            .post(url)
            .header("X-Request-ID", request_id)
            .json(&body)
            .send()
            .await
            .map_err(|err| backend_send_error(&err))?;

        if !response.status().is_success() {
            return Err(backend_status_error(response.status()));
        }

        let model = request.model.clone();
        let completion_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
        let byte_stream = response.bytes_stream();

        Ok(ndjson_to_sse(byte_stream, model, completion_id))
    }
}

/// Translate an OpenAI-shape request into Ollama's `/api/chat` body.
fn translate_request(request: &ChatCompletionRequest, stream: bool) -> Value {
    let mut options = Map::new();
    if let Some(temperature) = request.temperature {
        options.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = request.top_p {
        options.insert("top_p".to_string(), json!(top_p));
    }
    if let Some(max_tokens) = request.max_tokens {
        options.insert("num_predict".to_string(), json!(max_tokens));
    }

    let mut body = json!({
        "model": request.model,
        "messages": request.messages,
        "stream": stream,
    });

    if !request.tools.is_empty() {
        body["tools"] = json!(request.tools);
    }
    if !options.is_empty() {
        body["options"] = Value::Object(options);
    }

    body
}

/// Translate a single non-streaming Ollama `/api/chat` response body.
fn translate_response(payload: &Value, model: &str) -> Result<ChatCompletionResponse, GatewayError> {
    let message_value = payload
        .get("message")
        .ok_or_else(|| GatewayError::Backend("backend response missing 'message'".to_string()))?;

    let message = translate_message(message_value)?;
    let finish_reason = payload.get("done_reason").and_then(Value::as_str).unwrap_or("stop").to_string();

    Ok(ChatCompletionResponse::single(model.to_string(), message, finish_reason))
}

fn translate_message(value: &Value) -> Result<ChatMessage, GatewayError> {
    let role = value.get("role").and_then(Value::as_str).unwrap_or("assistant").to_string();
    let content = value.get("content").and_then(Value::as_str).map(str::to_string);

    let tool_calls = value.get("tool_calls").and_then(Value::as_array).map(|calls| {
        calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                let function = call.get("function").cloned().unwrap_or(Value::Null);
                let name = function.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let arguments = function
                    .get("arguments")
                    .map(|v| if v.is_string() { v.as_str().unwrap_or_default().to_string() } else { v.to_string() })
                    .unwrap_or_else(|| "{}".to_string());

                ToolCall {
                    id: call.get("id").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| format!("call_{index}")),
                    kind: "function".to_string(),
                    function: ToolCallFunction { name, arguments },
                }
            })
            .collect::<Vec<_>>()
    });

    Ok(ChatMessage {
        role,
        content,
        name: None,
        tool_calls,
        tool_call_id: None,
    })
}

/// Re-frame Ollama's newline-delimited JSON stream as OpenAI-shape SSE chunks.
fn ndjson_to_sse(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    model: String,
    completion_id: String,
) -> impl Stream<Item = Result<Bytes, GatewayError>> {
    async_stream::stream! {
        let mut buf = Vec::<u8>::new();
        tokio::pin!(byte_stream);

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(backend_send_error(&err));
                    yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
                    return;
                }
            };
            buf.extend_from_slice(&chunk);

            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let line = &line[..line.len().saturating_sub(1)];
                if line.is_empty() {
                    continue;
                }

                let Ok(payload) = serde_json::from_slice::<Value>(line) else { continue };
                let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);
                let delta_content = payload.get("message").and_then(|m| m.get("content")).and_then(Value::as_str).unwrap_or_default();

                let sse_chunk = json!({
                    "id": completion_id,
                    "object": "chat.completion.chunk",
                    "model": model,
                    "choices": [{
                        "index": 0,
                        "delta": {"content": delta_content},
                        "finish_reason": if done { payload.get("done_reason").and_then(Value::as_str).unwrap_or("stop") } else { "" },
                    }],
                });
                yield Ok(Bytes::from(format!("data: {sse_chunk}\n\n")));

                if done {
                    yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
                    return;
                }
            }
        }
        yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
    }
}

fn backend_send_error(err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(err.to_string())
    } else {
        GatewayError::Backend(err.to_string())
    }
}

fn backend_status_error(status: reqwest::StatusCode) -> GatewayError {
    GatewayError::Backend(format!("backend returned {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_request_maps_sampling_params_to_options() {
        let request = ChatCompletionRequest {
            model: "mistral".to_string(),
            messages: vec![ChatMessage::assistant("hi")],
            stream: false,
            temperature: Some(0.2),
            top_p: Some(0.9),
            max_tokens: Some(256),
            tools: vec![],
            tool_choice: None,
        };
        let body = translate_request(&request, false);
        assert_eq!(body["options"]["temperature"], 0.2);
        assert_eq!(body["options"]["num_predict"], 256);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn translate_response_extracts_message_and_finish_reason() {
        let payload = json!({
            "message": {"role": "assistant", "content": "hello"},
            "done": true,
            "done_reason": "stop",
        });
        let response = translate_response(&payload, "mistral").unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(response.choices[0].finish_reason, "stop");
    }

    #[test]
    fn translate_response_extracts_tool_calls() {
        let payload = json!({
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{"function": {"name": "mcp.fs.read_file", "arguments": {"path": "a.txt"}}}],
            },
            "done": true,
        });
        let response = translate_response(&payload, "mistral").unwrap();
        let tool_calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(tool_calls[0].function.name, "mcp.fs.read_file");
        assert_eq!(tool_calls[0].function.arguments, json!({"path": "a.txt"}).to_string());
    }

    #[test]
    fn missing_message_field_is_a_backend_error() {
        let payload = json!({"done": true});
        assert!(translate_response(&payload, "mistral").is_err());
    }
}
