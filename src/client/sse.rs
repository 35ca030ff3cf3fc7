//! Hand-rolled legacy SSE transport: a GET event stream paired with POST
//! JSON-RPC requests, correlated by request id. Unlike the Streamable-HTTP
//! transport this is not poolable — callers get exclusive use of one
//! connection per server.

use crate::client::http::{build_http_client_with_auth, resolve_sse_post_endpoint};
use crate::config::McpServer;
use anyhow::Result;
use futures_util::StreamExt;
use rmcp::model::CallToolResult;
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

const CALL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// A live session against a legacy-SSE MCP server.
pub struct SseSession {
    client: reqwest::Client,
    post_url: url::Url,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<JsonValue>>>>,
    id_counter: AtomicU64,
    listener: JoinHandle<()>,
}

impl SseSession {
    /// Connect to `server`: spawns the background SSE listener and returns a
    /// session usable for JSON-RPC request/response correlation.
    pub async fn connect(server: &McpServer) -> Result<Self> {
        let client = build_http_client_with_auth(server).await?;
        let post_url = resolve_sse_post_endpoint(server)?;
        let sse_url = server.base_url.clone().unwrap_or_else(|| post_url.clone());

        let pending = Arc::new(Mutex::new(HashMap::new()));
        let listener = spawn_sse_listener(&client, &sse_url, &pending);

        Ok(Self {
            client,
            post_url,
            pending,
            id_counter: AtomicU64::new(1),
            listener,
        })
    }

    async fn rpc_call(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let response = self.client.post(self.post_url.clone()).json(&body).send().await;

        if let Err(err) = response {
            self.pending.lock().await.remove(&id);
            return Err(anyhow::anyhow!("sse post failed: {}", err));
        }

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(value)) => {
                if let Some(error) = value.get("error") {
                    anyhow::bail!("mcp error: {}", error);
                }
                Ok(value.get("result").cloned().unwrap_or(JsonValue::Null))
            }
            Ok(Err(_)) => anyhow::bail!("sse response channel dropped for id={}", id),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                anyhow::bail!("sse request '{}' timed out after {:?}", method, CALL_TIMEOUT)
            }
        }
    }

    /// List all tools exposed by the server.
    pub async fn list_tools(&self) -> Result<Vec<rmcp::model::Tool>> {
        let result = self.rpc_call("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("malformed tools/list response"))?;
        Ok(serde_json::from_value(tools)?)
    }

    /// Invoke a tool by name with the given arguments.
    pub async fn call_tool(&self, name: &str, arguments: &serde_json::Map<String, JsonValue>) -> Result<CallToolResult> {
        let result = self.rpc_call("tools/call", json!({"name": name, "arguments": arguments})).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_resources(&self) -> Result<Vec<rmcp::model::Resource>> {
        let result = self.rpc_call("resources/list", json!({})).await?;
        let resources = result.get("resources").cloned().ok_or_else(|| anyhow::anyhow!("malformed resources/list response"))?;
        Ok(serde_json::from_value(resources)?)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<rmcp::model::ReadResourceResult> {
        let result = self.rpc_call("resources/read", json!({"uri": uri})).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_prompts(&self) -> Result<Vec<rmcp::model::Prompt>> {
        let result = self.rpc_call("prompts/list", json!({})).await?;
        let prompts = result.get("prompts").cloned().ok_or_else(|| anyhow::anyhow!("malformed prompts/list response"))?;
        Ok(serde_json::from_value(prompts)?)
    }

    pub async fn get_prompt(&self, name: &str, arguments: &serde_json::Map<String, JsonValue>) -> Result<rmcp::model::GetPromptResult> {
        let result = self.rpc_call("prompts/get", json!({"name": name, "arguments": arguments})).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Tear down the background listener.
    pub fn close(self) {
        self.listener.abort();
    }
}

fn spawn_sse_listener(
    client: &reqwest::Client,
    base_url: &url::Url,
    pending: &Arc<Mutex<HashMap<String, oneshot::Sender<JsonValue>>>>,
) -> JoinHandle<()> {
    let client = client.clone();
    let base = base_url.clone();
    let pending = Arc::clone(pending);

    tokio::spawn(async move {
        let mut last_event_id: Option<String> = None;
        let mut backoff_ms: u64 = 500;

        loop {
            let mut req = client.get(base.clone()).header(reqwest::header::ACCEPT, "text/event-stream");
            if let Some(id) = &last_event_id {
                req = req.header("Last-Event-ID", id);
            }

            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    backoff_ms = 500;
                    if let Err(e) = process_sse_stream(&mut resp.bytes_stream(), &pending, &mut last_event_id).await {
                        tracing::warn!(target: "mcp_sse", "SSE stream error: {}", e);
                    }
                }
                Ok(resp) => {
                    tracing::warn!(target: "mcp_sse", "SSE request failed: {}", resp.status());
                }
                Err(e) => {
                    tracing::warn!(target: "mcp_sse", "SSE connect error: {}", e);
                }
            }

            tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms * 2).min(10_000);
        }
    })
}

async fn process_sse_stream(
    stream: &mut (impl StreamExt<Item = reqwest::Result<bytes::Bytes>> + Unpin),
    pending: &Arc<Mutex<HashMap<String, oneshot::Sender<JsonValue>>>>,
    last_event_id: &mut Option<String>,
) -> anyhow::Result<()> {
    let mut buf = Vec::<u8>::new();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        buf.extend_from_slice(&bytes);

        while let Some(end) = find_frame_end(&buf) {
            let frame_bytes = &buf[..end];
            if let Ok(text) = std::str::from_utf8(frame_bytes)
                && let Some(frame) = parse_sse_frame(text)
            {
                if let Some(id) = &frame.id {
                    *last_event_id = Some(id.clone());
                }
                if let Some(data) = frame.data {
                    handle_sse_data(&data, last_event_id, pending).await;
                }
            }
            let sep_len = find_separator_len(&buf[end..]);
            buf.drain(..end + sep_len);
        }
    }
    Ok(())
}

async fn handle_sse_data(data: &str, last_event_id: &Option<String>, pending: &Arc<Mutex<HashMap<String, oneshot::Sender<JsonValue>>>>) {
    let Ok(json) = serde_json::from_str::<JsonValue>(data) else {
        tracing::debug!(target: "mcp_sse", "received non-JSON SSE data");
        return;
    };
    let key = extract_id(&json).or_else(|| last_event_id.clone());
    let Some(id) = key else {
        tracing::debug!(target: "mcp_sse", "SSE event without correlation id");
        return;
    };
    let mut map = pending.lock().await;
    if let Some(tx) = map.remove(&id) {
        let _ = tx.send(json);
    } else {
        tracing::debug!(target: "mcp_sse", "unmatched SSE response with id={}", id);
    }
}

fn find_frame_end(buf: &[u8]) -> Option<usize> {
    for i in 0..buf.len() {
        if i + 1 < buf.len() && &buf[i..=i + 1] == b"\n\n" {
            return Some(i);
        }
        if i + 3 < buf.len() && &buf[i..=i + 3] == b"\r\n\r\n" {
            return Some(i);
        }
    }
    None
}

fn find_separator_len(slice: &[u8]) -> usize {
    if slice.starts_with(b"\n\n") {
        2
    } else if slice.starts_with(b"\r\n\r\n") {
        4
    } else {
        0
    }
}

struct SseFrame {
    data: Option<String>,
    id: Option<String>,
}

fn parse_sse_frame(frame_text: &str) -> Option<SseFrame> {
    let mut data_lines = Vec::new();
    let mut id: Option<String> = None;
    let mut saw_any = false;

    for line in frame_text.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
            saw_any = true;
        } else if let Some(rest) = line.strip_prefix("id:") {
            id = Some(rest.trim().to_string());
            saw_any = true;
        } else if line.strip_prefix("event:").is_some() || line.strip_prefix("retry:").is_some() {
            saw_any = true;
        }
    }

    if !saw_any {
        None
    } else {
        Some(SseFrame {
            data: (!data_lines.is_empty()).then(|| data_lines.join("\n")),
            id,
        })
    }
}

fn extract_id(v: &JsonValue) -> Option<String> {
    match v.get("id") {
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_and_id_lines() {
        let frame = parse_sse_frame("id: 42\ndata: {\"ok\":true}\n").expect("frame parses");
        assert_eq!(frame.id.as_deref(), Some("42"));
        assert_eq!(frame.data.as_deref(), Some("{\"ok\":true}"));
    }

    #[test]
    fn ignores_comment_only_frame() {
        assert!(parse_sse_frame(": keep-alive\n").is_none());
    }

    #[test]
    fn extracts_numeric_and_string_ids() {
        assert_eq!(extract_id(&json!({"id": "abc"})), Some("abc".to_string()));
        assert_eq!(extract_id(&json!({"id": 7})), Some("7".to_string()));
        assert_eq!(extract_id(&json!({})), None);
    }
}
