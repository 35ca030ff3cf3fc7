//! Completions Cache (`spec.md` §4.9): a fingerprinted, size-bounded LRU of
//! non-streaming completion results that did not invoke any tool call, with
//! per-key singleflight so concurrent misses for the same fingerprint result
//! in exactly one backend call (`spec.md` §5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::ChatCompletionResponse;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("upstream completion failed: {0}")]
    Upstream(String),
}

struct CacheEntry {
    response: ChatCompletionResponse,
    inserted_at: Instant,
    size_bytes: usize,
}

/// Inputs to the cache fingerprint (`spec.md` §3's "Cache entry" data model).
pub struct FingerprintInput<'a> {
    pub model: &'a str,
    pub messages: &'a [crate::types::ChatMessage],
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tool_fingerprint: &'a str,
    pub resource_digest: &'a str,
}

/// A SHA-256 fingerprint over the canonicalized request (`spec.md` §3, §4.9).
pub fn fingerprint(input: &FingerprintInput) -> String {
    let canonical = serde_json::json!({
        "model": input.model,
        "messages": input.messages,
        "temperature": input.temperature,
        "top_p": input.top_p,
        "max_tokens": input.max_tokens,
        "tool_fingerprint": input.tool_fingerprint,
        "resource_digest": input.resource_digest,
    });
    let canonical_bytes = canonicalize(&canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable fingerprint over a tool set: the sorted list of qualified names.
pub fn tool_set_fingerprint(qualified_names: &[String]) -> String {
    let mut sorted = qualified_names.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    hasher.update(sorted.join(",").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable digest over the text injected by the Resource Resolver, order-preserving.
pub fn resource_digest(injected_texts: &[String]) -> String {
    let mut hasher = Sha256::new();
    for text in injected_texts {
        hasher.update(text.as_bytes());
        hasher.update(b"\0");
    }
    format!("{:x}", hasher.finalize())
}

/// Recursively sort object keys so structurally-identical JSON always
/// serializes to the same string, regardless of field insertion order.
fn canonicalize(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut sorted_map = serde_json::Map::new();
                for (key, val) in entries {
                    sorted_map.insert(key.clone(), sorted(val));
                }
                Value::Object(sorted_map)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// LRU, byte-size-capped cache of completions, keyed by [`fingerprint`].
pub struct CompletionsCache {
    ttl: Duration,
    max_bytes: usize,
    entries: Mutex<IndexMap<String, CacheEntry>>,
    total_bytes: Mutex<usize>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CompletionsCache {
    pub fn new(ttl: Duration, max_bytes: usize) -> Self {
        Self {
            ttl,
            max_bytes,
            entries: Mutex::new(IndexMap::new()),
            total_bytes: Mutex::new(0),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Lookup only; does not compute on miss. Touches LRU order on hit.
    pub async fn get(&self, key: &str) -> Option<ChatCompletionResponse> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            let removed = entries.shift_remove(key).expect("just looked up");
            drop(entries);
            *self.total_bytes.lock().await -= removed.size_bytes;
            return None;
        }
        let response = entry.response.clone();
        let index = entries.get_index_of(key).expect("just looked up");
        let last = entries.len() - 1;
        entries.move_index(index, last);
        Some(response)
    }

    pub async fn put(&self, key: String, response: ChatCompletionResponse) {
        let size_bytes = serde_json::to_vec(&response).map(|v| v.len()).unwrap_or(0);
        let mut entries = self.entries.lock().await;
        let mut total = self.total_bytes.lock().await;

        if let Some(old) = entries.shift_remove(&key) {
            *total -= old.size_bytes;
        }

        while *total + size_bytes > self.max_bytes
            && let Some((_, evicted)) = entries.shift_remove_index(0)
        {
            *total -= evicted.size_bytes;
        }

        entries.insert(
            key,
            CacheEntry {
                response,
                inserted_at: Instant::now(),
                size_bytes,
            },
        );
        *total += size_bytes;
    }

    /// Look up `key`; on miss, run `compute` with at most one concurrent
    /// caller per key (singleflight), then populate the cache.
    pub async fn get_or_compute<F, Fut>(&self, key: String, compute: F) -> Result<ChatCompletionResponse, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<ChatCompletionResponse, CacheError>>,
    {
        if let Some(hit) = self.get(&key).await {
            return Ok(hit);
        }

        let lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        let _guard = lock.lock().await;

        if let Some(hit) = self.get(&key).await {
            self.inflight.lock().await.remove(&key);
            return Ok(hit);
        }

        let result = compute().await;
        if let Ok(response) = &result {
            self.put(key.clone(), response.clone()).await;
        }
        self.inflight.lock().await.remove(&key);
        result
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn total_bytes(&self) -> usize {
        *self.total_bytes.lock().await
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
        *self.total_bytes.lock().await = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatCompletionChoice;

    fn response(content: &str) -> ChatCompletionResponse {
        ChatCompletionResponse::single("mistral".to_string(), crate::types::ChatMessage::assistant(content), "stop".to_string())
    }

    #[test]
    fn fingerprint_is_stable_regardless_of_field_order() {
        let messages = vec![crate::types::ChatMessage::assistant("hi")];
        let a = FingerprintInput {
            model: "mistral",
            messages: &messages,
            temperature: Some(0.5),
            top_p: None,
            max_tokens: None,
            tool_fingerprint: "tf",
            resource_digest: "rd",
        };
        let b = FingerprintInput {
            model: "mistral",
            messages: &messages,
            temperature: Some(0.5),
            top_p: None,
            max_tokens: None,
            tool_fingerprint: "tf",
            resource_digest: "rd",
        };
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn tool_set_fingerprint_ignores_order() {
        let a = tool_set_fingerprint(&["mcp.fs.read".to_string(), "mcp.fs.write".to_string()]);
        let b = tool_set_fingerprint(&["mcp.fs.write".to_string(), "mcp.fs.read".to_string()]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = CompletionsCache::new(Duration::from_secs(60), 1_000_000);
        cache.put("k1".to_string(), response("hello")).await;
        let hit = cache.get("k1").await.unwrap();
        assert_eq!(hit.choices[0].message.content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let cache = CompletionsCache::new(Duration::from_millis(5), 1_000_000);
        cache.put("k1".to_string(), response("hello")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k1").await.is_none());
    }

    #[tokio::test]
    async fn eviction_respects_byte_cap() {
        let entry_size = serde_json::to_vec(&response("x")).unwrap().len();
        let cache = CompletionsCache::new(Duration::from_secs(60), entry_size + 1);
        cache.put("k1".to_string(), response("x")).await;
        cache.put("k2".to_string(), response("y")).await;
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("k1").await.is_none());
        assert!(cache.get("k2").await.is_some());
    }

    #[tokio::test]
    async fn concurrent_misses_singleflight_to_one_compute() {
        let cache = Arc::new(CompletionsCache::new(Duration::from_secs(60), 1_000_000));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared".to_string(), || async {
                        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(response("computed"))
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
