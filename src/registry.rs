//! Tool Registry and Metadata Cache (`spec.md` §4.6, component table).
//!
//! The registry is shared-read, single-writer: the Server Manager publishes a
//! fresh immutable snapshot per server on every successful discovery/refresh,
//! and readers never block on a writer (`spec.md` §5).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::{McpToolMetadata, PromptDescriptor, ResourceDescriptor, ToolDescriptor};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("qualified tool name '{name}' collides with an existing registration from server '{existing_server}'")]
    Collision { name: String, existing_server: String },
}

/// Namespaced catalog of tools aggregated from every connected server
/// (`spec.md` §4.6). Fully-qualified names are globally unique; listing is
/// stable-ordered by that name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<Arc<BTreeMap<String, ToolDescriptor>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything one server contributes, atomically. Tools from
    /// every other server are preserved untouched.
    ///
    /// Collision-checking is against the post-replacement union: if two tools
    /// from `server` itself collide with each other that's a caller bug (the
    /// source list should already be keyed by original tool name), but a
    /// collision against *another* server's qualified name is rejected here.
    pub fn replace_server_tools(&self, server: &str, tools: &[McpToolMetadata]) -> Result<(), RegistryError> {
        let current = self.tools.read().expect("registry lock poisoned");
        let mut next: BTreeMap<String, ToolDescriptor> = (**current).clone();
        next.retain(|_, descriptor| descriptor.server != server);

        for meta in tools {
            let descriptor = ToolDescriptor::from_metadata(server, meta);
            if let Some(existing) = next.get(&descriptor.qualified_name) {
                return Err(RegistryError::Collision {
                    name: descriptor.qualified_name.clone(),
                    existing_server: existing.server.clone(),
                });
            }
            next.insert(descriptor.qualified_name.clone(), descriptor);
        }

        drop(current);
        *self.tools.write().expect("registry lock poisoned") = Arc::new(next);
        Ok(())
    }

    /// Drop every tool contributed by `server` (used on disconnect/stop).
    pub fn remove_server(&self, server: &str) {
        let current = self.tools.read().expect("registry lock poisoned");
        let mut next: BTreeMap<String, ToolDescriptor> = (**current).clone();
        let had_any = next.iter().any(|(_, d)| d.server == server);
        if !had_any {
            return;
        }
        next.retain(|_, descriptor| descriptor.server != server);
        drop(current);
        *self.tools.write().expect("registry lock poisoned") = Arc::new(next);
    }

    /// O(1) lookup by fully-qualified name.
    pub fn get(&self, qualified_name: &str) -> Option<ToolDescriptor> {
        self.tools.read().expect("registry lock poisoned").get(qualified_name).cloned()
    }

    /// Snapshot of every registered tool, stable-ordered by qualified name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.read().expect("registry lock poisoned").values().cloned().collect()
    }

    pub fn list_for_server(&self, server: &str) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .expect("registry lock poisoned")
            .values()
            .filter(|descriptor| descriptor.server == server)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One server's cached resource/prompt metadata, with its own fetch timestamp.
#[derive(Debug, Clone, Default)]
struct ServerMetadata {
    resources: Vec<ResourceDescriptor>,
    prompts: Vec<PromptDescriptor>,
    fetched_at: Option<Instant>,
}

/// TTL-bounded cache of each server's resources and prompts (`spec.md` system
/// overview component table: "Metadata Cache"). Kept separate from the Tool
/// Registry because resources/prompts are refreshed independently and are not
/// subject to the cross-server namespacing invariant.
pub struct MetadataCache {
    ttl: Duration,
    entries: Mutex<std::collections::HashMap<String, ServerMetadata>>,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub async fn put_resources(&self, server: &str, resources: Vec<ResourceDescriptor>) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(server.to_string()).or_default();
        entry.resources = resources;
        entry.fetched_at = Some(Instant::now());
    }

    pub async fn put_prompts(&self, server: &str, prompts: Vec<PromptDescriptor>) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(server.to_string()).or_default();
        entry.prompts = prompts;
        entry.fetched_at = Some(Instant::now());
    }

    /// Returns `None` if there is no entry, or the entry is stale.
    pub async fn resources(&self, server: &str) -> Option<Vec<ResourceDescriptor>> {
        let entries = self.entries.lock().await;
        let entry = entries.get(server)?;
        if self.is_stale(entry) {
            return None;
        }
        Some(entry.resources.clone())
    }

    pub async fn prompts(&self, server: &str) -> Option<Vec<PromptDescriptor>> {
        let entries = self.entries.lock().await;
        let entry = entries.get(server)?;
        if self.is_stale(entry) {
            return None;
        }
        Some(entry.prompts.clone())
    }

    fn is_stale(&self, entry: &ServerMetadata) -> bool {
        match entry.fetched_at {
            Some(fetched_at) => fetched_at.elapsed() > self.ttl,
            None => true,
        }
    }

    pub async fn invalidate(&self, server: &str) {
        self.entries.lock().await.remove(server);
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> McpToolMetadata {
        McpToolMetadata {
            name: name.to_string(),
            title: None,
            description: None,
            input_schema: json!({"type": "object"}),
            output_schema: None,
            annotations: None,
        }
    }

    #[test]
    fn replace_then_list_is_stable_ordered() {
        let registry = ToolRegistry::new();
        registry.replace_server_tools("fs2", &[tool("read_file")]).unwrap();
        registry.replace_server_tools("fs", &[tool("read_file"), tool("write_file")]).unwrap();

        let names: Vec<_> = registry.list().into_iter().map(|d| d.qualified_name).collect();
        assert_eq!(names, vec!["mcp.fs.read_file", "mcp.fs.write_file", "mcp.fs2.read_file"]);
    }

    #[test]
    fn namespacing_prevents_cross_server_collision() {
        let registry = ToolRegistry::new();
        registry.replace_server_tools("fs", &[tool("read_file")]).unwrap();
        assert_eq!(registry.get("mcp.fs.read_file").unwrap().server, "fs");
        assert!(registry.get("mcp.fs2.read_file").is_none());
    }

    #[test]
    fn refresh_is_atomic_per_server() {
        let registry = ToolRegistry::new();
        registry.replace_server_tools("fs", &[tool("a"), tool("b")]).unwrap();
        registry.replace_server_tools("fs", &[tool("c")]).unwrap();

        let names: Vec<_> = registry.list_for_server("fs").into_iter().map(|d| d.original_name).collect();
        assert_eq!(names, vec!["c"]);
    }

    #[test]
    fn remove_server_drops_only_that_servers_tools() {
        let registry = ToolRegistry::new();
        registry.replace_server_tools("fs", &[tool("a")]).unwrap();
        registry.replace_server_tools("web", &[tool("b")]).unwrap();
        registry.remove_server("fs");
        assert_eq!(registry.len(), 1);
        assert!(registry.get("mcp.web.b").is_some());
    }

    #[tokio::test]
    async fn metadata_cache_expires_after_ttl() {
        let cache = MetadataCache::new(Duration::from_millis(10));
        cache
            .put_resources(
                "fs",
                vec![ResourceDescriptor {
                    uri: "file:///a".to_string(),
                    name: None,
                    mime_type: None,
                    server: "fs".to_string(),
                }],
            )
            .await;
        assert!(cache.resources("fs").await.is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.resources("fs").await.is_none());
    }
}
