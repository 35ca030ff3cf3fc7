//! Resource Resolver (`spec.md` §4.7): scans chat message text for
//! `mcp://<server>/<opaque-uri>` references, fetches each distinct one once,
//! and injects the content as additional system messages.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::client::McpClientManager;
use crate::types::ChatMessage;

static RESOURCE_URI_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"mcp://([A-Za-z0-9_-]+)/(\S+)").expect("valid regex"));

/// One distinct `mcp://` reference found in the request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResourceRef {
    server: String,
    uri: String,
}

/// Outcome of resolving every resource reference in a request.
#[derive(Debug, Default)]
pub struct ResolutionOutcome {
    /// System messages to splice in immediately after the original system message.
    pub injected_messages: Vec<ChatMessage>,
    /// Non-fatal problems (unhealthy/unknown server) to surface in the request log.
    pub warnings: Vec<String>,
}

/// Scan `messages`' user/system content for `mcp://` references and resolve
/// each distinct one via `resources/read`. Never fails the request: servers
/// that are missing or unhealthy are left verbatim with a warning recorded.
pub async fn resolve_resources(manager: &McpClientManager, messages: &[ChatMessage]) -> ResolutionOutcome {
    let refs = extract_distinct_refs(messages);
    let mut outcome = ResolutionOutcome::default();

    for reference in refs {
        match resolve_one(manager, &reference).await {
            Ok(Some(text)) => {
                outcome
                    .injected_messages
                    .push(ChatMessage::system(format!("Resource mcp://{}/{}: {}", reference.server, reference.uri, text)));
            }
            Ok(None) => {
                outcome.warnings.push(format!("mcp://{}/{}: resource returned no content", reference.server, reference.uri));
            }
            Err(warning) => outcome.warnings.push(warning),
        }
    }

    outcome
}

/// Distinct `mcp://server/uri` references across every message, in first-seen order.
fn extract_distinct_refs(messages: &[ChatMessage]) -> Vec<ResourceRef> {
    let mut seen = std::collections::HashSet::new();
    let mut refs = Vec::new();

    for message in messages {
        if message.role != "user" && message.role != "system" {
            continue;
        }
        let Some(content) = &message.content else { continue };
        for capture in RESOURCE_URI_PATTERN.captures_iter(content) {
            let server = capture[1].to_string();
            let uri = capture[2].to_string();
            let key = (server.clone(), uri.clone());
            if seen.insert(key) {
                refs.push(ResourceRef { server, uri });
            }
        }
    }

    refs
}

/// Resolve a single reference. `Ok(None)` means the fetch succeeded with no
/// textual content; `Err` carries a human-readable warning for the caller to
/// record without failing the request.
async fn resolve_one(manager: &McpClientManager, reference: &ResourceRef) -> Result<Option<String>, String> {
    let Some(health) = manager.get_health(&reference.server).await else {
        return Err(format!("mcp://{}/{}: unknown server, left verbatim", reference.server, reference.uri));
    };
    if !health.is_usable() {
        return Err(format!("mcp://{}/{}: server is {}, left verbatim", reference.server, reference.uri, health.status));
    }

    let result = manager
        .read_resource(&reference.server, &reference.uri)
        .await
        .map_err(|err| format!("mcp://{}/{}: {}", reference.server, reference.uri, err))?;

    let mut parts = Vec::new();
    for contents in result.contents {
        match contents {
            rmcp::model::ResourceContents::TextResourceContents { text, .. } => {
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            rmcp::model::ResourceContents::BlobResourceContents { blob, mime_type, .. } => {
                let mime = mime_type.unwrap_or_else(|| "application/octet-stream".to_string());
                parts.push(format!("[binary resource, mime-type={mime}, base64]\n{blob}"));
            }
        }
    }

    if parts.is_empty() { Ok(None) } else { Ok(Some(parts.join("\n"))) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_reference() {
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: Some("Summarize mcp://fs/file:///docs/readme.txt please".to_string()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }];
        let refs = extract_distinct_refs(&messages);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].server, "fs");
        assert_eq!(refs[0].uri, "file:///docs/readme.txt");
    }

    #[test]
    fn deduplicates_repeated_reference_in_same_request() {
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: Some("mcp://fs/a.txt and again mcp://fs/a.txt".to_string()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }];
        assert_eq!(extract_distinct_refs(&messages).len(), 1);
    }

    #[test]
    fn ignores_assistant_and_tool_messages() {
        let messages = vec![ChatMessage {
            role: "assistant".to_string(),
            content: Some("mcp://fs/a.txt".to_string()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }];
        assert!(extract_distinct_refs(&messages).is_empty());
    }

    #[tokio::test]
    async fn unknown_server_yields_warning_not_error() {
        let manager = McpClientManager::new(crate::config::McpConfig::default()).unwrap();
        let outcome = resolve_resources(
            &manager,
            &[ChatMessage {
                role: "user".to_string(),
                content: Some("mcp://missing/uri".to_string()),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            }],
        )
        .await;
        assert!(outcome.injected_messages.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }
}
