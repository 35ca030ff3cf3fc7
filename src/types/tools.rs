//! Metadata describing a tool, resource, or prompt exposed by an MCP server.
//!
//! The MCP runtime returns these descriptions via the `tools/list`, `resources/list`
//! and `prompts/list` RPCs. This module converts the `rmcp`-provided models into a
//! serde-friendly representation that the Tool Registry, Metadata Cache and HTTP
//! surface can use without a direct dependency on `rmcp` internals.

use rmcp::model::Tool as RmcpTool;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata for a single tool as reported by its owning server, before namespacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolMetadata {
    /// Tool identifier exactly as returned by the MCP server (unnamespaced).
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    pub annotations: Option<Value>,
}

impl McpToolMetadata {
    pub fn from_rmcp(tool: &RmcpTool) -> Self {
        let input_schema = Value::Object((tool.input_schema.as_ref()).clone());
        let output_schema = tool.output_schema.as_ref().map(|schema| Value::Object((schema.as_ref()).clone()));
        let annotations = tool.annotations.as_ref().and_then(|ann| serde_json::to_value(ann).ok());

        Self {
            name: tool.name.to_string(),
            title: tool.title.clone(),
            description: tool.description.as_ref().map(|d| d.to_string()),
            input_schema,
            output_schema,
            annotations,
        }
    }
}

impl From<RmcpTool> for McpToolMetadata {
    fn from(tool: RmcpTool) -> Self {
        Self::from_rmcp(&tool)
    }
}

/// A fully-qualified tool descriptor as held by the Tool Registry (`spec.md` §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// `mcp.<server>.<tool>` — the only form the model ever sees.
    pub qualified_name: String,
    /// The server's own unnamespaced tool name, used at the transport boundary.
    pub original_name: String,
    /// The server this tool belongs to, referenced by name (looked up through the
    /// Server Manager rather than held as a pointer — see `spec.md` §9).
    pub server: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn qualify(server: &str, tool: &str) -> String {
        format!("mcp.{server}.{tool}")
    }

    pub fn from_metadata(server: &str, meta: &McpToolMetadata) -> Self {
        Self {
            qualified_name: Self::qualify(server, &meta.name),
            original_name: meta.name.clone(),
            server: server.to_string(),
            description: meta.description.clone(),
            input_schema: meta.input_schema.clone(),
        }
    }
}

/// Parses a namespaced tool name `mcp.<server>.<tool>` into its parts.
///
/// Tool names themselves may contain dots, so the split only peels off the leading
/// `mcp.` literal and the first remaining segment as the server name; everything after
/// the second dot is the original tool name verbatim.
pub fn split_qualified_name(qualified: &str) -> Option<(&str, &str)> {
    let rest = qualified.strip_prefix("mcp.")?;
    let (server, tool) = rest.split_once('.')?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

/// A resource descriptor (`spec.md` §3): `uri`, `name`, mime type, owning server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub server: String,
}

/// A prompt descriptor as reported by `prompts/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub server: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::{Tool, ToolAnnotations};
    use serde_json::{Map, json};
    use std::sync::Arc;

    #[test]
    fn from_rmcp_copies_core_fields() {
        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));

        let input_schema = Arc::new(schema.clone());
        let mut tool = Tool::new("demo", "Demo description", input_schema.clone());
        tool.title = Some("Demo".into());
        tool.output_schema = Some(Arc::new(schema));
        tool.annotations = Some(ToolAnnotations::with_title("Demo"));

        let metadata = McpToolMetadata::from_rmcp(&tool);

        assert_eq!(metadata.name, "demo");
        assert_eq!(metadata.title.as_deref(), Some("Demo"));
        assert_eq!(metadata.input_schema["type"], json!("object"));
        assert!(metadata.output_schema.is_some());
        assert!(metadata.annotations.is_some());
    }

    #[test]
    fn qualify_and_split_round_trip() {
        let qualified = ToolDescriptor::qualify("fs", "read_file");
        assert_eq!(qualified, "mcp.fs.read_file");
        assert_eq!(split_qualified_name(&qualified), Some(("fs", "read_file")));
    }

    #[test]
    fn split_rejects_malformed_names() {
        assert_eq!(split_qualified_name("read_file"), None);
        assert_eq!(split_qualified_name("mcp.fs"), None);
        assert_eq!(split_qualified_name("mcp..read_file"), None);
    }

    #[test]
    fn split_keeps_dots_in_tool_name() {
        assert_eq!(split_qualified_name("mcp.fs.read.file.v2"), Some(("fs", "read.file.v2")));
    }
}
