//! Shared types for the tool-server boundary.

use serde::{Deserialize, Serialize};

/// A tool as advertised by a tool-server. Read-only to this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRegistryEntry {
    /// Owning server, e.g. `"fs"`.
    #[serde(alias = "serverId")]
    pub server_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's arguments.
    #[serde(default, alias = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// One content block in a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    pub text: String,
}

/// Result of a tool invocation as returned across the boundary.
///
/// Failures surface as `is_error: true` with a textual explanation — the
/// boundary never leaks transport exceptions into the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallOutcome {
    pub content: Vec<ContentBlock>,
    #[serde(default, alias = "isError")]
    pub is_error: bool,
}

impl ToolCallOutcome {
    /// A successful outcome with a single text block.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock { text: text.into() }],
            is_error: false,
        }
    }

    /// A failed outcome with a single text explanation.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock { text: text.into() }],
            is_error: true,
        }
    }

    /// All content blocks joined into one text blob.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
