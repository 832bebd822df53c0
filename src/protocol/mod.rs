//! Tool-call protocol — detection and normalization of a model's intent to
//! call a tool.
//!
//! Two worlds feed into this module: providers with native structured
//! function calling (tool name + JSON arguments as typed fields) and models
//! that can only express tool intent as free text with embedded JSON. Both
//! end up as a [`ToolCallIntent`], which [`normalize::normalize_function_call`]
//! resolves against the registry into exactly one `(server, tool)` pair.
//!
//! Submodules:
//! - `detect`: ordered free-text extraction strategies (fenced block, then
//!   bare JSON scan), each independently testable
//! - `normalize`: name resolution, wrapper flattening, control-key
//!   stripping, default path injection, provider tool-schema conversion

pub mod detect;
pub mod normalize;

use serde::Serialize;
use thiserror::Error;

/// Wire-format families the protocol can target. A closed set — new
/// providers are added here and in `providers`, never by string matching
/// inside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions (cloud or local gateway).
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Gemini `generateContent`.
    Gemini,
    /// Ollama native chat endpoint (no structured function calling).
    Ollama,
}

/// A parsed, not-yet-executed request from the model to invoke a tool.
/// Transient: produced from a single model response, acted upon, dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallIntent {
    /// Explicit server, when the model encoded one. `None` until resolution.
    pub server_id: Option<String>,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// An ordered list of tool calls the model asked to run before its next
/// turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolPlan {
    pub tools: Vec<ToolCallIntent>,
}

/// Protocol-level failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The callable name could not be mapped to any registered `(server, tool)`.
    #[error("unresolvable tool '{name}'{}", format_candidates(.candidates))]
    UnresolvableTool {
        name: String,
        candidates: Vec<String>,
    },
}

fn format_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        String::new()
    } else {
        format!(" (candidates: {})", candidates.join(", "))
    }
}
