//! Normalized request/response shapes shared by every provider adapter.

use crate::protocol::ToolCallIntent;
use crate::runtime::types::{Message, MessageRole};
use crate::toolserver::ToolRegistry;

// ─── Request ────────────────────────────────────────────────────────────────

/// Sampling and length parameters for one generation.
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: None,
            max_tokens: 1024,
        }
    }
}

/// A provider-agnostic completion request. Adapters turn this into their
/// wire format; the tool registry is converted per provider by the protocol
/// layer.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: ToolRegistry,
    /// Expose tools under `server__name` to disambiguate duplicates.
    pub namespace_tools: bool,
    pub options: GenerationOptions,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: ToolRegistry::new(),
            namespace_tools: true,
            options: GenerationOptions::default(),
        }
    }
}

// ─── Response ───────────────────────────────────────────────────────────────

/// A parsed provider response: text, or a tool-call intent, or both (some
/// models narrate while calling).
#[derive(Debug, Clone, Default)]
pub struct ProviderReply {
    pub text: String,
    pub tool_intent: Option<ToolCallIntent>,
}

impl ProviderReply {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_intent: None,
        }
    }
}

// ─── Wire helpers ───────────────────────────────────────────────────────────

/// Role string for OpenAI-style wire formats. Tool observations travel as
/// user-role context because this runtime reinjects summarized results
/// rather than replaying provider-specific tool round-trips.
pub(crate) fn wire_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User | MessageRole::Tool => "user",
        MessageRole::Assistant => "assistant",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
