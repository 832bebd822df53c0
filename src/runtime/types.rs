//! Shared types across the runtime: conversation messages, turn status
//! callbacks, and the events handed back to the embedding application.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fresh conversation id for callers that don't bring their own.
pub fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ─── Messages ───────────────────────────────────────────────────────────────

/// Message role within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Optional tool markers attached to a message.
///
/// All fields default to empty so plain chat messages serialize without
/// metadata noise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_tool_call: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_tool_result: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_tool_observation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result_summary: Option<String>,
}

impl MessageMeta {
    /// Whether any marker is set.
    pub fn is_empty(&self) -> bool {
        !self.is_tool_call
            && !self.is_tool_result
            && !self.is_tool_observation
            && self.tool_name.is_none()
            && self.tool_args.is_none()
            && self.tool_result_text.is_none()
            && self.tool_result_summary.is_none()
    }
}

/// A single message in a conversation. Ordered, append-only — the
/// orchestrator never mutates past entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "MessageMeta::is_empty")]
    pub meta: MessageMeta,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            meta: MessageMeta::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Build a `tool`-role observation carrying the full result text and its
    /// summary, the shape the context window compresses later. The error
    /// flag lives in the summary glyph, not in a separate field.
    pub fn tool_observation(
        tool_name: &str,
        args: &serde_json::Value,
        result_text: &str,
        summary: &str,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            content: summary.to_string(),
            meta: MessageMeta {
                is_tool_result: true,
                is_tool_observation: true,
                tool_name: Some(tool_name.to_string()),
                tool_args: Some(args.clone()),
                tool_result_text: Some(result_text.to_string()),
                tool_result_summary: Some(summary.to_string()),
                ..Default::default()
            },
            timestamp: Utc::now(),
        }
    }
}

// ─── Turn status & callbacks ────────────────────────────────────────────────

/// Public states of the per-turn state machine, surfaced via `on_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    AwaitingModel,
    ExecutingTool,
    Observing,
    Done,
    Error,
    LoopAborted,
}

/// A status callback payload.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub status: TurnStatus,
    pub message: String,
}

/// Fired once per actual tool execution (cache hits do not re-fire).
#[derive(Debug, Clone, Serialize)]
pub struct ToolResultEvent {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type StatusFn = Arc<dyn Fn(StatusUpdate) + Send + Sync>;
pub type ToolResultFn = Arc<dyn Fn(ToolResultEvent) + Send + Sync>;
pub type StreamFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks the embedding application wires into a turn. All optional.
#[derive(Clone, Default)]
pub struct TurnCallbacks {
    pub on_status: Option<StatusFn>,
    pub on_tool_result: Option<ToolResultFn>,
    pub on_stream: Option<StreamFn>,
}

impl TurnCallbacks {
    pub(crate) fn status(&self, status: TurnStatus, message: impl Into<String>) {
        if let Some(ref f) = self.on_status {
            f(StatusUpdate {
                status,
                message: message.into(),
            });
        }
    }

    pub(crate) fn tool_result(&self, event: ToolResultEvent) {
        if let Some(ref f) = self.on_tool_result {
            f(event);
        }
    }

    pub(crate) fn stream(&self, chunk: &str) {
        if let Some(ref f) = self.on_stream {
            f(chunk);
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
