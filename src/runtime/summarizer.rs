//! Tool result summarization — compresses a raw tool result and its
//! arguments into a short digest for reinjection into conversation history.
//!
//! The digest is deterministic and idempotent: summarizing an already
//! summarized string again never corrupts it structurally, so a summary can
//! safely flow back through the pipeline.

use crate::runtime::tokens::truncate_utf8;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default hard cap on the result portion of a digest.
pub const DEFAULT_MAX_RESULT_CHARS: usize = 280;

/// Default number of scalar arguments rendered into a digest.
pub const DEFAULT_MAX_ARGS: usize = 4;

/// Argument keys that carry bulk content and would re-explode the context
/// if echoed back into history.
const BULK_CONTENT_KEYS: &[&str] = &["content", "text", "edits", "data", "body"];

// ─── Input ──────────────────────────────────────────────────────────────────

/// Everything needed to build a digest for one tool execution.
#[derive(Debug, Clone)]
pub struct SummaryInput<'a> {
    pub tool_name: &'a str,
    pub args: &'a serde_json::Value,
    pub result_text: &'a str,
    pub is_error: bool,
    pub max_result_chars: usize,
    pub max_args: usize,
}

impl<'a> SummaryInput<'a> {
    /// Input with the default caps.
    pub fn new(
        tool_name: &'a str,
        args: &'a serde_json::Value,
        result_text: &'a str,
        is_error: bool,
    ) -> Self {
        Self {
            tool_name,
            args,
            result_text,
            is_error,
            max_result_chars: DEFAULT_MAX_RESULT_CHARS,
            max_args: DEFAULT_MAX_ARGS,
        }
    }
}

// ─── Summarization ──────────────────────────────────────────────────────────

/// Build the digest: status glyph + tool name + up to `max_args` scalar
/// arguments as `key=value`, then the result text collapsed to one line and
/// hard-truncated with an ellipsis when cut.
pub fn summarize_tool_result(input: &SummaryInput<'_>) -> String {
    let glyph = if input.is_error { "⚠️" } else { "✅" };

    let mut parts = vec![format!("{glyph} {}", input.tool_name)];

    if let Some(obj) = input.args.as_object() {
        let mut rendered = 0;
        for (key, value) in obj {
            if rendered >= input.max_args {
                break;
            }
            if BULK_CONTENT_KEYS.contains(&key.as_str()) {
                continue;
            }
            let scalar = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                // Objects and arrays are excluded — they are the bulk the
                // digest exists to avoid
                _ => continue,
            };
            parts.push(format!("{key}={scalar}"));
            rendered += 1;
        }
    }

    let collapsed = collapse_whitespace(input.result_text);
    let body = if collapsed.chars().count() > input.max_result_chars {
        let mut cut: String = collapsed.chars().take(input.max_result_chars).collect();
        cut.push('…');
        cut
    } else {
        collapsed
    };

    if body.is_empty() {
        parts.join(" ")
    } else {
        format!("{} — {}", parts.join(" "), body)
    }
}

/// Collapse all whitespace runs (including newlines) to single spaces.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One-line condensation of a summary for log output — never longer than
/// `max_bytes` and always valid UTF-8.
pub fn preview(summary: &str, max_bytes: usize) -> &str {
    truncate_utf8(summary, max_bytes)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
