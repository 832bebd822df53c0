//! Token estimation for context window budgets.
//!
//! Character-based heuristics calibrated for LLM tokenizers. Accented
//! natural-language text (Spanish, French, German prose and the like)
//! tokenizes denser than plain ASCII English, so the divisor drops when
//! such characters are present. A real tokenizer can replace this once
//! the model set is pinned.

use crate::runtime::types::{Message, MessageRole};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Average characters per token for plain ASCII text.
const CHARS_PER_TOKEN: f64 = 4.0;

/// Average characters per token when accented/non-ASCII characters are
/// present. Multi-byte codepoints split into more tokens per character.
const ACCENTED_CHARS_PER_TOKEN: f64 = 3.5;

/// Per-message overhead (role label, formatting tokens).
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

// ─── Estimation ─────────────────────────────────────────────────────────────

/// Estimate the token count of a text blob.
///
/// Non-negative, monotonic in length, `O(n)`. Rounds up.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count() as f64;
    let divisor = if has_accented_text(text) {
        ACCENTED_CHARS_PER_TOKEN
    } else {
        CHARS_PER_TOKEN
    };
    (chars / divisor).ceil() as u32
}

/// Estimate the token cost of a full message, including per-message overhead
/// and any tool-call argument payload carried in the metadata.
pub fn estimate_message_tokens(message: &Message) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&message.content);

    if let Some(ref args) = message.meta.tool_args {
        total += estimate_tokens(&serde_json::to_string(args).unwrap_or_default());
    }
    if let Some(ref name) = message.meta.tool_name {
        total += estimate_tokens(name);
    }
    // Tool observations repeat the role marker for the model
    if message.role == MessageRole::Tool {
        total += 2;
    }

    total
}

/// Whether the text contains non-ASCII alphabetic characters (accents,
/// diacritics, non-Latin scripts).
fn has_accented_text(text: &str) -> bool {
    text.chars().any(|c| !c.is_ascii() && c.is_alphabetic())
}

// ─── Truncation ─────────────────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char
/// boundary. The returned slice is always valid UTF-8.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Marker appended to content cut by [`truncate_at_boundary`].
pub const TRUNCATION_MARKER: &str = "\n[…output truncated]";

/// Truncate oversized content at the line or sentence boundary nearest to
/// `max_bytes`, appending an explicit marker. Content is never silently
/// dropped — the caller always sees that a cut happened.
pub fn truncate_at_boundary(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let window = truncate_utf8(s, max_bytes);

    // Prefer a line break, then a sentence end, inside the back half of the
    // window so a boundary near the start doesn't discard most of the text.
    let floor = window.len() / 2;
    let cut = window
        .rfind('\n')
        .filter(|&idx| idx >= floor)
        .or_else(|| window.rfind(". ").filter(|&idx| idx >= floor).map(|idx| idx + 1))
        .unwrap_or(window.len());

    format!("{}{TRUNCATION_MARKER}", &window[..cut])
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::MessageMeta;

    #[test]
    fn estimate_empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_ascii_uses_four_chars_per_token() {
        // 100 chars → ceil(100/4.0) = 25
        let text = "a".repeat(100);
        assert_eq!(estimate_tokens(&text), 25);
    }

    #[test]
    fn estimate_accented_uses_denser_divisor() {
        // 70 chars of accented text → ceil(70/3.5) = 20
        let text = "á".repeat(70);
        assert_eq!(estimate_tokens(&text), 20);

        // Same length in plain ASCII estimates lower
        let ascii = "a".repeat(70);
        assert!(estimate_tokens(&ascii) < estimate_tokens(&text));
    }

    #[test]
    fn estimate_rounds_up() {
        // 5 chars → ceil(5/4.0) = 2
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn estimate_monotonic_in_length() {
        let mut prev = 0;
        for n in [1usize, 10, 100, 1000] {
            let t = estimate_tokens(&"x".repeat(n));
            assert!(t >= prev, "estimate must not shrink as text grows");
            prev = t;
        }
    }

    #[test]
    fn punctuation_alone_does_not_trigger_accented_divisor() {
        // Em-dash is non-ASCII but not alphabetic
        assert!(!has_accented_text("a — b"));
        assert!(has_accented_text("operación"));
    }

    #[test]
    fn message_tokens_include_overhead() {
        let msg = Message::user("Hello, world!"); // 13 chars → 4 tokens
        assert_eq!(estimate_message_tokens(&msg), 4 + 4);
    }

    #[test]
    fn message_tokens_count_tool_args() {
        let mut msg = Message::assistant("");
        msg.meta = MessageMeta {
            is_tool_call: true,
            tool_name: Some("list_directory".into()),
            tool_args: Some(serde_json::json!({"path": "/tmp"})),
            ..Default::default()
        };
        assert!(estimate_message_tokens(&msg) > MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn truncate_utf8_respects_char_boundaries() {
        // '═' is 3 bytes; cutting at byte 4 lands inside the second one
        let text = "═══";
        assert_eq!(truncate_utf8(text, 4), "═");
        assert_eq!(truncate_utf8(text, 6), "══");
        assert_eq!(truncate_utf8("short", 100), "short");
    }

    #[test]
    fn truncate_at_boundary_prefers_line_break() {
        let text = format!("{}\n{}", "a".repeat(60), "b".repeat(60));
        let cut = truncate_at_boundary(&text, 100);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert!(!cut.contains('b'), "should cut at the newline before the limit");
    }

    #[test]
    fn truncate_at_boundary_falls_back_to_sentence() {
        let text = format!("{}. {}", "a".repeat(70), "b".repeat(70));
        let cut = truncate_at_boundary(&text, 100);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert!(!cut.contains('b'));
    }

    #[test]
    fn truncate_at_boundary_short_input_untouched() {
        assert_eq!(truncate_at_boundary("fits", 100), "fits");
    }
}
