//! Context window management — per-conversation history plus the
//! token-budgeted sliding window each provider call receives.
//!
//! Trimming is by tokens, never by message count: walk the history from the
//! most recent message backward, accumulate estimated cost, stop including
//! older messages once the budget would overflow. Tool results are
//! pre-compressed to their stored summaries before costing; a small
//! allow-list of tools keeps fuller output under a hard character ceiling.
//! Trimming never blocks or errors — it always returns some valid list.

use std::collections::{HashMap, HashSet};

use crate::runtime::tokens::{estimate_message_tokens, truncate_at_boundary};
use crate::runtime::types::{Message, MessageRole};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Tokens reserved for the upcoming generation out of every budget.
const RESPONSE_RESERVATION: u32 = 2_000;

/// Allowed budget overrun (percent) when pulling in the user half of a
/// user/assistant pair at the truncation boundary.
const PAIR_OVERRUN_PERCENT: u32 = 5;

/// Character ceiling for tool results kept at full fidelity.
const FULL_FIDELITY_CHAR_CAP: usize = 4_000;

// ─── Manager ────────────────────────────────────────────────────────────────

/// Owns conversation histories and produces trimmed message lists.
#[derive(Debug, Default)]
pub struct ContextWindowManager {
    conversations: HashMap<String, Vec<Message>>,
    /// Tools whose full output the model must be able to quote.
    full_fidelity_tools: HashSet<String>,
}

impl ContextWindowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the tools whose results bypass summarization.
    pub fn set_full_fidelity_tools<I, S>(&mut self, tools: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.full_fidelity_tools = tools.into_iter().map(Into::into).collect();
    }

    /// Append a message. Histories are append-only; past entries are never
    /// mutated.
    pub fn append(&mut self, conversation_id: &str, message: Message) {
        self.conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
    }

    /// Full history for a conversation (empty when unknown).
    pub fn history(&self, conversation_id: &str) -> &[Message] {
        self.conversations
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drop a conversation entirely.
    pub fn clear(&mut self, conversation_id: &str) {
        self.conversations.remove(conversation_id);
    }

    pub fn message_count(&self, conversation_id: &str) -> usize {
        self.history(conversation_id).len()
    }

    /// The trimmed, pre-compressed message list for one provider call.
    ///
    /// Guarantees: non-empty whenever the conversation is non-empty, and
    /// the estimated cost of the result stays within the effective budget
    /// (plus the pair-preservation tolerance).
    pub fn trimmed_history(&self, conversation_id: &str, token_budget: u32) -> Vec<Message> {
        let messages = self.history(conversation_id);
        if messages.is_empty() {
            return Vec::new();
        }

        let effective = token_budget.saturating_sub(RESPONSE_RESERVATION).max(1);

        // Pre-compress every message once, then cost the compressed forms.
        let compressed: Vec<Message> = messages
            .iter()
            .map(|m| self.compress_for_context(m))
            .collect();

        // Walk newest → oldest until the running total would overflow.
        let mut total: u32 = 0;
        let mut start = compressed.len();
        for (idx, message) in compressed.iter().enumerate().rev() {
            let cost = estimate_message_tokens(message);
            if total + cost > effective && start < compressed.len() {
                break;
            }
            // The newest message is always included, over budget or not.
            total += cost;
            start = idx;
        }

        // An orphaned assistant reply at the start of the window is
        // confusing context: pull in the preceding user message when it
        // fits within the overrun tolerance.
        if start > 0 && compressed[start].role == MessageRole::Assistant {
            let previous = &compressed[start - 1];
            if previous.role == MessageRole::User {
                let tolerance = effective + effective * PAIR_OVERRUN_PERCENT / 100;
                if total + estimate_message_tokens(previous) <= tolerance {
                    start -= 1;
                }
            }
        }

        if start > 0 {
            tracing::debug!(
                conversation = conversation_id,
                dropped = start,
                kept = compressed.len() - start,
                budget = effective,
                "trimmed conversation window"
            );
        }

        compressed[start..].to_vec()
    }

    /// Replace a tool result with its stored summary, or cap it at the
    /// fidelity ceiling when the tool is on the allow-list. Other messages
    /// pass through untouched.
    fn compress_for_context(&self, message: &Message) -> Message {
        if message.role != MessageRole::Tool || !message.meta.is_tool_result {
            return message.clone();
        }

        let keep_full = message
            .meta
            .tool_name
            .as_deref()
            .map(|name| self.full_fidelity_tools.contains(name))
            .unwrap_or(false);

        let mut compressed = message.clone();
        if keep_full {
            if let Some(ref raw) = message.meta.tool_result_text {
                compressed.content = truncate_at_boundary(raw, FULL_FIDELITY_CHAR_CAP);
            }
        } else if let Some(ref summary) = message.meta.tool_result_summary {
            compressed.content = summary.clone();
        }
        compressed
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
