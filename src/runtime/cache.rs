//! Short-lived tool execution cache.
//!
//! Per-conversation memoization of tool results so the model re-requesting
//! an identical call inside the TTL window gets the stored outcome instead
//! of a second execution. Buckets are independent per conversation and are
//! the only state shared across turns.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

// ─── Constants ──────────────────────────────────────────────────────────────

/// How long a cached tool result stays valid.
const CACHE_TTL: Duration = Duration::from_secs(120);

// ─── Entry ──────────────────────────────────────────────────────────────────

/// One memoized tool execution.
#[derive(Debug, Clone)]
pub struct CachedExecution {
    pub summary: String,
    pub raw_text: String,
    pub is_error: bool,
    stored_at: Instant,
}

impl CachedExecution {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.stored_at) >= ttl
    }
}

// ─── Cache ──────────────────────────────────────────────────────────────────

/// TTL-bounded memoization of tool executions, bucketed per conversation.
#[derive(Debug)]
pub struct ToolExecutionCache {
    ttl: Duration,
    buckets: HashMap<String, HashMap<String, CachedExecution>>,
}

impl Default for ToolExecutionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutionCache {
    pub fn new() -> Self {
        Self {
            ttl: CACHE_TTL,
            buckets: HashMap::new(),
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            buckets: HashMap::new(),
        }
    }

    /// Store (or overwrite) the outcome of a tool execution.
    pub fn remember(
        &mut self,
        conversation_id: &str,
        tool_name: &str,
        args: &serde_json::Value,
        summary: &str,
        raw_text: &str,
        is_error: bool,
    ) {
        let key = cache_key(tool_name, args);
        self.buckets
            .entry(conversation_id.to_string())
            .or_default()
            .insert(
                key,
                CachedExecution {
                    summary: summary.to_string(),
                    raw_text: raw_text.to_string(),
                    is_error,
                    stored_at: Instant::now(),
                },
            );
    }

    /// Look up a live entry for `(tool_name, args)`. Expired entries across
    /// the whole bucket are pruned on every call.
    pub fn recall(
        &mut self,
        conversation_id: &str,
        tool_name: &str,
        args: &serde_json::Value,
    ) -> Option<CachedExecution> {
        let ttl = self.ttl;
        let bucket = self.buckets.get_mut(conversation_id)?;
        let now = Instant::now();
        bucket.retain(|_, entry| !entry.is_expired(now, ttl));

        let key = cache_key(tool_name, args);
        let hit = bucket.get(&key).cloned();
        if hit.is_some() {
            tracing::debug!(tool = tool_name, conversation = conversation_id, "cache hit");
        }
        hit
    }

    /// Drop the entire bucket for a conversation.
    pub fn clear(&mut self, conversation_id: &str) {
        self.buckets.remove(conversation_id);
    }

    /// Number of live + expired entries in a bucket (diagnostics).
    pub fn bucket_len(&self, conversation_id: &str) -> usize {
        self.buckets.get(conversation_id).map_or(0, HashMap::len)
    }
}

// ─── Keying ─────────────────────────────────────────────────────────────────

/// Cache key: tool name + SHA-256 of the canonical (sorted-key) argument
/// serialization, so `{"a":1,"b":2}` and `{"b":2,"a":1}` collide as required.
fn cache_key(tool_name: &str, args: &serde_json::Value) -> String {
    let canonical = stable_stringify(args);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{tool_name}:{hex}")
}

/// Serialize a JSON value with object keys in sorted order, recursively.
pub(crate) fn stable_stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        stable_stringify(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(stable_stringify).collect();
            format!("[{}]", fields.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
