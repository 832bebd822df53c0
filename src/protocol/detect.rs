//! Free-text tool-call detection.
//!
//! Models without native function calling express tool intent as JSON
//! embedded in prose — usually a fenced code block, sometimes a bare object
//! mid-sentence. Extraction runs an ordered list of strategies:
//!
//! 1. fenced blocks labeled `json`, `tool`, or `tool_call`
//! 2. any balanced JSON object anywhere in the text
//!
//! A candidate qualifies only if it parses as JSON and carries a
//! string-valued `tool` or `use_tool` field. Invalid candidates are skipped,
//! never fatal — scanning continues with the next one.

use super::{ToolCallIntent, ToolPlan};

/// Keys that carry protocol control data rather than tool arguments.
pub(crate) const CONTROL_KEYS: &[&str] = &[
    "tool",
    "use_tool",
    "server",
    "server_id",
    "serverId",
    "name",
    "tool_name",
];

/// Wrapper keys models nest arguments under.
pub(crate) const ARGUMENT_WRAPPERS: &[&str] = &["arguments", "args", "parameters"];

/// Fence labels that mark a tool-call payload.
const FENCE_LABELS: &[&str] = &["json", "tool", "tool_call"];

// ─── Single-call detection ──────────────────────────────────────────────────

/// Detect a tool-call intent in a model's free-text response.
///
/// Returns the first qualifying candidate, or `None` when nothing in the
/// text looks like a tool call.
pub fn detect_tool_call_in_response(text: &str) -> Option<ToolCallIntent> {
    for candidate in candidate_objects(text) {
        if let Some(intent) = intent_from_object(&candidate) {
            return Some(intent);
        }
    }
    None
}

/// Detect a multi-step plan: a JSON object whose `plan` or `tools` array
/// enumerates tool calls to execute in order before the next model turn.
pub fn detect_tool_plan(text: &str) -> Option<ToolPlan> {
    for candidate in candidate_objects(text) {
        let Some(steps) = candidate
            .get("plan")
            .or_else(|| candidate.get("tools"))
            .and_then(|v| v.as_array())
        else {
            continue;
        };

        let tools: Vec<ToolCallIntent> = steps
            .iter()
            .filter_map(intent_from_object)
            .collect();

        if !tools.is_empty() {
            return Some(ToolPlan { tools });
        }
    }
    None
}

// ─── Candidate extraction ───────────────────────────────────────────────────

/// All parseable JSON objects in the text, fenced candidates first, then
/// bare objects in order of appearance.
fn candidate_objects(text: &str) -> Vec<serde_json::Value> {
    let mut candidates = Vec::new();

    for block in fenced_blocks(text) {
        collect_objects(block, &mut candidates);
    }
    collect_objects(text, &mut candidates);

    candidates
}

/// Contents of fenced code blocks whose label marks a tool payload.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut search_from = 0;

    while let Some(open) = text[search_from..].find("```") {
        let label_start = search_from + open + 3;
        let Some(label_end) = text[label_start..].find('\n') else {
            break;
        };
        let label = text[label_start..label_start + label_end].trim();
        let body_start = label_start + label_end + 1;

        let Some(close) = text[body_start..].find("```") else {
            break;
        };

        if FENCE_LABELS.contains(&label) {
            blocks.push(&text[body_start..body_start + close]);
        }
        search_from = body_start + close + 3;
    }

    blocks
}

/// Scan `text` for balanced top-level JSON objects and push every one that
/// parses. Candidates that fail to parse are skipped.
fn collect_objects(text: &str, out: &mut Vec<serde_json::Value>) {
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = find_balanced_brace(text, i) {
                if let Ok(value) =
                    serde_json::from_str::<serde_json::Value>(&text[i..=end])
                {
                    if value.is_object() {
                        out.push(value);
                    }
                }
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
}

/// Find the `}` matching the `{` at `start`, ignoring braces inside quoted
/// strings.
fn find_balanced_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

// ─── Candidate → intent ─────────────────────────────────────────────────────

/// Convert one JSON object into an intent, if it qualifies.
fn intent_from_object(value: &serde_json::Value) -> Option<ToolCallIntent> {
    let obj = value.as_object()?;

    let tool_name = obj
        .get("tool")
        .or_else(|| obj.get("use_tool"))
        .and_then(|v| v.as_str())?
        .to_string();

    if tool_name.is_empty() {
        return None;
    }

    let server_id = obj
        .get("server")
        .or_else(|| obj.get("server_id"))
        .or_else(|| obj.get("serverId"))
        .and_then(|v| v.as_str())
        .map(String::from);

    // Prefer an explicit wrapper; otherwise the remaining non-control fields
    // are the arguments.
    let arguments = ARGUMENT_WRAPPERS
        .iter()
        .find_map(|key| obj.get(*key).filter(|v| v.is_object()).cloned())
        .unwrap_or_else(|| {
            let rest: serde_json::Map<String, serde_json::Value> = obj
                .iter()
                .filter(|(k, _)| {
                    !CONTROL_KEYS.contains(&k.as_str())
                        && !ARGUMENT_WRAPPERS.contains(&k.as_str())
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            serde_json::Value::Object(rest)
        });

    Some(ToolCallIntent {
        server_id,
        tool_name,
        arguments,
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
