//! Tool-call normalization — from a raw callable name + raw arguments to
//! exactly one registered `(server, tool)` pair with a flat argument object.
//!
//! Name resolution order:
//! 1. `server__tool` namespace split (preferred encoding)
//! 2. exact bare name, adopted when exactly one server registers it
//! 3. lenient `server_tool` split on the first underscore, accepted only
//!    when the prefix is a known server id and the suffix exists there
//! 4. ambiguous bare name: deterministic first match over sorted server
//!    ids — a documented best-effort, logged, never silent
//!
//! Anything else is an unresolvable-tool error; intents are never dropped
//! silently or executed against multiple candidates.

use crate::toolserver::{BareNameMatch, ToolRegistry};

use super::detect::{ARGUMENT_WRAPPERS, CONTROL_KEYS};
use super::{ProtocolError, ProviderKind, ToolCallIntent};

// ─── Resolution result ──────────────────────────────────────────────────────

/// How a callable name was mapped to its server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    /// Explicit `server__tool` namespace.
    Namespaced,
    /// Explicit server carried in the intent itself.
    ExplicitServer,
    /// Bare name registered by exactly one server.
    UniqueBareName,
    /// Lenient `server_tool` single-underscore split.
    LenientUnderscore,
    /// Bare name offered by several servers; first match was taken.
    AmbiguousFirstMatch,
}

/// A fully resolved, executable tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedToolCall {
    pub server_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub resolved_via: ResolvedVia,
}

// ─── Normalization ──────────────────────────────────────────────────────────

/// Resolve a raw callable name and raw arguments against the registry.
///
/// `default_dir`, when provided, is injected as the `path` argument for
/// tools whose schema requires one and whose call omitted it.
pub fn normalize_function_call(
    raw_name: &str,
    raw_args: &serde_json::Value,
    registry: &ToolRegistry,
    default_dir: Option<&str>,
) -> Result<ResolvedToolCall, ProtocolError> {
    let (server_id, tool_name, resolved_via) = resolve_name(raw_name, registry)?;

    let mut arguments = flatten_arguments(raw_args);
    strip_control_keys(&mut arguments);

    if let Some(dir) = default_dir {
        inject_default_path(&mut arguments, &server_id, &tool_name, registry, dir);
    }

    Ok(ResolvedToolCall {
        server_id,
        tool_name,
        arguments,
        resolved_via,
    })
}

/// Resolve an intent that may already carry an explicit server id.
pub fn normalize_intent(
    intent: &ToolCallIntent,
    registry: &ToolRegistry,
    default_dir: Option<&str>,
) -> Result<ResolvedToolCall, ProtocolError> {
    if let Some(ref server) = intent.server_id {
        if registry.get(server, &intent.tool_name).is_some() {
            let mut arguments = flatten_arguments(&intent.arguments);
            strip_control_keys(&mut arguments);
            if let Some(dir) = default_dir {
                inject_default_path(&mut arguments, server, &intent.tool_name, registry, dir);
            }
            return Ok(ResolvedToolCall {
                server_id: server.clone(),
                tool_name: intent.tool_name.clone(),
                arguments,
                resolved_via: ResolvedVia::ExplicitServer,
            });
        }
        // An explicit but wrong server falls through to name resolution —
        // the model may have namespaced the name correctly anyway.
    }
    normalize_function_call(&intent.tool_name, &intent.arguments, registry, default_dir)
}

fn resolve_name(
    raw_name: &str,
    registry: &ToolRegistry,
) -> Result<(String, String, ResolvedVia), ProtocolError> {
    // 1. server__tool
    if let Some((prefix, rest)) = raw_name.split_once("__") {
        if !rest.is_empty() && registry.has_server(prefix) {
            return Ok((prefix.to_string(), rest.to_string(), ResolvedVia::Namespaced));
        }
    }

    // 2. exact bare name
    match registry.resolve_bare_name(raw_name) {
        BareNameMatch::Unique(server) => {
            return Ok((server, raw_name.to_string(), ResolvedVia::UniqueBareName));
        }
        BareNameMatch::Ambiguous(servers) => {
            // Deterministic first match over the sorted candidates. Best
            // effort only: the model gave no server and several qualify.
            let first = servers[0].clone();
            tracing::warn!(
                tool = raw_name,
                candidates = ?servers,
                chosen = %first,
                "ambiguous bare tool name, taking first match"
            );
            return Ok((
                first,
                raw_name.to_string(),
                ResolvedVia::AmbiguousFirstMatch,
            ));
        }
        BareNameMatch::Unknown => {}
    }

    // 3. lenient server_tool split
    if let Some((prefix, rest)) = raw_name.split_once('_') {
        if registry.has_server(prefix) && registry.get(prefix, rest).is_some() {
            return Ok((
                prefix.to_string(),
                rest.to_string(),
                ResolvedVia::LenientUnderscore,
            ));
        }
    }

    let candidates = registry
        .entries()
        .filter(|e| e.name == raw_name || raw_name.ends_with(&e.name))
        .map(|e| format!("{}__{}", e.server_id, e.name))
        .collect();

    Err(ProtocolError::UnresolvableTool {
        name: raw_name.to_string(),
        candidates,
    })
}

// ─── Argument shaping ───────────────────────────────────────────────────────

/// Flatten nested `arguments` / `args` / `parameters` wrappers into a single
/// flat object. Wrapper contents win over sibling keys; nesting is unwound
/// to a small fixed depth so a pathological payload cannot loop.
fn flatten_arguments(raw: &serde_json::Value) -> serde_json::Value {
    let Some(obj) = raw.as_object() else {
        return serde_json::Value::Object(serde_json::Map::new());
    };

    let mut flat = obj.clone();
    for _ in 0..3 {
        let Some((key, inner)) = ARGUMENT_WRAPPERS.iter().find_map(|k| {
            flat.get(*k)
                .and_then(|v| v.as_object())
                .map(|inner| (k.to_string(), inner.clone()))
        }) else {
            break;
        };
        flat.remove(&key);
        for (k, v) in inner {
            flat.insert(k, v);
        }
    }

    serde_json::Value::Object(flat)
}

/// Remove protocol-control keys from the final argument object.
fn strip_control_keys(arguments: &mut serde_json::Value) {
    if let Some(obj) = arguments.as_object_mut() {
        for key in CONTROL_KEYS {
            obj.remove(*key);
        }
    }
}

/// Insert the caller-supplied default path when the tool requires one and
/// the model omitted it.
fn inject_default_path(
    arguments: &mut serde_json::Value,
    server_id: &str,
    tool_name: &str,
    registry: &ToolRegistry,
    default_dir: &str,
) {
    let Some(obj) = arguments.as_object_mut() else {
        return;
    };
    if obj.contains_key("path") || !registry.requires_path(server_id, tool_name) {
        return;
    }
    tracing::debug!(
        tool = tool_name,
        path = default_dir,
        "injecting default path argument"
    );
    obj.insert(
        "path".to_string(),
        serde_json::Value::String(default_dir.to_string()),
    );
}

// ─── Provider tool conversion ───────────────────────────────────────────────

/// Map the provider-agnostic registry into one provider's tool schema shape.
///
/// With `namespace` set, the callable name is `{server}__{name}` so
/// identically named tools from different servers stay distinguishable.
pub fn convert_tools_to_provider_format(
    registry: &ToolRegistry,
    kind: ProviderKind,
    namespace: bool,
) -> Vec<serde_json::Value> {
    registry
        .entries()
        .map(|entry| {
            let callable = if namespace {
                format!("{}__{}", entry.server_id, entry.name)
            } else {
                entry.name.clone()
            };

            match kind {
                ProviderKind::OpenAi | ProviderKind::Ollama => serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": callable,
                        "description": entry.description,
                        "parameters": entry.input_schema,
                    }
                }),
                ProviderKind::Anthropic => serde_json::json!({
                    "name": callable,
                    "description": entry.description,
                    "input_schema": entry.input_schema,
                }),
                ProviderKind::Gemini => serde_json::json!({
                    "name": callable,
                    "description": entry.description,
                    "parameters": uppercase_schema_types(&entry.input_schema),
                }),
            }
        })
        .collect()
}

/// Recursively upper-case JSON Schema `type` values (`object` → `OBJECT`),
/// the shape Gemini's function declarations require.
fn uppercase_schema_types(schema: &serde_json::Value) -> serde_json::Value {
    match schema {
        serde_json::Value::Object(map) => {
            let rewritten: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| {
                    if k == "type" {
                        if let Some(name) = v.as_str() {
                            return (k.clone(), serde_json::Value::String(name.to_uppercase()));
                        }
                    }
                    (k.clone(), uppercase_schema_types(v))
                })
                .collect();
            serde_json::Value::Object(rewritten)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(uppercase_schema_types).collect())
        }
        other => other.clone(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
