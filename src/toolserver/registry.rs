//! Tool registry — aggregates tool entries across all connected servers.
//!
//! Provides lookup by `(server, tool)` pair, bare-name resolution with
//! ambiguity reporting, and the provider-agnostic tool list the protocol
//! layer converts into each provider's schema shape.

use std::collections::BTreeMap;

use super::types::ToolRegistryEntry;

/// Outcome of resolving a bare tool name against the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum BareNameMatch {
    /// Exactly one server offers the tool.
    Unique(String),
    /// Two or more servers offer the tool; server ids are sorted.
    Ambiguous(Vec<String>),
    /// No server offers the tool.
    Unknown,
}

/// Aggregated tool registry. Entries are keyed by `(server_id, name)` in a
/// sorted map so every resolution walk is deterministic.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<(String, String), ToolRegistryEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a tool-server listing.
    pub fn from_entries(entries: Vec<ToolRegistryEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            registry.insert(entry);
        }
        registry
    }

    /// Register (or replace) one tool.
    pub fn insert(&mut self, entry: ToolRegistryEntry) {
        self.tools
            .insert((entry.server_id.clone(), entry.name.clone()), entry);
    }

    /// Drop all tools belonging to a server.
    pub fn remove_server(&mut self, server_id: &str) {
        self.tools.retain(|(srv, _), _| srv != server_id);
    }

    /// Look up a tool by its `(server, name)` pair.
    pub fn get(&self, server_id: &str, name: &str) -> Option<&ToolRegistryEntry> {
        self.tools
            .get(&(server_id.to_string(), name.to_string()))
    }

    /// Whether a server id is known to the registry.
    pub fn has_server(&self, server_id: &str) -> bool {
        self.tools.keys().any(|(srv, _)| srv == server_id)
    }

    /// Resolve a bare tool name across all servers. Matching server ids are
    /// returned sorted, so first-match fallbacks are deterministic.
    pub fn resolve_bare_name(&self, name: &str) -> BareNameMatch {
        let mut servers: Vec<String> = self
            .tools
            .keys()
            .filter(|(_, tool)| tool == name)
            .map(|(srv, _)| srv.clone())
            .collect();

        match servers.len() {
            0 => BareNameMatch::Unknown,
            1 => BareNameMatch::Unique(servers.remove(0)),
            _ => BareNameMatch::Ambiguous(servers),
        }
    }

    /// All registered entries, in deterministic order.
    pub fn entries(&self) -> impl Iterator<Item = &ToolRegistryEntry> {
        self.tools.values()
    }

    /// Entries belonging to one server.
    pub fn entries_for_server<'a>(
        &'a self,
        server_id: &'a str,
    ) -> impl Iterator<Item = &'a ToolRegistryEntry> {
        self.tools
            .iter()
            .filter(move |((srv, _), _)| srv == server_id)
            .map(|(_, entry)| entry)
    }

    /// Whether the tool's schema declares a required `path` argument. Used
    /// by normalization to decide on default-path injection.
    pub fn requires_path(&self, server_id: &str, name: &str) -> bool {
        self.get(server_id, name)
            .and_then(|entry| entry.input_schema.get("required"))
            .and_then(|req| req.as_array())
            .map(|req| req.iter().any(|f| f.as_str() == Some("path")))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn entry(server: &str, name: &str) -> ToolRegistryEntry {
        ToolRegistryEntry {
            server_id: server.to_string(),
            name: name.to_string(),
            description: format!("Test tool: {name}"),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
        }
    }

    fn sample_registry() -> ToolRegistry {
        ToolRegistry::from_entries(vec![
            entry("fs", "read_file"),
            entry("fs", "list_directory"),
            entry("shell", "run_command"),
            entry("search", "web_search"),
            entry("archive", "read_file"),
        ])
    }

    #[test]
    fn lookup_by_pair() {
        let reg = sample_registry();
        assert!(reg.get("fs", "read_file").is_some());
        assert!(reg.get("fs", "run_command").is_none());
        assert_eq!(reg.len(), 5);
    }

    #[test]
    fn bare_name_unique() {
        let reg = sample_registry();
        assert_eq!(
            reg.resolve_bare_name("run_command"),
            BareNameMatch::Unique("shell".into())
        );
    }

    #[test]
    fn bare_name_ambiguous_is_sorted() {
        let reg = sample_registry();
        assert_eq!(
            reg.resolve_bare_name("read_file"),
            BareNameMatch::Ambiguous(vec!["archive".into(), "fs".into()])
        );
    }

    #[test]
    fn bare_name_unknown() {
        let reg = sample_registry();
        assert_eq!(reg.resolve_bare_name("no_such"), BareNameMatch::Unknown);
    }

    #[test]
    fn remove_server_drops_its_tools() {
        let mut reg = sample_registry();
        reg.remove_server("fs");
        assert!(reg.get("fs", "read_file").is_none());
        assert!(reg.get("archive", "read_file").is_some());
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn has_server() {
        let reg = sample_registry();
        assert!(reg.has_server("fs"));
        assert!(!reg.has_server("nope"));
    }

    #[test]
    fn requires_path_reads_schema() {
        let mut reg = sample_registry();
        assert!(reg.requires_path("fs", "read_file"));

        reg.insert(ToolRegistryEntry {
            server_id: "search".into(),
            name: "lookup".into(),
            description: String::new(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "q": { "type": "string" } },
                "required": ["q"]
            }),
        });
        assert!(!reg.requires_path("search", "lookup"));
        assert!(!reg.requires_path("search", "missing_tool"));
    }

    #[test]
    fn entries_for_server_filters() {
        let reg = sample_registry();
        let names: Vec<&str> = reg
            .entries_for_server("fs")
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["list_directory", "read_file"]);
    }
}
