//! Runtime configuration.
//!
//! An explicit `RuntimeConfig` travels into the orchestrator at turn start —
//! there is no module-level singleton. Configs load from YAML with
//! `${VAR}` / `${VAR:-default}` environment interpolation and `~` expansion,
//! or are built in code by the embedding application.

use std::path::Path;

use serde::Deserialize;

use crate::runtime::errors::RuntimeError;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Context budget (tokens) when neither config nor the resource monitor
/// provides one.
const DEFAULT_CONTEXT_LIMIT: u32 = 8_000;

/// Policy default returned instead of a blank response when the model goes
/// silent after tool work.
pub const COMPLETION_NOTICE: &str = "✅ Operación completada correctamente.";

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1_024
}
fn default_max_iterations() -> Option<u32> {
    Some(8)
}
fn default_namespace_tools() -> bool {
    true
}
fn default_completion_notice() -> String {
    COMPLETION_NOTICE.to_string()
}

// ─── Config ─────────────────────────────────────────────────────────────────

/// Everything a turn needs, passed explicitly to the orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Model identifier handed to the provider.
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Context budget override. When absent, the budget derives from the
    /// resource monitor's free-memory figure (or the default).
    #[serde(default)]
    pub context_limit: Option<u32>,
    /// Iteration ceiling for one turn. `None` means the caller explicitly
    /// disabled the ceiling; the default is bounded.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: Option<u32>,
    /// Tools whose full output is semantically required by the model.
    #[serde(default)]
    pub full_fidelity_tools: Vec<String>,
    /// Default path argument injected for path-taking tools when omitted.
    #[serde(default)]
    pub default_directory: Option<String>,
    /// Expose tools as `server__name` to disambiguate duplicates.
    #[serde(default = "default_namespace_tools")]
    pub namespace_tools: bool,
    /// Same-family models tried in order when the primary stays overloaded
    /// after retries.
    #[serde(default)]
    pub fallback_models: Vec<String>,
    /// Text returned when the model produces nothing after tool work.
    #[serde(default = "default_completion_notice")]
    pub completion_notice: String,
    /// Optional system prompt prepended to every provider call.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: default_temperature(),
            top_p: None,
            max_tokens: default_max_tokens(),
            context_limit: None,
            max_iterations: default_max_iterations(),
            full_fidelity_tools: Vec::new(),
            default_directory: None,
            namespace_tools: default_namespace_tools(),
            fallback_models: Vec::new(),
            completion_notice: default_completion_notice(),
            system_prompt: None,
        }
    }
}

impl RuntimeConfig {
    /// A config for `model` with every default.
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// The token budget for one provider call: the explicit limit when set,
    /// otherwise derived from the resource monitor's free-memory figure.
    pub fn effective_context_limit(&self, free_memory_mb: Option<u64>) -> u32 {
        self.context_limit
            .or_else(|| free_memory_mb.map(calc_dynamic_context))
            .unwrap_or(DEFAULT_CONTEXT_LIMIT)
    }
}

/// Tiered context budget from the free-memory figure supplied by the
/// external resource monitor. The crate never queries hardware itself.
pub fn calc_dynamic_context(free_memory_mb: u64) -> u32 {
    match free_memory_mb {
        mb if mb < 1_000 => 1_000,
        mb if mb < 2_000 => 2_000,
        mb if mb < 4_000 => 4_000,
        mb if mb < 8_000 => 6_000,
        _ => 8_000,
    }
}

// ─── Loading ────────────────────────────────────────────────────────────────

/// Load a runtime config from a YAML file, interpolating `${VAR}` and
/// `${VAR:-default}` references from the environment.
pub fn load_runtime_config(path: &Path) -> Result<RuntimeConfig, RuntimeError> {
    let raw = std::fs::read_to_string(path).map_err(|e| RuntimeError::Config {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let interpolated = interpolate_env_vars(&raw);

    serde_yaml::from_str(&interpolated).map_err(|e| RuntimeError::Config {
        reason: format!("failed to parse config: {e}"),
    })
}

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn dynamic_context_tiers() {
        assert_eq!(calc_dynamic_context(512), 1_000);
        assert_eq!(calc_dynamic_context(1_500), 2_000);
        assert_eq!(calc_dynamic_context(3_000), 4_000);
        assert_eq!(calc_dynamic_context(6_000), 6_000);
        assert_eq!(calc_dynamic_context(16_000), 8_000);
    }

    #[test]
    fn effective_limit_prefers_explicit_value() {
        let config = RuntimeConfig {
            context_limit: Some(32_000),
            ..RuntimeConfig::for_model("m")
        };
        assert_eq!(config.effective_context_limit(Some(512)), 32_000);
    }

    #[test]
    fn effective_limit_falls_back_to_monitor_then_default() {
        let config = RuntimeConfig::for_model("m");
        assert_eq!(config.effective_context_limit(Some(1_500)), 2_000);
        assert_eq!(config.effective_context_limit(None), DEFAULT_CONTEXT_LIMIT);
    }

    #[test]
    fn defaults_are_bounded() {
        let config = RuntimeConfig::for_model("m");
        assert_eq!(config.max_iterations, Some(8));
        assert!(config.namespace_tools);
        assert_eq!(config.completion_notice, COMPLETION_NOTICE);
    }

    #[test]
    fn loads_yaml_with_env_interpolation() {
        std::env::remove_var("__SIDEKICK_TEST_MODEL__");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "model: \"${{__SIDEKICK_TEST_MODEL__:-qwen2.5:latest}}\"\nmax_tokens: 2048\nfull_fidelity_tools:\n  - web_search"
        )
        .unwrap();

        let config = load_runtime_config(file.path()).unwrap();
        assert_eq!(config.model, "qwen2.5:latest");
        assert_eq!(config.max_tokens, 2_048);
        assert_eq!(config.full_fidelity_tools, vec!["web_search"]);
        // Unspecified fields fall back to defaults
        assert_eq!(config.max_iterations, Some(8));
    }

    #[test]
    fn env_var_overrides_default() {
        std::env::set_var("__SIDEKICK_CFG_VAR__", "/custom/dir");
        let result = interpolate_env_vars("${__SIDEKICK_CFG_VAR__:-/fallback}");
        assert_eq!(result, "/custom/dir");
        std::env::remove_var("__SIDEKICK_CFG_VAR__");
    }

    #[test]
    fn tilde_expands_in_defaults() {
        let result = expand_tilde("~/workspace");
        assert!(!result.starts_with('~'));
        assert!(result.ends_with("/workspace"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_runtime_config(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, RuntimeError::Config { .. }));
    }
}
