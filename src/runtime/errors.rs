//! Runtime error types.
//!
//! These never escape `send_turn` — the orchestrator renders every failure
//! into user-facing text. They exist so internal paths stay typed and
//! loggable.

use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::providers::ProviderError;

/// Errors inside the orchestration core.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration loading or validation failed.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// The provider layer failed beyond recovery (retries and fallbacks
    /// exhausted).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A tool intent could not be resolved to a registered tool.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A tool executed and reported failure.
    #[error("tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// The model kept requesting the same tool; the loop was aborted.
    #[error("loop detected: '{tool}' requested {occurrences} times in a row")]
    LoopDetected { tool: String, occurrences: u32 },
}
