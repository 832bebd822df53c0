//! Assistant runtime — orchestration layer.
//!
//! Submodules:
//! - `types`: conversation messages, turn status, callbacks
//! - `tokens`: token estimation for context window budgets
//! - `summarizer`: tool result digests for reinjection
//! - `cache`: short-lived tool execution cache
//! - `context`: per-conversation history + token-budgeted trimming
//! - `config`: explicit runtime configuration + dynamic context tiers
//! - `orchestrator`: the per-turn model/tool state machine
//! - `errors`: runtime error types

pub mod cache;
pub mod config;
pub mod context;
pub mod errors;
pub mod orchestrator;
pub mod summarizer;
pub mod tokens;
pub mod types;

pub use cache::ToolExecutionCache;
pub use config::{calc_dynamic_context, load_runtime_config, RuntimeConfig, COMPLETION_NOTICE};
pub use context::ContextWindowManager;
pub use errors::RuntimeError;
pub use orchestrator::{Orchestrator, TurnOptions};
pub use types::{
    new_conversation_id, Message, MessageMeta, MessageRole, StatusUpdate, ToolResultEvent,
    TurnCallbacks, TurnStatus,
};
