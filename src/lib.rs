//! sidekick — embedded assistant runtime.
//!
//! A provider-agnostic tool-calling orchestration core: the embedding
//! application supplies a [`providers::ProviderAdapter`] (which LLM backend
//! to talk to) and a [`toolserver::ToolServer`] (which tools exist and how
//! to run them), and drives conversations through
//! [`runtime::Orchestrator::send_turn`]. The runtime detects and normalizes
//! tool-call intents, executes tools with caching and loop protection,
//! reinjects summarized observations, and keeps every provider call inside
//! a token budget.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sidekick::providers::OllamaAdapter;
//! use sidekick::runtime::{Orchestrator, RuntimeConfig, TurnOptions};
//! # use sidekick::toolserver::{ToolServer, ToolServerError, ToolCallOutcome, ToolRegistryEntry};
//! # struct NoTools;
//! # #[async_trait::async_trait]
//! # impl ToolServer for NoTools {
//! #     async fn list_tools(&self) -> Result<Vec<ToolRegistryEntry>, ToolServerError> { Ok(vec![]) }
//! #     async fn call_tool(&self, _: &str, _: &str, _: &serde_json::Value)
//! #         -> Result<ToolCallOutcome, ToolServerError> { Ok(ToolCallOutcome::ok("")) }
//! # }
//!
//! # async fn demo() {
//! let provider = Arc::new(OllamaAdapter::new("http://localhost:11434").unwrap());
//! let mut orchestrator = Orchestrator::new(provider, Arc::new(NoTools));
//! let config = RuntimeConfig::for_model("qwen2.5:latest");
//! let answer = orchestrator
//!     .send_turn("conv-1", "list the files in /tmp", &config, &TurnOptions::default())
//!     .await;
//! println!("{answer}");
//! # }
//! ```

pub mod protocol;
pub mod providers;
pub mod runtime;
pub mod toolserver;

pub use protocol::{ProviderKind, ToolCallIntent, ToolPlan};
pub use providers::{ProviderAdapter, ProviderError, ProviderRequest};
pub use runtime::{Orchestrator, RuntimeConfig, RuntimeError, TurnCallbacks, TurnOptions};
pub use toolserver::{ToolCallOutcome, ToolRegistry, ToolRegistryEntry, ToolServer};
