//! Provider adapters — one closed set of LLM backends behind one interface.
//!
//! Submodules:
//! - `adapter`: the `ProviderAdapter` trait + shared HTTP plumbing
//! - `types`: normalized request/response shapes
//! - `retry`: the single retry policy every adapter shares
//! - `openai`: OpenAI-compatible chat completions (native tools, SSE)
//! - `anthropic`: Anthropic Messages API (native tool_use)
//! - `gemini`: Gemini generateContent (upper-cased schema types)
//! - `ollama`: local models without native calling (free-text detection)
//! - `errors`: provider error taxonomy

pub mod adapter;
pub mod anthropic;
pub mod errors;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod retry;
pub mod types;

pub use adapter::ProviderAdapter;
pub use anthropic::AnthropicAdapter;
pub use errors::ProviderError;
pub use gemini::GeminiAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;
pub use retry::RetryPolicy;
pub use types::{GenerationOptions, ProviderReply, ProviderRequest};
