//! Tool-server boundary — the external collaborator that owns tools.
//!
//! Submodules:
//! - `types`: registry entries and tool call outcomes
//! - `registry`: aggregated lookup + bare-name resolution
//! - `boundary`: the `ToolServer` trait the embedding application implements
//! - `errors`: boundary error types

pub mod boundary;
pub mod errors;
pub mod registry;
pub mod types;

pub use boundary::ToolServer;
pub use errors::ToolServerError;
pub use registry::{BareNameMatch, ToolRegistry};
pub use types::{ContentBlock, ToolCallOutcome, ToolRegistryEntry};
