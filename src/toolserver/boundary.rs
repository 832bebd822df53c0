//! The external tool-server contract.
//!
//! The runtime treats tool-servers as opaque RPC: enumerate tools, invoke a
//! tool. Process lifecycle, transport framing, and credentials all belong to
//! the embedding application.

use async_trait::async_trait;

use super::errors::ToolServerError;
use super::types::{ToolCallOutcome, ToolRegistryEntry};

/// What the runtime requires from a tool-server implementation.
///
/// Implementations should render tool failures as `ToolCallOutcome` with
/// `is_error: true`; `Err` is reserved for the transport itself breaking.
/// The orchestrator converts either shape into an error observation — a
/// broken transport never aborts a whole turn.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// All tools currently available, across every connected server.
    async fn list_tools(&self) -> Result<Vec<ToolRegistryEntry>, ToolServerError>;

    /// Invoke one tool on one server.
    async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        args: &serde_json::Value,
    ) -> Result<ToolCallOutcome, ToolServerError>;
}
