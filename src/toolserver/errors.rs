//! Tool-server boundary error types.

use thiserror::Error;

/// Errors crossing the tool-server boundary.
#[derive(Debug, Error)]
pub enum ToolServerError {
    /// The transport to the tool-server failed (RPC, pipe, socket).
    #[error("transport error for server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// The server does not know the requested tool.
    #[error("unknown tool '{name}' on server '{server}'")]
    UnknownTool { server: String, name: String },

    /// The call exceeded the boundary's time ceiling.
    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },
}
