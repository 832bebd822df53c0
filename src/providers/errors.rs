//! Provider error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured
//! logging is the caller's responsibility — these types carry the context
//! needed to build meaningful log entries.

use thiserror::Error;

/// Errors from a provider backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// TCP/HTTP connection to the provider endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The provider did not respond within the configured ceiling.
    #[error("provider timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// The provider reported overload (HTTP 503/529 or an "overloaded"
    /// error body). Retried with backoff before surfacing.
    #[error("provider overloaded (HTTP {status})")]
    Overloaded { status: u16, body: String },

    /// Any other non-2xx HTTP response.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response body exceeded the size ceiling before JSON parsing.
    #[error("response exceeded {limit_bytes} bytes")]
    ResponseTooLarge { limit_bytes: usize },

    /// The response body could not be parsed into the expected shape.
    #[error("response parse error: {reason}")]
    Parse { reason: String },

    /// The in-flight call was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// Every model in the fallback set was unavailable.
    #[error("all models unavailable (tried: {})", attempted.join(", "))]
    AllModelsUnavailable { attempted: Vec<String> },
}

impl ProviderError {
    /// Classify a non-2xx HTTP response, folding overload signals into
    /// [`ProviderError::Overloaded`].
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 503 || status == 529 || body.contains("overloaded") {
            ProviderError::Overloaded { status, body }
        } else {
            ProviderError::Http { status, body }
        }
    }

    /// Whether a retry with backoff is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Overloaded { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::ConnectionFailed { .. }
                | ProviderError::Http { status: 429, .. }
                | ProviderError::Http {
                    status: 500..=599,
                    ..
                }
        )
    }

    /// Whether this is the overload condition that triggers model fallback
    /// after retries are exhausted.
    pub fn is_overloaded(&self) -> bool {
        matches!(self, ProviderError::Overloaded { .. })
    }
}
