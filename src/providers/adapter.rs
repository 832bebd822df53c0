//! The provider adapter interface and shared HTTP plumbing.
//!
//! Providers form a closed set of variants behind one trait. Adding a
//! backend means adding a variant here and in `protocol::ProviderKind` —
//! never branching on provider names inside the orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tokio_util::sync::CancellationToken;

use crate::protocol::ProviderKind;

use super::errors::ProviderError;
use super::types::{ProviderReply, ProviderRequest};

// ─── Constants ──────────────────────────────────────────────────────────────

/// TCP connection timeout.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for non-streaming calls.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Total request timeout for streaming calls. Local models with a large
/// context need time before the first token.
pub(crate) const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Ceiling on response body size, enforced before JSON parsing.
pub(crate) const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Wall-clock ceiling on reading a response body.
pub(crate) const BODY_READ_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Trait ──────────────────────────────────────────────────────────────────

/// One LLM backend: turns a normalized request into a provider-specific
/// HTTP call and parses the response back into a normalized reply.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which wire format this adapter speaks.
    fn kind(&self) -> ProviderKind;

    /// Whether the backend delivers tool calls as typed fields. When false,
    /// tool intent is recovered from free text by the protocol layer.
    fn supports_native_tools(&self) -> bool;

    /// One complete (non-streaming) generation.
    async fn complete(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderReply, ProviderError>;

    /// Streaming generation. The default buffers `complete` and emits the
    /// text as a single chunk; adapters with real token streams override.
    async fn complete_streaming(
        &self,
        request: &ProviderRequest,
        on_token: &(dyn for<'a> Fn(&'a str) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<ProviderReply, ProviderError> {
        let reply = self.complete(request, cancel).await?;
        if !reply.text.is_empty() {
            on_token(&reply.text);
        }
        Ok(reply)
    }
}

// ─── Shared HTTP plumbing ───────────────────────────────────────────────────

/// Build the HTTP client used for non-streaming provider calls.
pub(crate) fn build_http_client(endpoint: &str) -> Result<HttpClient, ProviderError> {
    HttpClient::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ProviderError::ConnectionFailed {
            endpoint: endpoint.to_string(),
            reason: format!("failed to build HTTP client: {e}"),
        })
}

/// Build the HTTP client used for streaming provider calls.
pub(crate) fn build_streaming_client(endpoint: &str) -> Result<HttpClient, ProviderError> {
    HttpClient::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(STREAM_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ProviderError::ConnectionFailed {
            endpoint: endpoint.to_string(),
            reason: format!("failed to build streaming HTTP client: {e}"),
        })
}

/// Map a `reqwest` send error into the provider taxonomy.
pub(crate) fn map_send_error(endpoint: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            duration_secs: REQUEST_TIMEOUT.as_secs(),
        }
    } else {
        ProviderError::ConnectionFailed {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Read a response body with both the size ceiling and the wall-clock
/// ceiling enforced, so a pathological provider cannot exhaust memory or
/// hang the turn.
pub(crate) async fn read_body_limited(
    mut response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<String, ProviderError> {
    let mut buf: Vec<u8> = Vec::new();

    let read = async {
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProviderError::Parse {
                reason: format!("body read error: {e}"),
            })?
        {
            if buf.len() + chunk.len() > MAX_RESPONSE_BYTES {
                return Err(ProviderError::ResponseTooLarge {
                    limit_bytes: MAX_RESPONSE_BYTES,
                });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(())
    };

    tokio::select! {
        result = tokio::time::timeout(BODY_READ_TIMEOUT, read) => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(ProviderError::Timeout {
                        duration_secs: BODY_READ_TIMEOUT.as_secs(),
                    })
                }
            }
        }
        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
    }

    String::from_utf8(buf).map_err(|e| ProviderError::Parse {
        reason: format!("response is not valid UTF-8: {e}"),
    })
}

/// Check a response status, draining the body for the error message when
/// non-2xx.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_body_limited(response, cancel)
        .await
        .unwrap_or_default();
    Err(ProviderError::from_status(status.as_u16(), body))
}
