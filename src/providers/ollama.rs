//! Ollama local chat adapter — no native function calling.
//!
//! Locally-hosted models express tool intent as free text with embedded
//! JSON; the protocol layer's detection strategies recover the intent from
//! the reply. Tools are described to the model in the system prompt by the
//! orchestrator, not via an API parameter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::protocol::detect::detect_tool_call_in_response;
use crate::protocol::ProviderKind;

use super::adapter::{
    build_http_client, ensure_success, map_send_error, read_body_limited, ProviderAdapter,
};
use super::errors::ProviderError;
use super::types::{wire_role, ProviderReply, ProviderRequest};

// ─── Adapter ────────────────────────────────────────────────────────────────

/// Adapter for `POST {base}/api/chat`.
pub struct OllamaAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaAdapter {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let base_url = base_url.into();
        Ok(Self {
            http: build_http_client(&base_url)?,
            base_url,
        })
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn supports_native_tools(&self) -> bool {
        false
    }

    async fn complete(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: wire_role(m.role),
                    content: m.content.clone(),
                })
                .collect(),
            stream: false,
            options: Options {
                temperature: request.options.temperature,
                top_p: request.options.top_p,
                num_predict: request.options.max_tokens,
            },
        };

        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            "provider request (ollama)"
        );

        let send = self.http.post(&url).json(&body).send();
        let response = tokio::select! {
            result = send => result.map_err(|e| map_send_error(&url, e))?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let response = ensure_success(response, cancel).await?;
        let body_text = read_body_limited(response, cancel).await?;
        parse_response(&body_text)
    }
}

// ─── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    num_predict: u32,
}

// ─── Response parsing ───────────────────────────────────────────────────────

/// Parse the buffered chat response, then run free-text tool detection on
/// the content — this is where models without native calling get their
/// tool intent recognized.
fn parse_response(body: &str) -> Result<ProviderReply, ProviderError> {
    #[derive(Deserialize)]
    struct Response {
        message: ResponseMessage,
    }
    #[derive(Deserialize)]
    struct ResponseMessage {
        #[serde(default)]
        content: String,
    }

    let parsed: Response = serde_json::from_str(body).map_err(|e| ProviderError::Parse {
        reason: format!("failed to parse chat response: {e}"),
    })?;

    let text = parsed.message.content;
    let tool_intent = detect_tool_call_in_response(&text);

    Ok(ProviderReply { text, tool_intent })
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_text() {
        let body = r#"{"message": {"role": "assistant", "content": "Hello there."}, "done": true}"#;
        let reply = parse_response(body).unwrap();
        assert_eq!(reply.text, "Hello there.");
        assert!(reply.tool_intent.is_none());
    }

    #[test]
    fn recovers_tool_intent_from_free_text() {
        let body = r#"{"message": {"role": "assistant",
            "content": "I'll check.\n{\"tool\": \"list_directory\", \"arguments\": {\"path\": \"/tmp\"}}"},
            "done": true}"#;
        let reply = parse_response(body).unwrap();
        let intent = reply.tool_intent.unwrap();
        assert_eq!(intent.tool_name, "list_directory");
        assert_eq!(intent.arguments["path"], "/tmp");
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        assert!(parse_response("not json").is_err());
    }
}
