//! Anthropic Messages API adapter.
//!
//! Native tool use: the model returns `tool_use` content blocks with typed
//! input. System messages travel in the top-level `system` field, and
//! overload responses (HTTP 529 / `overloaded_error`) map to the retryable
//! overload condition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::protocol::normalize::convert_tools_to_provider_format;
use crate::protocol::{ProviderKind, ToolCallIntent};
use crate::runtime::types::MessageRole;

use super::adapter::{
    build_http_client, ensure_success, map_send_error, read_body_limited, ProviderAdapter,
};
use super::errors::ProviderError;
use super::types::{ProviderReply, ProviderRequest};

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ─── Adapter ────────────────────────────────────────────────────────────────

/// Adapter for `POST {base}/v1/messages`.
pub struct AnthropicAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicAdapter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.into();
        Ok(Self {
            http: build_http_client(&base_url)?,
            base_url,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = build_request(request);

        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(Vec::len).unwrap_or(0),
            "provider request (anthropic)"
        );

        let send = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send();
        let response = tokio::select! {
            result = send => result.map_err(|e| map_send_error(&url, e))?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let response = ensure_success(response, cancel).await?;
        let body_text = read_body_limited(response, cancel).await?;
        parse_response(&body_text)
    }
}

// ─── Request translation ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

/// System messages collect into the top-level `system` field; everything
/// else alternates user/assistant. Tool observations travel as user turns
/// because this runtime reinjects summarized results, not provider-native
/// tool round-trips.
fn build_request(request: &ProviderRequest) -> MessagesRequest {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<WireMessage> = Vec::new();

    for message in &request.messages {
        match message.role {
            MessageRole::System => system_parts.push(&message.content),
            MessageRole::Assistant => messages.push(WireMessage {
                role: "assistant",
                content: message.content.clone(),
            }),
            MessageRole::User | MessageRole::Tool => messages.push(WireMessage {
                role: "user",
                content: message.content.clone(),
            }),
        }
    }

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(convert_tools_to_provider_format(
            &request.tools,
            ProviderKind::Anthropic,
            request.namespace_tools,
        ))
    };

    MessagesRequest {
        model: request.model.clone(),
        max_tokens: request.options.max_tokens,
        temperature: request.options.temperature,
        top_p: request.options.top_p,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        },
        messages,
        tools,
    }
}

// ─── Response parsing ───────────────────────────────────────────────────────

fn parse_response(body: &str) -> Result<ProviderReply, ProviderError> {
    #[derive(Deserialize)]
    struct Response {
        content: Vec<ContentBlock>,
    }
    #[derive(Deserialize)]
    struct ContentBlock {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        input: Option<serde_json::Value>,
    }

    let parsed: Response = serde_json::from_str(body).map_err(|e| ProviderError::Parse {
        reason: format!("failed to parse messages response: {e}"),
    })?;

    let mut text = String::new();
    let mut tool_intent: Option<ToolCallIntent> = None;

    for block in parsed.content {
        match block.kind.as_str() {
            "text" => {
                if let Some(t) = block.text {
                    text.push_str(&t);
                }
            }
            "tool_use" if tool_intent.is_none() => {
                if let Some(name) = block.name {
                    tool_intent = Some(ToolCallIntent {
                        server_id: None,
                        tool_name: name,
                        arguments: block
                            .input
                            .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(ProviderReply { text, tool_intent })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
