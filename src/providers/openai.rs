//! OpenAI-compatible chat completions adapter.
//!
//! Covers the cloud API and every local gateway that mirrors it. Native
//! function calling: tool calls arrive as typed `tool_calls` fields, both
//! in buffered responses and as fragments across SSE deltas.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::protocol::normalize::convert_tools_to_provider_format;
use crate::protocol::{ProviderKind, ToolCallIntent};

use super::adapter::{
    build_http_client, build_streaming_client, ensure_success, map_send_error,
    read_body_limited, ProviderAdapter, MAX_RESPONSE_BYTES,
};
use super::errors::ProviderError;
use super::types::{wire_role, ProviderReply, ProviderRequest};

// ─── Adapter ────────────────────────────────────────────────────────────────

/// Adapter for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiAdapter {
    http: reqwest::Client,
    http_stream: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiAdapter {
    /// `base_url` up to and including the API root, e.g.
    /// `https://api.example.com/v1` or `http://localhost:8080/v1`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.into();
        Ok(Self {
            http: build_http_client(&base_url)?,
            http_stream: build_streaming_client(&base_url)?,
            base_url,
            api_key,
        })
    }

    fn request_body(&self, request: &ProviderRequest, stream: bool) -> ChatRequest {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(convert_tools_to_provider_format(
                &request.tools,
                ProviderKind::OpenAi,
                request.namespace_tools,
            ))
        };

        ChatRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: wire_role(m.role),
                    content: m.content.clone(),
                })
                .collect(),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: request.options.temperature,
            top_p: request.options.top_p,
            max_tokens: request.options.max_tokens,
            stream,
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(request, false);

        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(Vec::len).unwrap_or(0),
            "provider request (openai)"
        );

        let send = self.apply_auth(self.http.post(&url)).json(&body).send();
        let response = tokio::select! {
            result = send => result.map_err(|e| map_send_error(&url, e))?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let response = ensure_success(response, cancel).await?;
        let body_text = read_body_limited(response, cancel).await?;
        parse_buffered_response(&body_text)
    }

    async fn complete_streaming(
        &self,
        request: &ProviderRequest,
        on_token: &(dyn for<'a> Fn(&'a str) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(request, true);

        let send = self
            .apply_auth(self.http_stream.post(&url))
            .json(&body)
            .header("Accept", "text/event-stream")
            .send();
        let response = tokio::select! {
            result = send => result.map_err(|e| map_send_error(&url, e))?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let response = ensure_success(response, cancel).await?;
        let mut byte_stream = response.bytes_stream();

        let mut buffer = String::new();
        let mut assembler = SseAssembler::default();

        loop {
            let item = tokio::select! {
                item = byte_stream.next() => item,
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            };

            let Some(chunk) = item else { break };
            let bytes = chunk.map_err(|e| ProviderError::Parse {
                reason: format!("stream read error: {e}"),
            })?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            if buffer.len() + assembler.content.len() > MAX_RESPONSE_BYTES {
                return Err(ProviderError::ResponseTooLarge {
                    limit_bytes: MAX_RESPONSE_BYTES,
                });
            }

            // Drain complete SSE events from the buffer
            while let Some(end) = buffer.find("\n\n") {
                let event = buffer[..end].to_string();
                buffer.drain(..end + 2);
                if assembler.process_event(&event, on_token)? {
                    return assembler.into_reply();
                }
            }
        }

        // Stream ended without [DONE] — flush whatever arrived
        if !buffer.trim().is_empty() {
            assembler.process_event(buffer.trim(), on_token)?;
        }
        assembler.into_reply()
    }
}

// ─── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    max_tokens: u32,
    stream: bool,
}

// ─── Buffered response parsing ──────────────────────────────────────────────

fn parse_buffered_response(body: &str) -> Result<ProviderReply, ProviderError> {
    #[derive(Deserialize)]
    struct Response {
        choices: Vec<Choice>,
    }
    #[derive(Deserialize)]
    struct Choice {
        message: ChoiceMessage,
    }
    #[derive(Deserialize)]
    struct ChoiceMessage {
        content: Option<String>,
        tool_calls: Option<Vec<WireToolCall>>,
    }

    let parsed: Response = serde_json::from_str(body).map_err(|e| ProviderError::Parse {
        reason: format!("failed to parse chat completion: {e}"),
    })?;

    let choice = parsed.choices.into_iter().next().ok_or(ProviderError::Parse {
        reason: "empty choices array".into(),
    })?;

    let tool_intent = choice
        .message
        .tool_calls
        .as_ref()
        .and_then(|calls| calls.first())
        .map(intent_from_wire_call)
        .transpose()?;

    Ok(ProviderReply {
        text: choice.message.content.unwrap_or_default(),
        tool_intent,
    })
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

fn intent_from_wire_call(call: &WireToolCall) -> Result<ToolCallIntent, ProviderError> {
    if call.function.name.is_empty() {
        return Err(ProviderError::Parse {
            reason: "tool call with empty name".into(),
        });
    }
    let arguments: serde_json::Value = if call.function.arguments.trim().is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(&call.function.arguments).map_err(|e| ProviderError::Parse {
            reason: format!("invalid tool call arguments: {e}"),
        })?
    };
    Ok(ToolCallIntent {
        server_id: None,
        tool_name: call.function.name.clone(),
        arguments,
    })
}

// ─── SSE assembly ───────────────────────────────────────────────────────────

/// Accumulates text tokens and tool-call fragments across SSE deltas.
#[derive(Default)]
struct SseAssembler {
    content: String,
    /// `(index, name_fragments, argument_fragments)` per in-progress call.
    pending_calls: Vec<(u32, String, String)>,
}

impl SseAssembler {
    /// Process one SSE event. Returns `true` when the stream signalled
    /// completion (`[DONE]`).
    fn process_event(
        &mut self,
        event: &str,
        on_token: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<bool, ProviderError> {
        let mut data = String::new();
        for line in event.lines() {
            if let Some(rest) = line
                .strip_prefix("data: ")
                .or_else(|| line.strip_prefix("data:"))
            {
                let rest = rest.trim();
                if rest == "[DONE]" {
                    return Ok(true);
                }
                data.push_str(rest);
            }
        }
        if data.is_empty() {
            return Ok(false); // keep-alive or comment
        }

        #[derive(Deserialize)]
        struct Chunk {
            choices: Vec<ChunkChoice>,
        }
        #[derive(Deserialize)]
        struct ChunkChoice {
            delta: Delta,
        }
        #[derive(Deserialize)]
        struct Delta {
            #[serde(default)]
            content: Option<String>,
            #[serde(default)]
            tool_calls: Option<Vec<DeltaToolCall>>,
        }
        #[derive(Deserialize)]
        struct DeltaToolCall {
            index: Option<u32>,
            function: Option<DeltaFunction>,
        }
        #[derive(Deserialize)]
        struct DeltaFunction {
            name: Option<String>,
            arguments: Option<String>,
        }

        let chunk: Chunk = serde_json::from_str(&data).map_err(|e| ProviderError::Parse {
            reason: format!("failed to parse SSE chunk: {e}"),
        })?;

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(false);
        };

        if let Some(token) = choice.delta.content {
            if !token.is_empty() {
                on_token(&token);
                self.content.push_str(&token);
            }
        }

        for call in choice.delta.tool_calls.unwrap_or_default() {
            let index = call.index.unwrap_or(0);
            let existing = self.pending_calls.iter().position(|(i, _, _)| *i == index);
            let pos = match existing {
                Some(pos) => pos,
                None => {
                    self.pending_calls.push((index, String::new(), String::new()));
                    self.pending_calls.len() - 1
                }
            };
            let slot = &mut self.pending_calls[pos];
            if let Some(f) = call.function {
                if let Some(name) = f.name {
                    slot.1.push_str(&name);
                }
                if let Some(args) = f.arguments {
                    slot.2.push_str(&args);
                }
            }
        }

        Ok(false)
    }

    fn into_reply(self) -> Result<ProviderReply, ProviderError> {
        let tool_intent = match self.pending_calls.into_iter().next() {
            Some((_, name, args)) => {
                let call = WireToolCall {
                    function: WireFunction {
                        name,
                        arguments: args,
                    },
                };
                Some(intent_from_wire_call(&call)?)
            }
            None => None,
        };
        Ok(ProviderReply {
            text: self.content,
            tool_intent,
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
