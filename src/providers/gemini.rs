//! Google Gemini `generateContent` adapter.
//!
//! Native function calling via `functionDeclarations`; Gemini requires the
//! JSON Schema type names upper-cased (`OBJECT`, `STRING`, …), which the
//! protocol conversion handles. Responses carry `functionCall` parts with
//! already-typed arguments.

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

// ─── Adapter ────────────────────────────────────────────────────────────────

/// Adapter for `POST {base}/v1beta/models/{model}:generateContent`.
pub struct GeminiAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiAdapter {
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
impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, request.model, self.api_key
        );
        let body = build_request(request);

        tracing::info!(
            model = %request.model,
            message_count = body.contents.len(),
            has_tools = body.tools.is_some(),
            "provider request (gemini)"
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

// ─── Request translation ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclarations>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    max_output_tokens: u32,
}

fn build_request(request: &ProviderRequest) -> GenerateRequest {
    let mut system_parts: Vec<Part> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();

    for message in &request.messages {
        let part = Part {
            text: message.content.clone(),
        };
        match message.role {
            MessageRole::System => system_parts.push(part),
            MessageRole::Assistant => contents.push(Content {
                role: Some("model"),
                parts: vec![part],
            }),
            MessageRole::User | MessageRole::Tool => contents.push(Content {
                role: Some("user"),
                parts: vec![part],
            }),
        }
    }

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(vec![ToolDeclarations {
            function_declarations: convert_tools_to_provider_format(
                &request.tools,
                ProviderKind::Gemini,
                request.namespace_tools,
            ),
        }])
    };

    GenerateRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: system_parts,
            })
        },
        tools,
        generation_config: GenerationConfig {
            temperature: request.options.temperature,
            top_p: request.options.top_p,
            max_output_tokens: request.options.max_tokens,
        },
    }
}

// ─── Response parsing ───────────────────────────────────────────────────────

fn parse_response(body: &str) -> Result<ProviderReply, ProviderError> {
    #[derive(Deserialize)]
    struct Response {
        #[serde(default)]
        candidates: Vec<Candidate>,
    }
    #[derive(Deserialize)]
    struct Candidate {
        content: Option<CandidateContent>,
    }
    #[derive(Deserialize)]
    struct CandidateContent {
        #[serde(default)]
        parts: Vec<CandidatePart>,
    }
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CandidatePart {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        function_call: Option<FunctionCall>,
    }
    #[derive(Deserialize)]
    struct FunctionCall {
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    }

    let parsed: Response = serde_json::from_str(body).map_err(|e| ProviderError::Parse {
        reason: format!("failed to parse generateContent response: {e}"),
    })?;

    let candidate = parsed.candidates.into_iter().next().ok_or(ProviderError::Parse {
        reason: "no candidates in response".into(),
    })?;

    let mut text = String::new();
    let mut tool_intent: Option<ToolCallIntent> = None;

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if tool_intent.is_none() {
            if let Some(call) = part.function_call {
                tool_intent = Some(ToolCallIntent {
                    server_id: None,
                    tool_name: call.name,
                    arguments: if call.args.is_object() {
                        call.args
                    } else {
                        serde_json::Value::Object(Default::default())
                    },
                });
            }
        }
    }

    Ok(ProviderReply { text, tool_intent })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
