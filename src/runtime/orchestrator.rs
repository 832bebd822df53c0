//! The per-turn orchestration state machine.
//!
//! One turn drives the model → tool → model loop until the model produces a
//! final answer, a safety bound trips, or an unrecoverable error occurs:
//!
//! ```text
//! AwaitingModel ──(no tool)──────────────► Done
//! AwaitingModel ──(tool)──► ExecutingTool ──► Observing ──► AwaitingModel
//! any ──(unrecoverable)──► Error ──► Done
//! any ──(repeat detection)──► LoopAborted ──► Done
//! ```
//!
//! Models without native function calling are unreliable at terminating
//! tool use; the repeat counters and the empty-response retry exist to
//! bound pathological behavior without involving the operator.
//! `send_turn` never returns an error — every failure is rendered as text.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::protocol::detect::{detect_tool_call_in_response, detect_tool_plan};
use crate::protocol::normalize::{normalize_intent, ResolvedToolCall};
use crate::protocol::ToolCallIntent;
use crate::providers::types::GenerationOptions;
use crate::providers::{ProviderAdapter, ProviderError, ProviderReply, ProviderRequest, RetryPolicy};
use crate::runtime::cache::{stable_stringify, ToolExecutionCache};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::context::ContextWindowManager;
use crate::runtime::errors::RuntimeError;
use crate::runtime::summarizer::{preview, summarize_tool_result, SummaryInput};
use crate::runtime::types::{
    Message, MessageMeta, ToolResultEvent, TurnCallbacks, TurnStatus,
};
use crate::toolserver::{ToolRegistry, ToolServer};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Temperature for the recovery call after a tool error.
const RECOVERY_TEMPERATURE: f32 = 0.2;

/// Temperature for the retry after an empty response.
const RELAXED_TEMPERATURE: f32 = 0.9;

/// Follow-up instruction for the empty-response retry. Sent with the
/// request only, never appended to history.
const SIMPLIFIED_FOLLOW_UP: &str =
    "Using the tool results above, answer the user's request in plain text. \
     Do not call any more tools.";

/// Fallback when the model stays silent outside any tool context.
const EMPTY_REPLY_FALLBACK: &str = "I could not generate a response. Please try again.";

// ─── Turn options ───────────────────────────────────────────────────────────

/// Per-turn inputs from the embedding application.
#[derive(Clone, Default)]
pub struct TurnOptions {
    pub callbacks: TurnCallbacks,
    pub cancel: CancellationToken,
    /// Free memory reported by the external resource monitor, used only to
    /// pick the context budget tier.
    pub free_memory_mb: Option<u64>,
}

// ─── Per-turn state ─────────────────────────────────────────────────────────

/// Ephemeral per-turn state. Created at turn start, discarded at the end,
/// never shared across turns or conversations.
#[derive(Default)]
struct TurnState {
    iteration: u32,
    last_tool_name: Option<String>,
    last_args_key: Option<String>,
    consecutive_repeats: u32,
    consecutive_tool_errors: u32,
    tool_context_active: bool,
    degraded: bool,
    empty_retry_used: bool,
    /// Inject the simplified follow-up into the next model call only.
    retry_with_follow_up: bool,
    last_text: String,
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

/// Drives the iterative model/tool loop for every conversation.
pub struct Orchestrator {
    provider: Arc<dyn ProviderAdapter>,
    tool_server: Arc<dyn ToolServer>,
    context: ContextWindowManager,
    cache: ToolExecutionCache,
    retry_policy: RetryPolicy,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ProviderAdapter>, tool_server: Arc<dyn ToolServer>) -> Self {
        Self {
            provider,
            tool_server,
            context: ContextWindowManager::new(),
            cache: ToolExecutionCache::new(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Override the provider retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Full history of one conversation.
    pub fn history(&self, conversation_id: &str) -> &[Message] {
        self.context.history(conversation_id)
    }

    /// Drop a conversation's history and cache bucket.
    pub fn clear_conversation(&mut self, conversation_id: &str) {
        self.context.clear(conversation_id);
        self.cache.clear(conversation_id);
    }

    /// Run one full user-message-to-final-answer cycle.
    ///
    /// Always returns a string: failures are logged and rendered as text so
    /// the caller's UI never needs a crash handler.
    pub async fn send_turn(
        &mut self,
        conversation_id: &str,
        user_text: &str,
        config: &RuntimeConfig,
        options: &TurnOptions,
    ) -> String {
        match self.run_turn(conversation_id, user_text, config, options).await {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(conversation = conversation_id, error = %err, "turn failed");
                options.callbacks.status(TurnStatus::Error, err.to_string());
                options.callbacks.status(TurnStatus::Done, "turn ended with error");
                match err {
                    RuntimeError::Provider(ProviderError::Cancelled) => {
                        "Request cancelled.".to_string()
                    }
                    RuntimeError::Provider(ProviderError::AllModelsUnavailable { attempted }) => {
                        format!(
                            "⚠️ The model service is overloaded right now (tried: {}). \
                             Please try again in a moment.",
                            attempted.join(", ")
                        )
                    }
                    other => format!("⚠️ The model request failed: {other}"),
                }
            }
        }
    }

    async fn run_turn(
        &mut self,
        conversation_id: &str,
        user_text: &str,
        config: &RuntimeConfig,
        options: &TurnOptions,
    ) -> Result<String, RuntimeError> {
        // Refresh the registry from the boundary; a broken listing means an
        // empty tool surface for this turn, not a failed turn.
        let registry = match self.tool_server.list_tools().await {
            Ok(entries) => ToolRegistry::from_entries(entries),
            Err(err) => {
                tracing::warn!(error = %err, "tool listing failed, continuing without tools");
                ToolRegistry::new()
            }
        };

        self.context
            .set_full_fidelity_tools(config.full_fidelity_tools.iter().cloned());
        self.context
            .append(conversation_id, Message::user(user_text));

        let context_limit = config.effective_context_limit(options.free_memory_mb);
        let mut state = TurnState::default();

        loop {
            state.iteration += 1;
            if let Some(max) = config.max_iterations {
                if state.iteration > max {
                    tracing::warn!(
                        conversation = conversation_id,
                        max_iterations = max,
                        "iteration ceiling reached with a tool still pending"
                    );
                    let text = best_partial_text(&state, config);
                    self.finish(conversation_id, &options.callbacks, text.clone(), "iteration ceiling");
                    return Ok(text);
                }
            }

            options
                .callbacks
                .status(TurnStatus::AwaitingModel, format!("model call {}", state.iteration));

            let reply = self
                .call_model(conversation_id, &registry, config, options, &state, context_limit)
                .await?;
            state.retry_with_follow_up = false;

            if !reply.text.trim().is_empty() {
                state.last_text = reply.text.trim().to_string();
            }

            // Native intent first, then the free-text strategies as a net
            // for providers that narrate their JSON instead of typing it.
            let intent = reply
                .tool_intent
                .clone()
                .or_else(|| detect_tool_call_in_response(&reply.text));

            let Some(intent) = intent else {
                // Multi-step plan: the response enumerates an ordered list
                // of calls to run before the next model turn.
                if let Some(plan) = detect_tool_plan(&reply.text) {
                    self.execute_plan(conversation_id, &plan.tools, &reply.text, &registry, config, options, &mut state)
                        .await?;
                    continue;
                }
                if let Some(text) = self.handle_plain_reply(conversation_id, &reply, config, options, &mut state) {
                    return Ok(text);
                }
                continue; // empty-response retry
            };

            // Duplicate short-circuit: identical tool and identical
            // arguments twice in a row never re-executes.
            let args_key = stable_stringify(&intent.arguments);
            if state.last_tool_name.as_deref() == Some(intent.tool_name.as_str())
                && state.last_args_key.as_deref() == Some(args_key.as_str())
            {
                tracing::warn!(tool = %intent.tool_name, "duplicate tool call ignored");
                let text = with_note(
                    &state.last_text,
                    &format!("[duplicate tool call ignored: {}]", intent.tool_name),
                );
                self.finish(conversation_id, &options.callbacks, text.clone(), "duplicate call");
                return Ok(text);
            }

            // Same tool name on two consecutive iterations: three sightings
            // in total means the model is stuck.
            if state.last_tool_name.as_deref() == Some(intent.tool_name.as_str()) {
                state.consecutive_repeats += 1;
                if state.consecutive_repeats >= 2 {
                    let err = RuntimeError::LoopDetected {
                        tool: intent.tool_name.clone(),
                        occurrences: state.consecutive_repeats + 1,
                    };
                    tracing::warn!(error = %err, "aborting turn");
                    options
                        .callbacks
                        .status(TurnStatus::LoopAborted, err.to_string());
                    let text = with_note(&state.last_text, &format!("[{err}]"));
                    self.finish(conversation_id, &options.callbacks, text.clone(), "loop aborted");
                    return Ok(text);
                }
            } else {
                state.consecutive_repeats = 0;
            }
            state.last_tool_name = Some(intent.tool_name.clone());
            state.last_args_key = Some(args_key);
            state.tool_context_active = true;

            // Record the model's call before executing it; past entries are
            // never rewritten.
            self.context.append(
                conversation_id,
                assistant_tool_call_message(&reply.text, &intent),
            );

            // Resolve to exactly one (server, tool) pair. Unresolvable is
            // fatal for this iteration only, reported as text.
            let resolved = match normalize_intent(&intent, &registry, config.default_directory.as_deref()) {
                Ok(resolved) => resolved,
                Err(err) => {
                    let err = RuntimeError::from(err);
                    tracing::warn!(tool = %intent.tool_name, error = %err, "unresolvable tool");
                    options.callbacks.status(TurnStatus::Error, err.to_string());
                    let text = with_note(&state.last_text, &format!("⚠️ {err}"));
                    self.finish(conversation_id, &options.callbacks, text.clone(), "unresolvable tool");
                    return Ok(text);
                }
            };

            let qualified = format!("{}__{}", resolved.server_id, resolved.tool_name);
            options
                .callbacks
                .status(TurnStatus::ExecutingTool, qualified.clone());

            let is_error = self
                .execute_and_observe(conversation_id, &qualified, &resolved, options)
                .await?;

            if is_error {
                state.consecutive_tool_errors += 1;
                if state.consecutive_tool_errors >= 2 {
                    let err = RuntimeError::ToolExecution {
                        tool: qualified.clone(),
                        reason: "kept failing after a recovery attempt".into(),
                    };
                    tracing::warn!(error = %err, "giving up after repeated tool failures");
                    let text = with_note(&state.last_text, &format!("⚠️ {err}"));
                    self.finish(conversation_id, &options.callbacks, text.clone(), "tool failures");
                    return Ok(text);
                }
                // One recovery attempt: reduced budget, lowered temperature.
                state.degraded = true;
            } else {
                state.consecutive_tool_errors = 0;
                state.degraded = false;
            }
        }
    }

    /// Execute an enumerated plan of tool calls in order. Unresolvable
    /// steps become error observations; execution continues with the
    /// remaining steps so the model sees every outcome.
    #[allow(clippy::too_many_arguments)]
    async fn execute_plan(
        &mut self,
        conversation_id: &str,
        intents: &[ToolCallIntent],
        narration: &str,
        registry: &ToolRegistry,
        config: &RuntimeConfig,
        options: &TurnOptions,
        state: &mut TurnState,
    ) -> Result<(), ProviderError> {
        tracing::info!(steps = intents.len(), "executing tool plan");
        state.tool_context_active = true;

        for (idx, intent) in intents.iter().enumerate() {
            self.context.append(
                conversation_id,
                assistant_tool_call_message(if idx == 0 { narration } else { "" }, intent),
            );

            let resolved =
                match normalize_intent(intent, registry, config.default_directory.as_deref()) {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        tracing::warn!(tool = %intent.tool_name, error = %err, "plan step unresolvable");
                        let note = format!("⚠️ {err}");
                        self.context.append(
                            conversation_id,
                            Message::tool_observation(
                                &intent.tool_name,
                                &intent.arguments,
                                &note,
                                &note,
                            ),
                        );
                        continue;
                    }
                };

            let qualified = format!("{}__{}", resolved.server_id, resolved.tool_name);
            options
                .callbacks
                .status(TurnStatus::ExecutingTool, qualified.clone());
            self.execute_and_observe(conversation_id, &qualified, &resolved, options)
                .await?;

            state.last_tool_name = Some(intent.tool_name.clone());
            state.last_args_key = Some(stable_stringify(&intent.arguments));
        }

        Ok(())
    }

    /// Handle a reply with no tool intent. Returns the final text, or
    /// `None` when the empty-response retry should run.
    fn handle_plain_reply(
        &mut self,
        conversation_id: &str,
        reply: &ProviderReply,
        config: &RuntimeConfig,
        options: &TurnOptions,
        state: &mut TurnState,
    ) -> Option<String> {
        let text = reply.text.trim();

        if text.is_empty() {
            if !state.empty_retry_used {
                tracing::info!("empty model response, retrying with simplified follow-up");
                state.empty_retry_used = true;
                state.retry_with_follow_up = true;
                return None;
            }
            // Retry also came back blank. Never propagate an empty string.
            let fallback = if state.tool_context_active {
                config.completion_notice.clone()
            } else {
                EMPTY_REPLY_FALLBACK.to_string()
            };
            // Nothing was streamed for this reply; deliver the fallback.
            options.callbacks.stream(&fallback);
            self.finish(conversation_id, &options.callbacks, fallback.clone(), "empty response");
            return Some(fallback);
        }

        self.finish(conversation_id, &options.callbacks, text.to_string(), "final answer");
        Some(text.to_string())
    }

    /// Execute one resolved call (cache first) and append the observation.
    /// Returns whether the outcome was an error.
    async fn execute_and_observe(
        &mut self,
        conversation_id: &str,
        qualified: &str,
        resolved: &ResolvedToolCall,
        options: &TurnOptions,
    ) -> Result<bool, ProviderError> {
        // Cache consult: a hit skips execution and the tool-result
        // callback; the stored digest is reinjected as a fresh observation.
        if let Some(hit) = self
            .cache
            .recall(conversation_id, qualified, &resolved.arguments)
        {
            options
                .callbacks
                .status(TurnStatus::Observing, format!("cache hit for {qualified}"));
            self.context.append(
                conversation_id,
                Message::tool_observation(qualified, &resolved.arguments, &hit.raw_text, &hit.summary),
            );
            return Ok(hit.is_error);
        }

        let call = self.tool_server.call_tool(
            &resolved.server_id,
            &resolved.tool_name,
            &resolved.arguments,
        );
        let outcome = tokio::select! {
            result = call => result,
            _ = options.cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        // A broken transport is an error observation, not a failed turn.
        let (raw_text, is_error) = match outcome {
            Ok(outcome) => (outcome.text(), outcome.is_error),
            Err(err) => (format!("tool-server error: {err}"), true),
        };

        let summary = summarize_tool_result(&SummaryInput::new(
            qualified,
            &resolved.arguments,
            &raw_text,
            is_error,
        ));

        tracing::info!(
            tool = qualified,
            is_error,
            result_preview = preview(&summary, 120),
            "tool executed"
        );

        self.cache.remember(
            conversation_id,
            qualified,
            &resolved.arguments,
            &summary,
            &raw_text,
            is_error,
        );

        options.callbacks.tool_result(ToolResultEvent {
            tool_name: qualified.to_string(),
            arguments: resolved.arguments.clone(),
            result: raw_text.clone(),
            error: is_error.then(|| raw_text.clone()),
        });

        options.callbacks.status(TurnStatus::Observing, summary.clone());
        self.context.append(
            conversation_id,
            Message::tool_observation(qualified, &resolved.arguments, &raw_text, &summary),
        );

        Ok(is_error)
    }

    /// One model call with retry, overload fallback, and optional token
    /// streaming.
    async fn call_model(
        &self,
        conversation_id: &str,
        registry: &ToolRegistry,
        config: &RuntimeConfig,
        options: &TurnOptions,
        state: &TurnState,
        context_limit: u32,
    ) -> Result<ProviderReply, ProviderError> {
        // A tool error halves the budget for the recovery call.
        let budget = if state.degraded {
            context_limit / 2
        } else {
            context_limit
        };

        let mut messages: Vec<Message> = Vec::new();
        if let Some(ref prompt) = config.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        if !self.provider.supports_native_tools() && !registry.is_empty() {
            messages.push(Message::system(build_tool_instructions(
                registry,
                config.namespace_tools,
            )));
        }
        messages.extend(self.context.trimmed_history(conversation_id, budget));
        if state.retry_with_follow_up {
            messages.push(Message::user(SIMPLIFIED_FOLLOW_UP));
        }

        let temperature = if state.degraded {
            RECOVERY_TEMPERATURE
        } else if state.retry_with_follow_up {
            RELAXED_TEMPERATURE
        } else {
            config.temperature
        };

        let mut request = ProviderRequest::new(config.model.clone(), messages);
        request.namespace_tools = config.namespace_tools;
        request.options = GenerationOptions {
            temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        };
        if self.provider.supports_native_tools() {
            request.tools = registry.clone();
        }

        let mut attempted: Vec<String> = Vec::new();
        let models = std::iter::once(&config.model).chain(config.fallback_models.iter());

        for model in models {
            request.model = model.clone();
            let result = self
                .retry_policy
                .run(&options.cancel, || {
                    if let Some(ref on_stream) = options.callbacks.on_stream {
                        self.provider
                            .complete_streaming(&request, &**on_stream, &options.cancel)
                    } else {
                        self.provider.complete(&request, &options.cancel)
                    }
                })
                .await;

            match result {
                Ok(reply) => return Ok(reply),
                Err(err) if err.is_overloaded() => {
                    // Retries exhausted on this model; fall back to the
                    // next configured model of the same family.
                    tracing::warn!(model = %request.model, "model overloaded, trying fallback");
                    attempted.push(request.model.clone());
                }
                Err(err) => return Err(err),
            }
        }

        Err(ProviderError::AllModelsUnavailable { attempted })
    }

    /// Append the final assistant message and emit the closing status.
    fn finish(
        &mut self,
        conversation_id: &str,
        callbacks: &TurnCallbacks,
        text: String,
        reason: &str,
    ) {
        self.context
            .append(conversation_id, Message::assistant(text));
        callbacks.status(TurnStatus::Done, reason);
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// The best text to return when a bound trips mid-turn.
fn best_partial_text(state: &TurnState, config: &RuntimeConfig) -> String {
    if state.last_text.is_empty() {
        config.completion_notice.clone()
    } else {
        state.last_text.clone()
    }
}

/// Append a bracketed diagnostic note to the last model text.
fn with_note(last_text: &str, note: &str) -> String {
    if last_text.is_empty() {
        note.to_string()
    } else {
        format!("{last_text}\n\n{note}")
    }
}

/// The assistant-side record of a tool call, kept in history before the
/// observation lands.
fn assistant_tool_call_message(narration: &str, intent: &ToolCallIntent) -> Message {
    let mut message = Message::assistant(narration.trim());
    message.meta = MessageMeta {
        is_tool_call: true,
        tool_name: Some(intent.tool_name.clone()),
        tool_args: Some(intent.arguments.clone()),
        ..Default::default()
    };
    message
}

/// System-prompt tool listing for models without native function calling.
/// Mirrors how tools are described to a router model in training format:
/// a numbered text list plus the exact calling convention.
fn build_tool_instructions(registry: &ToolRegistry, namespace: bool) -> String {
    let mut lines = Vec::new();
    for (i, entry) in registry.entries().enumerate() {
        let callable = if namespace {
            format!("{}__{}", entry.server_id, entry.name)
        } else {
            entry.name.clone()
        };
        lines.push(format!("{}. {} — {}", i + 1, callable, entry.description));
    }

    format!(
        "You can use external tools. To call a tool, reply with exactly one \
         JSON object and nothing else:\n\
         {{\"tool\": \"<tool name>\", \"arguments\": {{ ... }}}}\n\n\
         Available tools:\n{}\n\n\
         When you have the final answer, reply in plain text without JSON.",
        lines.join("\n")
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use crate::protocol::ProviderKind;
    use crate::toolserver::{ToolCallOutcome, ToolRegistryEntry, ToolServerError};

    /// Route runtime tracing through the test harness when `RUST_LOG` asks
    /// for it. Safe to call from every test; only the first init wins.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    // ─── Scripted doubles ───────────────────────────────────────────────

    /// Provider that replays a fixed script of replies. With `repeat_last`,
    /// the final reply repeats forever (the adversarial case).
    struct ScriptedProvider {
        replies: Mutex<VecDeque<ProviderReply>>,
        calls: AtomicU32,
        repeat_last: bool,
        /// Model name that must be requested for calls to succeed; any
        /// other model gets an overloaded error.
        only_model: Option<String>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<ProviderReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
                repeat_last: false,
                only_model: None,
            }
        }

        fn adversarial(reply: ProviderReply) -> Self {
            Self {
                replies: Mutex::new(vec![reply].into()),
                calls: AtomicU32::new(0),
                repeat_last: true,
                only_model: None,
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
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
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(ref only) = self.only_model {
                if &request.model != only {
                    return Err(ProviderError::Overloaded {
                        status: 503,
                        body: "overloaded".into(),
                    });
                }
            }

            let mut queue = self.replies.lock().unwrap();
            if self.repeat_last && queue.len() == 1 {
                return Ok(queue.front().unwrap().clone());
            }
            queue.pop_front().ok_or(ProviderError::Parse {
                reason: "script exhausted".into(),
            })
        }
    }

    /// Tool server with one registered tool surface and a scripted outcome.
    struct FakeToolServer {
        entries: Vec<ToolRegistryEntry>,
        calls: AtomicU32,
        outcome: ToolCallOutcome,
    }

    impl FakeToolServer {
        fn new(entries: Vec<ToolRegistryEntry>, outcome: ToolCallOutcome) -> Self {
            Self {
                entries,
                calls: AtomicU32::new(0),
                outcome,
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ToolServer for FakeToolServer {
        async fn list_tools(&self) -> Result<Vec<ToolRegistryEntry>, ToolServerError> {
            Ok(self.entries.clone())
        }

        async fn call_tool(
            &self,
            _server_id: &str,
            _tool_name: &str,
            _args: &serde_json::Value,
        ) -> Result<ToolCallOutcome, ToolServerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome.clone())
        }
    }

    // ─── Fixtures ───────────────────────────────────────────────────────

    fn fs_entries() -> Vec<ToolRegistryEntry> {
        vec![
            ToolRegistryEntry {
                server_id: "fs".into(),
                name: "list_directory".into(),
                description: "List files in a directory".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }),
            },
            ToolRegistryEntry {
                server_id: "search".into(),
                name: "search_x".into(),
                description: "Search an index".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "q": { "type": "string" } },
                    "required": ["q"]
                }),
            },
        ]
    }

    fn intent_reply(text: &str, tool: &str, args: serde_json::Value) -> ProviderReply {
        ProviderReply {
            text: text.to_string(),
            tool_intent: Some(ToolCallIntent {
                server_id: None,
                tool_name: tool.to_string(),
                arguments: args,
            }),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            retryable: ProviderError::is_retryable,
        }
    }

    struct CallbackProbe {
        tool_results: Arc<Mutex<Vec<ToolResultEvent>>>,
        streamed: Arc<Mutex<String>>,
        callbacks: TurnCallbacks,
    }

    fn probe() -> CallbackProbe {
        let tool_results: Arc<Mutex<Vec<ToolResultEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let streamed: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));

        let tr = tool_results.clone();
        let st = streamed.clone();
        let callbacks = TurnCallbacks {
            on_tool_result: Some(Arc::new(move |event| {
                tr.lock().unwrap().push(event);
            })),
            on_stream: Some(Arc::new(move |chunk: &str| {
                st.lock().unwrap().push_str(chunk);
            })),
            ..Default::default()
        };

        CallbackProbe {
            tool_results,
            streamed,
            callbacks,
        }
    }

    // ─── End-to-end scenarios ───────────────────────────────────────────

    /// User asks for a listing; the model (no native calling) emits JSON;
    /// the tool runs once, its summary is reinjected, the model answers.
    #[tokio::test]
    async fn free_text_tool_call_round_trip() {
        init_tracing();
        let provider = Arc::new(ScriptedProvider::new(vec![
            ProviderReply::text_only(
                r#"{"tool": "list_directory", "arguments": {"path": "/tmp"}}"#,
            ),
            ProviderReply::text_only("The files are a.txt and b.txt."),
        ]));
        let tools = Arc::new(FakeToolServer::new(
            fs_entries(),
            ToolCallOutcome::ok("a.txt\nb.txt"),
        ));

        let mut orchestrator = Orchestrator::new(provider.clone(), tools.clone());
        let config = RuntimeConfig::for_model("test-model");
        let probe = probe();
        let options = TurnOptions {
            callbacks: probe.callbacks.clone(),
            ..Default::default()
        };

        let answer = orchestrator
            .send_turn("c1", "list files in /tmp", &config, &options)
            .await;

        assert_eq!(answer, "The files are a.txt and b.txt.");
        assert_eq!(tools.call_count(), 1, "one tool execution");
        assert_eq!(provider.call_count(), 2, "two model calls");

        let events = probe.tool_results.lock().unwrap();
        assert_eq!(events.len(), 1, "exactly one tool-result callback");
        assert_eq!(events[0].tool_name, "fs__list_directory");
        assert!(events[0].error.is_none());
        drop(events);

        // History: user, assistant(tool call), observation, assistant
        let history = orchestrator.history("c1");
        assert_eq!(history.len(), 4);
        assert!(history[1].meta.is_tool_call);
        assert!(history[2].meta.is_tool_observation);
        assert_eq!(history[3].content, "The files are a.txt and b.txt.");
    }

    /// An empty response after tool work retries once with the simplified
    /// follow-up; a second blank returns the policy notice, never "".
    #[tokio::test]
    async fn empty_response_retries_then_falls_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            intent_reply("", "list_directory", serde_json::json!({"path": "/tmp"})),
            ProviderReply::text_only(""),
            ProviderReply::text_only("   "),
        ]));
        let tools = Arc::new(FakeToolServer::new(
            fs_entries(),
            ToolCallOutcome::ok("a.txt"),
        ));

        let mut orchestrator = Orchestrator::new(provider.clone(), tools);
        let config = RuntimeConfig::for_model("test-model");
        let options = TurnOptions::default();

        let answer = orchestrator
            .send_turn("c1", "clean up /tmp", &config, &options)
            .await;

        assert_eq!(answer, "✅ Operación completada correctamente.");
        assert_eq!(provider.call_count(), 3, "initial + empty + one retry");
    }

    /// Identical call in a later turn inside the TTL window: one execution,
    /// one cache hit, and the tool-result callback fires exactly once.
    #[tokio::test]
    async fn identical_call_across_turns_hits_cache() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            intent_reply("", "search_x", serde_json::json!({"q": "a"})),
            ProviderReply::text_only("Found it in the index."),
            intent_reply("", "search_x", serde_json::json!({"q": "a"})),
            ProviderReply::text_only("Same answer as before."),
        ]));
        let tools = Arc::new(FakeToolServer::new(
            fs_entries(),
            ToolCallOutcome::ok("match: row 17"),
        ));

        let mut orchestrator = Orchestrator::new(provider.clone(), tools.clone());
        let config = RuntimeConfig::for_model("test-model");
        let probe = probe();
        let options = TurnOptions {
            callbacks: probe.callbacks.clone(),
            ..Default::default()
        };

        let first = orchestrator.send_turn("c1", "search a", &config, &options).await;
        let second = orchestrator.send_turn("c1", "search a again", &config, &options).await;

        assert_eq!(first, "Found it in the index.");
        assert_eq!(second, "Same answer as before.");
        assert_eq!(tools.call_count(), 1, "second request served from cache");
        assert_eq!(
            probe.tool_results.lock().unwrap().len(),
            1,
            "callback fires only for the actual execution"
        );
    }

    /// Adversarial provider requesting the same tool with the same
    /// arguments forever terminates within two repeats.
    #[tokio::test]
    async fn duplicate_identical_call_short_circuits() {
        let provider = Arc::new(ScriptedProvider::adversarial(intent_reply(
            "Calling the tool again.",
            "list_directory",
            serde_json::json!({"path": "/tmp"}),
        )));
        let tools = Arc::new(FakeToolServer::new(
            fs_entries(),
            ToolCallOutcome::ok("a.txt"),
        ));

        let mut orchestrator = Orchestrator::new(provider.clone(), tools.clone());
        let config = RuntimeConfig::for_model("test-model");
        let options = TurnOptions::default();

        let answer = orchestrator
            .send_turn("c1", "list /tmp", &config, &options)
            .await;

        assert!(answer.contains("duplicate tool call ignored"), "{answer}");
        assert_eq!(tools.call_count(), 1, "executed once, never re-executed");
        assert_eq!(provider.call_count(), 2, "terminated on the second request");
    }

    /// Same tool with varying arguments: the third sighting aborts the loop.
    #[tokio::test]
    async fn repeated_tool_name_aborts_loop() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            intent_reply("scanning", "list_directory", serde_json::json!({"path": "/a"})),
            intent_reply("scanning more", "list_directory", serde_json::json!({"path": "/b"})),
            intent_reply("still scanning", "list_directory", serde_json::json!({"path": "/c"})),
            ProviderReply::text_only("never reached"),
        ]));
        let tools = Arc::new(FakeToolServer::new(
            fs_entries(),
            ToolCallOutcome::ok("entries"),
        ));

        let mut orchestrator = Orchestrator::new(provider.clone(), tools.clone());
        let config = RuntimeConfig::for_model("test-model");
        let options = TurnOptions::default();

        let answer = orchestrator
            .send_turn("c1", "scan everything", &config, &options)
            .await;

        assert!(answer.contains("3 times in a row"), "{answer}");
        assert_eq!(tools.call_count(), 2, "third request never executed");
    }

    /// A name no server registers ends the loop with an error report, not
    /// a silent drop or a guess across servers.
    #[tokio::test]
    async fn unresolvable_tool_reports_as_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![intent_reply(
            "",
            "definitely_not_registered",
            serde_json::json!({}),
        )]));
        let tools = Arc::new(FakeToolServer::new(
            fs_entries(),
            ToolCallOutcome::ok("unused"),
        ));

        let mut orchestrator = Orchestrator::new(provider, tools.clone());
        let config = RuntimeConfig::for_model("test-model");
        let options = TurnOptions::default();

        let answer = orchestrator
            .send_turn("c1", "do something", &config, &options)
            .await;

        assert!(answer.contains("unresolvable tool"), "{answer}");
        assert_eq!(tools.call_count(), 0);
    }

    /// The iteration ceiling returns the best partial text instead of
    /// looping or panicking.
    #[tokio::test]
    async fn iteration_ceiling_returns_partial_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            intent_reply("working on it", "list_directory", serde_json::json!({"path": "/a"})),
            intent_reply("checking the index", "search_x", serde_json::json!({"q": "x"})),
            intent_reply("back to listing", "list_directory", serde_json::json!({"path": "/b"})),
        ]));
        let tools = Arc::new(FakeToolServer::new(
            fs_entries(),
            ToolCallOutcome::ok("data"),
        ));

        let mut orchestrator = Orchestrator::new(provider.clone(), tools);
        let config = RuntimeConfig {
            max_iterations: Some(2),
            ..RuntimeConfig::for_model("test-model")
        };
        let options = TurnOptions::default();

        let answer = orchestrator
            .send_turn("c1", "busy work", &config, &options)
            .await;

        assert_eq!(answer, "checking the index", "last model text is returned");
        assert_eq!(provider.call_count(), 2);
    }

    /// Tool failures become observations; two in a row end the turn with a
    /// diagnostic instead of looping.
    #[tokio::test]
    async fn repeated_tool_errors_give_up_with_diagnostic() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            intent_reply("first try", "list_directory", serde_json::json!({"path": "/a"})),
            intent_reply("second try", "search_x", serde_json::json!({"q": "x"})),
            ProviderReply::text_only("never reached"),
        ]));
        let tools = Arc::new(FakeToolServer::new(
            fs_entries(),
            ToolCallOutcome::error("permission denied"),
        ));

        let mut orchestrator = Orchestrator::new(provider, tools.clone());
        let config = RuntimeConfig::for_model("test-model");
        let options = TurnOptions::default();

        let answer = orchestrator
            .send_turn("c1", "try tools", &config, &options)
            .await;

        assert!(answer.contains("kept failing"), "{answer}");
        assert_eq!(tools.call_count(), 2, "one recovery attempt was allowed");
    }

    /// Overload on the primary model falls back to the next configured
    /// model after retries, transparently to the caller.
    #[tokio::test]
    async fn overloaded_primary_falls_back_to_secondary_model() {
        let provider = Arc::new(ScriptedProvider {
            replies: Mutex::new(
                vec![ProviderReply::text_only("answered by backup")].into(),
            ),
            calls: AtomicU32::new(0),
            repeat_last: false,
            only_model: Some("backup-model".into()),
        });
        let tools = Arc::new(FakeToolServer::new(fs_entries(), ToolCallOutcome::ok("x")));

        let mut orchestrator =
            Orchestrator::new(provider.clone(), tools).with_retry_policy(fast_policy());
        let config = RuntimeConfig {
            fallback_models: vec!["backup-model".into()],
            ..RuntimeConfig::for_model("primary-model")
        };
        let options = TurnOptions::default();

        let answer = orchestrator
            .send_turn("c1", "hello", &config, &options)
            .await;

        assert_eq!(answer, "answered by backup");
        // 3 overloaded attempts on primary + 1 success on backup
        assert_eq!(provider.call_count(), 4);
    }

    /// Cancellation stops the turn and leaves history exactly as it was
    /// before the cancelled step.
    #[tokio::test]
    async fn cancellation_leaves_history_clean() {
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderReply::text_only(
            "never delivered",
        )]));
        let tools = Arc::new(FakeToolServer::new(fs_entries(), ToolCallOutcome::ok("x")));

        let mut orchestrator = Orchestrator::new(provider, tools);
        let config = RuntimeConfig::for_model("test-model");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = TurnOptions {
            cancel,
            ..Default::default()
        };

        let answer = orchestrator
            .send_turn("c1", "hello", &config, &options)
            .await;

        assert_eq!(answer, "Request cancelled.");
        let history = orchestrator.history("c1");
        assert_eq!(history.len(), 1, "only the user message was recorded");
        assert_eq!(history[0].content, "hello");
    }

    /// Streaming callback receives the final answer text.
    #[tokio::test]
    async fn stream_callback_receives_tokens() {
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderReply::text_only(
            "streamed answer",
        )]));
        let tools = Arc::new(FakeToolServer::new(Vec::new(), ToolCallOutcome::ok("x")));

        let mut orchestrator = Orchestrator::new(provider, tools);
        let config = RuntimeConfig::for_model("test-model");
        let probe = probe();
        let options = TurnOptions {
            callbacks: probe.callbacks.clone(),
            ..Default::default()
        };

        let answer = orchestrator.send_turn("c1", "hi", &config, &options).await;

        assert_eq!(answer, "streamed answer");
        assert_eq!(*probe.streamed.lock().unwrap(), "streamed answer");
    }

    /// Clearing a conversation drops history and its cache bucket.
    #[tokio::test]
    async fn clear_conversation_resets_state() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            intent_reply("", "search_x", serde_json::json!({"q": "a"})),
            ProviderReply::text_only("done"),
            intent_reply("", "search_x", serde_json::json!({"q": "a"})),
            ProviderReply::text_only("done again"),
        ]));
        let tools = Arc::new(FakeToolServer::new(
            fs_entries(),
            ToolCallOutcome::ok("row"),
        ));

        let mut orchestrator = Orchestrator::new(provider, tools.clone());
        let config = RuntimeConfig::for_model("test-model");
        let options = TurnOptions::default();

        orchestrator.send_turn("c1", "search", &config, &options).await;
        orchestrator.clear_conversation("c1");
        assert!(orchestrator.history("c1").is_empty());

        orchestrator.send_turn("c1", "search", &config, &options).await;
        assert_eq!(tools.call_count(), 2, "cache bucket was dropped with the conversation");
    }

    /// A response enumerating a plan runs every step in order before the
    /// next model turn.
    #[tokio::test]
    async fn plan_executes_steps_sequentially() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ProviderReply::text_only(
                r#"{"plan": [
                    {"tool": "list_directory", "arguments": {"path": "/tmp"}},
                    {"tool": "search_x", "arguments": {"q": "report"}}
                ]}"#,
            ),
            ProviderReply::text_only("Both steps are done."),
        ]));
        let tools = Arc::new(FakeToolServer::new(
            fs_entries(),
            ToolCallOutcome::ok("step output"),
        ));

        let mut orchestrator = Orchestrator::new(provider.clone(), tools.clone());
        let config = RuntimeConfig::for_model("test-model");
        let probe = probe();
        let options = TurnOptions {
            callbacks: probe.callbacks.clone(),
            ..Default::default()
        };

        let answer = orchestrator
            .send_turn("c1", "list then search", &config, &options)
            .await;

        assert_eq!(answer, "Both steps are done.");
        assert_eq!(tools.call_count(), 2, "both plan steps executed");
        assert_eq!(provider.call_count(), 2, "one planning call, one final call");

        let events = probe.tool_results.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tool_name, "fs__list_directory");
        assert_eq!(events[1].tool_name, "search__search_x");
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    #[test]
    fn tool_instructions_list_namespaced_tools() {
        let registry = ToolRegistry::from_entries(fs_entries());
        let prompt = build_tool_instructions(&registry, true);
        assert!(prompt.contains("fs__list_directory"));
        assert!(prompt.contains("search__search_x"));
        assert!(prompt.contains("\"tool\""));

        let bare = build_tool_instructions(&registry, false);
        assert!(bare.contains("1. list_directory"));
    }

    #[test]
    fn note_appends_to_existing_text() {
        assert_eq!(with_note("", "[note]"), "[note]");
        assert_eq!(with_note("text", "[note]"), "text\n\n[note]");
    }
}
