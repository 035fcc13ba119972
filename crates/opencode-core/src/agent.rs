// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use opencode_config::AgentRole;
use opencode_model::{Model, ModelProvider, ProviderEvent, TokenUsage, ToolSchema};
use opencode_pubsub::{Broker, EventKind};
use opencode_store::{
    BinaryPart, ContentPart, FinishReason, Message, MessageStore, Role, SessionStore, StoreError,
    ToolCallPart, ToolResultPart,
};
use opencode_tools::{ToolCall, ToolCtx, ToolError, ToolRegistry};

use crate::events::AgentEvent;
use crate::prompts;

/// Titles are trimmed to one line of at most this many characters
/// (~80 tokens at 4 chars per token).
const TITLE_MAX_CHARS: usize = 320;

/// How many inline compactions one trigger may attempt before giving up and
/// continuing with the oversized history.
const MAX_COMPACTION_ATTEMPTS: u32 = 3;

/// Fraction of the context window at which auto-compaction fires.
const COMPACTION_THRESHOLD: f64 = 0.95;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A run (or summarization) is already in flight for that session.
    #[error("session is busy")]
    SessionBusy,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How a run ended internally; mapped onto the channel's terminal event.
enum RunError {
    Canceled,
    Fatal(anyhow::Error),
}

impl From<StoreError> for RunError {
    fn from(e: StoreError) -> Self {
        RunError::Fatal(e.into())
    }
}

/// The streaming think/act/observe loop driving one model through tool-use
/// rounds until it produces a final answer.
pub struct Agent {
    role: AgentRole,
    provider: RwLock<Arc<dyn ModelProvider>>,
    title_provider: RwLock<Option<Arc<dyn ModelProvider>>>,
    summarizer: RwLock<Option<Arc<dyn ModelProvider>>>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    events: Arc<Broker<AgentEvent>>,
    /// Session id → cancel handle.  Key presence is the busy predicate; the
    /// `{session}-summarize` key tracks in-flight summarizations.
    active_requests: DashMap<String, CancellationToken>,
    auto_compact: bool,
}

impl Agent {
    pub fn new(
        role: AgentRole,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            role,
            provider: RwLock::new(provider),
            title_provider: RwLock::new(None),
            summarizer: RwLock::new(None),
            tools,
            sessions,
            messages,
            events: Arc::new(Broker::new()),
            active_requests: DashMap::new(),
            auto_compact: true,
        }
    }

    pub fn with_title_provider(self, provider: Arc<dyn ModelProvider>) -> Self {
        *self.title_provider.write().unwrap() = Some(provider);
        self
    }

    pub fn with_summarizer(self, provider: Arc<dyn ModelProvider>) -> Self {
        *self.summarizer.write().unwrap() = Some(provider);
        self
    }

    pub fn with_auto_compact(mut self, enabled: bool) -> Self {
        self.auto_compact = enabled;
        self
    }

    /// Broker carrying out-of-band events: summarize progress and run
    /// terminals, mirrored for subscribers that did not start the run.
    pub fn events(&self) -> Arc<Broker<AgentEvent>> {
        Arc::clone(&self.events)
    }

    /// Descriptor of the model currently driving this agent.
    pub fn model(&self) -> Model {
        self.provider.read().unwrap().model().clone()
    }

    pub fn is_session_busy(&self, session_id: &str) -> bool {
        self.active_requests.contains_key(session_id)
    }

    pub fn is_busy(&self) -> bool {
        !self.active_requests.is_empty()
    }

    /// Cancel the running request (and any in-flight summarization) for a
    /// session.  The run observes the token at its next suspension point.
    pub fn cancel(&self, session_id: &str) {
        if let Some(entry) = self.active_requests.get(session_id) {
            entry.value().cancel();
        }
        if let Some(entry) = self.active_requests.get(&summarize_key(session_id)) {
            entry.value().cancel();
        }
    }

    /// Hot-swap the provider backing `role`.  Rejected while any run is in
    /// flight — swapping mid-stream would corrupt accounting.
    pub fn update(
        &self,
        role: AgentRole,
        provider: Arc<dyn ModelProvider>,
    ) -> Result<(), AgentError> {
        if self.is_busy() {
            return Err(AgentError::SessionBusy);
        }
        match role {
            AgentRole::Title => *self.title_provider.write().unwrap() = Some(provider),
            AgentRole::Summarizer => *self.summarizer.write().unwrap() = Some(provider),
            _ => *self.provider.write().unwrap() = provider,
        }
        Ok(())
    }

    /// Start a run for `session_id`.  Returns the event channel; the channel
    /// receives exactly one terminal event (`Response { done: true }` or
    /// `Error`) and then closes.
    ///
    /// Fails immediately with [`AgentError::SessionBusy`] when a run is
    /// already active for that session, without touching the store.
    pub fn run(
        self: &Arc<Self>,
        session_id: &str,
        content: impl Into<String>,
        attachments: Vec<BinaryPart>,
    ) -> Result<mpsc::Receiver<AgentEvent>, AgentError> {
        let cancel = CancellationToken::new();
        match self.active_requests.entry(session_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(AgentError::SessionBusy),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }

        let (tx, rx) = mpsc::channel(16);
        let agent = Arc::clone(self);
        let session_id = session_id.to_string();
        let content = content.into();
        tokio::spawn(async move {
            let outcome = agent
                .process_run(&cancel, &session_id, content, attachments)
                .await;
            agent.active_requests.remove(&session_id);
            let event = match outcome {
                Ok(message) => AgentEvent::Response {
                    message,
                    done: true,
                },
                Err(RunError::Canceled) => AgentEvent::Error {
                    error: "request canceled".into(),
                },
                Err(RunError::Fatal(e)) => {
                    warn!(session = %session_id, "agent run failed: {e:#}");
                    AgentEvent::Error {
                        error: e.to_string(),
                    }
                }
            };
            agent.events.publish(EventKind::Created, event.clone()).await;
            let _ = tx.send(event).await;
            // tx drops here; the channel closes after the terminal event.
        });
        Ok(rx)
    }

    /// Summarize a session in the background.  Progress and completion are
    /// published on [`Agent::events`].
    pub fn summarize(self: &Arc<Self>, session_id: &str) -> Result<(), AgentError> {
        let key = summarize_key(session_id);
        let cancel = CancellationToken::new();
        match self.active_requests.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(AgentError::SessionBusy),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        let agent = Arc::clone(self);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let result = agent.summarize_session(&cancel, &session_id).await;
            agent.active_requests.remove(&key);
            if let Err(e) = result {
                agent
                    .events
                    .publish(
                        EventKind::Created,
                        AgentEvent::Error {
                            error: format!("summarization failed: {e:#}"),
                        },
                    )
                    .await;
            }
        });
        Ok(())
    }

    // ── The per-run algorithm ────────────────────────────────────────────────

    async fn process_run(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        content: String,
        attachments: Vec<BinaryPart>,
    ) -> Result<Message, RunError> {
        let provider = self.current_provider();
        let model = provider.model().clone();

        let history = self.messages.list_messages(session_id).await?;
        if history.is_empty() {
            self.spawn_title_generation(session_id, &content);
        }

        // Compact before appending the new user turn, so a full window never
        // folds the fresh prompt into the summary.
        let mut compaction_attempts = 0u32;
        self.compact_if_needed(cancel, session_id, &model, &mut compaction_attempts)
            .await?;

        let mut user = Message::user(session_id, content);
        if provider.supports_attachments() {
            for attachment in attachments {
                user.add_binary(attachment);
            }
        }
        // Attachments are dropped silently when unsupported.
        self.messages.create_message(user).await?;

        loop {
            let history = self.load_history(session_id).await?;
            let mut assistant = self
                .stream_turn(cancel, &provider, &model, session_id, &history)
                .await?;

            let calls = assistant.tool_calls();
            if calls.is_empty() {
                return Ok(assistant);
            }

            let denied = self
                .execute_tools(cancel, session_id, &mut assistant, &calls)
                .await?;
            if denied {
                return Ok(assistant);
            }
            if assistant.finish_reason() != Some(FinishReason::ToolUse) {
                return Ok(assistant);
            }

            self.compact_if_needed(cancel, session_id, &model, &mut compaction_attempts)
                .await?;
        }
    }

    /// One streaming model call: create the assistant message, apply stream
    /// events to it as they arrive, persist on every change, account usage
    /// on completion.
    async fn stream_turn(
        &self,
        cancel: &CancellationToken,
        provider: &Arc<dyn ModelProvider>,
        model: &Model,
        session_id: &str,
        history: &[Message],
    ) -> Result<Message, RunError> {
        let mut assistant = self
            .messages
            .create_message(Message::assistant(session_id, &model.id))
            .await?;

        let mut request = Vec::with_capacity(history.len() + 1);
        request.push(self.system_message(session_id, model));
        request.extend_from_slice(history);

        let tool_schemas = self.tool_schemas();
        let mut stream = match provider
            .stream(cancel.clone(), &request, &tool_schemas)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                assistant.set_finish(FinishReason::Error);
                self.messages.update_message(&assistant).await?;
                return Err(RunError::Fatal(e));
            }
        };

        let mut completed = false;
        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                return self.finish_canceled(session_id, assistant).await;
            }
            let event = match event {
                Ok(ev) => ev,
                Err(e) => {
                    if cancel.is_cancelled() {
                        return self.finish_canceled(session_id, assistant).await;
                    }
                    assistant.set_finish(FinishReason::Error);
                    self.messages.update_message(&assistant).await?;
                    return Err(RunError::Fatal(e));
                }
            };
            match event {
                ProviderEvent::ThinkingDelta(delta) => {
                    assistant.append_reasoning(&delta);
                    self.messages.update_message(&assistant).await?;
                }
                ProviderEvent::ContentDelta(delta) => {
                    assistant.append_text(&delta);
                    self.messages.update_message(&assistant).await?;
                }
                ProviderEvent::ToolUseStart { id, name } => {
                    assistant.add_tool_call(id, name);
                    self.messages.update_message(&assistant).await?;
                }
                ProviderEvent::ToolUseDelta { id, input } => {
                    assistant.append_tool_call_input(&id, &input);
                    self.messages.update_message(&assistant).await?;
                }
                ProviderEvent::ToolUseStop { id } => {
                    assistant.finish_tool_call(&id);
                    self.messages.update_message(&assistant).await?;
                }
                ProviderEvent::Complete {
                    finish_reason,
                    tool_calls,
                    usage,
                } => {
                    // The completion's call list is authoritative; streamed
                    // input survives when the re-emission arrives empty.
                    if !tool_calls.is_empty() {
                        assistant.set_tool_calls(
                            tool_calls
                                .into_iter()
                                .map(|t| ToolCallPart {
                                    id: t.id,
                                    name: t.name,
                                    input: t.input,
                                    finished: false,
                                })
                                .collect(),
                        );
                    }
                    assistant.add_finish(finish_reason);
                    self.messages.update_message(&assistant).await?;
                    self.track_usage(session_id, model, usage).await?;
                    completed = true;
                }
                ProviderEvent::Error(e) => {
                    warn!(session = session_id, "provider stream error: {e}");
                }
            }
        }

        if !completed {
            if cancel.is_cancelled() {
                return self.finish_canceled(session_id, assistant).await;
            }
            assistant.set_finish(FinishReason::Error);
            self.messages.update_message(&assistant).await?;
            return Err(RunError::Fatal(anyhow::anyhow!(
                "provider stream ended without completing"
            )));
        }
        Ok(assistant)
    }

    /// Run the turn's tool calls in emission order, strictly serially.
    /// Returns true when a permission denial ended the turn.
    async fn execute_tools(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        assistant: &mut Message,
        calls: &[ToolCallPart],
    ) -> Result<bool, RunError> {
        let mut results: Vec<ToolResultPart> = Vec::new();
        let mut denied = false;
        let mut canceled = false;

        for (i, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                for remaining in &calls[i..] {
                    results.push(canceled_result(remaining));
                }
                canceled = true;
                break;
            }
            let Some(tool) = self.tools.get(&call.name) else {
                results.push(ToolResultPart {
                    tool_call_id: call.id.clone(),
                    content: format!("Tool not found: {}", call.name),
                    metadata: None,
                    is_error: true,
                });
                continue;
            };
            debug!(session = session_id, tool = %call.name, "executing tool call");
            let ctx = ToolCtx::new(session_id, assistant.id.clone(), cancel.clone());
            let tool_call = ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            };
            match tool.run(&ctx, &tool_call).await {
                Ok(resp) => results.push(ToolResultPart {
                    tool_call_id: call.id.clone(),
                    content: resp.content,
                    metadata: resp.metadata,
                    is_error: resp.is_error,
                }),
                Err(ToolError::PermissionDenied) => {
                    results.push(ToolResultPart {
                        tool_call_id: call.id.clone(),
                        content: "Permission denied".into(),
                        metadata: None,
                        is_error: true,
                    });
                    for remaining in &calls[i + 1..] {
                        results.push(canceled_result(remaining));
                    }
                    denied = true;
                    break;
                }
                Err(ToolError::Other(e)) => results.push(ToolResultPart {
                    tool_call_id: call.id.clone(),
                    content: format!("error running tool: {e:#}"),
                    metadata: None,
                    is_error: true,
                }),
            }
        }

        let mut tool_msg = Message::new(session_id, Role::Tool);
        for result in results {
            tool_msg.add_tool_result(result);
        }
        self.messages.create_message(tool_msg).await?;

        if canceled {
            assistant.set_finish(FinishReason::Canceled);
            self.messages.update_message(assistant).await?;
            return Err(RunError::Canceled);
        }
        if denied {
            assistant.set_finish(FinishReason::PermissionDenied);
            self.messages.update_message(assistant).await?;
        }
        Ok(denied)
    }

    /// Cancellation landed mid-stream: finish the assistant message with
    /// reason canceled and synthesize canceled results for any tool calls it
    /// already carries.
    async fn finish_canceled(
        &self,
        session_id: &str,
        mut assistant: Message,
    ) -> Result<Message, RunError> {
        assistant.set_finish(FinishReason::Canceled);
        self.messages.update_message(&assistant).await?;
        let calls = assistant.tool_calls();
        if !calls.is_empty() {
            let mut tool_msg = Message::new(session_id, Role::Tool);
            for call in &calls {
                tool_msg.add_tool_result(canceled_result(call));
            }
            self.messages.create_message(tool_msg).await?;
        }
        Err(RunError::Canceled)
    }

    // ── Summarization and compaction ─────────────────────────────────────────

    /// Inline compaction gate.  Fires when the session's token counters reach
    /// the threshold fraction of the model's context window; bounded by the
    /// per-run attempt counter so a summary that fails to shrink the session
    /// cannot loop forever.
    async fn compact_if_needed(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        model: &Model,
        attempts: &mut u32,
    ) -> Result<(), RunError> {
        if !self.auto_compact || model.context_window == 0 {
            return Ok(());
        }
        loop {
            let session = self.sessions.get_session(session_id).await?;
            let used = session.tokens_used() as f64;
            if used < COMPACTION_THRESHOLD * model.context_window as f64 {
                return Ok(());
            }
            if *attempts >= MAX_COMPACTION_ATTEMPTS {
                warn!(
                    session = session_id,
                    "auto-compaction failed to reduce the session below the \
                     threshold; continuing with an oversized history"
                );
                return Ok(());
            }
            *attempts += 1;
            debug!(session = session_id, attempt = *attempts, "auto-compacting session");
            if let Err(e) = self.summarize_session(cancel, session_id).await {
                // Compaction is best-effort: the run continues with the
                // oversized history rather than failing.
                warn!(session = session_id, "auto-compaction failed: {e:#}");
                return Ok(());
            }
        }
    }

    async fn summarize_session(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
    ) -> anyhow::Result<()> {
        let summarizer = self
            .summarizer
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no summarizer configured"))?;

        self.publish_summarize(session_id, "Starting summarization...", false)
            .await;

        let history = self.messages.list_messages(session_id).await?;
        if history.is_empty() {
            anyhow::bail!("no messages to summarize");
        }
        let session = self.sessions.get_session(session_id).await?;
        let truncated = apply_summary_truncation(history, session.summary_message_id.as_deref());

        let model = summarizer.model().clone();
        let mut request = Vec::with_capacity(truncated.len() + 2);
        let mut system = Message::new(session_id, Role::System);
        system.append_text(&prompts::system_prompt(
            AgentRole::Summarizer,
            &model.provider,
        ));
        request.push(system);
        request.extend(truncated);
        request.push(Message::user(session_id, prompts::SUMMARIZE_PROMPT));

        self.publish_summarize(session_id, "Summarizing conversation...", false)
            .await;
        let response = summarizer.send(cancel.clone(), &request, &[]).await?;
        let text = response.content.trim().to_string();
        if text.is_empty() {
            anyhow::bail!("summarizer returned an empty summary");
        }

        let mut summary = Message::assistant(session_id, &model.id);
        summary.append_text(&text);
        summary.add_finish(FinishReason::EndTurn);
        let summary = self.messages.create_message(summary).await?;

        let mut session = self.sessions.get_session(session_id).await?;
        session.cost += completion_cost(&model, &response.usage);
        session.summary_message_id = Some(summary.id.clone());
        session.prompt_tokens = 0;
        session.completion_tokens = response.usage.output_tokens;
        self.sessions.update_session(&session).await?;

        self.publish_summarize(session_id, "Summary complete", true).await;
        Ok(())
    }

    async fn publish_summarize(&self, session_id: &str, progress: &str, done: bool) {
        self.events
            .publish(
                EventKind::Created,
                AgentEvent::Summarize {
                    session_id: session_id.to_string(),
                    progress: progress.to_string(),
                    done,
                },
            )
            .await;
    }

    // ── Accounting and helpers ───────────────────────────────────────────────

    async fn track_usage(
        &self,
        session_id: &str,
        model: &Model,
        usage: TokenUsage,
    ) -> Result<(), StoreError> {
        let mut session = self.sessions.get_session(session_id).await?;
        session.cost += completion_cost(model, &usage);
        session.prompt_tokens = usage.input_tokens + usage.cache_creation_tokens;
        session.completion_tokens = usage.output_tokens + usage.cache_read_tokens;
        self.sessions.update_session(&session).await
    }

    async fn load_history(&self, session_id: &str) -> Result<Vec<Message>, RunError> {
        let session = self.sessions.get_session(session_id).await?;
        let messages = self.messages.list_messages(session_id).await?;
        Ok(apply_summary_truncation(
            messages,
            session.summary_message_id.as_deref(),
        ))
    }

    fn current_provider(&self) -> Arc<dyn ModelProvider> {
        Arc::clone(&self.provider.read().unwrap())
    }

    fn system_message(&self, session_id: &str, model: &Model) -> Message {
        let mut system = Message::new(session_id, Role::System);
        system.append_text(&prompts::system_prompt(self.role, &model.provider));
        system
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .infos()
            .into_iter()
            .map(|info| ToolSchema {
                name: info.name,
                description: info.description,
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": info.parameters,
                    "required": info.required,
                }),
            })
            .collect()
    }

    /// Detached title generation for a session's first message.  Failure is
    /// logged and never fails the run.
    fn spawn_title_generation(&self, session_id: &str, content: &str) {
        let Some(provider) = self.title_provider.read().unwrap().clone() else {
            return;
        };
        let sessions = Arc::clone(&self.sessions);
        let session_id = session_id.to_string();
        let content = content.to_string();
        tokio::spawn(async move {
            let model = provider.model().clone();
            let mut system = Message::new(&session_id, Role::System);
            system.append_text(&prompts::system_prompt(AgentRole::Title, &model.provider));
            let request = vec![
                system,
                Message::user(&session_id, format!("{}\n\n{content}", prompts::TITLE_PROMPT)),
            ];
            let response = match provider
                .send(CancellationToken::new(), &request, &[])
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    debug!(session = %session_id, "title generation failed: {e:#}");
                    return;
                }
            };
            let title = trim_title(&response.content);
            if title.is_empty() {
                return;
            }
            match sessions.get_session(&session_id).await {
                Ok(mut session) => {
                    session.title = title;
                    if let Err(e) = sessions.update_session(&session).await {
                        debug!(session = %session_id, "saving title failed: {e}");
                    }
                }
                Err(e) => debug!(session = %session_id, "loading session for title failed: {e}"),
            }
        });
    }
}

fn summarize_key(session_id: &str) -> String {
    format!("{session_id}-summarize")
}

fn canceled_result(call: &ToolCallPart) -> ToolResultPart {
    ToolResultPart {
        tool_call_id: call.id.clone(),
        content: "Tool execution canceled by user".into(),
        metadata: None,
        is_error: true,
    }
}

/// The per-completion cost formula: cached creation and read tokens are
/// priced at their own per-million rates, the rest at the base rates.
pub fn completion_cost(model: &Model, usage: &TokenUsage) -> f64 {
    model.cost_per_1m_in_cached * usage.cache_creation_tokens as f64 / 1e6
        + model.cost_per_1m_out_cached * usage.cache_read_tokens as f64 / 1e6
        + model.cost_per_1m_in * usage.input_tokens as f64 / 1e6
        + model.cost_per_1m_out * usage.output_tokens as f64 / 1e6
}

/// Summary-aware history truncation: everything up to and including the
/// summary message is replaced by the summary itself, coerced to the user
/// role so the assistant sees it as prior context.
pub fn apply_summary_truncation(
    messages: Vec<Message>,
    summary_message_id: Option<&str>,
) -> Vec<Message> {
    let Some(summary_id) = summary_message_id else {
        return messages;
    };
    let Some(pos) = messages.iter().position(|m| m.id == summary_id) else {
        return messages;
    };
    let mut out = Vec::with_capacity(messages.len() - pos);
    let mut summary = messages[pos].clone();
    summary.role = Role::User;
    // The summary replays as plain user context; strip its finish marker so
    // it reads as an ordinary turn.
    summary.parts.retain(|p| !matches!(p, ContentPart::Finish { .. }));
    out.push(summary);
    out.extend(messages.into_iter().skip(pos + 1));
    out
}

fn trim_title(raw: &str) -> String {
    let line = raw.lines().next().unwrap_or("").trim();
    line.chars().take(TITLE_MAX_CHARS).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
