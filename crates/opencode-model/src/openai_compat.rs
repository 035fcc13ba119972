// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Shared chat-completions driver.
//!
//! OpenAI, Groq, OpenRouter, Azure, Gemini (via Google's OpenAI-compatible
//! surface) and local endpoints all speak the same wire format; they differ
//! only in base URL, auth header style, and a handful of extra body fields.

use std::collections::HashMap;

use anyhow::{bail, Context};
use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use opencode_store::{ContentPart, FinishReason, Message, Role};

use crate::{
    catalog::Model,
    provider::ProviderEventStream,
    types::{ProviderEvent, TokenUsage, ToolSchema, ToolUse},
};

/// How the API key travels on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` — OpenAI, Groq, OpenRouter, Gemini.
    Bearer,
    /// `api-key: <key>` — Azure OpenAI.
    ApiKeyHeader,
    /// No auth — local endpoints.
    None,
}

pub struct OpenAICompatProvider {
    model: Model,
    api_key: Option<String>,
    base_url: String,
    /// Appended to the chat-completions path; Azure uses it for the
    /// `api-version` query parameter.
    url_suffix: String,
    max_tokens: u32,
    /// OpenAI reasoning effort ("low" | "medium" | "high"); sent only for
    /// models the catalog marks as reasoning-capable.
    reasoning_effort: Option<String>,
    auth_style: AuthStyle,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Model,
        api_key: Option<String>,
        base_url: impl Into<String>,
        url_suffix: impl Into<String>,
        max_tokens: Option<u32>,
        reasoning_effort: Option<String>,
        auth_style: AuthStyle,
    ) -> Self {
        let max_tokens = max_tokens.unwrap_or(model.default_max_tokens);
        Self {
            model,
            api_key,
            base_url: base_url.into(),
            url_suffix: url_suffix.into(),
            max_tokens,
            reasoning_effort,
            auth_style,
            client: reqwest::Client::new(),
        }
    }

    pub fn openai(
        model: Model,
        api_key: Option<String>,
        max_tokens: Option<u32>,
        reasoning_effort: Option<String>,
    ) -> Self {
        Self::new(
            model,
            api_key,
            "https://api.openai.com/v1",
            "",
            max_tokens,
            reasoning_effort,
            AuthStyle::Bearer,
        )
    }

    pub fn groq(model: Model, api_key: Option<String>, max_tokens: Option<u32>) -> Self {
        Self::new(
            model,
            api_key,
            "https://api.groq.com/openai/v1",
            "",
            max_tokens,
            None,
            AuthStyle::Bearer,
        )
    }

    pub fn openrouter(
        model: Model,
        api_key: Option<String>,
        max_tokens: Option<u32>,
        reasoning_effort: Option<String>,
    ) -> Self {
        Self::new(
            model,
            api_key,
            "https://openrouter.ai/api/v1",
            "",
            max_tokens,
            reasoning_effort,
            AuthStyle::Bearer,
        )
    }

    /// Google's OpenAI-compatible surface; serves both gemini and vertexai
    /// catalog entries.
    pub fn gemini(model: Model, api_key: Option<String>, max_tokens: Option<u32>) -> Self {
        Self::new(
            model,
            api_key,
            "https://generativelanguage.googleapis.com/v1beta/openai",
            "",
            max_tokens,
            None,
            AuthStyle::Bearer,
        )
    }

    /// Azure OpenAI: `{endpoint}/openai/deployments/{deployment}` with an
    /// `api-version` query parameter and `api-key` header auth.
    pub fn azure(
        model: Model,
        api_key: Option<String>,
        endpoint: &str,
        max_tokens: Option<u32>,
    ) -> Self {
        let deployment = model.api_model.clone();
        Self::new(
            model,
            api_key,
            format!("{}/openai/deployments/{}", endpoint.trim_end_matches('/'), deployment),
            "?api-version=2024-06-01",
            max_tokens,
            None,
            AuthStyle::ApiKeyHeader,
        )
    }

    /// Local OpenAI-compatible endpoint (llama.cpp, ollama, LM Studio).
    pub fn local(model: Model, endpoint: &str, max_tokens: Option<u32>) -> Self {
        Self::new(
            model,
            None,
            endpoint.trim_end_matches('/'),
            "",
            max_tokens,
            None,
            AuthStyle::None,
        )
    }

    fn build_body(&self, messages: &[Message], tools: &[ToolSchema]) -> Value {
        let mut body = json!({
            "model": self.model.api_model,
            "messages": build_chat_messages(messages, self.model.supports_attachments),
            "max_tokens": self.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        if self.model.can_reason {
            if let Some(effort) = &self.reasoning_effort {
                body["reasoning_effort"] = json!(effort);
            }
        }
        body
    }
}

#[async_trait]
impl crate::ModelProvider for OpenAICompatProvider {
    fn model(&self) -> &Model {
        &self.model
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ProviderEventStream> {
        let body = self.build_body(messages, tools);
        let url = format!("{}/chat/completions{}", self.base_url, self.url_suffix);
        debug!(model = %self.model.api_model, url = %url, "sending chat-completions request");

        let mut request = self.client.post(&url);
        match self.auth_style {
            AuthStyle::Bearer => {
                let key = self
                    .api_key
                    .as_deref()
                    .with_context(|| format!("{} API key not set", self.model.provider))?;
                request = request.bearer_auth(key);
            }
            AuthStyle::ApiKeyHeader => {
                let key = self
                    .api_key
                    .as_deref()
                    .with_context(|| format!("{} API key not set", self.model.provider))?;
                request = request.header("api-key", key);
            }
            AuthStyle::None => {}
        }

        let resp = request
            .json(&body)
            .send()
            .await
            .context("chat-completions request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("{} error {status}: {text}", self.model.provider);
        }

        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream
            .scan(ChatState::default(), |state, chunk| {
                let text = match chunk {
                    Ok(b) => String::from_utf8_lossy(&b).to_string(),
                    Err(e) => {
                        return futures::future::ready(Some(vec![Err(anyhow::anyhow!(e))]));
                    }
                };
                state.buf.push_str(&text);
                let mut events = Vec::new();
                while let Some(pos) = state.buf.find('\n') {
                    let line = state.buf[..pos].trim_end_matches('\r').to_string();
                    state.buf.drain(..=pos);
                    events.extend(parse_chat_line(state, &line).into_iter());
                }
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter)
            .take_until(cancel.cancelled_owned());

        Ok(Box::pin(event_stream))
    }
}

/// Parse state carried across SSE chunks of one completion.
struct ChatState {
    buf: String,
    /// Provider tool-call index → accumulated call, in first-seen order.
    tool_calls: Vec<ToolUse>,
    index_ids: HashMap<u64, String>,
    usage: TokenUsage,
    finish: FinishReason,
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            buf: String::new(),
            tool_calls: Vec::new(),
            index_ids: HashMap::new(),
            usage: TokenUsage::default(),
            finish: FinishReason::EndTurn,
        }
    }
}

fn parse_chat_line(state: &mut ChatState, line: &str) -> Vec<anyhow::Result<ProviderEvent>> {
    let Some(data) = line.strip_prefix("data: ") else {
        return vec![];
    };
    let data = data.trim();
    if data == "[DONE]" {
        return vec![Ok(ProviderEvent::Complete {
            finish_reason: state.finish,
            tool_calls: std::mem::take(&mut state.tool_calls),
            usage: state.usage,
        })];
    }
    let Ok(v) = serde_json::from_str::<Value>(data) else {
        return vec![];
    };

    let mut events: Vec<anyhow::Result<ProviderEvent>> = Vec::new();

    // Usage-only chunk (stream_options.include_usage puts it after the last
    // choice chunk).  prompt_tokens includes cached tokens; split them out so
    // cost accounting can price the cached share separately.
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let prompt = usage["prompt_tokens"].as_u64().unwrap_or(0);
        let cached = usage["prompt_tokens_details"]["cached_tokens"]
            .as_u64()
            .unwrap_or(0);
        state.usage.merge(TokenUsage {
            input_tokens: prompt.saturating_sub(cached),
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            cache_creation_tokens: 0,
            cache_read_tokens: cached,
        });
    }

    let Some(choice) = v["choices"].get(0) else {
        return events;
    };
    let delta = &choice["delta"];

    // Reasoning track: llama.cpp/Qwen/DeepSeek emit `reasoning_content`,
    // a few proxies emit `reasoning`.
    let thinking = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(t) = thinking {
        if !t.is_empty() {
            events.push(Ok(ProviderEvent::ThinkingDelta(t.to_string())));
        }
    }

    if let Some(content) = delta["content"].as_str() {
        if !content.is_empty() {
            events.push(Ok(ProviderEvent::ContentDelta(content.to_string())));
        }
    }

    if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tool_calls {
            let index = tc["index"].as_u64().unwrap_or(0);
            let id_fragment = tc["id"].as_str().unwrap_or("");
            let name_fragment = tc["function"]["name"].as_str().unwrap_or("");
            let args_fragment = tc["function"]["arguments"].as_str().unwrap_or("");

            if !id_fragment.is_empty() && !state.index_ids.contains_key(&index) {
                state.index_ids.insert(index, id_fragment.to_string());
                state.tool_calls.push(ToolUse {
                    id: id_fragment.to_string(),
                    name: name_fragment.to_string(),
                    input: String::new(),
                });
                events.push(Ok(ProviderEvent::ToolUseStart {
                    id: id_fragment.to_string(),
                    name: name_fragment.to_string(),
                }));
            }
            let Some(id) = state.index_ids.get(&index).cloned() else {
                continue;
            };
            if let Some(call) = state.tool_calls.iter_mut().find(|c| c.id == id) {
                if call.name.is_empty() && !name_fragment.is_empty() {
                    call.name = name_fragment.to_string();
                }
                if !args_fragment.is_empty() {
                    call.input.push_str(args_fragment);
                    events.push(Ok(ProviderEvent::ToolUseDelta {
                        id: id.clone(),
                        input: args_fragment.to_string(),
                    }));
                }
            }
        }
    }

    if let Some(reason) = choice["finish_reason"].as_str() {
        state.finish = match reason {
            "tool_calls" => FinishReason::ToolUse,
            "length" => FinishReason::MaxTokens,
            _ => FinishReason::EndTurn,
        };
        // The call list is final once a finish reason arrives.
        for call in &state.tool_calls {
            events.push(Ok(ProviderEvent::ToolUseStop {
                id: call.id.clone(),
            }));
        }
    }

    events
}

/// Convert store messages into the chat-completions wire format.
fn build_chat_messages(messages: &[Message], attachments: bool) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for m in messages {
        match m.role {
            Role::System => {
                out.push(json!({ "role": "system", "content": m.text() }));
            }
            Role::User => {
                let binaries = m.binary_parts();
                if attachments && binaries.iter().any(|b| b.mime_type.starts_with("image/")) {
                    let mut parts: Vec<Value> = Vec::new();
                    let text = m.text();
                    if !text.is_empty() {
                        parts.push(json!({ "type": "text", "text": text }));
                    }
                    for b in binaries {
                        if !b.mime_type.starts_with("image/") {
                            continue;
                        }
                        let data = base64::engine::general_purpose::STANDARD.encode(&b.data);
                        parts.push(json!({
                            "type": "image_url",
                            "image_url": { "url": format!("data:{};base64,{}", b.mime_type, data) }
                        }));
                    }
                    out.push(json!({ "role": "user", "content": parts }));
                } else {
                    out.push(json!({ "role": "user", "content": m.text() }));
                }
            }
            Role::Assistant => {
                let calls = m.tool_calls();
                let text = m.text();
                if calls.is_empty() {
                    if text.is_empty() {
                        continue;
                    }
                    out.push(json!({ "role": "assistant", "content": text }));
                } else {
                    let tool_calls: Vec<Value> = calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": if c.input.is_empty() { "{}" } else { c.input.as_str() },
                                }
                            })
                        })
                        .collect();
                    let mut msg = json!({ "role": "assistant", "tool_calls": tool_calls });
                    if !text.is_empty() {
                        msg["content"] = json!(text);
                    }
                    out.push(msg);
                }
            }
            Role::Tool => {
                // One wire message per tool result.
                for tr in m.tool_results() {
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": tr.tool_call_id,
                        "content": tr.content,
                    }));
                }
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
