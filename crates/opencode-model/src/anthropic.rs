// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
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

pub struct AnthropicProvider {
    model: Model,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    /// Request the extended-thinking track.  Only honoured when the catalog
    /// says the model can reason.
    should_think: bool,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        model: Model,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        should_think: bool,
    ) -> Self {
        let max_tokens = max_tokens.unwrap_or(model.default_max_tokens);
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            max_tokens,
            should_think,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for AnthropicProvider {
    fn model(&self) -> &Model {
        &self.model
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ProviderEventStream> {
        let key = self
            .api_key
            .as_deref()
            .context("ANTHROPIC_API_KEY not set")?;

        let (system_text, wire_messages) = build_anthropic_messages(messages);

        let mut body = json!({
            "model": self.model.api_model,
            "messages": wire_messages,
            "max_tokens": self.max_tokens,
            "stream": true,
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }
        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        if self.should_think && self.model.can_reason {
            // Thinking budget: half the output allowance, floor 1024 per the
            // API minimum.
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": (self.max_tokens / 2).max(1024),
            });
        }

        debug!(model = %self.model.api_model, "sending anthropic request");

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("Anthropic request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Anthropic error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        // SSE lines can be split across TCP chunks, so we carry a remainder
        // buffer forward.  Only complete lines (terminated by '\n') are
        // parsed; anything left over is prepended to the next chunk.
        let event_stream = byte_stream
            .scan(SseState::default(), |state, chunk| {
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
                    if let Some(data) = line.strip_prefix("data: ") {
                        if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                            match parse_anthropic_event(state, &v) {
                                Ok(evs) => events.extend(evs.into_iter().map(Ok)),
                                Err(e) => events.push(Err(e)),
                            }
                        }
                    }
                }
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter)
            .take_until(cancel.cancelled_owned());

        Ok(Box::pin(event_stream))
    }
}

/// Parse state carried across SSE events of one completion.
struct SseState {
    buf: String,
    /// content_block index → tool-use id, for input_json_delta routing.
    block_tools: HashMap<u64, String>,
    tool_calls: Vec<ToolUse>,
    usage: TokenUsage,
    stop_reason: FinishReason,
}

impl Default for SseState {
    fn default() -> Self {
        Self {
            buf: String::new(),
            block_tools: HashMap::new(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            stop_reason: FinishReason::EndTurn,
        }
    }
}

fn parse_anthropic_event(state: &mut SseState, v: &Value) -> anyhow::Result<Vec<ProviderEvent>> {
    let event_type = v["type"].as_str().unwrap_or("");
    match event_type {
        "message_start" => {
            if let Some(usage) = v["message"].get("usage") {
                state.usage.merge(TokenUsage {
                    input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
                    output_tokens: 0,
                    // Anthropic reports these only in message_start.
                    cache_creation_tokens: usage["cache_creation_input_tokens"]
                        .as_u64()
                        .unwrap_or(0),
                    cache_read_tokens: usage["cache_read_input_tokens"].as_u64().unwrap_or(0),
                });
            }
            Ok(vec![])
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0);
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                let id = block["id"].as_str().unwrap_or("").to_string();
                let name = block["name"].as_str().unwrap_or("").to_string();
                state.block_tools.insert(index, id.clone());
                state.tool_calls.push(ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: String::new(),
                });
                return Ok(vec![ProviderEvent::ToolUseStart { id, name }]);
            }
            Ok(vec![])
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0);
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or("").to_string();
                    if text.is_empty() {
                        return Ok(vec![]);
                    }
                    Ok(vec![ProviderEvent::ContentDelta(text)])
                }
                // Extended thinking streams the chain-of-thought as its own
                // delta type, separate from the answer text.
                "thinking_delta" => {
                    let thinking = delta["thinking"].as_str().unwrap_or("").to_string();
                    if thinking.is_empty() {
                        return Ok(vec![]);
                    }
                    Ok(vec![ProviderEvent::ThinkingDelta(thinking)])
                }
                "input_json_delta" => {
                    let partial = delta["partial_json"].as_str().unwrap_or("").to_string();
                    let Some(id) = state.block_tools.get(&index).cloned() else {
                        return Ok(vec![]);
                    };
                    if let Some(tc) = state.tool_calls.iter_mut().find(|t| t.id == id) {
                        tc.input.push_str(&partial);
                    }
                    Ok(vec![ProviderEvent::ToolUseDelta { id, input: partial }])
                }
                // The signature blob at the end of a thinking block is not
                // human-readable; never surface it.
                _ => Ok(vec![]),
            }
        }
        "content_block_stop" => {
            let index = v["index"].as_u64().unwrap_or(0);
            if let Some(id) = state.block_tools.get(&index).cloned() {
                return Ok(vec![ProviderEvent::ToolUseStop { id }]);
            }
            Ok(vec![])
        }
        "message_delta" => {
            if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                state.stop_reason = match reason {
                    "tool_use" => FinishReason::ToolUse,
                    "max_tokens" => FinishReason::MaxTokens,
                    _ => FinishReason::EndTurn,
                };
            }
            if let Some(usage) = v.get("usage") {
                state.usage.merge(TokenUsage {
                    output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
                    ..Default::default()
                });
            }
            Ok(vec![])
        }
        "message_stop" => Ok(vec![ProviderEvent::Complete {
            finish_reason: state.stop_reason,
            tool_calls: std::mem::take(&mut state.tool_calls),
            usage: state.usage,
        }]),
        "error" => {
            let msg = v["error"]["message"].as_str().unwrap_or("unknown error");
            bail!("Anthropic stream error: {msg}")
        }
        _ => Ok(vec![]),
    }
}

/// Convert a slice of [`Message`]s into the Anthropic wire format.
///
/// Returns `(system_text, conversation_messages)`.  System messages are
/// separated out because Anthropic expects them as a top-level `system`
/// field, not as conversation turns.
fn build_anthropic_messages(messages: &[Message]) -> (String, Vec<Value>) {
    let mut system_text = String::new();
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        if m.role == Role::System {
            if !system_text.is_empty() {
                system_text.push_str("\n\n");
            }
            system_text.push_str(&m.text());
            continue;
        }
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            // Tool results travel as user-role tool_result blocks.
            Role::Tool => "user",
            Role::System => unreachable!(),
        };

        let mut blocks: Vec<Value> = Vec::new();
        for part in &m.parts {
            match part {
                ContentPart::Text { text } if !text.is_empty() => {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
                ContentPart::Binary(b) if b.mime_type.starts_with("image/") => {
                    let data = base64::engine::general_purpose::STANDARD.encode(&b.data);
                    blocks.push(json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": b.mime_type,
                            "data": data,
                        }
                    }));
                }
                ContentPart::ToolCall(tc) => {
                    let input: Value =
                        serde_json::from_str(&tc.input).unwrap_or_else(|_| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": input,
                    }));
                }
                ContentPart::ToolResult(tr) => {
                    blocks.push(json!({
                        "type": "tool_result",
                        "tool_use_id": tr.tool_call_id,
                        "content": tr.content,
                        "is_error": tr.is_error,
                    }));
                }
                // Reasoning is not replayed: thinking blocks require the
                // provider's signature to round-trip, and the answer text
                // already carries the conversation forward.
                _ => {}
            }
        }
        if blocks.is_empty() {
            continue;
        }
        out.push(json!({ "role": role, "content": blocks }));
    }
    (system_text, out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use opencode_store::{Message, ToolResultPart};

    fn state() -> SseState {
        SseState::default()
    }

    #[test]
    fn text_delta_maps_to_content_delta() {
        let mut s = state();
        let v = json!({"type":"content_block_delta","index":0,
                       "delta":{"type":"text_delta","text":"Hello"}});
        let evs = parse_anthropic_event(&mut s, &v).unwrap();
        assert!(matches!(&evs[0], ProviderEvent::ContentDelta(t) if t == "Hello"));
    }

    #[test]
    fn thinking_delta_maps_to_thinking() {
        let mut s = state();
        let v = json!({"type":"content_block_delta","index":0,
                       "delta":{"type":"thinking_delta","thinking":"hmm"}});
        let evs = parse_anthropic_event(&mut s, &v).unwrap();
        assert!(matches!(&evs[0], ProviderEvent::ThinkingDelta(t) if t == "hmm"));
    }

    #[test]
    fn tool_use_block_start_emits_start_and_tracks_index() {
        let mut s = state();
        let v = json!({"type":"content_block_start","index":1,
                       "content_block":{"type":"tool_use","id":"tu_1","name":"ls"}});
        let evs = parse_anthropic_event(&mut s, &v).unwrap();
        assert!(
            matches!(&evs[0], ProviderEvent::ToolUseStart { id, name } if id == "tu_1" && name == "ls")
        );

        // Input deltas for that index are routed to the same id.
        let v = json!({"type":"content_block_delta","index":1,
                       "delta":{"type":"input_json_delta","partial_json":"{\"path\""}});
        let evs = parse_anthropic_event(&mut s, &v).unwrap();
        assert!(matches!(&evs[0], ProviderEvent::ToolUseDelta { id, .. } if id == "tu_1"));

        let v = json!({"type":"content_block_stop","index":1});
        let evs = parse_anthropic_event(&mut s, &v).unwrap();
        assert!(matches!(&evs[0], ProviderEvent::ToolUseStop { id } if id == "tu_1"));
    }

    #[test]
    fn message_stop_emits_complete_with_accumulated_state() {
        let mut s = state();
        parse_anthropic_event(
            &mut s,
            &json!({"type":"message_start","message":{"usage":{
                "input_tokens":100,"cache_read_input_tokens":20,"cache_creation_input_tokens":5}}}),
        )
        .unwrap();
        parse_anthropic_event(
            &mut s,
            &json!({"type":"content_block_start","index":0,
                    "content_block":{"type":"tool_use","id":"t1","name":"grep"}}),
        )
        .unwrap();
        parse_anthropic_event(
            &mut s,
            &json!({"type":"content_block_delta","index":0,
                    "delta":{"type":"input_json_delta","partial_json":"{}"}}),
        )
        .unwrap();
        parse_anthropic_event(
            &mut s,
            &json!({"type":"message_delta","delta":{"stop_reason":"tool_use"},
                    "usage":{"output_tokens":7}}),
        )
        .unwrap();
        let evs =
            parse_anthropic_event(&mut s, &json!({"type":"message_stop"})).unwrap();
        match &evs[0] {
            ProviderEvent::Complete {
                finish_reason,
                tool_calls,
                usage,
            } => {
                assert_eq!(*finish_reason, FinishReason::ToolUse);
                assert_eq!(tool_calls.len(), 1);
                assert_eq!(tool_calls[0].input, "{}");
                assert_eq!(usage.input_tokens, 100);
                assert_eq!(usage.output_tokens, 7);
                assert_eq!(usage.cache_read_tokens, 20);
                assert_eq!(usage.cache_creation_tokens, 5);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn error_event_fails_the_stream() {
        let mut s = state();
        let v = json!({"type":"error","error":{"type":"overloaded_error","message":"overloaded"}});
        assert!(parse_anthropic_event(&mut s, &v).is_err());
    }

    #[test]
    fn wire_format_separates_system_text() {
        let mut sys = Message::new("s", Role::System);
        sys.append_text("You are a coding agent.");
        let user = Message::user("s", "hello");
        let (system, msgs) = build_anthropic_messages(&[sys, user]);
        assert_eq!(system, "You are a coding agent.");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
    }

    #[test]
    fn wire_format_maps_tool_results_to_user_role() {
        let mut tool = Message::new("s", Role::Tool);
        tool.add_tool_result(ToolResultPart {
            tool_call_id: "t1".into(),
            content: "output".into(),
            metadata: None,
            is_error: false,
        });
        let (_, msgs) = build_anthropic_messages(&[tool]);
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(msgs[0]["content"][0]["type"], "tool_result");
        assert_eq!(msgs[0]["content"][0]["tool_use_id"], "t1");
    }

    #[test]
    fn wire_format_parses_tool_call_input_to_object() {
        let mut m = Message::assistant("s", "claude-4-sonnet");
        m.add_tool_call("t1", "ls");
        m.append_tool_call_input("t1", r#"{"path":"."}"#);
        let (_, msgs) = build_anthropic_messages(&[m]);
        assert_eq!(msgs[0]["content"][0]["input"]["path"], ".");
    }

    #[test]
    fn wire_format_skips_empty_messages() {
        let empty = Message::new("s", Role::Assistant);
        let (_, msgs) = build_anthropic_messages(&[empty]);
        assert!(msgs.is_empty());
    }
}
