// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

use opencode_store::{FinishReason, Message};

use crate::{
    catalog::Model,
    provider::{ModelProvider, ProviderEventStream},
    types::{ProviderEvent, TokenUsage, ToolSchema, ToolUse},
};

/// A model descriptor for tests: zero-cost, small window, no reasoning.
pub fn test_model() -> Model {
    Model {
        id: "mock".into(),
        name: "Mock model".into(),
        provider: "mock".into(),
        api_model: "mock".into(),
        context_window: 0,
        default_max_tokens: 4096,
        cost_per_1m_in: 0.0,
        cost_per_1m_out: 0.0,
        cost_per_1m_in_cached: 0.0,
        cost_per_1m_out_cached: 0.0,
        can_reason: false,
        supports_attachments: false,
    }
}

/// A pre-scripted provider.  Each call to `stream` pops the next response
/// script from the front of the queue.  This lets tests specify exact event
/// sequences — including tool calls and usage reports — without network
/// access.
pub struct ScriptedProvider {
    model: Model,
    scripts: Arc<Mutex<Vec<Vec<ProviderEvent>>>>,
    /// Every request seen by this provider, oldest first.  Tests inspect
    /// this to assert on the history the agent actually sent.
    pub requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptedProvider {
    /// Build a provider from a list of response scripts.  The outer `Vec` is
    /// the ordered list of calls; the inner `Vec` is the event sequence for
    /// that call.
    pub fn new(scripts: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            model: test_model(),
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Override the model descriptor (context window, cost rates,
    /// attachment support).
    pub fn with_model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    /// Convenience: provider that always returns a single text reply with
    /// the given usage.
    pub fn always_text(reply: impl Into<String>, usage: TokenUsage) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            ProviderEvent::ContentDelta(r),
            ProviderEvent::Complete {
                finish_reason: FinishReason::EndTurn,
                tool_calls: vec![],
                usage,
            },
        ]])
    }

    /// Convenience: script for one tool-call round followed by a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        let (id, name, args) = (tool_id.into(), tool_name.into(), args_json.into());
        Self::new(vec![
            vec![
                ProviderEvent::ToolUseStart {
                    id: id.clone(),
                    name: name.clone(),
                },
                ProviderEvent::ToolUseDelta {
                    id: id.clone(),
                    input: args.clone(),
                },
                ProviderEvent::ToolUseStop { id: id.clone() },
                ProviderEvent::Complete {
                    finish_reason: FinishReason::ToolUse,
                    tool_calls: vec![ToolUse {
                        id,
                        name,
                        input: args,
                    }],
                    usage: TokenUsage::default(),
                },
            ],
            vec![
                ProviderEvent::ContentDelta(final_text.into()),
                ProviderEvent::Complete {
                    finish_reason: FinishReason::EndTurn,
                    tool_calls: vec![],
                    usage: TokenUsage::default(),
                },
            ],
        ])
    }

    /// Number of completions served so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The message history of request `i`.
    pub fn request(&self, i: usize) -> Vec<Message> {
        self.requests.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn model(&self) -> &Model {
        &self.model
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        messages: &[Message],
        _tools: &[ToolSchema],
    ) -> anyhow::Result<ProviderEventStream> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Fallback when all scripts are consumed.
                vec![
                    ProviderEvent::ContentDelta("[no more scripts]".into()),
                    ProviderEvent::Complete {
                        finish_reason: FinishReason::EndTurn,
                        tool_calls: vec![],
                        usage: TokenUsage::default(),
                    },
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<ProviderEvent>> = events.into_iter().map(Ok).collect();
        use futures::StreamExt;
        Ok(Box::pin(
            stream::iter(wrapped).take_until(cancel.cancelled_owned()),
        ))
    }
}

/// A provider whose stream yields events only when the test releases them.
/// Used to exercise cancellation mid-stream.
pub struct PausedProvider {
    model: Model,
    rx: Arc<tokio::sync::Mutex<tokio::sync::mpsc::Receiver<ProviderEvent>>>,
}

impl PausedProvider {
    pub fn new() -> (Self, tokio::sync::mpsc::Sender<ProviderEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        (
            Self {
                model: test_model(),
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl ModelProvider for PausedProvider {
    fn model(&self) -> &Model {
        &self.model
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        _messages: &[Message],
        _tools: &[ToolSchema],
    ) -> anyhow::Result<ProviderEventStream> {
        let rx = Arc::clone(&self.rx);
        let s = futures::stream::unfold(rx, |rx| async move {
            let event = rx.lock().await.recv().await;
            event.map(|e| (Ok(e), rx))
        });
        use futures::StreamExt;
        Ok(Box::pin(s.take_until(cancel.cancelled_owned())))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
