// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI driver — thin wrapper around the shared [`OpenAICompatProvider`].
//!
//! Kept as a named type so that the public `opencode_model::OpenAiProvider`
//! export remains stable.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use opencode_store::Message;

use crate::{
    catalog::Model,
    openai_compat::OpenAICompatProvider,
    provider::{ModelProvider, ProviderEventStream},
    types::ToolSchema,
};

/// OpenAI chat-completions driver.
pub struct OpenAiProvider {
    inner: OpenAICompatProvider,
}

impl OpenAiProvider {
    pub fn new(
        model: Model,
        api_key: Option<String>,
        max_tokens: Option<u32>,
        reasoning_effort: Option<String>,
    ) -> Self {
        Self {
            inner: OpenAICompatProvider::openai(model, api_key, max_tokens, reasoning_effort),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn model(&self) -> &Model {
        self.inner.model()
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ProviderEventStream> {
        self.inner.stream(cancel, messages, tools).await
    }
}
