// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use opencode_store::{FinishReason, Message};

use crate::{
    catalog::Model,
    types::{ProviderEvent, ProviderResponse, TokenUsage, ToolSchema},
};

pub type ProviderEventStream = Pin<Box<dyn Stream<Item = anyhow::Result<ProviderEvent>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Descriptor of the model this provider drives.
    fn model(&self) -> &Model;

    /// Open a streaming completion.  The stream ends after the `Complete`
    /// event, or early when `cancel` fires.
    async fn stream(
        &self,
        cancel: CancellationToken,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ProviderEventStream>;

    /// Send-once completion: drives [`stream`] to the end and collects the
    /// result.  A stream that ends without a `Complete` event (cancellation)
    /// reports `FinishReason::Canceled`.
    async fn send(
        &self,
        cancel: CancellationToken,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ProviderResponse> {
        let mut stream = self.stream(cancel, messages, tools).await?;
        let mut content = String::new();
        let mut response = ProviderResponse {
            content: String::new(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Canceled,
            usage: TokenUsage::default(),
        };
        while let Some(event) = stream.next().await {
            match event? {
                ProviderEvent::ContentDelta(delta) => content.push_str(&delta),
                ProviderEvent::Complete {
                    finish_reason,
                    tool_calls,
                    usage,
                } => {
                    response.finish_reason = finish_reason;
                    response.tool_calls = tool_calls;
                    response.usage = usage;
                }
                ProviderEvent::Error(e) => anyhow::bail!("provider error: {e}"),
                _ => {}
            }
        }
        response.content = content;
        Ok(response)
    }

    /// Whether binary attachment parts may be sent to this model.
    fn supports_attachments(&self) -> bool {
        self.model().supports_attachments
    }
}
