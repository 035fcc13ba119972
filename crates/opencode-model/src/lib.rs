// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod anthropic;
mod catalog;
pub mod mock;
mod openai;
mod openai_compat;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use catalog::{lookup, static_catalog, Model};
pub use openai::OpenAiProvider;
pub use openai_compat::{AuthStyle, OpenAICompatProvider};
pub use provider::{ModelProvider, ProviderEventStream};
pub use types::{ProviderEvent, ProviderResponse, TokenUsage, ToolSchema, ToolUse};
