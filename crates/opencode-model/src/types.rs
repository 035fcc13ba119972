// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use opencode_store::FinishReason;

/// A tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// A tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string.
    pub input: String,
}

/// Token usage reported by the provider for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tokens written into the provider's prompt cache this turn.
    pub cache_creation_tokens: u64,
    /// Tokens served from the provider's prompt cache this turn.
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    /// Merge a partial usage report into this one.  Providers split usage
    /// across stream events (e.g. input counts at stream start, output counts
    /// at the end); non-zero fields win.
    pub fn merge(&mut self, other: TokenUsage) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
        if other.cache_creation_tokens > 0 {
            self.cache_creation_tokens = other.cache_creation_tokens;
        }
        if other.cache_read_tokens > 0 {
            self.cache_read_tokens = other.cache_read_tokens;
        }
    }
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Reasoning text, kept on a separate track from the visible answer.
    ThinkingDelta(String),
    /// A chunk of the visible answer.
    ContentDelta(String),
    /// The model opened a tool call.
    ToolUseStart { id: String, name: String },
    /// A fragment of a tool call's JSON input.
    ToolUseDelta { id: String, input: String },
    /// The tool call's input is complete.
    ToolUseStop { id: String },
    /// The stream finished.  `tool_calls` is the provider's authoritative
    /// final list and replaces anything accumulated incrementally.
    Complete {
        finish_reason: FinishReason,
        tool_calls: Vec<ToolUse>,
        usage: TokenUsage,
    },
    /// A recoverable in-stream error.
    Error(String),
}

/// The collected result of a send-once completion.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<ToolUse>,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_merge_prefers_nonzero_fields() {
        let mut a = TokenUsage {
            input_tokens: 100,
            cache_read_tokens: 5,
            ..Default::default()
        };
        a.merge(TokenUsage {
            output_tokens: 10,
            ..Default::default()
        });
        assert_eq!(a.input_tokens, 100);
        assert_eq!(a.output_tokens, 10);
        assert_eq!(a.cache_read_tokens, 5);
    }

    #[test]
    fn usage_merge_later_nonzero_wins() {
        let mut a = TokenUsage {
            output_tokens: 1,
            ..Default::default()
        };
        a.merge(TokenUsage {
            output_tokens: 42,
            ..Default::default()
        });
        assert_eq!(a.output_tokens, 42);
    }

    #[test]
    fn tool_use_round_trips() {
        let tu = ToolUse {
            id: "t1".into(),
            name: "ls".into(),
            input: r#"{"path":"."}"#.into(),
        };
        let json = serde_json::to_string(&tu).unwrap();
        let back: ToolUse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tu);
    }
}
