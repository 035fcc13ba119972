// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Describes a tool to the registry and, via the provider layer, to the model.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// JSON Schema `properties` object for the parameters.
    pub parameters: Value,
    /// Names of required parameters.
    pub required: Vec<String>,
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Raw JSON argument string
    pub input: String,
}

impl ToolCall {
    /// Parse the JSON arguments; a malformed or empty input becomes `{}` so
    /// tools report a specific missing-parameter message instead of a parse
    /// error.
    pub fn args(&self) -> Value {
        serde_json::from_str(&self.input).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// Call context threaded through every tool run.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    pub session_id: String,
    /// Assistant message the call belongs to.
    pub message_id: String,
    pub cancel: CancellationToken,
}

impl ToolCtx {
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            cancel,
        }
    }
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    pub content: String,
    /// Structured detail for UI rendering (diffs, exit codes, match counts).
    pub metadata: Option<Value>,
    /// True when the tool failed non-fatally; the model sees the message and
    /// may recover on the next round.
    pub is_error: bool,
}

impl ToolResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
            is_error: true,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Hard failures a tool run can surface.  Everything recoverable is a
/// [`ToolResponse`] with `is_error` set instead.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The permission broker rejected the call.  The agent loop ends the
    /// turn with a permission-denied finish.
    #[error("permission denied")]
    PermissionDenied,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Trait every built-in, sub-agent, and MCP-adapted tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn info(&self) -> ToolInfo;
    async fn run(&self, ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError>;
}

/// Standard message for a missing required string parameter.
pub(crate) fn missing_param(call: &ToolCall, name: &str) -> ToolResponse {
    ToolResponse::error(format!(
        "missing required parameter '{name}'. Received: {}",
        call.input
    ))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parses_valid_json() {
        let call = ToolCall {
            id: "1".into(),
            name: "t".into(),
            input: r#"{"x": 1}"#.into(),
        };
        assert_eq!(call.args()["x"], 1);
    }

    #[test]
    fn args_falls_back_to_empty_object() {
        let call = ToolCall {
            id: "1".into(),
            name: "t".into(),
            input: "not json".into(),
        };
        assert!(call.args().is_object());
    }

    #[test]
    fn response_constructors_set_error_flag() {
        assert!(!ToolResponse::ok("x").is_error);
        assert!(ToolResponse::error("x").is_error);
    }

    #[test]
    fn with_metadata_attaches_value() {
        let r = ToolResponse::ok("x").with_metadata(serde_json::json!({"exit": 0}));
        assert_eq!(r.metadata.unwrap()["exit"], 0);
    }
}
