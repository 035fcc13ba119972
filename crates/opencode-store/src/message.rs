// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Why an assistant message stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Canceled,
    PermissionDenied,
    Error,
}

/// An attachment carried on a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryPart {
    pub mime_type: String,
    /// Origin path the user attached, when there is one.
    pub path: Option<String>,
    pub data: Vec<u8>,
}

/// A tool invocation requested by the model, as persisted on the assistant
/// message.  `finished` flips to true exactly once, when the provider signals
/// the end of that call's input stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, accumulated from input deltas.
    pub input: String,
    #[serde(default)]
    pub finished: bool,
}

/// The outcome of one tool call, persisted on a tool-role message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// One element of a message body.
///
/// Tagged variant, never an inheritance hierarchy: every consumer pattern
/// matches on the kind it understands and skips the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// The model's reasoning track, kept separate from the visible text.
    Reasoning { thinking: String },
    Binary(BinaryPart),
    ToolCall(ToolCallPart),
    ToolResult(ToolResultPart),
    Finish {
        reason: FinishReason,
        time: DateTime<Utc>,
    },
}

/// A single message in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    /// Model id that produced this message.  Assistant messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn new(session_id: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            model: None,
            created_at: Utc::now(),
            parts: Vec::new(),
        }
    }

    pub fn user(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut m = Self::new(session_id, Role::User);
        m.parts.push(ContentPart::Text { text: text.into() });
        m
    }

    pub fn assistant(session_id: impl Into<String>, model: impl Into<String>) -> Self {
        let mut m = Self::new(session_id, Role::Assistant);
        m.model = Some(model.into());
        m
    }

    /// Append a streamed text delta, extending the trailing Text part when
    /// there is one so the message holds a single coherent text block.
    pub fn append_text(&mut self, delta: &str) {
        if let Some(ContentPart::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
            return;
        }
        self.parts.push(ContentPart::Text {
            text: delta.to_string(),
        });
    }

    /// Append a reasoning delta to the message's Reasoning part.
    pub fn append_reasoning(&mut self, delta: &str) {
        for part in self.parts.iter_mut() {
            if let ContentPart::Reasoning { thinking } = part {
                thinking.push_str(delta);
                return;
            }
        }
        self.parts.push(ContentPart::Reasoning {
            thinking: delta.to_string(),
        });
    }

    pub fn add_binary(&mut self, part: BinaryPart) {
        self.parts.push(ContentPart::Binary(part));
    }

    pub fn add_tool_call(&mut self, id: impl Into<String>, name: impl Into<String>) {
        self.parts.push(ContentPart::ToolCall(ToolCallPart {
            id: id.into(),
            name: name.into(),
            input: String::new(),
            finished: false,
        }));
    }

    /// Append an input delta to the named in-flight tool call.
    pub fn append_tool_call_input(&mut self, id: &str, delta: &str) {
        for part in self.parts.iter_mut() {
            if let ContentPart::ToolCall(tc) = part {
                if tc.id == id {
                    tc.input.push_str(delta);
                    return;
                }
            }
        }
    }

    /// Mark the tool call `id` finished.  Returns false when no such call
    /// exists or it was already finished.
    pub fn finish_tool_call(&mut self, id: &str) -> bool {
        for part in self.parts.iter_mut() {
            if let ContentPart::ToolCall(tc) = part {
                if tc.id == id && !tc.finished {
                    tc.finished = true;
                    return true;
                }
            }
        }
        false
    }

    /// Replace the tool-call list with the provider's authoritative copy from
    /// its completion event.
    ///
    /// Ids already streamed keep their accumulated input when the
    /// authoritative copy arrives with an empty input for that id — guards
    /// against providers that re-emit the call list without arguments.
    pub fn set_tool_calls(&mut self, calls: Vec<ToolCallPart>) {
        let streamed: Vec<ToolCallPart> = self.tool_calls();
        self.parts.retain(|p| !matches!(p, ContentPart::ToolCall(_)));
        for mut call in calls {
            if call.input.is_empty() {
                if let Some(prev) = streamed.iter().find(|s| s.id == call.id) {
                    call.input = prev.input.clone();
                }
            }
            call.finished = true;
            self.parts.push(ContentPart::ToolCall(call));
        }
    }

    pub fn add_tool_result(&mut self, result: ToolResultPart) {
        self.parts.push(ContentPart::ToolResult(result));
    }

    /// Finish the message.  A message is finished iff its last part is a
    /// Finish; adding one to an already finished message is a no-op.
    pub fn add_finish(&mut self, reason: FinishReason) {
        if self.is_finished() {
            return;
        }
        self.parts.push(ContentPart::Finish {
            reason,
            time: Utc::now(),
        });
    }

    /// Set the finish reason, replacing an existing Finish part in place.
    /// Used when a turn's outcome is reclassified (tool-use → canceled or
    /// permission-denied) after the provider already finished the message.
    pub fn set_finish(&mut self, reason: FinishReason) {
        if let Some(ContentPart::Finish { reason: r, time }) = self.parts.last_mut() {
            *r = reason;
            *time = Utc::now();
            return;
        }
        self.add_finish(reason);
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.parts.last(), Some(ContentPart::Finish { .. }))
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        match self.parts.last() {
            Some(ContentPart::Finish { reason, .. }) => Some(*reason),
            _ => None,
        }
    }

    /// Concatenated visible text of this message.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }

    /// The message's reasoning track, if the model produced one.
    pub fn reasoning(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            ContentPart::Reasoning { thinking } => Some(thinking.as_str()),
            _ => None,
        })
    }

    pub fn tool_calls(&self) -> Vec<ToolCallPart> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall(tc) => Some(tc.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_results(&self) -> Vec<ToolResultPart> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult(tr) => Some(tr.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn binary_parts(&self) -> Vec<&BinaryPart> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Binary(b) => Some(b),
                _ => None,
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_messages_have_unique_ids() {
        let a = Message::new("s", Role::User);
        let b = Message::new("s", Role::User);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn append_text_extends_trailing_text_part() {
        let mut m = Message::assistant("s", "m");
        m.append_text("Hello");
        m.append_text(", world");
        assert_eq!(m.text(), "Hello, world");
        assert_eq!(m.parts.len(), 1);
    }

    #[test]
    fn append_text_after_tool_call_starts_new_part() {
        let mut m = Message::assistant("s", "m");
        m.append_text("before");
        m.add_tool_call("t1", "ls");
        m.append_text("after");
        assert_eq!(m.text(), "beforeafter");
        assert_eq!(m.parts.len(), 3);
    }

    #[test]
    fn reasoning_is_separate_from_text() {
        let mut m = Message::assistant("s", "m");
        m.append_reasoning("thinking...");
        m.append_text("answer");
        assert_eq!(m.text(), "answer");
        assert_eq!(m.reasoning(), Some("thinking..."));
    }

    #[test]
    fn unfinished_message_has_no_finish_reason() {
        let mut m = Message::assistant("s", "m");
        m.append_text("streaming");
        assert!(!m.is_finished());
        assert_eq!(m.finish_reason(), None);
    }

    #[test]
    fn finish_is_terminal_and_idempotent() {
        let mut m = Message::assistant("s", "m");
        m.add_finish(FinishReason::EndTurn);
        m.add_finish(FinishReason::Error);
        assert!(m.is_finished());
        assert_eq!(m.finish_reason(), Some(FinishReason::EndTurn));
        assert_eq!(m.parts.len(), 1);
    }

    #[test]
    fn set_finish_replaces_existing_reason() {
        let mut m = Message::assistant("s", "m");
        m.add_finish(FinishReason::ToolUse);
        m.set_finish(FinishReason::Canceled);
        assert_eq!(m.finish_reason(), Some(FinishReason::Canceled));
        assert_eq!(m.parts.len(), 1);
    }

    #[test]
    fn finish_tool_call_transitions_exactly_once() {
        let mut m = Message::assistant("s", "m");
        m.add_tool_call("t1", "grep");
        assert!(m.finish_tool_call("t1"));
        assert!(!m.finish_tool_call("t1"), "second transition must be rejected");
        assert!(!m.finish_tool_call("t2"), "unknown id must be rejected");
        assert!(m.tool_calls()[0].finished);
    }

    #[test]
    fn tool_call_input_accumulates_deltas() {
        let mut m = Message::assistant("s", "m");
        m.add_tool_call("t1", "ls");
        m.append_tool_call_input("t1", r#"{"path""#);
        m.append_tool_call_input("t1", r#":"."}"#);
        assert_eq!(m.tool_calls()[0].input, r#"{"path":"."}"#);
    }

    #[test]
    fn set_tool_calls_replaces_streamed_list() {
        let mut m = Message::assistant("s", "m");
        m.add_tool_call("t1", "ls");
        m.append_tool_call_input("t1", r#"{"path":"."}"#);
        m.set_tool_calls(vec![ToolCallPart {
            id: "t1".into(),
            name: "ls".into(),
            input: r#"{"path":"/tmp"}"#.into(),
            finished: false,
        }]);
        let calls = m.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, r#"{"path":"/tmp"}"#);
        assert!(calls[0].finished);
    }

    #[test]
    fn set_tool_calls_keeps_streamed_input_on_empty_reemission() {
        let mut m = Message::assistant("s", "m");
        m.add_tool_call("t1", "ls");
        m.append_tool_call_input("t1", r#"{"path":"."}"#);
        m.set_tool_calls(vec![ToolCallPart {
            id: "t1".into(),
            name: "ls".into(),
            input: String::new(),
            finished: false,
        }]);
        assert_eq!(m.tool_calls()[0].input, r#"{"path":"."}"#);
    }

    #[test]
    fn content_part_serializes_with_type_tag() {
        let part = ContentPart::Text {
            text: "hi".into(),
        };
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains(r#""type":"text""#), "{json}");

        let part = ContentPart::ToolCall(ToolCallPart {
            id: "t".into(),
            name: "ls".into(),
            input: "{}".into(),
            finished: true,
        });
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains(r#""type":"tool_call""#), "{json}");
        let back: ContentPart = serde_json::from_str(&json).unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn message_round_trips_through_json() {
        let mut m = Message::user("s1", "hello");
        m.add_binary(BinaryPart {
            mime_type: "image/png".into(),
            path: Some("/tmp/a.png".into()),
            data: vec![1, 2, 3],
        });
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text(), "hello");
        assert_eq!(back.binary_parts().len(), 1);
        assert_eq!(back.role, Role::User);
    }
}
