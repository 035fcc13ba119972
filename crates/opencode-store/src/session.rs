// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Set when this session was created by the sub-agent tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    pub title: String,
    /// Cumulative USD cost across every completion in this session.
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Assistant message whose content stands in for all prior history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(parent_session_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            parent_session_id,
            title: String::new(),
            cost: 0.0,
            prompt_tokens: 0,
            completion_tokens: 0,
            summary_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Total tokens currently attributed to the context window.
    pub fn tokens_used(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sessions_have_unique_ids() {
        assert_ne!(Session::new(None).id, Session::new(None).id);
    }

    #[test]
    fn new_session_starts_zeroed() {
        let s = Session::new(None);
        assert_eq!(s.cost, 0.0);
        assert_eq!(s.tokens_used(), 0);
        assert!(s.title.is_empty());
        assert!(s.summary_message_id.is_none());
    }

    #[test]
    fn parent_session_id_is_preserved() {
        let parent = Session::new(None);
        let child = Session::new(Some(parent.id.clone()));
        assert_eq!(child.parent_session_id.as_deref(), Some(parent.id.as_str()));
    }

    #[test]
    fn tokens_used_sums_both_counters() {
        let mut s = Session::new(None);
        s.prompt_tokens = 700;
        s.completion_tokens = 300;
        assert_eq!(s.tokens_used(), 1000);
    }
}
