// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use opencode_store::Message;

/// Events emitted by the agent, on a run's channel and on the agent's
/// broker.  Consumers (UI, headless runner) subscribe to drive their output;
/// fine-grained streaming progress travels separately as message-store
/// change events.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// An assistant response.  `done` marks the terminal event of a run.
    Response { message: Message, done: bool },
    /// The run failed or was cancelled.
    Error { error: String },
    /// Summarization progress for a session.
    Summarize {
        session_id: String,
        progress: String,
        done: bool,
    },
}
