// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Integration tests wiring the agent loop to the real built-in tools, the
//! in-memory store, and the permission broker, with a scripted provider in
//! place of the network.

use std::sync::Arc;

use opencode_config::AgentRole;
use opencode_core::{Agent, AgentEvent};
use opencode_model::mock::ScriptedProvider;
use opencode_model::{ProviderEvent, TokenUsage, ToolUse};
use opencode_permission::PermissionService;
use opencode_store::{FinishReason, MemoryStore, MessageStore, Role, SessionStore};
use opencode_tools::{BashTool, FileHistory, GrepTool, ToolRegistry, ViewTool, WriteTool};

fn tool_call_round(id: &str, name: &str, input: String) -> Vec<ProviderEvent> {
    vec![
        ProviderEvent::ToolUseStart {
            id: id.into(),
            name: name.into(),
        },
        ProviderEvent::ToolUseStop { id: id.into() },
        ProviderEvent::Complete {
            finish_reason: FinishReason::ToolUse,
            tool_calls: vec![ToolUse {
                id: id.into(),
                name: name.into(),
                input,
            }],
            usage: TokenUsage::default(),
        },
    ]
}

fn text_round(text: &str) -> Vec<ProviderEvent> {
    vec![
        ProviderEvent::ContentDelta(text.into()),
        ProviderEvent::Complete {
            finish_reason: FinishReason::EndTurn,
            tool_calls: vec![],
            usage: TokenUsage::default(),
        },
    ]
}

async fn run_to_completion(
    agent: &Arc<Agent>,
    session_id: &str,
    prompt: &str,
) -> Vec<AgentEvent> {
    let mut rx = agent.run(session_id, prompt, vec![]).unwrap();
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn agent_reads_a_real_file_through_the_view_tool() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, "remember the milk\n").unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call_round(
            "t1",
            "view",
            format!(r#"{{"path":"{}"}}"#, file.display()),
        ),
        text_round("The file says: remember the milk"),
    ]));

    let mut registry = ToolRegistry::new();
    registry.register(ViewTool);
    registry.register(GrepTool);

    let store = Arc::new(MemoryStore::new());
    let agent = Arc::new(Agent::new(
        AgentRole::Coder,
        provider,
        Arc::new(registry),
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::clone(&store) as Arc<dyn MessageStore>,
    ));
    let session = store.create_session(None).await.unwrap();

    let events = run_to_completion(&agent, &session.id, "what's in notes.txt?").await;
    let AgentEvent::Response { message, done } = &events[0] else {
        panic!("expected response, got {events:?}");
    };
    assert!(*done);
    assert_eq!(message.text(), "The file says: remember the milk");

    let messages = store.list_messages(&session.id).await.unwrap();
    let tool_msg = messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool message");
    let results = tool_msg.tool_results();
    assert!(!results[0].is_error, "{}", results[0].content);
    assert!(results[0].content.contains("remember the milk"));
}

#[cfg(unix)]
#[tokio::test]
async fn agent_executes_a_shell_command_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let permissions = Arc::new(PermissionService::new(dir.path().to_path_buf()));
    let history = Arc::new(FileHistory::new());

    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call_round("t1", "bash", r#"{"command":"echo integration"}"#.into()),
        text_round("done"),
    ]));

    let mut registry = ToolRegistry::new();
    registry.register(BashTool {
        permissions: Arc::clone(&permissions),
        workdir: dir.path().to_path_buf(),
    });
    registry.register(WriteTool {
        permissions: Arc::clone(&permissions),
        history,
    });

    let store = Arc::new(MemoryStore::new());
    let agent = Arc::new(Agent::new(
        AgentRole::Coder,
        provider,
        Arc::new(registry),
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::clone(&store) as Arc<dyn MessageStore>,
    ));
    let session = store.create_session(None).await.unwrap();
    // Headless test: approve everything in this session up front.
    permissions.auto_approve_session(&session.id);

    let events = run_to_completion(&agent, &session.id, "run echo").await;
    assert!(
        matches!(&events[0], AgentEvent::Response { done: true, .. }),
        "{events:?}"
    );

    let messages = store.list_messages(&session.id).await.unwrap();
    let tool_msg = messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool message");
    let results = tool_msg.tool_results();
    assert!(!results[0].is_error, "{}", results[0].content);
    assert!(results[0].content.contains("integration"));

    // The assistant turn's call count matches the tool message's results.
    let assistant = messages
        .iter()
        .find(|m| m.role == Role::Assistant && m.finish_reason() == Some(FinishReason::ToolUse))
        .unwrap();
    assert_eq!(assistant.tool_calls().len(), results.len());
}
