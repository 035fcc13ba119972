// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use opencode_permission::PermissionService;
use opencode_store::SessionStore;
use opencode_tools::{Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

use crate::agent::Agent;
use crate::events::AgentEvent;

/// The sub-agent tool: delegates one self-contained task to a fresh agent in
/// a child session and returns its final answer.
pub struct TaskTool {
    /// Task-role agent with the reduced (read-only) tool set.
    pub agent: Arc<Agent>,
    pub sessions: Arc<dyn SessionStore>,
    pub permissions: Arc<PermissionService>,
}

#[async_trait]
impl Tool for TaskTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "agent".into(),
            description: "Delegate a self-contained task to a sub-agent with read-only tools\n\
                 (search, read, fetch). Good for broad searches and summaries that would\n\
                 flood this conversation's context. The sub-agent sees only the prompt you\n\
                 pass — include everything it needs, and tell it exactly what to return."
                .into(),
            parameters: json!({
                "prompt": {
                    "type": "string",
                    "description": "The complete task for the sub-agent"
                }
            }),
            required: vec!["prompt".into()],
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let args = call.args();
        let Some(prompt) = args.get("prompt").and_then(|v| v.as_str()) else {
            return Ok(ToolResponse::error(format!(
                "missing required parameter 'prompt'. Received: {}",
                call.input
            )));
        };

        let child = match self
            .sessions
            .create_session(Some(ctx.session_id.clone()))
            .await
        {
            Ok(s) => s,
            Err(e) => return Ok(ToolResponse::error(format!("creating task session: {e}"))),
        };
        debug!(parent = %ctx.session_id, child = %child.id, "starting sub-agent task");

        // Sub-agents never prompt the user; their whole tool set is
        // auto-approved for the child session.
        self.permissions.auto_approve_agent(&child.id);

        let mut rx = match self.agent.run(&child.id, prompt, vec![]) {
            Ok(rx) => rx,
            Err(e) => return Ok(ToolResponse::error(format!("starting sub-agent: {e}"))),
        };

        let message = loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(AgentEvent::Response { message, done: true }) => break message,
                    Some(AgentEvent::Error { error }) => {
                        return Ok(ToolResponse::error(format!("sub-agent failed: {error}")));
                    }
                    Some(_) => continue,
                    None => {
                        return Ok(ToolResponse::error("sub-agent ended without a response"));
                    }
                },
                _ = ctx.cancel.cancelled() => {
                    self.agent.cancel(&child.id);
                    return Ok(ToolResponse::error("sub-agent canceled"));
                }
            }
        };

        // Accrue the child's spend into the parent session.
        let child_cost = match self.sessions.get_session(&child.id).await {
            Ok(s) => s.cost,
            Err(_) => 0.0,
        };
        if child_cost > 0.0 {
            if let Ok(mut parent) = self.sessions.get_session(&ctx.session_id).await {
                parent.cost += child_cost;
                let _ = self.sessions.update_session(&parent).await;
            }
        }

        Ok(ToolResponse::ok(message.text()).with_metadata(json!({
            "session_id": child.id,
            "cost": child_cost,
        })))
    }
}
