// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use opencode_permission::{CreatePermissionRequest, PermissionService};
use opencode_shell::{get_persistent_shell, ShellError};

use crate::tool::{missing_param, Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

/// Default per-command timeout (1 minute).
const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Hard byte ceiling for combined stdout + stderr returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 30_000;

pub struct BashTool {
    pub permissions: Arc<PermissionService>,
    /// Working directory for the persistent shell on first use.
    pub workdir: PathBuf,
}

#[async_trait]
impl Tool for BashTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "bash".into(),
            description: "Execute a shell command in a persistent shell session.\n\
                 Working directory and environment variables persist between calls:\n\
                 'cd', 'export' and virtualenv activation carry over to later commands.\n\
                 Output is capped; pipe large outputs through tail/grep to keep what matters.\n\
                 Prefer dedicated tools for file work: view to read, grep to search,\n\
                 glob to find files, edit to modify."
                .into(),
            parameters: json!({
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Command timeout in milliseconds (default 60000; 0 disables)"
                }
            }),
            required: vec!["command".into()],
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let args = call.args();
        let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "command"));
        };
        let timeout_ms = args
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        debug!(command, timeout_ms, "bash tool");

        let granted = self
            .permissions
            .request(
                &ctx.cancel,
                CreatePermissionRequest {
                    session_id: ctx.session_id.clone(),
                    tool_name: "bash".into(),
                    action: "execute".into(),
                    path: self.workdir.to_string_lossy().into_owned(),
                    description: format!("Execute `{command}`"),
                    params: Some(json!({ "command": command })),
                },
            )
            .await;
        if !granted {
            return Err(ToolError::PermissionDenied);
        }

        let shell = match get_persistent_shell(&self.workdir) {
            Ok(s) => s,
            Err(e) => return Ok(ToolResponse::error(format!("shell error: {e}"))),
        };
        let result = match shell.exec(&ctx.cancel, command, timeout_ms).await {
            Ok(r) => r,
            Err(ShellError::NotAlive) => {
                return Ok(ToolResponse::error(
                    "shell is not alive; it will be restarted on the next command",
                ))
            }
            Err(e) => return Ok(ToolResponse::error(format!("shell error: {e}"))),
        };

        let mut content = String::new();
        if !result.stdout.is_empty() {
            content.push_str(&truncate_output(&result.stdout));
        }
        if !result.stderr.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("[stderr]\n");
            content.push_str(&truncate_output(&result.stderr));
        }
        if result.interrupted {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("[command interrupted]");
        }
        if content.is_empty() {
            content = format!("[exit {}]", result.exit_code);
        }

        let metadata = json!({
            "exit_code": result.exit_code,
            "interrupted": result.interrupted,
        });
        if result.exit_code == 0 || result.interrupted {
            Ok(ToolResponse::ok(content).with_metadata(metadata))
        } else {
            Ok(ToolResponse::error(format!("[exit {}]\n{content}", result.exit_code))
                .with_metadata(metadata))
        }
    }
}

/// Keep the head and tail of oversized output with an omission marker, so
/// both the command preamble and the trailing errors survive truncation.
fn truncate_output(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }
    let half = OUTPUT_LIMIT_BYTES / 2;
    let mut head_end = half;
    while !s.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = s.len() - half;
    while !s.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    format!(
        "{}\n...[{} bytes omitted]...\n{}",
        &s[..head_end],
        tail_start - head_end,
        &s[tail_start..]
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn tool(dir: &std::path::Path) -> BashTool {
        let permissions = Arc::new(PermissionService::new(dir.to_path_buf()));
        permissions.auto_approve_session("s");
        BashTool {
            permissions,
            workdir: dir.to_path_buf(),
        }
    }

    fn ctx() -> ToolCtx {
        ToolCtx::new("s", "m", CancellationToken::new())
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "b1".into(),
            name: "bash".into(),
            input: args.to_string(),
        }
    }

    #[tokio::test]
    async fn executes_command_and_returns_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(dir.path())
            .run(&ctx(), &call(json!({"command": "echo hello"})))
            .await
            .unwrap();
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("hello"));
        assert_eq!(out.metadata.unwrap()["exit_code"], 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_code() {
        let dir = tempfile::tempdir().unwrap();
        // A bare `exit` would terminate the persistent shell itself; run it
        // in a subshell so only the command fails.
        let out = tool(dir.path())
            .run(&ctx(), &call(json!({"command": "sh -c 'exit 7'"})))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("[exit 7]"));
    }

    #[tokio::test]
    async fn missing_command_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(dir.path())
            .run(&ctx(), &call(json!({})))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("missing required parameter 'command'"));
    }

    #[tokio::test]
    async fn denied_permission_is_the_sentinel_error() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = Arc::new(PermissionService::new(dir.path().to_path_buf()));
        let t = BashTool {
            permissions: Arc::clone(&permissions),
            workdir: dir.path().to_path_buf(),
        };

        let mut events = permissions.events().subscribe().await;
        let task = tokio::spawn(async move {
            t.run(&ctx(), &call(json!({"command": "echo nope"}))).await
        });
        let ev = events.recv().await.unwrap();
        assert_eq!(ev.payload.action, "execute");
        permissions.deny(&ev.payload);
        assert!(matches!(task.await.unwrap(), Err(ToolError::PermissionDenied)));
    }

    #[test]
    fn truncate_keeps_head_and_tail() {
        let body = format!("HEAD{}TAIL", "x".repeat(OUTPUT_LIMIT_BYTES * 2));
        let out = truncate_output(&body);
        assert!(out.starts_with("HEAD"));
        assert!(out.ends_with("TAIL"));
        assert!(out.contains("omitted"));
    }
}
