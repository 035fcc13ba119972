// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use opencode_permission::{CreatePermissionRequest, PermissionService};

use crate::history::FileHistory;
use crate::tool::{missing_param, Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

pub struct WriteTool {
    pub permissions: Arc<PermissionService>,
    pub history: Arc<FileHistory>,
}

#[async_trait]
impl Tool for WriteTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "write".into(),
            description: "Write a file to the local filesystem, overwriting any existing file.\n\
                 ALWAYS prefer editing existing files with edit; never write new files unless\n\
                 explicitly required. Creates parent directories automatically."
                .into(),
            parameters: json!({
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            }),
            required: vec!["path".into(), "content".into()],
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let args = call.args();
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "path"));
        };
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "content"));
        };

        debug!(path, bytes = content.len(), "write tool");

        let old_content = tokio::fs::read_to_string(path).await.unwrap_or_default();
        if old_content == content {
            return Ok(ToolResponse::ok(format!("{path} is already up to date")));
        }
        let diff = crate::history::unified_diff(path, &old_content, content);

        let granted = self
            .permissions
            .request(
                &ctx.cancel,
                CreatePermissionRequest {
                    session_id: ctx.session_id.clone(),
                    tool_name: "write".into(),
                    action: "write".into(),
                    path: path.to_string(),
                    description: format!("Write {path}"),
                    params: Some(json!({ "diff": diff })),
                },
            )
            .await;
        if !granted {
            return Err(ToolError::PermissionDenied);
        }

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }
        if let Err(e) = tokio::fs::write(path, content).await {
            return Ok(ToolResponse::error(format!("write error: {e}")));
        }
        self.history.record(path, &old_content, content);

        Ok(
            ToolResponse::ok(format!("wrote {} bytes to {path}", content.len()))
                .with_metadata(json!({ "diff": diff })),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn tool() -> WriteTool {
        let permissions = Arc::new(PermissionService::new(std::env::temp_dir()));
        permissions.auto_approve_session("s");
        WriteTool {
            permissions,
            history: Arc::new(FileHistory::new()),
        }
    }

    fn ctx() -> ToolCtx {
        ToolCtx::new("s", "m", CancellationToken::new())
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "w1".into(),
            name: "write".into(),
            input: args.to_string(),
        }
    }

    #[tokio::test]
    async fn write_creates_file_and_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let t = tool();
        let out = t
            .run(
                &ctx(),
                &call(json!({"path": path.to_str().unwrap(), "content": "hello write"})),
            )
            .await
            .unwrap();
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello write");
        assert_eq!(t.history.len(), 1);
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/file.txt");
        let out = tool()
            .run(
                &ctx(),
                &call(json!({"path": path.to_str().unwrap(), "content": "nested"})),
            )
            .await
            .unwrap();
        assert!(!out.is_error, "{}", out.content);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn identical_content_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("same.txt");
        std::fs::write(&path, "same").unwrap();
        let t = tool();
        let out = t
            .run(
                &ctx(),
                &call(json!({"path": path.to_str().unwrap(), "content": "same"})),
            )
            .await
            .unwrap();
        assert!(out.content.contains("up to date"));
        assert!(t.history.is_empty());
    }

    #[tokio::test]
    async fn denied_permission_is_the_sentinel_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no.txt");
        let permissions = Arc::new(PermissionService::new(std::env::temp_dir()));
        let t = WriteTool {
            permissions: Arc::clone(&permissions),
            history: Arc::new(FileHistory::new()),
        };

        let mut events = permissions.events().subscribe().await;
        let task = {
            let path = path.to_str().unwrap().to_string();
            tokio::spawn(async move {
                t.run(&ctx(), &call(json!({"path": path, "content": "x"}))).await
            })
        };
        let ev = events.recv().await.unwrap();
        permissions.deny(&ev.payload);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ToolError::PermissionDenied)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_content_is_error() {
        let out = tool()
            .run(&ctx(), &call(json!({"path": "/tmp/x.txt"})))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("missing required parameter 'content'"));
    }
}
