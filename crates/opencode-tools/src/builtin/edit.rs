// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use opencode_permission::{CreatePermissionRequest, PermissionService};

use crate::history::FileHistory;
use crate::tool::{missing_param, Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

pub struct EditTool {
    pub permissions: Arc<PermissionService>,
    pub history: Arc<FileHistory>,
}

#[async_trait]
impl Tool for EditTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "edit".into(),
            description: "Replace an exact string in a file.\n\
                 old_string must match the file contents exactly, including whitespace,\n\
                 and must be unique — add surrounding lines to disambiguate, or set\n\
                 replace_all to change every occurrence.\n\
                 An empty old_string creates a new file with new_string as its contents."
                .into(),
            parameters: json!({
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace (empty to create a new file)"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence instead of requiring uniqueness (default false)"
                }
            }),
            required: vec!["path".into(), "old_string".into(), "new_string".into()],
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let args = call.args();
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "path"));
        };
        let Some(old_string) = args.get("old_string").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "old_string"));
        };
        let Some(new_string) = args.get("new_string").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "new_string"));
        };
        let replace_all = args
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        debug!(path, replace_all, "edit tool");

        // Creation form: empty old_string writes a fresh file.
        let creating = old_string.is_empty();
        let old_content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(_) if creating => String::new(),
            Err(e) => return Ok(ToolResponse::error(format!("read error: {e}"))),
        };
        if creating && !old_content.is_empty() {
            return Ok(ToolResponse::error(format!(
                "{path} already exists; pass the text to replace as old_string"
            )));
        }

        let new_content = if creating {
            new_string.to_string()
        } else {
            let occurrences = old_content.matches(old_string).count();
            if occurrences == 0 {
                return Ok(ToolResponse::error(format!(
                    "old_string not found in {path}. Make sure it matches exactly, \
                     including whitespace and indentation"
                )));
            }
            if occurrences > 1 && !replace_all {
                return Ok(ToolResponse::error(format!(
                    "old_string appears {occurrences} times in {path}. Add surrounding \
                     lines to make it unique, or set replace_all"
                )));
            }
            if replace_all {
                old_content.replace(old_string, new_string)
            } else {
                old_content.replacen(old_string, new_string, 1)
            }
        };

        if new_content == old_content {
            return Ok(ToolResponse::ok(format!("{path} is already up to date")));
        }
        let diff = crate::history::unified_diff(path, &old_content, &new_content);

        let granted = self
            .permissions
            .request(
                &ctx.cancel,
                CreatePermissionRequest {
                    session_id: ctx.session_id.clone(),
                    tool_name: "edit".into(),
                    action: "write".into(),
                    path: path.to_string(),
                    description: format!("Edit {path}"),
                    params: Some(json!({ "diff": diff })),
                },
            )
            .await;
        if !granted {
            return Err(ToolError::PermissionDenied);
        }

        if creating {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
            }
        }
        if let Err(e) = tokio::fs::write(path, &new_content).await {
            return Ok(ToolResponse::error(format!("write error: {e}")));
        }
        self.history.record(path, &old_content, &new_content);

        Ok(ToolResponse::ok(format!("edited {path}")).with_metadata(json!({ "diff": diff })))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
