// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{missing_param, Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

/// Directories that are never worth listing to the model.
const EXCLUDED: &[&str] = &[".git", "target", "node_modules", "__pycache__"];

pub struct LsTool;

#[async_trait]
impl Tool for LsTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "ls".into(),
            description: "List directory contents. depth: default 2, max 5. limit: 100 entries by default.\n\
                 Excludes .git/ target/ node_modules/ and hidden entries. Directories have a trailing /.\n\
                 For file pattern search use glob; for content search use grep."
                .into(),
            parameters: json!({
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the directory"
                },
                "depth": {
                    "type": "integer",
                    "description": "Maximum recursion depth (default 2, max 5)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of entries to return (default 100)"
                }
            }),
            required: vec!["path".into()],
        }
    }

    async fn run(&self, _ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let args = call.args();
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "path"));
        };
        let depth = args
            .get("depth")
            .and_then(|v| v.as_u64())
            .unwrap_or(2)
            .min(5) as usize;
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(100) as usize;

        debug!(path, depth, limit, "ls tool");

        let meta = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) => return Ok(ToolResponse::error(format!("cannot access {path}: {e}"))),
        };
        if !meta.is_dir() {
            return Ok(ToolResponse::error(format!("{path} is not a directory")));
        }

        let mut entries: Vec<String> = Vec::new();
        let mut omitted = 0usize;
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_excluded(e))
        {
            let Ok(entry) = entry else { continue };
            if entries.len() >= limit {
                omitted += 1;
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(path)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            if entry.file_type().is_dir() {
                entries.push(format!("{rel}/"));
            } else {
                entries.push(rel);
            }
        }

        if entries.is_empty() {
            return Ok(ToolResponse::ok("(empty directory)"));
        }
        let mut content = entries.join("\n");
        if omitted > 0 {
            content.push_str(&format!(
                "\n...[{omitted} more entries — raise limit= or narrow path= to see them]"
            ));
        }
        Ok(ToolResponse::ok(content))
    }
}

fn is_excluded(entry: &walkdir::DirEntry) -> bool {
    // Never filter the walk root itself; only entries below it.
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || EXCLUDED.contains(&name.as_ref())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
