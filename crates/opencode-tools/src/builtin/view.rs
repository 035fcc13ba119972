// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::tool::{missing_param, Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

/// Default number of lines returned when the caller does not specify a limit.
/// Kept small to avoid flooding the model context on the first read; the
/// agent can paginate with offset + limit to get more.
const DEFAULT_LINE_LIMIT: usize = 250;

/// Hard byte ceiling applied in addition to the line limit.  Whichever
/// constraint is hit first determines where the output is cut.
const MAX_BYTES: usize = 50_000;

pub struct ViewTool;

#[async_trait]
impl Tool for ViewTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "view".into(),
            description: "Read a file slice. Default: 250 lines / 50 KB — whichever comes first.\n\
                 Lines are formatted as L{n}:content (1-indexed).\n\
                 When more lines exist, a pagination notice shows the next offset.\n\
                 Strategy: grep for the relevant region first, then view only those lines\n\
                 with offset+limit rather than reading whole large files."
                .into(),
            parameters: json!({
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 250)"
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
        let offset = args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        debug!(path, offset, limit, "view tool");

        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) => return Ok(ToolResponse::error(format!("read error: {e}"))),
        };
        if bytes.contains(&0) {
            return Ok(ToolResponse::error(format!(
                "{path} is a binary file ({} bytes)",
                bytes.len()
            )));
        }

        let text = String::from_utf8_lossy(&bytes);
        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();
        let start = offset.saturating_sub(1);

        // Collect lines up to both the line limit and the byte cap.
        let mut selected: Vec<String> = Vec::new();
        let mut byte_count = 0usize;
        let mut truncated_by_bytes = false;
        for (i, line) in all_lines.iter().enumerate().skip(start).take(limit) {
            let line_bytes = line.len() + 1;
            if byte_count + line_bytes > MAX_BYTES {
                truncated_by_bytes = true;
                break;
            }
            selected.push(format!("L{}:{}", i + 1, line));
            byte_count += line_bytes;
        }

        let last_shown = start + selected.len();
        let mut content = selected.join("\n");
        if last_shown < total {
            let reason = if truncated_by_bytes {
                format!("byte limit ({MAX_BYTES} B) reached")
            } else {
                format!("{} more lines", total - last_shown)
            };
            content.push_str(&format!(
                "\n...[{reason} — showing L{}-L{} of {total}; use offset={} to continue]",
                offset,
                offset + selected.len().saturating_sub(1),
                last_shown + 1
            ));
        }

        Ok(ToolResponse::ok(content).with_metadata(json!({
            "path": path,
            "total_lines": total,
        })))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn ctx() -> ToolCtx {
        ToolCtx::new("s", "m", CancellationToken::new())
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "v1".into(),
            name: "view".into(),
            input: args.to_string(),
        }
    }

    #[tokio::test]
    async fn reads_whole_small_file_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "alpha\nbeta\n").unwrap();

        let out = ViewTool
            .run(&ctx(), &call(json!({"path": path.to_str().unwrap()})))
            .await
            .unwrap();
        assert!(!out.is_error);
        assert!(out.content.contains("L1:alpha"));
        assert!(out.content.contains("L2:beta"));
    }

    #[tokio::test]
    async fn offset_and_limit_slice_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let body: String = (1..=10).map(|i| format!("line{i}\n")).collect();
        std::fs::write(&path, body).unwrap();

        let out = ViewTool
            .run(
                &ctx(),
                &call(json!({"path": path.to_str().unwrap(), "offset": 4, "limit": 2})),
            )
            .await
            .unwrap();
        assert!(out.content.contains("L4:line4"));
        assert!(out.content.contains("L5:line5"));
        assert!(!out.content.contains("L6:line6"));
        assert!(out.content.contains("use offset=6"), "{}", out.content);
    }

    #[tokio::test]
    async fn missing_file_is_error_response() {
        let out = ViewTool
            .run(&ctx(), &call(json!({"path": "/no/such/file.txt"})))
            .await
            .unwrap();
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn missing_path_parameter_is_error() {
        let out = ViewTool.run(&ctx(), &call(json!({}))).await.unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("missing required parameter 'path'"));
    }

    #[tokio::test]
    async fn binary_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin");
        std::fs::write(&path, [0u8, 159, 146, 150]).unwrap();
        let out = ViewTool
            .run(&ctx(), &call(json!({"path": path.to_str().unwrap()})))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("binary"));
    }
}
