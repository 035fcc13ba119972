// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::tool::{missing_param, Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "grep".into(),
            description: "Pattern search built on ripgrep (falls back to grep).\n\
                 pattern: full regex (escape literal braces: \\{\\}). include: glob filter (*.rs).\n\
                 case_sensitive: true by default. limit: 100 by default.\n\
                 output_mode: content (default, file:line:col:text) | files_with_matches | count.\n\
                 Use files_with_matches for discovery, then view for details."
                .into(),
            parameters: json!({
                "pattern": {
                    "type": "string",
                    "description": "Regular expression pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search in (default: current directory)"
                },
                "include": {
                    "type": "string",
                    "description": "Glob pattern to filter files, e.g. '*.rs'"
                },
                "case_sensitive": {
                    "type": "boolean",
                    "description": "Case-sensitive search (default true)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of matches to return (default 100)"
                },
                "output_mode": {
                    "type": "string",
                    "enum": ["content", "files_with_matches", "count"],
                    "description": "Output format: content (default), files_with_matches, or count"
                }
            }),
            required: vec!["pattern".into()],
        }
    }

    async fn run(&self, _ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let args = call.args();
        let Some(pattern) = args.get("pattern").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "pattern"));
        };
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let include = args.get("include").and_then(|v| v.as_str());
        let case_sensitive = args
            .get("case_sensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(100) as usize;
        let output_mode = args
            .get("output_mode")
            .and_then(|v| v.as_str())
            .unwrap_or("content");

        debug!(pattern, path, output_mode, "grep tool");

        match run_search(pattern, path, include, case_sensitive, limit, output_mode).await {
            Ok(output) if output.trim().is_empty() => Ok(ToolResponse::ok("(no matches)")),
            Ok(output) => Ok(ToolResponse::ok(output)),
            Err(e) => Ok(ToolResponse::error(format!("grep error: {e}"))),
        }
    }
}

async fn run_search(
    pattern: &str,
    path: &str,
    include: Option<&str>,
    case_sensitive: bool,
    limit: usize,
    output_mode: &str,
) -> anyhow::Result<String> {
    let has_rg = tokio::process::Command::new("which")
        .arg("rg")
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);

    let output = if has_rg {
        let mut args = vec!["--color".to_string(), "never".to_string()];
        match output_mode {
            "files_with_matches" => args.push("-l".to_string()),
            "count" => args.push("-c".to_string()),
            // vimgrep format: unambiguous file:line:col:text output
            _ => {
                args.push("--vimgrep".to_string());
                args.push("--no-heading".to_string());
            }
        }
        if !case_sensitive {
            args.push("--ignore-case".to_string());
        }
        if let Some(glob) = include {
            args.push("-g".to_string());
            args.push(glob.to_string());
        }
        args.push(pattern.to_string());
        args.push(path.to_string());

        tokio::process::Command::new("rg")
            .args(&args)
            .stdin(std::process::Stdio::null())
            .output()
            .await?
    } else {
        let mut args = vec!["-rn".to_string()];
        match output_mode {
            "files_with_matches" => args.push("-l".to_string()),
            "count" => args.push("-c".to_string()),
            _ => {}
        }
        if !case_sensitive {
            args.push("-i".to_string());
        }
        if let Some(glob) = include {
            args.push("--include".to_string());
            args.push(glob.to_string());
        }
        args.push("-E".to_string());
        args.push(pattern.to_string());
        args.push(path.to_string());

        tokio::process::Command::new("grep")
            .args(&args)
            .stdin(std::process::Stdio::null())
            .output()
            .await?
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().take(limit).collect();
    let mut result = lines.join("\n");
    let total_lines = stdout.lines().count();
    if total_lines > limit {
        result.push_str(&format!(
            "\n...[{} more matches not shown — narrow with path= or include= to see all results]",
            total_lines - limit
        ));
    }
    Ok(result)
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
            id: "g1".into(),
            name: "grep".into(),
            input: args.to_string(),
        }
    }

    #[tokio::test]
    async fn finds_pattern_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hay.txt");
        std::fs::write(&path, "needle in here\nnothing\n").unwrap();

        let out = GrepTool
            .run(
                &ctx(),
                &call(json!({"pattern": "needle", "path": path.to_str().unwrap()})),
            )
            .await
            .unwrap();
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("needle"));
    }

    #[tokio::test]
    async fn no_match_returns_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "plain\n").unwrap();
        let out = GrepTool
            .run(
                &ctx(),
                &call(json!({"pattern": "xyzzy_nonexistent", "path": dir.path().to_str().unwrap()})),
            )
            .await
            .unwrap();
        assert!(!out.is_error);
        assert!(out.content.contains("no matches"));
    }

    #[tokio::test]
    async fn case_insensitive_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hay.txt");
        std::fs::write(&path, "Hello World\n").unwrap();

        let out = GrepTool
            .run(
                &ctx(),
                &call(json!({
                    "pattern": "hello",
                    "path": path.to_str().unwrap(),
                    "case_sensitive": false
                })),
            )
            .await
            .unwrap();
        assert!(out.content.contains("Hello"));
    }

    #[tokio::test]
    async fn limit_truncates_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hay.txt");
        let body: String = (0..20).map(|i| format!("match line {i}\n")).collect();
        std::fs::write(&path, body).unwrap();

        let out = GrepTool
            .run(
                &ctx(),
                &call(json!({"pattern": "match", "path": path.to_str().unwrap(), "limit": 3})),
            )
            .await
            .unwrap();
        assert!(out.content.contains("more matches"), "{}", out.content);
    }

    #[tokio::test]
    async fn missing_pattern_is_error() {
        let out = GrepTool.run(&ctx(), &call(json!({}))).await.unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("missing required parameter 'pattern'"));
    }
}
