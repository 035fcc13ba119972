// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{missing_param, Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

const DEFAULT_LIMIT: usize = 100;

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "glob".into(),
            description: "Find files by name pattern. Supports * (within a path segment),\n\
                 ** (across segments), and ? (single character), e.g. 'src/**/*.rs' or '*.toml'.\n\
                 Results are relative to path (default: current directory), newest first.\n\
                 For content search use grep; for directory structure use ls."
                .into(),
            parameters: json!({
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to match file paths against"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (default: current directory)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of matches to return (default 100)"
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
        let root = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LIMIT as u64) as usize;

        debug!(pattern, root, "glob tool");

        let Some(re) = glob_to_regex(pattern) else {
            return Ok(ToolResponse::error(format!("invalid glob pattern: {pattern}")));
        };

        // Matches collected with mtime so the newest files list first.
        let mut matches: Vec<(std::time::SystemTime, String)> = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !is_hidden_or_excluded(e))
        {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            if re.is_match(&rel) {
                let mtime = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                matches.push((mtime, rel));
            }
        }
        matches.sort_by(|a, b| b.0.cmp(&a.0));

        if matches.is_empty() {
            return Ok(ToolResponse::ok("(no matches)"));
        }
        let total = matches.len();
        let shown: Vec<String> = matches.into_iter().take(limit).map(|(_, p)| p).collect();
        let mut content = shown.join("\n");
        if total > limit {
            content.push_str(&format!(
                "\n...[{} more matches — narrow the pattern to see all]",
                total - limit
            ));
        }
        Ok(ToolResponse::ok(content).with_metadata(json!({ "matches": total })))
    }
}

fn is_hidden_or_excluded(entry: &walkdir::DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name == "target" || name == "node_modules"
}

/// Convert a glob to an anchored [`Regex`].  `**` crosses path separators,
/// `*` stays within a segment, `?` matches one character.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Swallow a following '/' so "**/*.rs" also matches
                    // top-level files.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
