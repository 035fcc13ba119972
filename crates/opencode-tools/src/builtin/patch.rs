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

pub struct PatchTool {
    pub permissions: Arc<PermissionService>,
    pub history: Arc<FileHistory>,
}

#[async_trait]
impl Tool for PatchTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "patch".into(),
            description: "Apply a unified diff to one file.\n\
                 Accepts standard '@@ -N,M +N,M @@' hunk headers (line numbers are hints)\n\
                 and headerless '@@ @@' hunks located by their context lines.\n\
                 Context and deletion lines must match the file exactly.\n\
                 For a single textual replacement prefer edit."
                .into(),
            parameters: json!({
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "patch": {
                    "type": "string",
                    "description": "Unified diff to apply"
                }
            }),
            required: vec!["path".into(), "patch".into()],
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let args = call.args();
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "path"));
        };
        let Some(patch) = args.get("patch").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "patch"));
        };

        debug!(path, "patch tool");

        let old_content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolResponse::error(format!("read error: {e}"))),
        };

        let new_content = match apply_patch(&old_content, patch) {
            Ok(c) => c,
            Err(e) => return Ok(ToolResponse::error(format!("patch error: {e}"))),
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
                    tool_name: "patch".into(),
                    action: "write".into(),
                    path: path.to_string(),
                    description: format!("Patch {path}"),
                    params: Some(json!({ "diff": diff })),
                },
            )
            .await;
        if !granted {
            return Err(ToolError::PermissionDenied);
        }

        if let Err(e) = tokio::fs::write(path, &new_content).await {
            return Ok(ToolResponse::error(format!("write error: {e}")));
        }
        self.history.record(path, &old_content, &new_content);

        Ok(ToolResponse::ok(format!("patched {path}")).with_metadata(json!({ "diff": diff })))
    }
}

// ── Hunk parsing and application ──────────────────────────────────────────────

#[derive(Debug, Clone)]
enum HunkLine {
    /// Unchanged line — must exist in the file, kept verbatim.
    Context(String),
    /// Line to remove from the file.
    Del(String),
    /// Line to insert into the file.
    Add(String),
}

#[derive(Debug, Clone)]
struct Hunk {
    /// 1-based old-file start from `@@ -N,...` — an ambiguity-breaking hint,
    /// never the primary locator.
    old_start_hint: Option<usize>,
    lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines that must already be present in the file (Context + Del), in order.
    fn search_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Del(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }
}

fn parse_hunks(patch: &str) -> Result<Vec<Hunk>, String> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in patch.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with("\\ ") {
            continue;
        }
        if line.starts_with("@@") {
            if let Some(h) = current.take() {
                if !h.lines.is_empty() {
                    hunks.push(h);
                }
            }
            current = Some(Hunk {
                old_start_hint: parse_old_start(line),
                lines: Vec::new(),
            });
            continue;
        }
        if let Some(ref mut h) = current {
            if let Some(rest) = line.strip_prefix(' ') {
                h.lines.push(HunkLine::Context(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('-') {
                h.lines.push(HunkLine::Del(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('+') {
                h.lines.push(HunkLine::Add(rest.to_string()));
            } else if line.is_empty() {
                // A blank diff line with no prefix = context empty line.
                h.lines.push(HunkLine::Context(String::new()));
            }
        }
    }
    if let Some(h) = current {
        if !h.lines.is_empty() {
            hunks.push(h);
        }
    }
    if hunks.is_empty() {
        return Err("no hunks found in patch; use @@ headers".to_string());
    }
    Ok(hunks)
}

/// Extract the 1-based old-file start line from `@@ -N[,M] +N[,M] @@`.
fn parse_old_start(header: &str) -> Option<usize> {
    let inner = header
        .trim_start_matches('@')
        .trim()
        .split("@@")
        .next()
        .unwrap_or("")
        .trim();
    for part in inner.split_whitespace() {
        if let Some(rest) = part.strip_prefix('-') {
            if let Ok(n) = rest.split(',').next().unwrap_or(rest).parse::<usize>() {
                return Some(n);
            }
        }
    }
    None
}

/// Locate `search_lines` in `file_lines`; the hint breaks ties when the
/// context appears more than once.
fn find_hunk_position(
    file_lines: &[&str],
    search_lines: &[&str],
    hint: Option<usize>,
) -> Result<usize, String> {
    // Pure insertion — nothing to locate, append at the hint or the end.
    if search_lines.is_empty() {
        return Ok(hint
            .map(|h| h.saturating_sub(1).min(file_lines.len()))
            .unwrap_or(file_lines.len()));
    }
    let n = search_lines.len();
    if file_lines.len() < n {
        return Err(format!(
            "file has {} lines but hunk needs {} context/deletion lines",
            file_lines.len(),
            n
        ));
    }
    let matches: Vec<usize> = (0..=(file_lines.len() - n))
        .filter(|&i| file_lines[i..i + n] == *search_lines)
        .collect();
    match matches.len() {
        0 => Err("hunk context not found in file".to_string()),
        1 => Ok(matches[0]),
        _ => {
            let target = hint.unwrap_or(1).saturating_sub(1);
            Ok(*matches
                .iter()
                .min_by_key(|&&p| p.abs_diff(target))
                .unwrap_or(&matches[0]))
        }
    }
}

fn apply_patch(content: &str, patch: &str) -> Result<String, String> {
    let hunks = parse_hunks(patch)?;
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    for (i, hunk) in hunks.iter().enumerate() {
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let search = hunk.search_lines();
        let pos = find_hunk_position(&refs, &search, hunk.old_start_hint)
            .map_err(|e| format!("hunk {}: {e}", i + 1))?;

        let mut replacement: Vec<String> = Vec::new();
        for line in &hunk.lines {
            match line {
                HunkLine::Context(s) => replacement.push(s.clone()),
                HunkLine::Add(s) => replacement.push(s.clone()),
                HunkLine::Del(_) => {}
            }
        }
        lines.splice(pos..pos + search.len(), replacement);
    }

    let mut out = lines.join("\n");
    if content.ends_with('\n') && !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
