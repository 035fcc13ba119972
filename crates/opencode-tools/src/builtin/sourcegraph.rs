// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{missing_param, Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

const ENDPOINT: &str = "https://sourcegraph.com/.api/graphql";
const DEFAULT_LIMIT: u64 = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const SEARCH_QUERY: &str = r#"
query Search($query: String!) {
  search(query: $query, version: V3, patternType: literal) {
    results {
      matchCount
      results {
        __typename
        ... on FileMatch {
          repository { name }
          file { path }
          lineMatches { preview lineNumber }
        }
      }
    }
  }
}"#;

/// Public-code search against the Sourcegraph GraphQL API.  Read-only.
pub struct SourcegraphTool;

#[async_trait]
impl Tool for SourcegraphTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "sourcegraph".into(),
            description: "Search public code across repositories via Sourcegraph.\n\
                 query uses Sourcegraph syntax, e.g. 'repo:^github\\.com/rust-lang/rust$ spawn'\n\
                 or 'lang:rust tokio::select'. Results list repo, file, line and a preview.\n\
                 For code in the local workspace use grep instead."
                .into(),
            parameters: json!({
                "query": {
                    "type": "string",
                    "description": "Sourcegraph search query"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum file matches to return (default 10)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Request timeout in seconds (default 30)"
                }
            }),
            required: vec!["query".into()],
        }
    }

    async fn run(&self, _ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let args = call.args();
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "query"));
        };
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LIMIT) as usize;
        let timeout = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        debug!(query, "sourcegraph tool");

        match search(query, limit, timeout).await {
            Ok(content) => Ok(ToolResponse::ok(content)),
            Err(e) => Ok(ToolResponse::error(format!("sourcegraph error: {e}"))),
        }
    }
}

async fn search(query: &str, limit: usize, timeout_secs: u64) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .user_agent("opencode/0.3")
        .build()?;

    let resp = client
        .post(ENDPOINT)
        .json(&json!({
            "query": SEARCH_QUERY,
            "variables": { "query": query },
        }))
        .send()
        .await?;
    if !resp.status().is_success() {
        anyhow::bail!("sourcegraph returned {}", resp.status());
    }
    let body: Value = resp.json().await?;
    Ok(format_results(&body, limit))
}

fn format_results(body: &Value, limit: usize) -> String {
    let results = &body["data"]["search"]["results"];
    let match_count = results["matchCount"].as_u64().unwrap_or(0);
    let Some(files) = results["results"].as_array() else {
        return "(no results)".to_string();
    };

    let mut out = Vec::new();
    for file in files.iter().take(limit) {
        if file["__typename"].as_str() != Some("FileMatch") {
            continue;
        }
        let repo = file["repository"]["name"].as_str().unwrap_or("?");
        let path = file["file"]["path"].as_str().unwrap_or("?");
        out.push(format!("{repo}/{path}"));
        if let Some(lines) = file["lineMatches"].as_array() {
            for lm in lines.iter().take(5) {
                let line = lm["lineNumber"].as_u64().unwrap_or(0) + 1;
                let preview = lm["preview"].as_str().unwrap_or("").trim_end();
                out.push(format!("  L{line}: {preview}"));
            }
        }
    }
    if out.is_empty() {
        return "(no results)".to_string();
    }
    format!("{match_count} matches\n{}", out.join("\n"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
