// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use opencode_permission::{CreatePermissionRequest, PermissionService};

use crate::tool::{missing_param, Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

const DEFAULT_MAX_CHARS: usize = 50_000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct FetchTool {
    pub permissions: Arc<PermissionService>,
}

#[async_trait]
impl Tool for FetchTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "fetch".into(),
            description: "Fetch content from a URL via HTTP GET.\n\
                 format: text (HTML stripped to plain text, default) | markdown | html (raw body).\n\
                 JSON responses are pretty-printed regardless of format.\n\
                 Content is capped at 50,000 characters. Valid http/https URLs only;\n\
                 no authentication, read-only."
                .into(),
            parameters: json!({
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (http or https)"
                },
                "format": {
                    "type": "string",
                    "enum": ["text", "markdown", "html"],
                    "description": "Output format (default text)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Request timeout in seconds (default 30)"
                }
            }),
            required: vec!["url".into()],
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let args = call.args();
        let Some(url) = args.get("url").and_then(|v| v.as_str()) else {
            return Ok(missing_param(call, "url"));
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(ToolResponse::error("url must start with http:// or https://"));
        }
        let format = args.get("format").and_then(|v| v.as_str()).unwrap_or("text");
        let timeout = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        debug!(url, format, "fetch tool");

        let granted = self
            .permissions
            .request(
                &ctx.cancel,
                CreatePermissionRequest {
                    session_id: ctx.session_id.clone(),
                    tool_name: "fetch".into(),
                    action: "fetch".into(),
                    path: url.to_string(),
                    description: format!("Fetch {url}"),
                    params: Some(json!({ "url": url, "format": format })),
                },
            )
            .await;
        if !granted {
            return Err(ToolError::PermissionDenied);
        }

        match fetch_url(url, format, timeout).await {
            Ok(content) => Ok(ToolResponse::ok(content)),
            Err(e) => Ok(ToolResponse::error(format!("fetch error: {e}"))),
        }
    }
}

async fn fetch_url(url: &str, format: &str, timeout_secs: u64) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .redirect(reqwest::redirect::Policy::limited(3))
        .user_agent("opencode/0.3")
        .build()?;

    let response = client.get(url).send().await?;
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();
    let body = response.text().await?;

    let content = if content_type.contains("json") {
        match serde_json::from_str::<Value>(&body) {
            Ok(v) => serde_json::to_string_pretty(&v).unwrap_or(body),
            Err(_) => body,
        }
    } else if content_type.contains("html") && format != "html" {
        // html2text produces markdown-flavoured text; both the text and
        // markdown formats want the tags gone.
        html2text::from_read(body.as_bytes(), 100)
    } else {
        body
    };

    if content.len() > DEFAULT_MAX_CHARS {
        let mut end = DEFAULT_MAX_CHARS;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        Ok(format!(
            "{}...[truncated at {DEFAULT_MAX_CHARS} chars; total {} chars]",
            &content[..end],
            content.len()
        ))
    } else {
        Ok(content)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn tool() -> FetchTool {
        let permissions = Arc::new(PermissionService::new(std::env::temp_dir()));
        permissions.auto_approve_session("s");
        FetchTool { permissions }
    }

    fn ctx() -> ToolCtx {
        ToolCtx::new("s", "m", CancellationToken::new())
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "f1".into(),
            name: "fetch".into(),
            input: args.to_string(),
        }
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let out = tool()
            .run(&ctx(), &call(json!({"url": "ftp://example.com/file"})))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("http"));
    }

    #[tokio::test]
    async fn missing_url_is_error() {
        let out = tool().run(&ctx(), &call(json!({}))).await.unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("missing required parameter 'url'"));
    }
}
