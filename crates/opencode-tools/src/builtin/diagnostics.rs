// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::diagnostics::{DiagnosticsSource, Severity};
use crate::tool::{Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

pub struct DiagnosticsTool {
    pub source: Arc<dyn DiagnosticsSource>,
}

#[async_trait]
impl Tool for DiagnosticsTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "diagnostics".into(),
            description: "Report errors and warnings from the attached language servers.\n\
                 paths: restrict to specific files (default: everything currently known).\n\
                 Run after edits to confirm the change compiles cleanly."
                .into(),
            parameters: json!({
                "paths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Files to query (default: all)"
                }
            }),
            required: vec![],
        }
    }

    async fn run(&self, _ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let args = call.args();
        let paths: Vec<String> = args
            .get("paths")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        debug!(paths = paths.len(), "diagnostics tool");

        let diagnostics = match self.source.diagnostics(&paths).await {
            Ok(d) => d,
            Err(e) => return Ok(ToolResponse::error(format!("diagnostics error: {e}"))),
        };
        if diagnostics.is_empty() {
            return Ok(ToolResponse::ok("(no diagnostics)"));
        }

        let mut lines = Vec::with_capacity(diagnostics.len());
        let mut errors = 0usize;
        for d in &diagnostics {
            let tag = match d.severity {
                Severity::Error => {
                    errors += 1;
                    "ERROR"
                }
                Severity::Warning => "WARN",
                Severity::Information => "INFO",
                Severity::Hint => "HINT",
            };
            lines.push(format!(
                "{tag} {}:{}:{} {} ({})",
                d.path, d.line, d.column, d.message, d.source
            ));
        }
        Ok(ToolResponse::ok(lines.join("\n"))
            .with_metadata(json!({ "total": diagnostics.len(), "errors": errors })))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::diagnostics::{Diagnostic, NoDiagnostics};

    struct FixedSource(Vec<Diagnostic>);

    #[async_trait]
    impl DiagnosticsSource for FixedSource {
        async fn diagnostics(&self, _paths: &[String]) -> anyhow::Result<Vec<Diagnostic>> {
            Ok(self.0.clone())
        }
    }

    fn ctx() -> ToolCtx {
        ToolCtx::new("s", "m", CancellationToken::new())
    }

    fn call() -> ToolCall {
        ToolCall {
            id: "d1".into(),
            name: "diagnostics".into(),
            input: "{}".into(),
        }
    }

    #[tokio::test]
    async fn empty_source_reports_no_diagnostics() {
        let t = DiagnosticsTool {
            source: Arc::new(NoDiagnostics),
        };
        let out = t.run(&ctx(), &call()).await.unwrap();
        assert!(!out.is_error);
        assert!(out.content.contains("no diagnostics"));
    }

    #[tokio::test]
    async fn formats_severity_path_and_message() {
        let t = DiagnosticsTool {
            source: Arc::new(FixedSource(vec![Diagnostic {
                path: "src/lib.rs".into(),
                line: 10,
                column: 5,
                severity: Severity::Error,
                message: "mismatched types".into(),
                source: "rust-analyzer".into(),
            }])),
        };
        let out = t.run(&ctx(), &call()).await.unwrap();
        assert!(out.content.contains("ERROR src/lib.rs:10:5 mismatched types"));
        assert_eq!(out.metadata.unwrap()["errors"], 1);
    }
}
