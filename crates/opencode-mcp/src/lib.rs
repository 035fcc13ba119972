// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! MCP connector.
//!
//! Connects to the MCP servers named in configuration (stdio or SSE), lists
//! their tools, and wraps each one as a [`Tool`] the registry can dispatch
//! like any built-in.  Only the Initialize handshake, ListTools, and CallTool
//! are used.  Server failures surface as is-error tool responses, never as
//! run failures.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParam,
    service::{RoleClient, RunningService},
    transport::{sse_client::SseClientConfig, SseClientTransport, TokioChildProcess},
    ServiceExt,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use opencode_config::{Config, McpServerConfig, McpTransport};
use opencode_permission::{CreatePermissionRequest, PermissionService};
use opencode_tools::{Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};

type McpService = RunningService<RoleClient, ()>;

/// A live connection to one configured MCP server.
pub struct McpClient {
    pub name: String,
    service: Arc<McpService>,
}

impl McpClient {
    /// Connect and run the Initialize handshake for one configured server.
    pub async fn connect(name: &str, cfg: &McpServerConfig) -> anyhow::Result<Self> {
        let service = match cfg.transport {
            McpTransport::Stdio => {
                let command = cfg
                    .command
                    .as_deref()
                    .with_context(|| format!("mcp server {name}: stdio transport needs a command"))?;
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(&cfg.args).envs(&cfg.env);
                let transport = TokioChildProcess::new(cmd)
                    .with_context(|| format!("mcp server {name}: failed to spawn {command}"))?;
                ().serve(transport)
                    .await
                    .with_context(|| format!("mcp server {name}: initialize failed"))?
            }
            McpTransport::Sse => {
                let url = cfg
                    .url
                    .as_deref()
                    .with_context(|| format!("mcp server {name}: sse transport needs a url"))?;
                if cfg.headers.is_empty() {
                    let transport = SseClientTransport::start(url.to_string())
                        .await
                        .with_context(|| format!("mcp server {name}: sse connect failed"))?;
                    ().serve(transport)
                        .await
                        .with_context(|| format!("mcp server {name}: initialize failed"))?
                } else {
                    // Configured headers (auth tokens, tenant ids) ride on
                    // every request of the SSE session.
                    let mut headers = reqwest::header::HeaderMap::new();
                    for (key, value) in &cfg.headers {
                        let name_ok = key.parse::<reqwest::header::HeaderName>();
                        let value_ok = value.parse::<reqwest::header::HeaderValue>();
                        if let (Ok(header), Ok(value)) = (name_ok, value_ok) {
                            headers.insert(header, value);
                        } else {
                            warn!(server = name, header = key, "skipping invalid mcp header");
                        }
                    }
                    let client = reqwest::Client::builder()
                        .default_headers(headers)
                        .build()
                        .with_context(|| format!("mcp server {name}: building http client"))?;
                    let transport = SseClientTransport::start_with_client(
                        client,
                        SseClientConfig {
                            sse_endpoint: url.to_string().into(),
                            ..Default::default()
                        },
                    )
                    .await
                    .with_context(|| format!("mcp server {name}: sse connect failed"))?;
                    ().serve(transport)
                        .await
                        .with_context(|| format!("mcp server {name}: initialize failed"))?
                }
            }
        };
        debug!(server = name, "mcp server connected");
        Ok(Self {
            name: name.to_string(),
            service: Arc::new(service),
        })
    }

    /// List the server's tools wrapped as registry-ready adapters.
    pub async fn tools(
        &self,
        permissions: Arc<PermissionService>,
    ) -> anyhow::Result<Vec<McpTool>> {
        let listed = self
            .service
            .list_tools(Default::default())
            .await
            .with_context(|| format!("mcp server {}: list tools failed", self.name))?;
        Ok(listed
            .tools
            .into_iter()
            .map(|t| McpTool {
                server: self.name.clone(),
                remote_name: t.name.to_string(),
                description: t.description.as_deref().unwrap_or_default().to_string(),
                parameters: Value::Object((*t.input_schema).clone()),
                service: Arc::clone(&self.service),
                permissions: Arc::clone(&permissions),
            })
            .collect())
    }
}

/// One remote tool adapted to the local tool contract.  Registered under
/// `<server>_<tool>` so names never collide across servers.
pub struct McpTool {
    server: String,
    remote_name: String,
    description: String,
    parameters: Value,
    service: Arc<McpService>,
    permissions: Arc<PermissionService>,
}

#[async_trait]
impl Tool for McpTool {
    fn info(&self) -> ToolInfo {
        let (parameters, required) = split_schema(&self.parameters);
        ToolInfo {
            name: format!("{}_{}", self.server, self.remote_name),
            description: self.description.clone(),
            parameters,
            required,
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let granted = self
            .permissions
            .request(
                &ctx.cancel,
                CreatePermissionRequest {
                    session_id: ctx.session_id.clone(),
                    tool_name: self.info().name,
                    action: "call".into(),
                    path: self.server.clone(),
                    description: format!("Call {} on MCP server {}", self.remote_name, self.server),
                    params: serde_json::from_str(&call.input).ok(),
                },
            )
            .await;
        if !granted {
            return Err(ToolError::PermissionDenied);
        }

        let arguments = match serde_json::from_str::<Value>(&call.input) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        };
        let result = self
            .service
            .call_tool(CallToolRequestParam {
                meta: None,
                name: self.remote_name.clone().into(),
                arguments,
                task: None,
            })
            .await;

        match result {
            Ok(result) => {
                let is_error = result.is_error.unwrap_or(false);
                let text = result
                    .content
                    .iter()
                    .find_map(|c| c.as_text().map(|t| t.text.clone()))
                    .unwrap_or_default();
                if is_error {
                    Ok(ToolResponse::error(text))
                } else {
                    Ok(ToolResponse::ok(text))
                }
            }
            Err(e) => {
                warn!(server = %self.server, tool = %self.remote_name, "mcp call failed: {e}");
                Ok(ToolResponse::error(format!("mcp error: {e}")))
            }
        }
    }
}

/// Split a JSON Schema object into the local (properties, required) shape.
fn split_schema(schema: &Value) -> (Value, Vec<String>) {
    let properties = schema
        .get("properties")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let required = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    (properties, required)
}

/// Connect every configured server and return its tools for the agent
/// factory's registry.
///
/// A server that fails to connect is skipped with a warning; external tool
/// availability must never block startup.
pub async fn connect_tools(
    config: &Config,
    permissions: Arc<PermissionService>,
) -> (Vec<McpClient>, Vec<Arc<dyn Tool>>) {
    let mut clients = Vec::new();
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for (name, server_cfg) in sorted(&config.mcp_servers) {
        match McpClient::connect(name, server_cfg).await {
            Ok(client) => {
                match client.tools(Arc::clone(&permissions)).await {
                    Ok(server_tools) => {
                        for tool in server_tools {
                            tools.push(Arc::new(tool));
                        }
                    }
                    Err(e) => warn!(server = name, "listing mcp tools failed: {e}"),
                }
                clients.push(client);
            }
            Err(e) => warn!(server = name, "mcp connect failed: {e}"),
        }
    }
    (clients, tools)
}

fn sorted(servers: &HashMap<String, McpServerConfig>) -> Vec<(&String, &McpServerConfig)> {
    let mut entries: Vec<_> = servers.iter().collect();
    entries.sort_by_key(|(name, _)| name.clone());
    entries
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_schema_extracts_properties_and_required() {
        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        });
        let (properties, required) = split_schema(&schema);
        assert!(properties.get("path").is_some());
        assert_eq!(required, vec!["path"]);
    }

    #[test]
    fn split_schema_tolerates_bare_schema() {
        let (properties, required) = split_schema(&json!({"type": "object"}));
        assert!(properties.as_object().unwrap().is_empty());
        assert!(required.is_empty());
    }

    #[tokio::test]
    async fn stdio_connect_without_command_fails() {
        let cfg = McpServerConfig::default();
        assert!(McpClient::connect("broken", &cfg).await.is_err());
    }

    #[tokio::test]
    async fn connect_skips_unreachable_servers() {
        let mut config = Config::default();
        config.mcp_servers.insert(
            "dead".into(),
            McpServerConfig {
                transport: McpTransport::Stdio,
                command: Some("/no/such/mcp-binary".into()),
                ..Default::default()
            },
        );
        let permissions = Arc::new(PermissionService::new(std::env::temp_dir()));
        let (clients, tools) = connect_tools(&config, permissions).await;
        assert!(clients.is_empty());
        assert!(tools.is_empty());
    }
}
