// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

/// Top-level configuration document.
///
/// Serialized as camelCase JSON.  Unknown keys are ignored so older binaries
/// tolerate config written by newer ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub data: DataConfig,
    /// Provider credentials and kill switches, keyed by provider id
    /// ("anthropic", "openai", "gemini", "groq", "bedrock", "azure",
    /// "openrouter", "vertexai", "local").
    pub providers: HashMap<String, ProviderConfig>,
    pub agents: AgentsConfig,
    /// External MCP servers, keyed by a user-chosen name.
    pub mcp_servers: HashMap<String, McpServerConfig>,
    /// Language servers queried by the diagnostics tool, keyed by language id.
    pub lsp: HashMap<String, LspConfig>,
    pub shell: ShellConfig,
    pub debug: bool,
    #[serde(rename = "debugLSP")]
    pub debug_lsp: bool,
    /// Summarize the session inline when the context window is nearly full.
    #[serde(default = "default_true")]
    pub auto_compact: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            providers: HashMap::new(),
            agents: AgentsConfig::default(),
            mcp_servers: HashMap::new(),
            lsp: HashMap::new(),
            shell: ShellConfig::default(),
            debug: false,
            debug_lsp: false,
            auto_compact: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataConfig {
    /// Where session data, file history, and logs live.
    pub directory: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        let dir = dirs::home_dir()
            .map(|h| h.join(".opencode"))
            .unwrap_or_else(|| PathBuf::from(".opencode"));
        Self { directory: dir }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Explicit API key.  Prefer the provider's environment variable in
    /// version-controlled config files.
    pub api_key: Option<String>,
    pub disabled: bool,
}

/// Named agent configuration: which model drives each role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    pub coder: AgentRoleConfig,
    pub task: AgentRoleConfig,
    pub title: AgentRoleConfig,
    pub summarizer: AgentRoleConfig,
}

impl AgentsConfig {
    pub fn role(&self, role: AgentRole) -> &AgentRoleConfig {
        match role {
            AgentRole::Coder => &self.coder,
            AgentRole::Task => &self.task,
            AgentRole::Title => &self.title,
            AgentRole::Summarizer => &self.summarizer,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentRoleConfig {
    /// Catalog model id, e.g. "claude-4-sonnet" or "gpt-4.1".
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    /// OpenAI-family reasoning effort: "low" | "medium" | "high".
    pub reasoning_effort: Option<String>,
}

/// The four agent roles the factory knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Main conversation agent with the full tool set.
    Coder,
    /// Sub-agent spawned by the `agent` tool; reduced tool set.
    Task,
    /// One-shot session title generator.
    Title,
    /// Conversation summarizer used for compaction.
    Summarizer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Coder => "coder",
            AgentRole::Task => "task",
            AgentRole::Title => "title",
            AgentRole::Summarizer => "summarizer",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    #[default]
    Stdio,
    Sse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpServerConfig {
    #[serde(rename = "type")]
    pub transport: McpTransport,
    /// Stdio transport: executable to spawn.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// SSE transport: endpoint URL.
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LspConfig {
    pub disabled: bool,
    pub command: Option<String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellConfig {
    /// Shell executable for the persistent shell.  Falls back to `$SHELL`,
    /// then to the platform default.
    pub path: Option<String>,
    pub args: Vec<String>,
}

impl Config {
    /// Resolve the API key for `provider`: explicit config first, then the
    /// provider's recognized environment variable.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        if let Some(p) = self.providers.get(provider) {
            if let Some(key) = &p.api_key {
                if !key.is_empty() {
                    return Some(key.clone());
                }
            }
        }
        api_key_env_var(provider).and_then(|var| std::env::var(var).ok())
    }

    pub fn provider_disabled(&self, provider: &str) -> bool {
        self.providers.get(provider).map(|p| p.disabled).unwrap_or(false)
    }

    /// The persistent shell executable and arguments.
    ///
    /// Resolution order: `shell.path` config, `$SHELL`, platform default.
    pub fn shell_command(&self) -> (String, Vec<String>) {
        if let Some(path) = &self.shell.path {
            return (path.clone(), self.shell.args.clone());
        }
        if let Ok(sh) = std::env::var("SHELL") {
            if !sh.is_empty() {
                return (sh, vec!["-l".to_string()]);
            }
        }
        if cfg!(windows) {
            ("powershell".to_string(), vec![])
        } else {
            ("bash".to_string(), vec!["-l".to_string()])
        }
    }
}

/// Environment variable holding the API key (or endpoint) for a provider.
pub fn api_key_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "gemini" | "vertexai" => Some("GEMINI_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        "azure" => Some("AZURE_OPENAI_API_KEY"),
        "bedrock" => Some("AWS_BEARER_TOKEN_BEDROCK"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        // The local endpoint carries no key; LOCAL_ENDPOINT names the URL.
        "local" => Some("LOCAL_ENDPOINT"),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_auto_compact_enabled() {
        let cfg = Config::default();
        assert!(cfg.auto_compact);
        assert!(!cfg.debug);

        // The empty document (no config files found) behaves identically.
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert!(cfg.auto_compact);
    }

    #[test]
    fn parses_camel_case_keys() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "agents": {
                    "coder": { "model": "claude-4-sonnet", "maxTokens": 8000 },
                    "title": { "model": "claude-3-5-haiku", "reasoningEffort": "low" }
                },
                "autoCompact": false,
                "debugLSP": true
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.agents.coder.model.as_deref(), Some("claude-4-sonnet"));
        assert_eq!(cfg.agents.coder.max_tokens, Some(8000));
        assert_eq!(cfg.agents.title.reasoning_effort.as_deref(), Some("low"));
        assert!(!cfg.auto_compact);
        assert!(cfg.debug_lsp);
    }

    #[test]
    fn parses_mcp_server_variants() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "mcpServers": {
                    "files": { "type": "stdio", "command": "mcp-files", "args": ["--root", "."] },
                    "remote": { "type": "sse", "url": "https://mcp.example.com/sse",
                                "headers": { "Authorization": "Bearer t" } }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.mcp_servers["files"].transport, McpTransport::Stdio);
        assert_eq!(cfg.mcp_servers["files"].command.as_deref(), Some("mcp-files"));
        assert_eq!(cfg.mcp_servers["remote"].transport, McpTransport::Sse);
        assert_eq!(
            cfg.mcp_servers["remote"].headers.get("Authorization").map(String::as_str),
            Some("Bearer t")
        );
    }

    #[test]
    fn api_key_prefers_config_over_env() {
        let mut cfg = Config::default();
        cfg.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("from-config".into()),
                disabled: false,
            },
        );
        assert_eq!(cfg.api_key("anthropic").as_deref(), Some("from-config"));
    }

    #[test]
    fn unknown_provider_has_no_env_var() {
        assert!(api_key_env_var("nope").is_none());
    }

    #[test]
    fn disabled_flag_round_trips() {
        let cfg: Config = serde_json::from_str(
            r#"{ "providers": { "openai": { "disabled": true } } }"#,
        )
        .unwrap();
        assert!(cfg.provider_disabled("openai"));
        assert!(!cfg.provider_disabled("anthropic"));
    }

    #[test]
    fn shell_command_uses_config_path_verbatim() {
        let cfg: Config = serde_json::from_str(
            r#"{ "shell": { "path": "/bin/zsh", "args": ["-l"] } }"#,
        )
        .unwrap();
        let (path, args) = cfg.shell_command();
        assert_eq!(path, "/bin/zsh");
        assert_eq!(args, vec!["-l"]);
    }

    #[test]
    fn agent_role_as_str_matches_config_keys() {
        assert_eq!(AgentRole::Coder.as_str(), "coder");
        assert_eq!(AgentRole::Summarizer.as_str(), "summarizer");
    }
}
