// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Agent factory: resolves an agent role to a model, credentials, and tool
//! set, and wires the agents together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::warn;

use opencode_config::{AgentRole, Config};
use opencode_model::{
    lookup, AnthropicProvider, Model, ModelProvider, OpenAICompatProvider, OpenAiProvider,
};
use opencode_permission::PermissionService;
use opencode_store::{MessageStore, SessionStore};
use opencode_tools::{
    BashTool, DiagnosticsSource, DiagnosticsTool, EditTool, FetchTool, FileHistory, GlobTool,
    GrepTool, LsTool, NoDiagnostics, PatchTool, SourcegraphTool, ToolRegistry, ViewTool, WriteTool,
};

use crate::agent::Agent;
use crate::task_tool::TaskTool;

pub struct AgentFactory {
    config: Arc<Config>,
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    permissions: Arc<PermissionService>,
    file_history: Arc<FileHistory>,
    diagnostics: Arc<dyn DiagnosticsSource>,
    workdir: PathBuf,
}

impl AgentFactory {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
        permissions: Arc<PermissionService>,
        workdir: PathBuf,
    ) -> Self {
        // The persistent shell follows the configured shell (or $SHELL) for
        // the whole process.  With neither set, the shell crate's own
        // platform probing picks the executable.
        let has_env_shell = std::env::var("SHELL").map(|s| !s.is_empty()).unwrap_or(false);
        if config.shell.path.is_some() || has_env_shell {
            let (shell_path, shell_args) = config.shell_command();
            opencode_shell::configure(shell_path, shell_args);
        }

        Self {
            config,
            sessions,
            messages,
            permissions,
            file_history: Arc::new(FileHistory::new()),
            diagnostics: Arc::new(NoDiagnostics),
            workdir,
        }
    }

    /// Attach a diagnostics source backed by real language servers.
    pub fn with_diagnostics(mut self, source: Arc<dyn DiagnosticsSource>) -> Self {
        self.diagnostics = source;
        self
    }

    pub fn file_history(&self) -> Arc<FileHistory> {
        Arc::clone(&self.file_history)
    }

    /// The main conversation agent: full tool set including the sub-agent
    /// tool, title generation, and the summarizer for auto-compaction.
    pub fn coder_agent(&self) -> anyhow::Result<Arc<Agent>> {
        self.coder_agent_with(Vec::new())
    }

    /// Like [`coder_agent`], with extra dynamically discovered tools (MCP)
    /// added to the registry.
    pub fn coder_agent_with(
        &self,
        extra_tools: Vec<Arc<dyn opencode_tools::Tool>>,
    ) -> anyhow::Result<Arc<Agent>> {
        let task_agent = self.task_agent()?;

        let mut registry = self.base_registry();
        registry.register(TaskTool {
            agent: task_agent,
            sessions: Arc::clone(&self.sessions),
            permissions: Arc::clone(&self.permissions),
        });
        for tool in extra_tools {
            registry.register_arc(tool);
        }

        let mut agent = Agent::new(
            AgentRole::Coder,
            self.provider(AgentRole::Coder)?,
            Arc::new(registry),
            Arc::clone(&self.sessions),
            Arc::clone(&self.messages),
        )
        .with_auto_compact(self.config.auto_compact);

        // Title and summarizer roles are best-effort: a missing key for the
        // cheap model must not take down the main agent.
        match self.provider(AgentRole::Title) {
            Ok(p) => agent = agent.with_title_provider(p),
            Err(e) => warn!("title provider unavailable: {e:#}"),
        }
        match self.provider(AgentRole::Summarizer) {
            Ok(p) => agent = agent.with_summarizer(p),
            Err(e) => warn!("summarizer unavailable: {e:#}"),
        }
        Ok(Arc::new(agent))
    }

    /// The sub-agent: read-only tools, no nested sub-agents, no title or
    /// summarizer role.
    pub fn task_agent(&self) -> anyhow::Result<Arc<Agent>> {
        let mut registry = ToolRegistry::new();
        registry.register(ViewTool);
        registry.register(LsTool);
        registry.register(GlobTool);
        registry.register(GrepTool);
        registry.register(SourcegraphTool);
        registry.register(FetchTool {
            permissions: Arc::clone(&self.permissions),
        });
        registry.register(DiagnosticsTool {
            source: Arc::clone(&self.diagnostics),
        });

        Ok(Arc::new(
            Agent::new(
                AgentRole::Task,
                self.provider(AgentRole::Task)?,
                Arc::new(registry),
                Arc::clone(&self.sessions),
                Arc::clone(&self.messages),
            )
            .with_auto_compact(self.config.auto_compact),
        ))
    }

    /// Swap the model behind a role on a live agent.  Rejected while busy.
    pub fn update(
        &self,
        agent: &Agent,
        role: AgentRole,
        model_id: &str,
    ) -> anyhow::Result<()> {
        let provider = self.provider_for_model(role, model_id)?;
        agent
            .update(role, provider)
            .map_err(|e| anyhow::anyhow!("{e}"))
    }

    /// Resolve the provider for `role` from configuration.
    pub fn provider(&self, role: AgentRole) -> anyhow::Result<Arc<dyn ModelProvider>> {
        let role_cfg = self.config.agents.role(role);
        let model_id = role_cfg
            .model
            .clone()
            .unwrap_or_else(|| default_model(role).to_string());
        self.provider_for_model(role, &model_id)
    }

    fn provider_for_model(
        &self,
        role: AgentRole,
        model_id: &str,
    ) -> anyhow::Result<Arc<dyn ModelProvider>> {
        let model = lookup(model_id)
            .with_context(|| format!("unknown model '{model_id}' for agent role {role}"))?;
        if self.config.provider_disabled(&model.provider) {
            bail!("provider '{}' is disabled in configuration", model.provider);
        }
        let role_cfg = self.config.agents.role(role);
        let max_tokens = role_cfg.max_tokens;
        let reasoning_effort = role_cfg.reasoning_effort.clone();
        let api_key = self.config.api_key(&model.provider);

        let provider: Arc<dyn ModelProvider> = match model.provider.as_str() {
            "anthropic" => {
                let should_think = role == AgentRole::Coder && model.can_reason;
                Arc::new(AnthropicProvider::new(
                    model, api_key, None, max_tokens, should_think,
                ))
            }
            "bedrock" => {
                let should_think = role == AgentRole::Coder && model.can_reason;
                let endpoint = std::env::var("AWS_BEDROCK_ENDPOINT").ok();
                Arc::new(AnthropicProvider::new(
                    model, api_key, endpoint, max_tokens, should_think,
                ))
            }
            "openai" => Arc::new(OpenAiProvider::new(
                model,
                api_key,
                max_tokens,
                reasoning_effort,
            )),
            "groq" => Arc::new(OpenAICompatProvider::groq(model, api_key, max_tokens)),
            "openrouter" => Arc::new(OpenAICompatProvider::openrouter(
                model,
                api_key,
                max_tokens,
                reasoning_effort,
            )),
            "gemini" | "vertexai" => {
                Arc::new(OpenAICompatProvider::gemini(model, api_key, max_tokens))
            }
            "azure" => {
                let endpoint = std::env::var("AZURE_OPENAI_ENDPOINT")
                    .context("AZURE_OPENAI_ENDPOINT not set")?;
                Arc::new(OpenAICompatProvider::azure(
                    model, api_key, &endpoint, max_tokens,
                ))
            }
            "local" => {
                let endpoint = api_key
                    .or_else(|| std::env::var("LOCAL_ENDPOINT").ok())
                    .unwrap_or_else(|| "http://localhost:8080/v1".to_string());
                Arc::new(OpenAICompatProvider::local(model, &endpoint, max_tokens))
            }
            other => bail!("unsupported provider '{other}'"),
        };
        Ok(provider)
    }

    /// Shared registry of built-in workspace tools.
    fn base_registry(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(ViewTool);
        registry.register(LsTool);
        registry.register(GlobTool);
        registry.register(GrepTool);
        registry.register(SourcegraphTool);
        registry.register(WriteTool {
            permissions: Arc::clone(&self.permissions),
            history: Arc::clone(&self.file_history),
        });
        registry.register(EditTool {
            permissions: Arc::clone(&self.permissions),
            history: Arc::clone(&self.file_history),
        });
        registry.register(PatchTool {
            permissions: Arc::clone(&self.permissions),
            history: Arc::clone(&self.file_history),
        });
        registry.register(BashTool {
            permissions: Arc::clone(&self.permissions),
            workdir: self.workdir.clone(),
        });
        registry.register(FetchTool {
            permissions: Arc::clone(&self.permissions),
        });
        registry.register(DiagnosticsTool {
            source: Arc::clone(&self.diagnostics),
        });
        registry
    }
}

fn default_model(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Coder | AgentRole::Task | AgentRole::Summarizer => "claude-4-sonnet",
        AgentRole::Title => "claude-3-5-haiku",
    }
}

/// Look up a model the way the factory does; exposed for the CLI's
/// `--model` validation.
pub fn resolve_model(model_id: &str) -> anyhow::Result<Model> {
    lookup(model_id).with_context(|| format!("unknown model '{model_id}'"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use opencode_store::MemoryStore;

    fn factory(config: Config) -> AgentFactory {
        let store = Arc::new(MemoryStore::new());
        AgentFactory::new(
            Arc::new(config),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            store as Arc<dyn MessageStore>,
            Arc::new(PermissionService::new(std::env::temp_dir())),
            std::env::temp_dir(),
        )
    }

    fn config_with_key(provider: &str) -> Config {
        let mut config = Config::default();
        config.providers.insert(
            provider.into(),
            opencode_config::ProviderConfig {
                api_key: Some("test-key".into()),
                disabled: false,
            },
        );
        config
    }

    #[test]
    fn default_models_resolve_in_catalog() {
        for role in [
            AgentRole::Coder,
            AgentRole::Task,
            AgentRole::Title,
            AgentRole::Summarizer,
        ] {
            assert!(lookup(default_model(role)).is_some(), "{role}");
        }
    }

    #[test]
    fn provider_uses_configured_model() {
        let mut config = config_with_key("openai");
        config.agents.coder.model = Some("gpt-4o".into());
        let f = factory(config);
        let provider = f.provider(AgentRole::Coder).unwrap();
        assert_eq!(provider.model().id, "gpt-4o");
    }

    #[test]
    fn unknown_model_is_an_error() {
        let mut config = config_with_key("anthropic");
        config.agents.coder.model = Some("made-up-model".into());
        let f = factory(config);
        assert!(f.provider(AgentRole::Coder).is_err());
    }

    #[test]
    fn disabled_provider_is_an_error() {
        let mut config = config_with_key("anthropic");
        config.providers.get_mut("anthropic").unwrap().disabled = true;
        let f = factory(config);
        assert!(f.provider(AgentRole::Coder).is_err());
    }

    #[test]
    fn coder_agent_wires_the_full_tool_set() {
        let f = factory(config_with_key("anthropic"));
        let registry = f.base_registry();
        for name in [
            "view", "ls", "glob", "grep", "sourcegraph", "write", "edit", "patch", "bash",
            "fetch", "diagnostics",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn resolve_model_validates_catalog_ids() {
        assert!(resolve_model("claude-4-sonnet").is_ok());
        assert!(resolve_model("bogus").is_err());
    }
}
