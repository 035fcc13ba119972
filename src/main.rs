// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{IsTerminal, Read};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use opencode_core::{AgentEvent, AgentFactory};
use opencode_permission::PermissionService;
use opencode_store::{MemoryStore, MessageStore, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.list_models {
        for model in opencode_model::static_catalog() {
            println!("{:32} {:12} {}", model.id, model.provider, model.name);
        }
        return Ok(());
    }

    let mut config = opencode_config::load()?;
    if cli.show_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    if let Some(model) = &cli.model {
        // Fail fast on typos before any network setup.
        opencode_core::resolve_model(model)?;
        config.agents.coder.model = Some(model.clone());
    }

    let prompt = read_prompt(&cli)?;
    run_prompt(Arc::new(config), prompt).await
}

/// The prompt argument, or piped stdin when the argument is omitted.
fn read_prompt(cli: &Cli) -> anyhow::Result<String> {
    if let Some(prompt) = &cli.prompt {
        return Ok(prompt.clone());
    }
    if std::io::stdin().is_terminal() {
        anyhow::bail!("no prompt given; pass one as an argument or pipe it on stdin");
    }
    let mut prompt = String::new();
    std::io::stdin()
        .read_to_string(&mut prompt)
        .context("reading prompt from stdin")?;
    let prompt = prompt.trim().to_string();
    if prompt.is_empty() {
        anyhow::bail!("stdin was empty");
    }
    Ok(prompt)
}

async fn run_prompt(config: Arc<opencode_config::Config>, prompt: String) -> anyhow::Result<()> {
    let workdir = std::env::current_dir().context("resolving working directory")?;
    let store = Arc::new(MemoryStore::new());
    let permissions = Arc::new(PermissionService::new(workdir.clone()));

    let factory = AgentFactory::new(
        Arc::clone(&config),
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::clone(&store) as Arc<dyn MessageStore>,
        Arc::clone(&permissions),
        workdir,
    );

    // External MCP tools, discovered at startup.
    let (_mcp_clients, mcp_tools) =
        opencode_mcp::connect_tools(&config, Arc::clone(&permissions)).await;
    let agent = factory.coder_agent_with(mcp_tools)?;

    let session = store.create_session(None).await?;
    // Headless: there is no UI to answer permission asks.
    permissions.auto_approve_session(&session.id);

    let mut rx = agent
        .run(&session.id, prompt, vec![])
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Response { message, done } => {
                println!("{}", message.text());
                if done {
                    let session = store.get_session(&session.id).await?;
                    if session.cost > 0.0 {
                        eprintln!(
                            "[{} in / {} out tokens, ${:.4}]",
                            session.prompt_tokens, session.completion_tokens, session.cost
                        );
                    }
                    return Ok(());
                }
            }
            AgentEvent::Error { error } => {
                anyhow::bail!("{error}");
            }
            AgentEvent::Summarize { .. } => {}
        }
    }
    anyhow::bail!("agent ended without a response")
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
