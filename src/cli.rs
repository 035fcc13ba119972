// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::Parser;

/// Headless driver for the opencode agent core: run one prompt to
/// completion and print the assistant's final answer.
#[derive(Parser, Debug)]
#[command(name = "opencode", version, about)]
pub struct Cli {
    /// The prompt to run.  Read from stdin when omitted and stdin is piped.
    pub prompt: Option<String>,

    /// Catalog model id for the coder agent (e.g. "claude-4-sonnet",
    /// "gpt-4.1").  Overrides the configured model.
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Print the known models and exit.
    #[arg(long)]
    pub list_models: bool,

    /// Print the merged configuration and exit.
    #[arg(long)]
    pub show_config: bool,

    /// Log to stderr (tracing; honours RUST_LOG).
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
