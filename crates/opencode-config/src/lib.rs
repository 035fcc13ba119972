// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod loader;
mod schema;

pub use loader::{load, load_layers};
pub use schema::{
    AgentRole, AgentRoleConfig, AgentsConfig, Config, DataConfig, LspConfig, McpServerConfig,
    McpTransport, ProviderConfig, ShellConfig,
};
