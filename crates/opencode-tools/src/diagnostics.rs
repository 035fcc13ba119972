// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Diagnostics source seam.
//!
//! The LSP clients live outside this crate; the diagnostics tool only needs
//! a way to ask "what is wrong with these files".  The host wires in an
//! implementation backed by its language servers; tests and headless runs
//! use [`NoDiagnostics`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

/// One diagnostic reported by a language server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: String,
    /// 1-indexed.
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
    pub message: String,
    /// Language-server identifier that produced this diagnostic.
    pub source: String,
}

/// Provider of diagnostics for a set of paths.  Empty `paths` means
/// "everything currently known".
#[async_trait]
pub trait DiagnosticsSource: Send + Sync {
    async fn diagnostics(&self, paths: &[String]) -> anyhow::Result<Vec<Diagnostic>>;
}

/// Source used when no language server is attached.
pub struct NoDiagnostics;

#[async_trait]
impl DiagnosticsSource for NoDiagnostics {
    async fn diagnostics(&self, _paths: &[String]) -> anyhow::Result<Vec<Diagnostic>> {
        Ok(Vec::new())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
