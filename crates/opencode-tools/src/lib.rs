// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod builtin;
mod diagnostics;
mod history;
mod registry;
mod tool;

pub use builtin::{
    BashTool, DiagnosticsTool, EditTool, FetchTool, GlobTool, GrepTool, LsTool, PatchTool,
    SourcegraphTool, ViewTool, WriteTool,
};
pub use diagnostics::{Diagnostic, DiagnosticsSource, NoDiagnostics, Severity};
pub use history::{unified_diff, FileHistory, FileVersion};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolCall, ToolCtx, ToolError, ToolInfo, ToolResponse};
