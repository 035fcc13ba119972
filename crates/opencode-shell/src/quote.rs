// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Shell-kind detection, quoting, and per-command wrapper scripts.
//!
//! The wrapper runs the user command with stdin nulled and stdout/stderr
//! captured to temp files, then records the exit code and the post-command
//! working directory so the executor can track `cd` across commands.

use std::path::Path;

/// The dialect spoken by the persistent shell process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    /// bash / zsh / any POSIX sh
    Posix,
    /// Windows cmd.exe
    Cmd,
    /// Windows PowerShell / pwsh
    PowerShell,
}

impl ShellKind {
    /// Classify a shell executable by its file name.
    pub fn detect(shell_path: &str) -> Self {
        let name = Path::new(shell_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(shell_path)
            .to_ascii_lowercase();
        match name.as_str() {
            "cmd" => ShellKind::Cmd,
            "powershell" | "pwsh" => ShellKind::PowerShell,
            _ => ShellKind::Posix,
        }
    }
}

/// Quote `command` for safe embedding in the wrapper of the given kind.
pub fn quote_command(kind: ShellKind, command: &str) -> String {
    match kind {
        // Single-quoted literal; embedded single quotes become '\''.
        ShellKind::Posix => format!("'{}'", command.replace('\'', r"'\''")),
        // cmd has no literal quoting; double quotes are escaped by doubling.
        ShellKind::Cmd => command.replace('"', "\"\""),
        // Single-quoted literal; embedded single quotes double, backticks
        // escape the quote character inside expandable contexts.
        ShellKind::PowerShell => format!("'{}'", command.replace('\'', "''")),
    }
}

/// Paths of the four capture files for one command.
pub struct CaptureFiles<'a> {
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub status: &'a str,
    pub cwd: &'a str,
}

/// Build the one-shot wrapper script written to the shell's stdin.
///
/// Contract: run the command with stdin from a null source and stdout/stderr
/// captured, then write the post-command working directory and the exit code
/// to their files.  The status file is written LAST — its existence with
/// content is the completion signal the poll loop watches for.
pub fn wrapper_script(kind: ShellKind, command: &str, files: &CaptureFiles<'_>) -> String {
    match kind {
        ShellKind::Posix => format!(
            "eval {} < /dev/null > {} 2> {}\nEXEC_EXIT_CODE=$?\npwd > {}\necho $EXEC_EXIT_CODE > {}\n",
            quote_command(kind, command),
            files.stdout,
            files.stderr,
            files.cwd,
            files.status,
        ),
        ShellKind::Cmd => format!(
            "({}) < NUL > \"{}\" 2> \"{}\"\r\nset EXEC_EXIT_CODE=%ERRORLEVEL%\r\ncd > \"{}\"\r\necho %EXEC_EXIT_CODE% > \"{}\"\r\n",
            command, files.stdout, files.stderr, files.cwd, files.status,
        ),
        ShellKind::PowerShell => format!(
            "& {{ {} }} *> \"{}\" 2> \"{}\"\n$exec_exit = if ($LASTEXITCODE -eq $null) {{ 0 }} else {{ $LASTEXITCODE }}\n(Get-Location).Path | Out-File -Encoding ascii \"{}\"\n$exec_exit | Out-File -Encoding ascii \"{}\"\n",
            command, files.stdout, files.stderr, files.cwd, files.status,
        ),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
