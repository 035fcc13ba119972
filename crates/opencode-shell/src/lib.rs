// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Persistent interactive shell.
//!
//! One long-lived shell process per application, reused across every `bash`
//! tool invocation so that working directory and environment changes persist
//! between commands.  Commands are serialized through a bounded FIFO queue
//! consumed by a single executor task; cancelling a command kills the
//! command's child processes, never the shell itself.

mod quote;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use quote::{quote_command, wrapper_script, CaptureFiles, ShellKind};

/// Maximum queued commands before `exec` callers start failing fast.
const QUEUE_DEPTH: usize = 10;

/// How often the executor checks the status file and the cancel token.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exit code reported when a command was interrupted before writing a status
/// (SIGTERM convention: 128 + 15).
const INTERRUPT_EXIT_CODE: i32 = 143;

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("shell is not alive")]
    NotAlive,
    #[error("failed to spawn shell: {0}")]
    Spawn(std::io::Error),
    #[error("shell i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The captured outcome of one command.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// True when the command was cut short by cancellation or timeout.
    pub interrupted: bool,
}

struct ShellCommand {
    command: String,
    /// 0 disables the timeout.
    timeout_ms: u64,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<ExecResult, ShellError>>,
}

pub struct PersistentShell {
    tx: mpsc::Sender<ShellCommand>,
    alive: Arc<AtomicBool>,
    cwd: Arc<Mutex<PathBuf>>,
    kind: ShellKind,
}

impl PersistentShell {
    /// Spawn a shell process bound to `cwd` and start its executor task.
    pub fn spawn(
        shell_path: &str,
        shell_args: &[String],
        cwd: &Path,
    ) -> Result<Arc<Self>, ShellError> {
        let kind = ShellKind::detect(shell_path);
        let mut command = Command::new(shell_path);
        command
            .args(shell_args)
            .current_dir(cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        // New session: the shell and its children get no controlling
        // terminal, so cancelled commands cannot corrupt the caller's TTY.
        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let child = command.spawn().map_err(ShellError::Spawn)?;
        let pid = child.id();
        debug!(shell = shell_path, pid, "spawned persistent shell");

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let alive = Arc::new(AtomicBool::new(true));
        let cwd_shared = Arc::new(Mutex::new(cwd.to_path_buf()));

        tokio::spawn(executor(
            child,
            pid,
            kind,
            rx,
            Arc::clone(&alive),
            Arc::clone(&cwd_shared),
        ));

        Ok(Arc::new(Self {
            tx,
            alive,
            cwd: cwd_shared,
            kind,
        }))
    }

    /// Queue a command and wait for its result.
    ///
    /// Commands run strictly one at a time in submission order.  `cancel`
    /// and `timeout_ms` interrupt the command's children; the shell itself
    /// survives and later `exec` calls keep working.
    pub async fn exec(
        &self,
        cancel: &CancellationToken,
        command: &str,
        timeout_ms: u64,
    ) -> Result<ExecResult, ShellError> {
        if !self.is_alive() {
            return Err(ShellError::NotAlive);
        }
        let (reply, rx) = oneshot::channel();
        let cmd = ShellCommand {
            command: command.to_string(),
            timeout_ms,
            cancel: cancel.clone(),
            reply,
        };
        // Bounded queue: callers past the queue depth wait here for a slot.
        self.tx
            .send(cmd)
            .await
            .map_err(|_| ShellError::NotAlive)?;
        rx.await.map_err(|_| ShellError::NotAlive)?
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// The shell's tracked working directory, updated after every command.
    pub fn cwd(&self) -> PathBuf {
        self.cwd.lock().unwrap().clone()
    }

    pub fn kind(&self) -> ShellKind {
        self.kind
    }
}

/// The single consumer of the command queue.  Owns the child process.
async fn executor(
    mut child: Child,
    pid: Option<u32>,
    kind: ShellKind,
    mut rx: mpsc::Receiver<ShellCommand>,
    alive: Arc<AtomicBool>,
    cwd: Arc<Mutex<PathBuf>>,
) {
    while let Some(cmd) = rx.recv().await {
        let result = run_one(&mut child, pid, kind, &cwd, &cmd).await;
        let died = matches!(result, Err(ShellError::NotAlive));
        if died {
            // Flip the flag before replying so the caller observes a dead
            // shell as soon as its exec returns.
            alive.store(false, Ordering::SeqCst);
            warn!("persistent shell process exited");
        }
        let _ = cmd.reply.send(result);
        if died {
            break;
        }
    }
    // Queue closed or the shell died; fail any stragglers.
    alive.store(false, Ordering::SeqCst);
    rx.close();
    while let Some(cmd) = rx.recv().await {
        let _ = cmd.reply.send(Err(ShellError::NotAlive));
    }
}

async fn run_one(
    child: &mut Child,
    pid: Option<u32>,
    kind: ShellKind,
    cwd: &Mutex<PathBuf>,
    cmd: &ShellCommand,
) -> Result<ExecResult, ShellError> {
    let stdout_file = capture_file("opencode-stdout-")?;
    let stderr_file = capture_file("opencode-stderr-")?;
    let status_file = capture_file("opencode-status-")?;
    let cwd_file = capture_file("opencode-cwd-")?;

    let script = wrapper_script(
        kind,
        &cmd.command,
        &CaptureFiles {
            stdout: path_str(&stdout_file),
            stderr: path_str(&stderr_file),
            status: path_str(&status_file),
            cwd: path_str(&cwd_file),
        },
    );

    let stdin = child.stdin.as_mut().ok_or(ShellError::NotAlive)?;
    stdin.write_all(script.as_bytes()).await?;
    stdin.flush().await?;

    let started = Instant::now();
    let mut interrupted = false;
    loop {
        if child.try_wait()?.is_some() {
            return Err(ShellError::NotAlive);
        }
        if cmd.cancel.is_cancelled()
            || (cmd.timeout_ms > 0
                && started.elapsed() >= Duration::from_millis(cmd.timeout_ms))
        {
            if let Some(pid) = pid {
                kill_children(pid);
            }
            interrupted = true;
            break;
        }
        // Completion signal: the wrapper writes the exit code last.
        let done = std::fs::metadata(&status_file)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if done {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let stdout = read_capture(&stdout_file);
    let stderr = read_capture(&stderr_file);
    let status = read_capture(&status_file);
    let new_cwd = read_capture(&cwd_file);

    let exit_code = match status.trim().parse::<i32>() {
        Ok(code) => code,
        Err(_) if interrupted => INTERRUPT_EXIT_CODE,
        Err(_) => -1,
    };
    if !new_cwd.trim().is_empty() {
        *cwd.lock().unwrap() = PathBuf::from(new_cwd.trim());
    }

    // The four TempPaths delete their files on drop here.
    Ok(ExecResult {
        stdout,
        stderr,
        exit_code,
        interrupted,
    })
}

fn capture_file(prefix: &str) -> Result<TempPath, ShellError> {
    Ok(tempfile::Builder::new()
        .prefix(prefix)
        .tempfile()?
        .into_temp_path())
}

fn path_str(p: &TempPath) -> &str {
    // Temp paths are created by us under the system temp dir; they are
    // always valid UTF-8 on supported platforms.
    p.to_str().unwrap_or_default()
}

fn read_capture(path: &TempPath) -> String {
    std::fs::read(path)
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

/// Terminate the direct children of the shell, leaving the shell running.
#[cfg(unix)]
fn kill_children(shell_pid: u32) {
    let out = std::process::Command::new("pgrep")
        .arg("-P")
        .arg(shell_pid.to_string())
        .output();
    let Ok(out) = out else {
        warn!("pgrep failed; cannot interrupt shell children");
        return;
    };
    for line in String::from_utf8_lossy(&out.stdout).lines() {
        if let Ok(child_pid) = line.trim().parse::<i32>() {
            debug!(child_pid, "terminating shell child");
            unsafe {
                libc::kill(child_pid, libc::SIGTERM);
            }
        }
    }
}

/// Tree-kill each direct child: polite first, then forced after a short
/// grace period.  The shell process itself is never targeted.
#[cfg(windows)]
fn kill_children(shell_pid: u32) {
    let out = std::process::Command::new("wmic")
        .args([
            "process",
            "where",
            &format!("ParentProcessId={shell_pid}"),
            "get",
            "ProcessId",
        ])
        .output();
    let Ok(out) = out else {
        warn!("wmic failed; cannot interrupt shell children");
        return;
    };
    let pids: Vec<String> = String::from_utf8_lossy(&out.stdout)
        .lines()
        .filter_map(|l| l.trim().parse::<u32>().ok().map(|p| p.to_string()))
        .collect();
    for pid in &pids {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", pid, "/T"])
            .output();
    }
    std::thread::sleep(Duration::from_millis(200));
    for pid in &pids {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", pid, "/T", "/F"])
            .output();
    }
}

// ─── Process-wide singleton ──────────────────────────────────────────────────

static SHELL_COMMAND: OnceLock<(String, Vec<String>)> = OnceLock::new();
static INSTANCE: Mutex<Option<Arc<PersistentShell>>> = Mutex::new(None);

/// Set the shell executable used by [`get_persistent_shell`].  First call
/// wins; later calls are ignored.
pub fn configure(path: String, args: Vec<String>) {
    let _ = SHELL_COMMAND.set((path, args));
}

fn configured_command() -> (String, Vec<String>) {
    if let Some(cmd) = SHELL_COMMAND.get() {
        return cmd.clone();
    }
    default_shell()
}

#[cfg(unix)]
fn default_shell() -> (String, Vec<String>) {
    let path = std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "bash".to_string());
    (path, vec!["-l".to_string()])
}

/// Windows preference order: pwsh, then powershell, then cmd.exe.
#[cfg(windows)]
fn default_shell() -> (String, Vec<String>) {
    for candidate in ["pwsh.exe", "powershell.exe"] {
        let found = std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths).any(|dir| dir.join(candidate).is_file())
            })
            .unwrap_or(false);
        if found {
            return (candidate.to_string(), vec![]);
        }
    }
    ("cmd.exe".to_string(), vec![])
}

/// The process-wide shell, created lazily and recreated (at the last known
/// working directory) if the previous instance died.
pub fn get_persistent_shell(workdir: &Path) -> Result<Arc<PersistentShell>, ShellError> {
    let mut slot = INSTANCE.lock().unwrap();
    if let Some(shell) = slot.as_ref() {
        if shell.is_alive() {
            return Ok(Arc::clone(shell));
        }
    }
    // Recreate where the dead shell last was, so `cd` survives a crash.
    let cwd = slot
        .as_ref()
        .map(|s| s.cwd())
        .unwrap_or_else(|| workdir.to_path_buf());
    let (path, args) = configured_command();
    let shell = PersistentShell::spawn(&path, &args, &cwd)?;
    *slot = Some(Arc::clone(&shell));
    Ok(shell)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
