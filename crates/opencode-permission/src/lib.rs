// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Permission broker.
//!
//! Every side-effecting tool call passes through [`PermissionService::request`]
//! before touching the workspace.  The gate resolves in order: auto-approved
//! agents, auto-approved sessions, persistent grants, and finally an
//! interactive ask published to the UI, which blocks until a reply arrives
//! or the run is cancelled.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use opencode_pubsub::{Broker, EventKind};

/// A pending ask shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    /// Action verb, e.g. "write", "execute", "fetch".
    pub action: String,
    /// Path the tool wants to touch; resolved to a directory for matching.
    pub path: String,
    pub description: String,
    /// Tool-specific detail rendered by the UI (diff, command line, URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// What a tool submits when asking for permission.
#[derive(Debug, Clone)]
pub struct CreatePermissionRequest {
    pub session_id: String,
    pub tool_name: String,
    pub action: String,
    pub path: String,
    pub description: String,
    pub params: Option<serde_json::Value>,
}

/// A remembered approval.  Matches future requests equal on all four fields;
/// never expires.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PersistentGrant {
    session_id: String,
    tool_name: String,
    action: String,
    /// Directory the grant covers (the request path's parent).
    path: PathBuf,
}

pub struct PermissionService {
    events: Arc<Broker<PermissionRequest>>,
    /// Reply channels keyed by request id; removed when the reply lands.
    pending: DashMap<String, oneshot::Sender<bool>>,
    persistent: Mutex<Vec<PersistentGrant>>,
    auto_approved_sessions: DashMap<String, ()>,
    auto_approved_agents: DashMap<String, ()>,
    /// Fallback directory for bare-name paths.
    workdir: PathBuf,
}

impl PermissionService {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            events: Arc::new(Broker::new()),
            pending: DashMap::new(),
            persistent: Mutex::new(Vec::new()),
            auto_approved_sessions: DashMap::new(),
            auto_approved_agents: DashMap::new(),
            workdir,
        }
    }

    /// Broker publishing a `Created` event for every interactive ask.
    pub fn events(&self) -> Arc<Broker<PermissionRequest>> {
        Arc::clone(&self.events)
    }

    /// Gate one tool call.  Returns true when the call may proceed.
    ///
    /// Blocks on the UI reply channel when no auto-approval or persistent
    /// grant applies; `cancel` aborts the wait and counts as denial.
    pub async fn request(&self, cancel: &CancellationToken, req: CreatePermissionRequest) -> bool {
        if self.auto_approved_agents.contains_key(&req.session_id) {
            return true;
        }
        if self.auto_approved_sessions.contains_key(&req.session_id) {
            return true;
        }

        let dir = self.resolve_dir(&req.path);
        {
            let grants = self.persistent.lock().unwrap();
            let hit = grants.iter().any(|g| {
                g.session_id == req.session_id
                    && g.tool_name == req.tool_name
                    && g.action == req.action
                    && g.path == dir
            });
            if hit {
                debug!(tool = %req.tool_name, path = %req.path, "persistent grant matched");
                return true;
            }
        }

        let request = PermissionRequest {
            id: Uuid::new_v4().to_string(),
            session_id: req.session_id,
            tool_name: req.tool_name,
            action: req.action,
            path: req.path,
            description: req.description,
            params: req.params,
        };
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request.id.clone(), tx);
        self.events
            .publish(EventKind::Created, request.clone())
            .await;

        tokio::select! {
            granted = rx => granted.unwrap_or(false),
            _ = cancel.cancelled() => {
                self.pending.remove(&request.id);
                false
            }
        }
    }

    /// Approve a pending request for this one call.
    pub fn grant(&self, req: &PermissionRequest) {
        self.reply(&req.id, true);
    }

    /// Approve a pending request and remember the (session, tool, action,
    /// directory) tuple for the rest of the process lifetime.
    pub fn grant_persistent(&self, req: &PermissionRequest) {
        self.reply(&req.id, true);
        let grant = PersistentGrant {
            session_id: req.session_id.clone(),
            tool_name: req.tool_name.clone(),
            action: req.action.clone(),
            path: self.resolve_dir(&req.path),
        };
        let mut grants = self.persistent.lock().unwrap();
        if !grants.contains(&grant) {
            grants.push(grant);
        }
    }

    /// Reject a pending request.
    pub fn deny(&self, req: &PermissionRequest) {
        self.reply(&req.id, false);
    }

    /// Every future request in `session_id` is approved without asking.
    /// Idempotent.
    pub fn auto_approve_session(&self, session_id: impl Into<String>) {
        self.auto_approved_sessions.insert(session_id.into(), ());
    }

    /// Like [`auto_approve_session`] for sub-agent sessions; kept as its own
    /// set so agent approval can be revoked independently of user sessions.
    pub fn auto_approve_agent(&self, agent_session_id: impl Into<String>) {
        self.auto_approved_agents.insert(agent_session_id.into(), ());
    }

    fn reply(&self, id: &str, granted: bool) {
        if let Some((_, tx)) = self.pending.remove(id) {
            let _ = tx.send(granted);
        }
    }

    /// Resolve a request path to the directory persistent grants match on:
    /// the path's parent, or the working directory for bare names.
    fn resolve_dir(&self, path: &str) -> PathBuf {
        match Path::new(path).parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => self.workdir.clone(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn service() -> Arc<PermissionService> {
        Arc::new(PermissionService::new(PathBuf::from("/work")))
    }

    fn ask(session: &str, tool: &str, action: &str, path: &str) -> CreatePermissionRequest {
        CreatePermissionRequest {
            session_id: session.into(),
            tool_name: tool.into(),
            action: action.into(),
            path: path.into(),
            description: format!("{tool} {action} {path}"),
            params: None,
        }
    }

    #[tokio::test]
    async fn auto_approved_session_never_publishes() {
        let svc = service();
        svc.auto_approve_session("s1");
        let mut rx = svc.events().subscribe().await;

        let granted = svc
            .request(&CancellationToken::new(), ask("s1", "edit", "write", "/repo/a.rs"))
            .await;
        assert!(granted);
        assert!(rx.try_recv().is_err(), "no event should have been published");
    }

    #[tokio::test]
    async fn auto_approved_agent_short_circuits() {
        let svc = service();
        svc.auto_approve_agent("task-session");
        assert!(
            svc.request(
                &CancellationToken::new(),
                ask("task-session", "bash", "execute", "cargo test")
            )
            .await
        );
    }

    #[tokio::test]
    async fn grant_resolves_blocking_request() {
        let svc = service();
        let mut rx = svc.events().subscribe().await;

        let waiter = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.request(&CancellationToken::new(), ask("s1", "edit", "write", "/repo/a.rs"))
                    .await
            })
        };

        let ev = rx.recv().await.unwrap();
        svc.grant(&ev.payload);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn deny_resolves_blocking_request_with_false() {
        let svc = service();
        let mut rx = svc.events().subscribe().await;

        let waiter = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.request(&CancellationToken::new(), ask("s1", "bash", "execute", "rm -rf /"))
                    .await
            })
        };

        let ev = rx.recv().await.unwrap();
        svc.deny(&ev.payload);
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn persistent_grant_matches_same_directory() {
        let svc = service();
        let mut rx = svc.events().subscribe().await;

        // First ask: goes interactive, approved persistently.
        let waiter = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.request(&CancellationToken::new(), ask("s1", "edit", "write", "/repo/src/a.go"))
                    .await
            })
        };
        let ev = rx.recv().await.unwrap();
        svc.grant_persistent(&ev.payload);
        assert!(waiter.await.unwrap());

        // Second ask in the same directory: no event, immediate grant.
        let granted = svc
            .request(&CancellationToken::new(), ask("s1", "edit", "write", "/repo/src/b.go"))
            .await;
        assert!(granted);
        assert!(rx.try_recv().is_err(), "persistent grant must not publish");
    }

    #[tokio::test]
    async fn persistent_grant_does_not_match_other_directory() {
        let svc = service();
        let mut rx = svc.events().subscribe().await;

        let waiter = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.request(&CancellationToken::new(), ask("s1", "edit", "write", "/repo/src/a.go"))
                    .await
            })
        };
        svc.grant_persistent(&rx.recv().await.unwrap().payload);
        waiter.await.unwrap();

        // Different directory: must go interactive again.
        let waiter = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.request(
                    &CancellationToken::new(),
                    ask("s1", "edit", "write", "/repo/other/b.go"),
                )
                .await
            })
        };
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.payload.path, "/repo/other/b.go");
        svc.deny(&ev.payload);
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn persistent_grant_is_scoped_to_session_tool_and_action() {
        let svc = service();
        let mut rx = svc.events().subscribe().await;

        let waiter = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.request(&CancellationToken::new(), ask("s1", "edit", "write", "/repo/src/a.go"))
                    .await
            })
        };
        svc.grant_persistent(&rx.recv().await.unwrap().payload);
        waiter.await.unwrap();

        // Different session: interactive.
        let waiter = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.request(&CancellationToken::new(), ask("s2", "edit", "write", "/repo/src/a.go"))
                    .await
            })
        };
        let ev = rx.recv().await.unwrap();
        svc.deny(&ev.payload);
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn bare_name_resolves_to_workdir() {
        let svc = service();
        let mut rx = svc.events().subscribe().await;

        let waiter = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.request(&CancellationToken::new(), ask("s1", "bash", "execute", "make"))
                    .await
            })
        };
        svc.grant_persistent(&rx.recv().await.unwrap().payload);
        waiter.await.unwrap();

        // Another bare name in the same session/tool/action: matched via the
        // workdir fallback.
        let granted = svc
            .request(&CancellationToken::new(), ask("s1", "bash", "execute", "ls"))
            .await;
        assert!(granted);
    }

    #[tokio::test]
    async fn cancellation_aborts_wait_as_denial() {
        let svc = service();
        let cancel = CancellationToken::new();

        let waiter = {
            let svc = Arc::clone(&svc);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                svc.request(&cancel, ask("s1", "edit", "write", "/repo/a.rs")).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert!(!waiter.await.unwrap());
        // The reply slot is cleaned up.
        assert!(svc.pending.is_empty());
    }

    #[tokio::test]
    async fn reply_channel_is_removed_after_reply() {
        let svc = service();
        let mut rx = svc.events().subscribe().await;

        let waiter = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.request(&CancellationToken::new(), ask("s1", "edit", "write", "/repo/a.rs"))
                    .await
            })
        };
        let ev = rx.recv().await.unwrap();
        svc.grant(&ev.payload);
        waiter.await.unwrap();
        assert!(svc.pending.is_empty());
        // A second grant for the same id is a no-op.
        svc.grant(&ev.payload);
    }
}
