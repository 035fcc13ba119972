// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-process reference store.
//!
//! Backs tests and the default binary.  All state is behind one mutex per
//! collection; callers receive clones, so no lock is ever held across an
//! await point outside this module.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use opencode_pubsub::{Broker, EventKind};

use crate::{Message, MessageStore, Result, Session, SessionStore, StoreError};

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, Session>,
    messages: HashMap<String, Message>,
    /// Message ids per session, in creation order.
    session_messages: HashMap<String, Vec<String>>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    session_events: Arc<Broker<Session>>,
    message_events: Arc<Broker<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            session_events: Arc::new(Broker::new()),
            message_events: Arc::new(Broker::new()),
        }
    }

    /// Broker publishing session created/updated/deleted events.
    pub fn session_events(&self) -> Arc<Broker<Session>> {
        Arc::clone(&self.session_events)
    }

    /// Broker publishing message created/updated/deleted events.
    pub fn message_events(&self) -> Arc<Broker<Message>> {
        Arc::clone(&self.message_events)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, parent_session_id: Option<String>) -> Result<Session> {
        let session = Session::new(parent_session_id);
        {
            let mut t = self.tables.lock().await;
            t.sessions.insert(session.id.clone(), session.clone());
        }
        self.session_events
            .publish(EventKind::Created, session.clone())
            .await;
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Session> {
        let t = self.tables.lock().await;
        t.sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let t = self.tables.lock().await;
        let mut sessions: Vec<Session> = t.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        let mut updated = session.clone();
        updated.updated_at = chrono::Utc::now();
        {
            let mut t = self.tables.lock().await;
            if !t.sessions.contains_key(&session.id) {
                return Err(StoreError::NotFound(format!("session {}", session.id)));
            }
            t.sessions.insert(session.id.clone(), updated.clone());
        }
        self.session_events
            .publish(EventKind::Updated, updated)
            .await;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        let session = {
            let mut t = self.tables.lock().await;
            let session = t
                .sessions
                .remove(id)
                .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
            if let Some(ids) = t.session_messages.remove(id) {
                for mid in ids {
                    t.messages.remove(&mid);
                }
            }
            session
        };
        self.session_events
            .publish(EventKind::Deleted, session)
            .await;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(&self, message: Message) -> Result<Message> {
        {
            let mut t = self.tables.lock().await;
            if !t.sessions.contains_key(&message.session_id) {
                return Err(StoreError::NotFound(format!(
                    "session {}",
                    message.session_id
                )));
            }
            t.session_messages
                .entry(message.session_id.clone())
                .or_default()
                .push(message.id.clone());
            t.messages.insert(message.id.clone(), message.clone());
        }
        self.message_events
            .publish(EventKind::Created, message.clone())
            .await;
        Ok(message)
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        let t = self.tables.lock().await;
        t.messages
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("message {id}")))
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let t = self.tables.lock().await;
        let ids = match t.session_messages.get(session_id) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .iter()
            .filter_map(|id| t.messages.get(id).cloned())
            .collect())
    }

    async fn update_message(&self, message: &Message) -> Result<()> {
        {
            let mut t = self.tables.lock().await;
            if !t.messages.contains_key(&message.id) {
                return Err(StoreError::NotFound(format!("message {}", message.id)));
            }
            t.messages.insert(message.id.clone(), message.clone());
        }
        self.message_events
            .publish(EventKind::Updated, message.clone())
            .await;
        Ok(())
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        let message = {
            let mut t = self.tables.lock().await;
            let message = t
                .messages
                .remove(id)
                .ok_or_else(|| StoreError::NotFound(format!("message {id}")))?;
            if let Some(ids) = t.session_messages.get_mut(&message.session_id) {
                ids.retain(|mid| mid != id);
            }
            message
        };
        self.message_events
            .publish(EventKind::Deleted, message)
            .await;
        Ok(())
    }

    async fn delete_session_messages(&self, session_id: &str) -> Result<()> {
        let removed: Vec<Message> = {
            let mut t = self.tables.lock().await;
            let ids = t.session_messages.remove(session_id).unwrap_or_default();
            ids.iter()
                .filter_map(|id| t.messages.remove(id))
                .collect()
        };
        for message in removed {
            self.message_events
                .publish(EventKind::Deleted, message)
                .await;
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    #[tokio::test]
    async fn create_and_get_session() {
        let store = MemoryStore::new();
        let s = store.create_session(None).await.unwrap();
        let got = store.get_session(&s.id).await.unwrap();
        assert_eq!(got.id, s.id);
    }

    #[tokio::test]
    async fn get_unknown_session_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_session("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn messages_list_in_creation_order() {
        let store = MemoryStore::new();
        let s = store.create_session(None).await.unwrap();
        for i in 0..5 {
            store
                .create_message(Message::user(&s.id, format!("msg {i}")))
                .await
                .unwrap();
        }
        let msgs = store.list_messages(&s.id).await.unwrap();
        let texts: Vec<String> = msgs.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn create_message_requires_session() {
        let store = MemoryStore::new();
        let err = store
            .create_message(Message::user("missing", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_message_persists_new_parts() {
        let store = MemoryStore::new();
        let s = store.create_session(None).await.unwrap();
        let mut m = store
            .create_message(Message::new(&s.id, Role::Assistant))
            .await
            .unwrap();
        m.append_text("partial");
        store.update_message(&m).await.unwrap();
        assert_eq!(store.get_message(&m.id).await.unwrap().text(), "partial");
    }

    #[tokio::test]
    async fn delete_session_messages_clears_only_that_session() {
        let store = MemoryStore::new();
        let a = store.create_session(None).await.unwrap();
        let b = store.create_session(None).await.unwrap();
        store.create_message(Message::user(&a.id, "a")).await.unwrap();
        store.create_message(Message::user(&b.id, "b")).await.unwrap();

        store.delete_session_messages(&a.id).await.unwrap();
        assert!(store.list_messages(&a.id).await.unwrap().is_empty());
        assert_eq!(store.list_messages(&b.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_publishes_change_events() {
        let store = MemoryStore::new();
        let mut session_rx = store.session_events().subscribe().await;
        let mut message_rx = store.message_events().subscribe().await;

        let s = store.create_session(None).await.unwrap();
        let ev = session_rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::Created);
        assert_eq!(ev.payload.id, s.id);

        store.create_message(Message::user(&s.id, "hi")).await.unwrap();
        let ev = message_rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::Created);
        assert_eq!(ev.payload.session_id, s.id);
    }

    #[tokio::test]
    async fn update_session_bumps_updated_at() {
        let store = MemoryStore::new();
        let mut s = store.create_session(None).await.unwrap();
        let before = s.updated_at;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        s.cost += 0.25;
        store.update_session(&s).await.unwrap();
        let got = store.get_session(&s.id).await.unwrap();
        assert!(got.updated_at > before);
        assert_eq!(got.cost, 0.25);
    }
}
