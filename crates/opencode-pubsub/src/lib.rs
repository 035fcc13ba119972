// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Typed publish/subscribe broker.
//!
//! One broker per event source (sessions, messages, permission requests).
//! Subscribers receive events over bounded channels; a subscriber that stops
//! draining its channel is dropped so that a stalled UI can never hold up
//! the agent loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Per-subscriber queue depth.  Large enough to absorb a burst of streaming
/// deltas, small enough that a dead subscriber is detected quickly.
const SUBSCRIBER_BUFFER: usize = 64;

/// How long a publish waits on a full subscriber queue before dropping the
/// subscriber.  This is the only backpressure policy: no retries, no
/// unbounded buffering.
const FULL_QUEUE_GRACE: Duration = Duration::from_millis(100);

/// What happened to the published payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// A single published event.
#[derive(Debug, Clone)]
pub struct Event<T> {
    pub kind: EventKind,
    pub payload: T,
}

struct Subscriber<T> {
    id: u64,
    tx: mpsc::Sender<Event<T>>,
}

/// Generic broker.  `publish` fans an event out to every live subscriber in
/// subscription order; publishes are serialized so each subscriber observes
/// events in publish order.
pub struct Broker<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl<T: Clone + Send + 'static> Broker<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a new subscriber.  The returned receiver yields events until
    /// the broker is closed or the subscriber falls too far behind and is
    /// dropped.
    pub async fn subscribe(&self) -> mpsc::Receiver<Event<T>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if self.closed.load(Ordering::SeqCst) {
            // Closed broker: hand back an already-closed channel so callers
            // uniformly observe end-of-stream instead of a special error.
            return rx;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().await.push(Subscriber { id, tx });
        rx
    }

    /// Fan `payload` out to all subscribers.  Never blocks longer than
    /// `FULL_QUEUE_GRACE` per slow subscriber; slow or closed subscribers are
    /// removed.  No-op after `close()`.
    pub async fn publish(&self, kind: EventKind, payload: T) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut subs = self.subscribers.lock().await;
        let mut dead: Vec<u64> = Vec::new();
        for sub in subs.iter() {
            let event = Event {
                kind,
                payload: payload.clone(),
            };
            match sub.tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(sub.id),
                Err(mpsc::error::TrySendError::Full(event)) => {
                    // One bounded chance to catch up, then the subscriber is gone.
                    if sub.tx.send_timeout(event, FULL_QUEUE_GRACE).await.is_err() {
                        debug!(subscriber = sub.id, "dropping slow pubsub subscriber");
                        dead.push(sub.id);
                    }
                }
            }
        }
        if !dead.is_empty() {
            subs.retain(|s| !dead.contains(&s.id));
        }
    }

    /// Terminate all subscriptions and reject further publishes.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders closes every subscriber channel.
        self.subscribers.lock().await.clear();
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

impl<T: Clone + Send + 'static> Default for Broker<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
