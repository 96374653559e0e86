// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Registry of live streaming sessions.
//!
//! Every open SSE connection owns exactly one registry entry. Entries are created only after the
//! gateway authenticated the client and are removed through a single event path: the connection
//! holds a [`CloseNotifier`] that emits [`SessionEvent::Closed`] when dropped, and the registry
//! applies those events in [`SessionRegistry::handle_event`].

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::SystemTime;

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Number of random bytes behind a session id (256 bits).
pub const SESSION_ID_BYTES: usize = 32;

/// Opaque, unguessable session identifier (hex-encoded).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn random() -> Self {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Lifecycle notification consumed by [`SessionRegistry::handle_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Closed { id: SessionId, serial: u64 },
}

#[derive(Debug)]
struct Registered<S> {
    serial: u64,
    created_at: SystemTime,
    stream: S,
}

/// Close hook for one registration. Dropping it reports the session as closed.
#[derive(Debug)]
pub struct CloseNotifier {
    id: SessionId,
    serial: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Drop for CloseNotifier {
    fn drop(&mut self) {
        // The receiver is gone only when the registry itself was dropped.
        let _ = self.events.send(SessionEvent::Closed {
            id: self.id.clone(),
            serial: self.serial,
        });
    }
}

/// Snapshot of a registered session, as returned by [`SessionRegistry::drain`].
#[derive(Debug)]
pub struct ClosedSession<S> {
    pub id: SessionId,
    pub created_at: SystemTime,
    pub stream: S,
}

/// Process-local map from session id to stream handle.
#[derive(Debug)]
pub struct SessionRegistry<S> {
    sessions: Mutex<HashMap<SessionId, Registered<S>>>,
    next_serial: AtomicU64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<S: Clone> SessionRegistry<S> {
    /// Create a registry together with the receiving end of its event channel.
    ///
    /// Pass the receiver to [`SessionRegistry::run_events`] (or apply events manually with
    /// [`SessionRegistry::handle_event`]).
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            next_serial: AtomicU64::new(1),
            events,
        });
        (registry, rx)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Registered<S>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `stream` under a freshly minted id.
    pub fn create(&self, stream: S) -> (SessionId, CloseNotifier) {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.lock();
        let id = loop {
            let candidate = SessionId::random();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        sessions.insert(
            id.clone(),
            Registered {
                serial,
                created_at: SystemTime::now(),
                stream,
            },
        );
        drop(sessions);

        debug!(session = %id, serial, "session registered");
        let notifier = CloseNotifier {
            id: id.clone(),
            serial,
            events: self.events.clone(),
        };
        (id, notifier)
    }

    pub fn lookup(&self, id: &str) -> Option<S> {
        self.lock().get(id).map(|entry| entry.stream.clone())
    }

    /// Remove a session. Removing an unknown or already removed id is a no-op.
    pub fn remove(&self, id: &str) -> Option<S> {
        let removed = self.lock().remove(id).map(|entry| entry.stream);
        if removed.is_some() {
            info!(session = %id, "session removed");
        }
        removed
    }

    fn remove_if_current(&self, id: &SessionId, serial: u64) -> Option<S> {
        let mut sessions = self.lock();
        if sessions.get(id).is_some_and(|entry| entry.serial == serial) {
            let removed = sessions.remove(id).map(|entry| entry.stream);
            drop(sessions);
            info!(session = %id, "session closed");
            removed
        } else {
            None
        }
    }

    pub fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Closed { id, serial } => {
                self.remove_if_current(&id, serial);
            }
        }
    }

    /// Apply events until every [`CloseNotifier`] and the registry itself are gone.
    pub async fn run_events(
        registry: Weak<Self>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(registry) = registry.upgrade() else {
                break;
            };
            registry.handle_event(event);
        }
    }

    /// Remove and return every registered session.
    pub fn drain(&self) -> Vec<ClosedSession<S>> {
        self.lock()
            .drain()
            .map(|(id, entry)| ClosedSession {
                id,
                created_at: entry.created_at,
                stream: entry.stream,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn created_at(&self, id: &str) -> Option<SystemTime> {
        self.lock().get(id).map(|entry| entry.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn session_ids_are_256_bit_hex() {
        let id = SessionId::random();
        assert_eq!(id.as_str().len(), SESSION_ID_BYTES * 2);
        assert_eq!(hex::decode(id.as_str()).expect("hex").len(), SESSION_ID_BYTES);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn concurrently_open_sessions_never_share_an_id() {
        let (registry, _events) = SessionRegistry::<u32>::new();
        let mut ids = HashSet::new();
        let mut notifiers = Vec::new();
        for n in 0..512 {
            let (id, notifier) = registry.create(n);
            assert!(ids.insert(id), "duplicate session id");
            notifiers.push(notifier);
        }
        assert_eq!(registry.len(), 512);
    }

    #[test]
    fn lookup_finds_registered_stream_until_removed() {
        let (registry, _events) = SessionRegistry::new();
        let (id, _notifier) = registry.create("stream-a");

        assert_eq!(registry.lookup(id.as_str()), Some("stream-a"));
        assert!(registry.created_at(id.as_str()).is_some());
        assert_eq!(registry.remove(id.as_str()), Some("stream-a"));
        assert_eq!(registry.lookup(id.as_str()), None);
    }

    #[test]
    fn lookup_of_unknown_id_is_none() {
        let (registry, _events) = SessionRegistry::<()>::new();
        assert_eq!(registry.lookup("does-not-exist"), None);
    }

    #[test]
    fn remove_is_idempotent() {
        let (registry, _events) = SessionRegistry::new();
        let (id, _notifier) = registry.create(7_u8);

        assert_eq!(registry.remove(id.as_str()), Some(7));
        assert_eq!(registry.remove(id.as_str()), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn dropping_the_notifier_emits_a_close_event_that_removes_the_session() {
        let (registry, mut events) = SessionRegistry::new();
        let (id, notifier) = registry.create('x');
        drop(notifier);

        let event = events.try_recv().expect("close event");
        assert_eq!(event, SessionEvent::Closed { id: id.clone(), serial: 1 });
        registry.handle_event(event);
        assert_eq!(registry.lookup(id.as_str()), None);
    }

    #[test]
    fn stale_close_event_does_not_remove_a_newer_registration() {
        let (registry, _events) = SessionRegistry::new();
        let (id, _notifier) = registry.create("current");

        registry.handle_event(SessionEvent::Closed { id: id.clone(), serial: 999 });
        assert_eq!(registry.lookup(id.as_str()), Some("current"));
    }

    #[test]
    fn drain_empties_the_registry() {
        let (registry, _events) = SessionRegistry::new();
        let (a, _na) = registry.create(1);
        let (b, _nb) = registry.create(2);

        let mut drained = registry.drain().into_iter().map(|s| s.id).collect::<Vec<_>>();
        drained.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        let mut expected = vec![a, b];
        expected.sort_by(|x, y| x.as_str().cmp(y.as_str()));

        assert_eq!(drained, expected);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn event_loop_applies_close_events() {
        let (registry, events) = SessionRegistry::new();
        let task = tokio::spawn(SessionRegistry::run_events(Arc::downgrade(&registry), events));

        let (id, notifier) = registry.create(1_u16);
        drop(notifier);
        for _ in 0..50 {
            if registry.lookup(id.as_str()).is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.lookup(id.as_str()), None);
        task.abort();
    }
}
