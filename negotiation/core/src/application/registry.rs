// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Session registry
//
// The explicit registry of sessions, keyed by session id. Registration
// happens exactly once at CREATED; the active entry (command handle +
// live snapshot) is removed when the session enters a terminal state and
// its final snapshot moves to the read-only terminal map, so lookups keep
// working after completion.

use crate::domain::session::{SessionId, SessionSnapshot};
use crate::application::coordinator::SessionHandle;
use dashmap::DashMap;
use tokio::sync::watch;

struct ActiveEntry {
    handle: SessionHandle,
    snapshot: watch::Receiver<SessionSnapshot>,
}

#[derive(Default)]
pub struct SessionRegistry {
    active: DashMap<SessionId, ActiveEntry>,
    terminal: DashMap<SessionId, SessionSnapshot>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: SessionHandle, snapshot: watch::Receiver<SessionSnapshot>) {
        self.active
            .insert(handle.session_id(), ActiveEntry { handle, snapshot });
    }

    /// Retire an active session, retaining its final snapshot read-only.
    pub fn unregister(&self, session_id: SessionId, final_snapshot: SessionSnapshot) {
        self.active.remove(&session_id);
        self.terminal.insert(session_id, final_snapshot);
    }

    /// Command handle for an active session.
    pub fn handle(&self, session_id: SessionId) -> Option<SessionHandle> {
        self.active.get(&session_id).map(|entry| entry.handle.clone())
    }

    /// Live snapshot receiver for an active session.
    pub fn watch(&self, session_id: SessionId) -> Option<watch::Receiver<SessionSnapshot>> {
        self.active.get(&session_id).map(|entry| entry.snapshot.clone())
    }

    /// Current snapshot of a session, active or terminal.
    pub fn get_snapshot(&self, session_id: SessionId) -> Option<SessionSnapshot> {
        if let Some(entry) = self.active.get(&session_id) {
            return Some(entry.snapshot.borrow().clone());
        }
        self.terminal
            .get(&session_id)
            .map(|snapshot| snapshot.clone())
    }

    /// Snapshots of every active session (the state checker's view).
    pub fn active_snapshots(&self) -> Vec<SessionSnapshot> {
        self.active
            .iter()
            .map(|entry| entry.snapshot.borrow().clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminal.len()
    }

    /// Ids of terminal sessions spawned by `parent` (child negotiations).
    pub fn children_of(&self, parent: SessionId) -> Vec<SessionId> {
        let mut children: Vec<SessionId> = self
            .active
            .iter()
            .filter(|entry| entry.snapshot.borrow().parent_session_id == Some(parent))
            .map(|entry| *entry.key())
            .collect();
        children.extend(
            self.terminal
                .iter()
                .filter(|entry| entry.parent_session_id == Some(parent))
                .map(|entry| *entry.key()),
        );
        children
    }
}
