//! Session registry: the one map shared by connect, disconnect and routing flows.
//!
//! The lock guards map operations only. It is never held across an `.await`,
//! so delivery on one session never waits behind registry traffic for another.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use crate::error::{TransportError, TransportResult};
use crate::session::{LifecycleState, MAX_SESSION_ID_LEN, Session, SessionId};

/// Concurrency-safe mapping from identifier to live session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    sequence: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh identifier.
    ///
    /// Identifiers from one registry are never repeated, so a stale post can
    /// never be routed to a newer session.
    pub fn generate_id(&self) -> SessionId {
        SessionId::generate(self.sequence.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert a fully constructed session under its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::DuplicateIdentifier`] if the identifier is
    /// already registered; the caller must generate a new one and retry.
    pub fn register(&self, session: Arc<Session>) -> TransportResult<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(session.id()) {
            return Err(TransportError::DuplicateIdentifier(session.id().to_string()));
        }
        trace!(session_id = %session.id(), "registered session");
        sessions.insert(session.id().clone(), session);
        Ok(())
    }

    /// Look up a live session.
    ///
    /// Only `Open` sessions are visible: one still connecting, or whose
    /// teardown has started, is reported as not found.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SessionNotFound`] for unknown or oversize
    /// identifiers and for sessions that are not open.
    pub fn lookup(&self, id: &str) -> TransportResult<Arc<Session>> {
        if id.len() > MAX_SESSION_ID_LEN {
            return Err(TransportError::SessionNotFound(truncate(id)));
        }
        let session = self.sessions.read().get(id).cloned();
        match session {
            Some(session) if session.state() == LifecycleState::Open && !session.is_terminated() => {
                Ok(session)
            }
            _ => Err(TransportError::SessionNotFound(id.to_string())),
        }
    }

    /// Remove a session if present. Absent identifiers are a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            trace!(session_id = %id, "removed session");
        }
        removed
    }

    /// Remove and return every session.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        self.sessions.write().drain().map(|(_, s)| s).collect()
    }

    /// Number of registered sessions. Diagnostics only.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Snapshot of registered identifiers. Diagnostics only.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }
}

fn truncate(id: &str) -> String {
    let mut end = MAX_SESSION_ID_LEN.min(id.len());
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &id[..end])
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}
