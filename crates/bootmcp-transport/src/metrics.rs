//! Transport metrics types.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A serializable snapshot of transport counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMetrics {
    /// Sessions opened since start.
    pub sessions_opened: u64,

    /// Opened sessions fully torn down since start.
    pub sessions_closed: u64,

    /// Sessions currently open.
    pub active_sessions: u64,

    /// Identifier collisions that forced a regeneration.
    pub identifier_collisions: u64,

    /// Engine frames written to channels.
    pub frames_sent: u64,

    /// Engine frames that could not be written.
    pub frames_failed: u64,

    /// Total payload bytes written to channels.
    pub bytes_sent: u64,

    /// Inbound messages handed to an engine.
    pub messages_routed: u64,

    /// Inbound messages rejected at the router.
    pub messages_rejected: u64,

    /// Total inbound payload bytes routed.
    pub bytes_received: u64,

    /// Engine invocations stopped by the handler watchdog.
    pub handler_timeouts: u64,
}

/// A lock-free, atomic structure for metrics updates on hot paths.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    /// Sessions opened since start.
    pub sessions_opened: AtomicU64,
    /// Opened sessions fully torn down since start.
    pub sessions_closed: AtomicU64,
    /// Sessions currently open.
    pub active_sessions: AtomicU64,
    /// Identifier collisions that forced a regeneration.
    pub identifier_collisions: AtomicU64,
    /// Engine frames written to channels.
    pub frames_sent: AtomicU64,
    /// Engine frames that could not be written.
    pub frames_failed: AtomicU64,
    /// Total payload bytes written to channels.
    pub bytes_sent: AtomicU64,
    /// Inbound messages handed to an engine.
    pub messages_routed: AtomicU64,
    /// Inbound messages rejected at the router.
    pub messages_rejected: AtomicU64,
    /// Total inbound payload bytes routed.
    pub bytes_received: AtomicU64,
    /// Engine invocations stopped by the handler watchdog.
    pub handler_timeouts: AtomicU64,
}

impl AtomicMetrics {
    /// Creates a new `AtomicMetrics` instance with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn frame_failed(&self) {
        self.frames_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_routed(&self, bytes: usize) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn message_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Creates a serializable snapshot of the current values.
    pub fn snapshot(&self) -> TransportMetrics {
        TransportMetrics {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            identifier_collisions: self.identifier_collisions.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            handler_timeouts: self.handler_timeouts.load(Ordering::Relaxed),
        }
    }
}
