//! Sessions: one client's identifier bound to its event channel and engine.
//!
//! - `SessionId`: opaque, unguessable, never reused within the process
//! - `Session`: owns the channel lifecycle and dispatches inbound messages
//! - `LifecycleState`: `Connecting → Open → Closing → Closed`

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::channel::{CloseReason, EventChannel};
use crate::engine::{HandlerOutcome, Outbound, ProtocolEngine, run_with_watchdog};
use crate::error::{TransportError, TransportResult};
use crate::metrics::AtomicMetrics;

/// Maximum accepted session ID length (256 characters).
///
/// Longer identifiers supplied by clients are treated as unknown.
pub const MAX_SESSION_ID_LEN: usize = 256;

/// Unique identifier for a session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate an identifier from 122 random bits and a process-wide sequence number.
    ///
    /// The random part keeps identifiers unguessable; the fixed-width hex
    /// prefix followed by the sequence suffix guarantees two calls with
    /// distinct `sequence` values never produce the same identifier.
    pub fn generate(sequence: u64) -> Self {
        Self(format!("{}{:x}", Uuid::new_v4().simple(), sequence))
    }

    /// Create a session ID from a string with length validation.
    ///
    /// Returns `None` if the ID exceeds [`MAX_SESSION_ID_LEN`].
    pub fn try_from_string(s: impl Into<String>) -> Option<Self> {
        let string = s.into();
        (string.len() <= MAX_SESSION_ID_LEN).then_some(Self(string))
    }

    /// Get the session ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the session ID and return the inner string.
    pub fn into_string(self) -> String {
        self.0
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

impl From<&str> for SessionId {
    /// Wraps an identifier chosen by the caller (tests, fixed stdio sessions).
    ///
    /// # Panics
    ///
    /// Panics if the string exceeds [`MAX_SESSION_ID_LEN`].
    fn from(s: &str) -> Self {
        assert!(
            s.len() <= MAX_SESSION_ID_LEN,
            "Session ID length {} exceeds maximum allowed length {}",
            s.len(),
            MAX_SESSION_ID_LEN
        );
        Self(s.to_string())
    }
}

/// Lifecycle of a session from accept to teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Connection accepted, identifier not yet assigned.
    Connecting,
    /// Registered, identifier delivered, channel accepting frames.
    Open,
    /// Teardown started; no new frames or deliveries accepted.
    Closing,
    /// Removed from the registry and resources released. Terminal.
    Closed,
}

/// Server-side binding of one client's identifier to its channel and engine.
pub struct Session {
    id: SessionId,
    channel: Arc<EventChannel>,
    engine: RwLock<Option<Arc<dyn ProtocolEngine>>>,
    state: Mutex<LifecycleState>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    terminated: AtomicBool,
    opened: AtomicBool,
    starting: CancellationToken,
    cancel: CancellationToken,
    inflight: TaskTracker,
    handler_timeout: Option<Duration>,
    metrics: Arc<AtomicMetrics>,
}

impl Session {
    /// Bind a freshly opened channel to an identifier and the shared engine.
    ///
    /// The session starts in [`LifecycleState::Connecting`]; it is not
    /// reachable by clients until it has been registered.
    pub fn new(
        id: SessionId,
        channel: Arc<EventChannel>,
        engine: Arc<dyn ProtocolEngine>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            channel,
            engine: RwLock::new(Some(engine)),
            state: Mutex::new(LifecycleState::Connecting),
            created_at: now,
            last_activity: Mutex::new(now),
            terminated: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            starting: CancellationToken::new(),
            cancel: CancellationToken::new(),
            inflight: TaskTracker::new(),
            handler_timeout: None,
            metrics: Arc::new(AtomicMetrics::new()),
        }
    }

    /// Abandon engine invocations that run longer than `timeout`.
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Record frame counters into a shared metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<AtomicMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The session's event channel.
    pub fn channel(&self) -> &Arc<EventChannel> {
        &self.channel
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Time elapsed since the session was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time elapsed since the last inbound message.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Whether teardown has started.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Handle for writing engine output to this session.
    pub fn outbound(&self) -> Outbound {
        Outbound::new(self.id.clone(), self.channel.clone(), self.metrics.clone())
    }

    /// Hand an inbound message to the engine without waiting for it.
    ///
    /// Each message is processed on its own task, cancelled when the session
    /// terminates and optionally bounded by the handler watchdog.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SessionClosed`] if the session has been
    /// terminated or its channel is no longer open.
    pub fn deliver_inbound(&self, message: Bytes) -> TransportResult<()> {
        if self.is_terminated() || !self.channel.is_open() {
            return Err(TransportError::SessionClosed(self.id.to_string()));
        }
        let engine = self
            .engine
            .read()
            .clone()
            .ok_or_else(|| TransportError::SessionClosed(self.id.to_string()))?;

        *self.last_activity.lock() = Instant::now();

        let id = self.id.clone();
        let outbound = self.outbound();
        let cancel = self.cancel.clone();
        let limit = self.handler_timeout;
        let metrics = self.metrics.clone();
        let span = info_span!("handle", session_id = %id);

        self.inflight.spawn(
            async move {
                tokio::select! {
                    () = cancel.cancelled() => debug!("handler cancelled by session teardown"),
                    outcome = run_with_watchdog(engine.handle(&id, message, outbound), limit) => {
                        match outcome {
                            HandlerOutcome::Completed(Ok(())) => {}
                            HandlerOutcome::Completed(Err(err)) => {
                                warn!(error = %err, "engine failed to handle message");
                            }
                            HandlerOutcome::TimedOut(limit) => {
                                metrics.handler_timeouts.fetch_add(1, Ordering::Relaxed);
                                warn!(?limit, "engine handler exceeded watchdog limit");
                            }
                        }
                    }
                }
            }
            .instrument(span),
        );
        Ok(())
    }

    /// Wait until every engine invocation started so far has finished.
    pub async fn drain_inflight(&self) {
        self.inflight.close();
        self.inflight.wait().await;
        self.inflight.reopen();
    }

    /// Close the channel and unbind the engine. Idempotent.
    ///
    /// Returns once the channel is closed, also when another caller (or the
    /// channel's own disconnect detection) started the teardown.
    pub async fn terminate(&self) {
        self.begin_teardown();
        self.channel.close().await;
    }

    /// Resolves once the session's channel has closed, for any reason.
    pub async fn closed(&self) {
        self.channel.closed().await;
    }

    /// Register for the channel's close notification.
    ///
    /// A disconnect detected by the channel starts the same teardown as
    /// [`Session::terminate`].
    pub(crate) fn watch_channel(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.channel.on_close(move |reason| {
            if let Some(session) = weak.upgrade() {
                if reason != CloseReason::Local {
                    debug!(session_id = %session.id, ?reason, "channel closed by peer");
                }
                session.begin_teardown();
            }
        });
    }

    /// `Connecting → Open`. Fails once teardown has started.
    pub(crate) fn mark_open(&self) -> bool {
        let mut state = self.state.lock();
        if *state != LifecycleState::Connecting || self.is_terminated() {
            return false;
        }
        *state = LifecycleState::Open;
        self.opened.store(true, Ordering::Release);
        true
    }

    /// Whether the session ever reached `Open`.
    pub(crate) fn was_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Held by the opening flow; released when it returns or is dropped.
    pub(crate) fn startup_guard(&self) -> DropGuard {
        self.starting.clone().drop_guard()
    }

    /// Resolves once the opening flow has let go of the session.
    pub(crate) async fn startup_finished(&self) {
        self.starting.cancelled().await;
    }

    pub(crate) fn mark_closed(&self) {
        *self.state.lock() = LifecycleState::Closed;
    }

    fn begin_teardown(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Closed {
                *state = LifecycleState::Closing;
            }
        }
        self.cancel.cancel();
        self.engine.write().take();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("channel", &self.channel)
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}
