//! Transport lifecycle controller.
//!
//! Owns the registry and the shared engine, and sequences every connection
//! through `Connecting → Open → Closing → Closed`:
//!
//! 1. `open_session` binds the connection to a channel, registers a session
//!    under a fresh identifier, notifies the engine and pushes the endpoint
//!    frame;
//! 2. a supervisor task waits for the channel to close (peer hang-up, write
//!    failure, local terminate or shutdown) and performs the one teardown.
//!
//! Every cause of teardown converges on the supervisor, so removal from the
//! registry runs exactly once per session, and `on_close` runs exactly once
//! for every session the engine was told about in `on_open`.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::channel::{Connection, EventChannel, Frame};
use crate::config::TransportConfig;
use crate::engine::ProtocolEngine;
use crate::error::{TransportError, TransportResult};
use crate::metrics::{AtomicMetrics, TransportMetrics};
use crate::registry::SessionRegistry;
use crate::router::IngressRouter;
use crate::session::Session;

struct Inner {
    config: TransportConfig,
    engine: Arc<dyn ProtocolEngine>,
    registry: Arc<SessionRegistry>,
    metrics: Arc<AtomicMetrics>,
    shutdown: CancellationToken,
    supervisors: TaskTracker,
}

/// Orchestrates session open/close sequencing and server shutdown.
///
/// Cheap to clone; all clones share the same registry and engine.
#[derive(Clone)]
pub struct TransportController {
    inner: Arc<Inner>,
}

impl TransportController {
    /// Create a controller serving `engine` with the given configuration.
    pub fn new(engine: Arc<dyn ProtocolEngine>, config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                engine,
                registry: Arc::new(SessionRegistry::new()),
                metrics: Arc::new(AtomicMetrics::new()),
                shutdown: CancellationToken::new(),
                supervisors: TaskTracker::new(),
            }),
        }
    }

    /// The transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// The shared session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    /// An ingress router over this controller's registry.
    pub fn router(&self) -> IngressRouter {
        IngressRouter::new(
            self.inner.registry.clone(),
            self.inner.metrics.clone(),
            self.inner.config.max_body_size,
        )
    }

    /// Snapshot of the transport counters.
    pub fn metrics(&self) -> TransportMetrics {
        self.inner.metrics.snapshot()
    }

    /// Whether [`TransportController::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolves once shutdown has started.
    pub async fn shutdown_requested(&self) {
        self.inner.shutdown.cancelled().await;
    }

    /// Accept a connection and bring its session to `Open`.
    ///
    /// The engine's `on_open` has returned before the endpoint frame carrying
    /// the new identifier is written, so no inbound message can reach the
    /// engine ahead of it.
    ///
    /// # Errors
    ///
    /// - [`TransportError::ShuttingDown`] once shutdown has started.
    /// - [`TransportError::DuplicateIdentifier`] if every regeneration attempt
    ///   collided.
    /// - [`TransportError::SessionClosed`] if the connection went away before
    ///   the session opened.
    /// - The channel's error if the endpoint frame could not be written; the
    ///   session is torn down before returning.
    pub async fn open_session(&self, connection: Connection) -> TransportResult<Arc<Session>> {
        if self.is_shutting_down() {
            return Err(TransportError::ShuttingDown);
        }

        let channel = EventChannel::open(connection);
        let session = match self.register(channel.clone()) {
            Ok(session) => session,
            Err(err) => {
                channel.close().await;
                return Err(err);
            }
        };
        let _starting = session.startup_guard();
        session.watch_channel();
        self.supervise(session.clone());

        // A shutdown sweep that ran before the insert above cannot have seen us.
        if self.is_shutting_down() {
            session.terminate().await;
            return Err(TransportError::ShuttingDown);
        }

        if !session.mark_open() {
            return Err(TransportError::SessionClosed(session.id().to_string()));
        }
        self.inner.metrics.session_opened();
        self.inner.engine.on_open(session.id()).await;

        let endpoint = format!(
            "{}?sessionId={}",
            self.inner.config.messages_path,
            session.id()
        );
        if let Err(err) = channel.send(Frame::endpoint(endpoint)).await {
            debug!(session_id = %session.id(), error = %err, "failed to deliver endpoint frame");
            session.terminate().await;
            return Err(err);
        }

        info!(session_id = %session.id(), "session opened");
        Ok(session)
    }

    /// Terminate one session by identifier. Unknown identifiers are a no-op.
    pub async fn close_session(&self, id: &str) {
        if let Ok(session) = self.inner.registry.lookup(id) {
            session.terminate().await;
        }
    }

    /// Close every open channel, clear the registry and wait for teardown.
    ///
    /// New sessions are refused from the moment this is called. Idempotent.
    pub async fn shutdown(&self) {
        let first = !self.inner.shutdown.is_cancelled();
        self.inner.shutdown.cancel();

        let sessions = self.inner.registry.drain();
        if first {
            info!(sessions = sessions.len(), "shutting down transport");
        }
        futures::future::join_all(sessions.iter().map(|s| s.terminate())).await;

        self.inner.supervisors.close();
        self.inner.supervisors.wait().await;
    }

    fn register(&self, channel: Arc<EventChannel>) -> TransportResult<Arc<Session>> {
        let attempts = self.inner.config.max_register_attempts.max(1);
        let mut last = None;
        for _ in 0..attempts {
            let session = Arc::new(
                Session::new(
                    self.inner.registry.generate_id(),
                    channel.clone(),
                    self.inner.engine.clone(),
                )
                .with_handler_timeout(self.inner.config.handler_timeout())
                .with_metrics(self.inner.metrics.clone()),
            );
            match self.inner.registry.register(session.clone()) {
                Ok(()) => return Ok(session),
                Err(err @ TransportError::DuplicateIdentifier(_)) => {
                    self.inner
                        .metrics
                        .identifier_collisions
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    warn!(error = %err, "identifier collision, regenerating");
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or_else(|| TransportError::Internal("no registration attempted".into())))
    }

    fn supervise(&self, session: Arc<Session>) {
        let registry = self.inner.registry.clone();
        let engine = self.inner.engine.clone();
        let metrics = self.inner.metrics.clone();
        let span = info_span!("session", session_id = %session.id());

        self.inner.supervisors.spawn(
            async move {
                session.closed().await;
                // Stops engine tasks still holding the session's outbound handle.
                session.terminate().await;
                registry.remove(session.id().as_str());
                // on_close never overtakes an on_open still in progress.
                session.startup_finished().await;
                if session.was_opened() {
                    engine.on_close(session.id()).await;
                    metrics.session_closed();
                }
                session.mark_closed();
                info!(reason = ?session.channel().close_reason(), "session closed");
            }
            .instrument(span),
        );
    }
}

impl fmt::Debug for TransportController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportController")
            .field("server_name", &self.inner.config.server_name)
            .field("registry", &self.inner.registry)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{FrameKind, FrameSink};
    use crate::engine::Outbound;
    use crate::session::{LifecycleState, SessionId};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl ProtocolEngine for Counting {
        async fn on_open(&self, _: &SessionId) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }

        async fn handle(&self, _: &SessionId, message: Bytes, out: Outbound) -> TransportResult<()> {
            out.send(message).await
        }

        async fn on_close(&self, _: &SessionId) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller() -> (TransportController, Arc<Counting>) {
        let engine = Arc::new(Counting::default());
        (
            TransportController::new(engine.clone(), TransportConfig::default()),
            engine,
        )
    }

    async fn settle(controller: &TransportController) {
        for _ in 0..100 {
            if controller.registry().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_open_session_sends_endpoint_first() {
        let (controller, engine) = controller();
        let (connection, mut frames) = Connection::pair();

        let session = controller.open_session(connection).await.unwrap();

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.kind(), FrameKind::Endpoint);
        assert_eq!(frame.text(), format!("/messages?sessionId={}", session.id()));
        assert_eq!(session.state(), LifecycleState::Open);
        assert_eq!(engine.opened.load(Ordering::SeqCst), 1);
        assert_eq!(controller.metrics().active_sessions, 1);
    }

    #[tokio::test]
    async fn test_hangup_removes_session_once() {
        let (controller, engine) = controller();
        let (connection, frames) = Connection::pair();
        let session = controller.open_session(connection).await.unwrap();
        let id = session.id().to_string();

        drop(frames);
        settle(&controller).await;
        session.terminate().await;
        controller.close_session(&id).await;

        assert!(controller.registry().lookup(&id).is_err());
        assert!(controller.router().route(&id, Bytes::from_static(b"x")).is_err());

        controller.shutdown().await;
        assert_eq!(engine.closed.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), LifecycleState::Closed);
        assert_eq!(controller.metrics().sessions_closed, 1);
        assert_eq!(controller.metrics().active_sessions, 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_sessions() {
        let (controller, _engine) = controller();
        controller.shutdown().await;
        controller.shutdown().await;

        let (connection, _frames) = Connection::pair();
        let err = controller.open_session(connection).await.unwrap_err();
        assert_eq!(err, TransportError::ShuttingDown);
        assert!(controller.registry().is_empty());
    }

    struct BrokenPipe;

    #[async_trait]
    impl FrameSink for BrokenPipe {
        async fn write_frame(&mut self, _frame: Frame) -> TransportResult<()> {
            Err(TransportError::Disconnected)
        }
    }

    #[tokio::test]
    async fn test_endpoint_write_failure_tears_down() {
        let (controller, engine) = controller();
        let connection = Connection::new(BrokenPipe, CancellationToken::new());

        let err = controller.open_session(connection).await.unwrap_err();
        assert_eq!(err, TransportError::Disconnected);

        controller.shutdown().await;
        assert!(controller.registry().is_empty());
        assert_eq!(engine.opened.load(Ordering::SeqCst), 1);
        assert_eq!(engine.closed.load(Ordering::SeqCst), 1);

        let metrics = controller.metrics();
        assert_eq!(metrics.sessions_opened, 1);
        assert_eq!(metrics.sessions_closed, 1);
        assert_eq!(metrics.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_session_lost_before_open_is_not_reported_to_engine() {
        let (controller, engine) = controller();
        controller.shutdown().await;

        // Refused outright: nothing to open, nothing to close
        let (connection, _frames) = Connection::pair();
        assert!(controller.open_session(connection).await.is_err());
        assert_eq!(engine.opened.load(Ordering::SeqCst), 0);
        assert_eq!(engine.closed.load(Ordering::SeqCst), 0);
        assert_eq!(controller.metrics(), TransportMetrics::default());
    }

    struct SlowOpen {
        inner: Counting,
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl ProtocolEngine for SlowOpen {
        async fn on_open(&self, id: &SessionId) {
            self.started.notify_one();
            self.release.notified().await;
            self.inner.on_open(id).await;
        }

        async fn handle(&self, id: &SessionId, message: Bytes, out: Outbound) -> TransportResult<()> {
            self.inner.handle(id, message, out).await
        }

        async fn on_close(&self, id: &SessionId) {
            // on_open must already have finished
            assert_eq!(self.inner.opened.load(Ordering::SeqCst), 1);
            self.inner.on_close(id).await;
        }
    }

    #[tokio::test]
    async fn test_hangup_during_on_open_closes_after_open() {
        let engine = Arc::new(SlowOpen {
            inner: Counting::default(),
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let controller = TransportController::new(engine.clone(), TransportConfig::default());
        let (connection, frames) = Connection::pair();

        let opening = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.open_session(connection).await })
        };
        engine.started.notified().await;
        assert_eq!(controller.registry().len(), 1);

        drop(frames);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.inner.closed.load(Ordering::SeqCst), 0);

        engine.release.notify_one();
        assert!(opening.await.unwrap().is_err());
        controller.shutdown().await;

        assert_eq!(engine.inner.opened.load(Ordering::SeqCst), 1);
        assert_eq!(engine.inner.closed.load(Ordering::SeqCst), 1);
    }
}
