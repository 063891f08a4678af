//! Protocol engine seam.
//!
//! The transport does not interpret message bytes. It hands each inbound
//! message to a [`ProtocolEngine`] together with an [`Outbound`] handle bound
//! to the originating session; whatever the engine sends through that handle
//! is written to the session's event stream in the order it was sent.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::channel::{EventChannel, Frame};
use crate::error::{TransportError, TransportResult};
use crate::metrics::AtomicMetrics;
use crate::session::SessionId;

/// External collaborator that processes inbound messages for a session.
///
/// One engine instance is shared by every session and outlives them all.
///
/// # Example
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use bytes::Bytes;
/// use bootmcp_transport::{Outbound, ProtocolEngine, SessionId, TransportResult};
///
/// struct Echo;
///
/// #[async_trait]
/// impl ProtocolEngine for Echo {
///     async fn handle(
///         &self,
///         _session: &SessionId,
///         message: Bytes,
///         outbound: Outbound,
///     ) -> TransportResult<()> {
///         outbound.send(message).await
///     }
/// }
/// ```
#[async_trait]
pub trait ProtocolEngine: Send + Sync + 'static {
    /// Called once the session is open and its identifier frame has been sent.
    async fn on_open(&self, _session: &SessionId) {}

    /// Process one inbound message.
    ///
    /// Runs on its own task; replies go through `outbound` at any time,
    /// including after this method returns.
    async fn handle(
        &self,
        session: &SessionId,
        message: Bytes,
        outbound: Outbound,
    ) -> TransportResult<()>;

    /// Called once after the session has been removed from the registry.
    async fn on_close(&self, _session: &SessionId) {}
}

/// Handle for pushing engine output to one session's event stream.
#[derive(Clone)]
pub struct Outbound {
    session_id: SessionId,
    channel: Arc<EventChannel>,
    metrics: Arc<AtomicMetrics>,
}

impl Outbound {
    pub(crate) fn new(
        session_id: SessionId,
        channel: Arc<EventChannel>,
        metrics: Arc<AtomicMetrics>,
    ) -> Self {
        Self {
            session_id,
            channel,
            metrics,
        }
    }

    /// Session this handle writes to.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Whether the session's stream still accepts frames.
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Push one message frame to the session's stream.
    ///
    /// Frames from one handle, or from clones of it, appear on the wire in
    /// the order their `send` calls were made.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidFrame`] if the payload is not UTF-8 (event
    ///   streams are text).
    /// - [`TransportError::ChannelClosed`] if the session has been torn down.
    /// - A disconnect error if the peer went away during the write.
    pub async fn send(&self, message: impl Into<Bytes>) -> TransportResult<()> {
        let message = message.into();
        if std::str::from_utf8(&message).is_err() {
            self.metrics.frame_failed();
            return Err(TransportError::InvalidFrame(
                "event stream frames must be valid UTF-8".into(),
            ));
        }

        let len = message.len();
        match self.channel.send(Frame::message(message)).await {
            Ok(()) => {
                self.metrics.frame_sent(len);
                Ok(())
            }
            Err(err) => {
                self.metrics.frame_failed();
                Err(err)
            }
        }
    }

    /// Serialize `value` as JSON and send it.
    ///
    /// # Errors
    ///
    /// Same as [`Outbound::send`], plus [`TransportError::Engine`] if the
    /// value fails to serialize.
    pub async fn send_json<T: serde::Serialize + ?Sized>(&self, value: &T) -> TransportResult<()> {
        let encoded =
            serde_json::to_vec(value).map_err(|e| TransportError::engine(e.to_string()))?;
        self.send(encoded).await
    }
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbound")
            .field("session_id", &self.session_id)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Outcome of an engine invocation under the optional watchdog.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HandlerOutcome {
    Completed(TransportResult<()>),
    TimedOut(Duration),
}

/// Run `work`, abandoning it after `limit` if one is set.
pub(crate) async fn run_with_watchdog<F>(work: F, limit: Option<Duration>) -> HandlerOutcome
where
    F: Future<Output = TransportResult<()>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(result) => HandlerOutcome::Completed(result),
            Err(_) => HandlerOutcome::TimedOut(limit),
        },
        None => HandlerOutcome::Completed(work.await),
    }
}
