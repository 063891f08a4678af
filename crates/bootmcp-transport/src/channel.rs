//! Event channel: one ordered, server-to-client frame stream.
//!
//! An [`EventChannel`] owns the write side of a client connection (a
//! [`FrameSink`]) and the connection's hang-up signal. It serializes writes so
//! that frames reach the wire in the order `send` was called, refuses writes
//! once closing has begun, and notifies a single observer when it closes,
//! whether the close was requested locally or caused by the peer going away.
//!
//! ```text
//!  Open ──close()/hang-up/write error──► Closing ──sink released──► Closed
//! ```

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

use crate::error::{TransportError, TransportResult};

/// What a frame represents on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Tells the client where to post inbound messages. Always the first frame.
    Endpoint,
    /// A message produced by the protocol engine.
    Message,
}

impl FrameKind {
    /// SSE event name for this kind of frame.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Endpoint => "endpoint",
            Self::Message => "message",
        }
    }
}

/// A single unit written to an event channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    data: Bytes,
}

impl Frame {
    /// Frame announcing the message endpoint for this session.
    pub fn endpoint(url: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Endpoint,
            data: Bytes::from(url.into()),
        }
    }

    /// Frame carrying an engine message.
    pub fn message(data: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Message,
            data: data.into(),
        }
    }

    /// The kind of this frame.
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Raw frame payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Write side of a client connection.
///
/// Implementations are driven by exactly one [`EventChannel`], which
/// guarantees `write_frame` is never called concurrently and never after
/// `close`. Returning an error for which [`TransportError::is_disconnect`]
/// holds tears the channel down; any other error is reported to the sender
/// and leaves the channel open.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one frame to the peer.
    async fn write_frame(&mut self, frame: Frame) -> TransportResult<()>;

    /// Release the write side. Called at most once.
    async fn close(&mut self) -> TransportResult<()> {
        Ok(())
    }
}

/// An accepted client connection, before it has been bound to a channel.
pub struct Connection {
    sink: Box<dyn FrameSink>,
    hangup: CancellationToken,
}

impl Connection {
    /// Wrap a sink and the token the read side cancels when the peer goes away.
    pub fn new(sink: impl FrameSink, hangup: CancellationToken) -> Self {
        Self {
            sink: Box::new(sink),
            hangup,
        }
    }

    /// Create an in-memory connection whose frames are read from the returned stream.
    ///
    /// Dropping the [`FrameStream`] raises the hang-up signal, which is how
    /// the HTTP layer reports a client that went away.
    pub fn pair() -> (Self, FrameStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hangup = CancellationToken::new();
        let stream = FrameStream {
            rx,
            _hangup: hangup.clone().drop_guard(),
        };
        (Self::new(QueueSink { tx: Some(tx) }, hangup), stream)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("hung_up", &self.hangup.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Receiving end of [`Connection::pair`].
pub struct FrameStream {
    rx: mpsc::UnboundedReceiver<Frame>,
    _hangup: DropGuard,
}

impl FrameStream {
    /// Receive the next frame, or `None` once the channel has closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameStream").finish_non_exhaustive()
    }
}

/// Sink feeding a [`FrameStream`].
struct QueueSink {
    tx: Option<mpsc::UnboundedSender<Frame>>,
}

#[async_trait]
impl FrameSink for QueueSink {
    async fn write_frame(&mut self, frame: Frame) -> TransportResult<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::ChannelClosed)?;
        tx.send(frame).map_err(|_| TransportError::Disconnected)
    }

    async fn close(&mut self) -> TransportResult<()> {
        // Dropping the sender ends the stream on the reading side.
        self.tx.take();
        Ok(())
    }
}

/// Lifecycle state of an [`EventChannel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Accepting frames.
    Open,
    /// Close initiated; no new frames accepted.
    Closing,
    /// Resources released. Terminal.
    Closed,
}

/// Why a channel closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called on this side.
    Local,
    /// The peer's read side reported a hang-up.
    RemoteHangup,
    /// Writing a frame failed with a disconnect-class error.
    WriteFailed,
}

type CloseObserver = Box<dyn FnOnce(CloseReason) + Send>;

/// One open, ordered, server-to-client frame stream.
pub struct EventChannel {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<ChannelState>,
    reason: Mutex<Option<CloseReason>>,
    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    observer: Mutex<Option<CloseObserver>>,
    closed: CancellationToken,
}

impl EventChannel {
    /// Bind a connection, taking ownership of its write side.
    ///
    /// Spawns a watcher that closes the channel when the connection's
    /// hang-up signal fires, so this must be called inside a tokio runtime.
    pub fn open(connection: Connection) -> Arc<Self> {
        let Connection { sink, hangup } = connection;
        let shared = Arc::new(Shared {
            state: Mutex::new(ChannelState::Open),
            reason: Mutex::new(None),
            sink: tokio::sync::Mutex::new(Some(sink)),
            observer: Mutex::new(None),
            closed: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&shared);
        let closed = shared.closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = hangup.cancelled() => {
                    if let Some(shared) = weak.upgrade() {
                        trace!("connection hung up");
                        Shared::begin_close(&shared, CloseReason::RemoteHangup);
                    }
                }
                () = closed.cancelled() => {}
            }
        });

        Arc::new(Self { shared })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *self.shared.state.lock()
    }

    /// Whether the channel still accepts frames.
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Why the channel closed, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.shared.reason.lock()
    }

    /// Write a frame.
    ///
    /// Concurrent callers are serialized in call order. A `send` that wins the
    /// race against `close` completes; one that loses fails with
    /// [`TransportError::ChannelClosed`] without touching the stream.
    ///
    /// # Errors
    ///
    /// - [`TransportError::ChannelClosed`] if the channel is closing or closed.
    /// - [`TransportError::Disconnected`] / [`TransportError::Io`] if the peer
    ///   went away during the write; the channel is closed as a side effect.
    /// - Any non-disconnect error returned by the sink.
    pub async fn send(&self, frame: Frame) -> TransportResult<()> {
        let mut guard = self.shared.sink.lock().await;
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        let sink = guard.as_mut().ok_or(TransportError::ChannelClosed)?;

        match sink.write_frame(frame).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_disconnect() => {
                drop(guard);
                debug!(error = %err, "write failed, closing channel");
                Shared::begin_close(&self.shared, CloseReason::WriteFailed);
                self.closed().await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Close the channel. Idempotent and safe to race with `send`.
    ///
    /// Returns once the channel is `Closed`, even when another caller
    /// started the close. Dropping the returned future does not stop the
    /// close once it has started.
    pub async fn close(&self) {
        Shared::begin_close(&self.shared, CloseReason::Local);
        self.closed().await;
    }

    /// Resolves once the channel has reached `Closed`.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    /// Register the observer notified exactly once when the channel closes.
    ///
    /// Replaces a previously registered observer. If the channel is already
    /// closed the observer runs immediately.
    pub fn on_close(&self, observer: impl FnOnce(CloseReason) + Send + 'static) {
        let mut slot = self.shared.observer.lock();
        if self.shared.closed.is_cancelled() {
            drop(slot);
            observer(self.close_reason().unwrap_or(CloseReason::Local));
            return;
        }
        *slot = Some(Box::new(observer));
    }
}

impl Shared {
    /// Move `Open → Closing` and hand the rest of the teardown to its own task.
    ///
    /// Only the first caller wins; later calls are no-ops.
    fn begin_close(this: &Arc<Self>, reason: CloseReason) {
        {
            let mut state = this.state.lock();
            if *state != ChannelState::Open {
                return;
            }
            *state = ChannelState::Closing;
        }
        *this.reason.lock() = Some(reason);

        let shared = this.clone();
        tokio::spawn(async move { shared.finish_close(reason).await });
    }

    async fn finish_close(&self, reason: CloseReason) {
        // Waits for an in-flight write to finish before releasing the sink.
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            if let Err(err) = sink.close().await {
                debug!(error = %err, "error while releasing sink");
            }
        }
        drop(guard);

        *self.state.lock() = ChannelState::Closed;
        self.closed.cancel();

        let observer = self.observer.lock().take();
        if let Some(observer) = observer {
            observer(reason);
        }
        trace!(?reason, "channel closed");
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        // Lets the hang-up watcher exit when the channel is dropped unclosed.
        if *self.shared.state.lock() == ChannelState::Open {
            self.shared.closed.cancel();
        }
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("state", &self.state())
            .field("close_reason", &self.close_reason())
            .finish_non_exhaustive()
    }
}
