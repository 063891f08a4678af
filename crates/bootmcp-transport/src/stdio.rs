//! Line-delimited transport over a byte stream pair (stdin/stdout).
//!
//! The stream pair carries exactly one session. Each non-empty input line is
//! one inbound message; each engine frame is written as one output line. The
//! endpoint frame is not written: the peer addresses nothing, so there is no
//! identifier to announce.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{Connection, Frame, FrameKind, FrameSink};
use crate::error::{TransportError, TransportResult};
use crate::lifecycle::TransportController;

/// Types that input lines are read from.
pub trait LineReader: AsyncRead + Unpin + Send {}
impl<T: AsyncRead + Unpin + Send> LineReader for T {}

/// Types that output lines are written to.
pub trait LineWriter: AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncWrite + Unpin + Send + 'static> LineWriter for T {}

/// Frame sink writing one message per line.
#[derive(Debug)]
pub struct LineSink<W> {
    writer: W,
}

impl<W: LineWriter> LineSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: LineWriter> FrameSink for LineSink<W> {
    async fn write_frame(&mut self, frame: Frame) -> TransportResult<()> {
        if frame.kind() == FrameKind::Endpoint {
            return Ok(());
        }
        if frame.data().contains(&b'\n') {
            return Err(TransportError::InvalidFrame(
                "line-delimited frames must not contain newlines".into(),
            ));
        }
        self.writer.write_all(frame.data()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Serve one session over `reader`/`writer` until EOF or shutdown.
///
/// At EOF, handlers already started are allowed to finish (and their replies
/// are written) before the session is torn down.
///
/// # Errors
///
/// Returns the controller's error if the session could not be opened.
/// Read errors end the session and are logged, not returned. Lines longer
/// than `max_body_size` are discarded without being buffered in full.
pub async fn serve<R, W>(controller: &TransportController, reader: R, writer: W) -> TransportResult<()>
where
    R: LineReader,
    W: LineWriter,
{
    let hangup = CancellationToken::new();
    let session = controller
        .open_session(Connection::new(LineSink::new(writer), hangup.clone()))
        .await?;
    let router = controller.router();
    info!(session_id = %session.id(), "stdio session started");

    let max_line = controller.config().max_body_size;
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_line));
    loop {
        tokio::select! {
            () = controller.shutdown_requested() => break,
            () = session.closed() => break,
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Err(err) = router.route(session.id().as_str(), Bytes::copy_from_slice(trimmed.as_bytes())) {
                        warn!(error = %err, "dropping inbound line");
                        if err.is_undeliverable() {
                            break;
                        }
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(max = max_line, "dropping oversize inbound line");
                }
                None => {
                    debug!("input closed");
                    break;
                }
                Some(Err(err)) => {
                    warn!(error = %err, "failed to read input line");
                    break;
                }
            }
        }
    }

    session.drain_inflight().await;
    hangup.cancel();
    session.closed().await;
    info!(session_id = %session.id(), "stdio session ended");
    Ok(())
}
