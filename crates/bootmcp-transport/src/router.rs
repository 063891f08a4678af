//! Ingress router: maps an inbound post to its owning session.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{TransportError, TransportResult};
use crate::metrics::AtomicMetrics;
use crate::registry::SessionRegistry;

/// Routes `(identifier, bytes)` pairs to sessions.
///
/// Routing never waits for the engine: a successful return means the message
/// was handed over, and any reply arrives later on the session's stream.
#[derive(Clone)]
pub struct IngressRouter {
    registry: Arc<SessionRegistry>,
    metrics: Arc<AtomicMetrics>,
    max_message_size: usize,
}

impl IngressRouter {
    /// Create a router over a shared registry.
    pub fn new(
        registry: Arc<SessionRegistry>,
        metrics: Arc<AtomicMetrics>,
        max_message_size: usize,
    ) -> Self {
        Self {
            registry,
            metrics,
            max_message_size,
        }
    }

    /// Deliver `message` to the session registered under `session_id`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::PayloadTooLarge`] if the message exceeds the limit.
    /// - [`TransportError::SessionNotFound`] if no live session has this
    ///   identifier; nothing is created as a side effect.
    /// - [`TransportError::SessionClosed`] if the session was terminated
    ///   between lookup and delivery.
    pub fn route(&self, session_id: &str, message: Bytes) -> TransportResult<()> {
        let result = self.try_route(session_id, message);
        if let Err(err) = &result {
            self.metrics.message_rejected();
            debug!(session_id = %session_id, error = %err, "inbound message undeliverable");
        }
        result
    }

    fn try_route(&self, session_id: &str, message: Bytes) -> TransportResult<()> {
        if message.len() > self.max_message_size {
            return Err(TransportError::PayloadTooLarge {
                size: message.len(),
                max: self.max_message_size,
            });
        }

        let session = self.registry.lookup(session_id)?;
        let len = message.len();
        session.deliver_inbound(message)?;

        self.metrics.message_routed(len);
        trace!(session_id = %session_id, bytes = len, "routed inbound message");
        Ok(())
    }
}

impl fmt::Debug for IngressRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngressRouter")
            .field("registry", &self.registry)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}
