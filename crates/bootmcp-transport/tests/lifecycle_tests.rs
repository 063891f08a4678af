//! Integration tests for session lifecycle, routing and shutdown
//!
//! These tests drive the controller through in-memory connections, so they
//! exercise the same paths as the HTTP surface without a network.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use bootmcp_transport::{
    ChannelState, Connection, Frame, FrameKind, FrameSink, FrameStream, LifecycleState, Outbound,
    ProtocolEngine, Session, SessionId, TransportConfig, TransportController, TransportError,
    TransportResult,
};
use tokio_util::sync::CancellationToken;

/// Engine stub: `{"op":"ping"}` → `{"op":"pong"}`, `burst:<n>` → n ordered
/// frames tagged with the session id, `hang` never returns.
#[derive(Default)]
struct StubEngine {
    closed: AtomicUsize,
}

#[async_trait]
impl ProtocolEngine for StubEngine {
    async fn handle(&self, session: &SessionId, message: Bytes, out: Outbound) -> TransportResult<()> {
        let text = std::str::from_utf8(&message).map_err(|e| TransportError::engine(e.to_string()))?;
        if text == r#"{"op":"ping"}"# {
            return out.send(r#"{"op":"pong"}"#).await;
        }
        if let Some(n) = text.strip_prefix("burst:") {
            let n: usize = n.parse().map_err(|_| TransportError::engine("bad burst count"))?;
            for i in 0..n {
                out.send(format!("{session}:{i}")).await?;
            }
            return Ok(());
        }
        if text == "hang" {
            std::future::pending::<()>().await;
        }
        out.send(message).await
    }

    async fn on_close(&self, _session: &SessionId) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn controller_with(config: TransportConfig) -> (TransportController, Arc<StubEngine>) {
    let engine = Arc::new(StubEngine::default());
    (TransportController::new(engine.clone(), config), engine)
}

fn controller() -> (TransportController, Arc<StubEngine>) {
    controller_with(TransportConfig::default())
}

async fn open(controller: &TransportController) -> (Arc<Session>, FrameStream) {
    let (connection, mut frames) = Connection::pair();
    let session = controller.open_session(connection).await.unwrap();
    let endpoint = frames.recv().await.unwrap();
    assert_eq!(endpoint.kind(), FrameKind::Endpoint);
    (session, frames)
}

async fn next_text(frames: &mut FrameStream) -> String {
    tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .text()
        .into_owned()
}

async fn wait_until_removed(controller: &TransportController, id: &str) {
    for _ in 0..200 {
        if !controller.registry().ids().iter().any(|s| s.as_str() == id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session {id} was never removed");
}

#[tokio::test]
async fn test_ping_pong_follows_identifier_frame() {
    let (controller, _engine) = controller();
    let (connection, mut frames) = Connection::pair();
    let session = controller.open_session(connection).await.unwrap();

    let first = frames.recv().await.unwrap();
    assert_eq!(first.kind(), FrameKind::Endpoint);
    assert_eq!(first.text(), format!("/messages?sessionId={}", session.id()));

    // Another session's traffic must not show up on this stream
    let (other, mut other_frames) = open(&controller).await;
    controller
        .router()
        .route(other.id().as_str(), Bytes::from_static(b"unrelated"))
        .unwrap();

    controller
        .router()
        .route(session.id().as_str(), Bytes::from_static(br#"{"op":"ping"}"#))
        .unwrap();

    let reply = frames.recv().await.unwrap();
    assert_eq!(reply.kind(), FrameKind::Message);
    assert_eq!(reply.text(), r#"{"op":"pong"}"#);
    assert_eq!(next_text(&mut other_frames).await, "unrelated");
}

#[tokio::test]
async fn test_route_to_nonexistent_creates_nothing() {
    let (controller, _engine) = controller();

    let err = controller
        .router()
        .route("nonexistent", Bytes::from_static(br#"{"op":"ping"}"#))
        .unwrap_err();

    assert!(matches!(err, TransportError::SessionNotFound(_)));
    assert!(controller.registry().is_empty());
    assert_eq!(controller.metrics().sessions_opened, 0);
}

#[tokio::test]
async fn test_route_after_disconnect_is_undeliverable() {
    let (controller, _engine) = controller();
    let (session, frames) = open(&controller).await;
    let id = session.id().to_string();

    drop(frames);
    tokio::time::timeout(Duration::from_secs(1), session.closed())
        .await
        .expect("disconnect not detected");

    let err = controller
        .router()
        .route(&id, Bytes::from_static(b"late"))
        .unwrap_err();
    assert!(err.is_undeliverable());
    wait_until_removed(&controller, &id).await;
}

#[tokio::test]
async fn test_terminate_twice_removes_once() {
    let (controller, engine) = controller();
    let (session, mut frames) = open(&controller).await;
    let id = session.id().to_string();

    tokio::join!(session.terminate(), controller.close_session(&id));
    session.terminate().await;
    wait_until_removed(&controller, &id).await;
    controller.shutdown().await;

    assert!(frames.recv().await.is_none());
    assert_eq!(engine.closed.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), LifecycleState::Closed);
    assert_eq!(controller.metrics().sessions_closed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundred_sessions_keep_their_own_order() {
    let (controller, _engine) = controller();
    let all_open = Arc::new(tokio::sync::Barrier::new(101));

    let clients = (0..100).map(|_| {
        let controller = controller.clone();
        let all_open = all_open.clone();
        tokio::spawn(async move {
            let (session, mut frames) = open(&controller).await;
            all_open.wait().await;

            controller
                .router()
                .route(session.id().as_str(), Bytes::from_static(b"burst:10"))
                .unwrap();
            for i in 0..10 {
                assert_eq!(next_text(&mut frames).await, format!("{}:{i}", session.id()));
            }
            session.id().clone()
        })
    });
    let clients: Vec<_> = clients.collect();

    all_open.wait().await;
    assert_eq!(controller.registry().len(), 100);

    let mut ids = std::collections::HashSet::new();
    for client in futures::future::join_all(clients).await {
        assert!(ids.insert(client.unwrap()));
    }
    assert_eq!(ids.len(), 100);
    assert_eq!(controller.metrics().sessions_opened, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_preserve_call_order() {
    let (controller, _engine) = controller();
    let (session, mut frames) = open(&controller).await;

    let producers = (0..4).map(|p| {
        let outbound = session.outbound();
        tokio::spawn(async move {
            for i in 0..25 {
                outbound.send(format!("{p}:{i}")).await.unwrap();
            }
        })
    });
    for producer in futures::future::join_all(producers).await {
        producer.unwrap();
    }

    let mut last = [None::<usize>; 4];
    for _ in 0..100 {
        let text = next_text(&mut frames).await;
        let (p, i) = text.split_once(':').unwrap();
        let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
        assert!(last[p].is_none_or(|prev| prev < i), "producer {p} reordered");
        last[p] = Some(i);
    }
}

#[tokio::test]
async fn test_send_after_close_fails_cleanly() {
    let (controller, _engine) = controller();
    let (session, _frames) = open(&controller).await;
    let outbound = session.outbound();

    session.terminate().await;

    assert_eq!(outbound.send("late").await, Err(TransportError::ChannelClosed));
}

#[tokio::test]
async fn test_shutdown_closes_every_session() {
    let (controller, engine) = controller();
    let mut streams = Vec::new();
    for _ in 0..5 {
        streams.push(open(&controller).await.1);
    }

    controller.shutdown().await;

    assert!(controller.registry().is_empty());
    assert_eq!(engine.closed.load(Ordering::SeqCst), 5);
    for mut frames in streams {
        assert!(frames.recv().await.is_none());
    }
    let (connection, _frames) = Connection::pair();
    assert_eq!(
        controller.open_session(connection).await.unwrap_err(),
        TransportError::ShuttingDown
    );
}

#[tokio::test]
async fn test_watchdog_abandons_stuck_handler() {
    let config = TransportConfig::builder()
        .handler_timeout(Some(Duration::from_millis(50)))
        .build();
    let (controller, _engine) = controller_with(config);
    let (session, mut frames) = open(&controller).await;
    let router = controller.router();

    router.route(session.id().as_str(), Bytes::from_static(b"hang")).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(controller.metrics().handler_timeouts, 1);
    assert!(session.channel().is_open());
    router.route(session.id().as_str(), Bytes::from_static(b"still alive")).unwrap();
    assert_eq!(next_text(&mut frames).await, "still alive");
}

#[tokio::test]
async fn test_terminate_cancels_inflight_handler() {
    let (controller, _engine) = controller();
    let (session, _frames) = open(&controller).await;

    controller
        .router()
        .route(session.id().as_str(), Bytes::from_static(b"hang"))
        .unwrap();

    session.terminate().await;
    tokio::time::timeout(Duration::from_secs(1), session.drain_inflight())
        .await
        .expect("stuck handler survived teardown");
}

/// Accepts the endpoint frame, then fails every write; releasing it is slow.
struct DyingSink {
    writes: usize,
}

#[async_trait]
impl FrameSink for DyingSink {
    async fn write_frame(&mut self, _frame: Frame) -> TransportResult<()> {
        self.writes += 1;
        if self.writes == 1 { Ok(()) } else { Err(TransportError::Disconnected) }
    }

    async fn close(&mut self) -> TransportResult<()> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_watchdog_during_teardown_still_closes_session() {
    let config = TransportConfig::builder()
        .handler_timeout(Some(Duration::from_millis(50)))
        .build();
    let (controller, engine) = controller_with(config);
    let connection = Connection::new(DyingSink { writes: 0 }, CancellationToken::new());
    let session = controller.open_session(connection).await.unwrap();
    let id = session.id().to_string();

    // The reply write fails and the handler is abandoned mid-teardown
    controller
        .router()
        .route(&id, Bytes::from_static(br#"{"op":"ping"}"#))
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), session.closed())
        .await
        .expect("channel stuck closing");
    assert_eq!(session.channel().state(), ChannelState::Closed);
    wait_until_removed(&controller, &id).await;

    tokio::time::timeout(Duration::from_secs(3), controller.shutdown())
        .await
        .expect("shutdown hung");
    assert_eq!(engine.closed.load(Ordering::SeqCst), 1);
    assert_eq!(controller.metrics().handler_timeouts, 1);
}
