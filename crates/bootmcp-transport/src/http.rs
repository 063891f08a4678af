//! HTTP surface: SSE stream out, POST in.
//!
//! - `GET <sse_path>` opens a session. The first SSE event is `endpoint`,
//!   whose data is the URL to post to (`<messages_path>?sessionId=<id>`);
//!   engine output follows as `message` events. The identifier is also
//!   returned in the `Mcp-Session-Id` response header.
//! - `POST <messages_path>?sessionId=<id>` (or with the `Mcp-Session-Id`
//!   header) hands the raw body to the session's engine and answers
//!   `202 Accepted` without waiting for a reply.
//! - `GET <status_path>` reports server name, session count and counters.

use std::convert::Infallible;
use std::future::Future;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::channel::{Connection, Frame};
use crate::error::{TransportError, TransportResult};
use crate::lifecycle::TransportController;
use crate::router::IngressRouter;

/// Header carrying the session identifier.
pub const MCP_SESSION_ID: &str = "mcp-session-id";

#[derive(Clone)]
struct HttpState {
    controller: TransportController,
    router: IngressRouter,
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Build the axum router for a controller.
pub fn router(controller: TransportController) -> Router {
    let config = controller.config().clone();
    let state = HttpState {
        router: controller.router(),
        controller,
    };

    let app = Router::new()
        .route(&config.sse_path, get(handle_sse))
        .route(&config.messages_path, post(handle_message))
        .route(&config.status_path, get(handle_status))
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if config.enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve on an already bound listener until `signal` resolves.
///
/// When the signal fires, every session is closed (which ends the open SSE
/// responses) and the server then stops accepting connections.
///
/// # Errors
///
/// Returns [`TransportError::Io`] if the server fails.
pub async fn serve<F>(
    listener: TcpListener,
    controller: TransportController,
    signal: F,
) -> TransportResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    let config = controller.config();
    info!(
        "{} listening on http://{} (GET {}; POST {}; GET {})",
        config.server_name, addr, config.sse_path, config.messages_path, config.status_path
    );

    let app = router(controller.clone());
    let on_signal = controller.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            on_signal.shutdown().await;
        })
        .await?;

    controller.shutdown().await;
    info!("HTTP transport stopped");
    Ok(())
}

/// Bind `host:port` from the controller's configuration and serve.
///
/// # Errors
///
/// Returns [`TransportError::Io`] if the address cannot be bound or the
/// server fails.
pub async fn run<F>(controller: TransportController, signal: F) -> TransportResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = controller.config().bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| TransportError::Io(format!("Failed to bind to {addr}: {e}")))?;
    serve(listener, controller, signal).await
}

async fn handle_sse(State(state): State<HttpState>) -> Response {
    let (connection, frames) = Connection::pair();
    let session = match state.controller.open_session(connection).await {
        Ok(session) => session,
        Err(err) => return error_response(&err, None),
    };

    // Dropping the body stream (client went away) raises the hang-up signal.
    let events = frames.map(|frame| Ok::<_, Infallible>(sse_event(&frame)));
    let sse = Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(state.controller.config().keep_alive())
            .text("keep-alive"),
    );

    let mut response = sse.into_response();
    if let Ok(value) = HeaderValue::from_str(session.id().as_str()) {
        response.headers_mut().insert(MCP_SESSION_ID, value);
    }
    response
}

async fn handle_message(
    State(state): State<HttpState>,
    Query(query): Query<MessageQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let session_id = query.session_id.or_else(|| {
        headers
            .get(MCP_SESSION_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });
    let Some(session_id) = session_id else {
        return error_response(&TransportError::MissingSessionId, None);
    };
    if state.controller.is_shutting_down() {
        return error_response(&TransportError::ShuttingDown, Some(&session_id));
    }

    match state.router.route(&session_id, body) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            axum::Json(json!({ "status": "accepted", "sessionId": session_id })),
        )
            .into_response(),
        Err(err) => error_response(&err, Some(&session_id)),
    }
}

async fn handle_status(State(state): State<HttpState>) -> Response {
    let controller = &state.controller;
    axum::Json(json!({
        "status": if controller.is_shutting_down() { "shutting_down" } else { "ok" },
        "server": controller.config().server_name,
        "sessions": controller.registry().len(),
        "metrics": controller.metrics(),
    }))
    .into_response()
}

/// Unknown and closed sessions get the same response so the two cases are
/// indistinguishable to the client.
fn error_response(err: &TransportError, session_id: Option<&str>) -> Response {
    let status = err.status_code();
    let message = if err.is_undeliverable() {
        "message undeliverable".to_string()
    } else {
        err.to_string()
    };
    debug!(%status, error = %err, "request rejected");

    let body = match session_id {
        Some(id) => json!({ "error": message, "sessionId": id }),
        None => json!({ "error": message }),
    };
    (status, axum::Json(body)).into_response()
}

/// SSE field values cannot carry bare carriage returns; normalize line endings
/// so multi-line payloads become multiple `data:` lines.
fn sse_event(frame: &Frame) -> Event {
    let text = frame.text();
    let data = if text.contains('\r') {
        text.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        text.into_owned()
    };
    Event::default().event(frame.kind().event_name()).data(data)
}
