//! # bootmcp-transport
//!
//! Session-multiplexed transport for MCP protocol engines: many concurrent
//! clients, each holding one long-lived server-to-client event stream (SSE)
//! and posting inbound messages over plain HTTP.
//!
//! ## Overview
//!
//! - **Event channel**: [`EventChannel`], one ordered frame stream per client
//! - **Session**: [`Session`], identifier + channel + engine binding
//! - **Registry**: [`SessionRegistry`], identifier → live session
//! - **Router**: [`IngressRouter`], delivers posted messages to sessions
//! - **Lifecycle**: [`TransportController`], open/close sequencing and shutdown
//! - **Surfaces**: [`http`] (axum SSE + POST) and [`stdio`] (line-delimited)
//!
//! The transport never interprets message bytes; that is the job of a
//! [`ProtocolEngine`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use bootmcp_transport::{
//!     Outbound, ProtocolEngine, SessionId, TransportConfig, TransportController, TransportResult,
//! };
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ProtocolEngine for Echo {
//!     async fn handle(&self, _: &SessionId, msg: Bytes, out: Outbound) -> TransportResult<()> {
//!         out.send(msg).await
//!     }
//! }
//!
//! # async fn example() -> TransportResult<()> {
//! let controller = TransportController::new(Arc::new(Echo), TransportConfig::default());
//! bootmcp_transport::http::run(controller, async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod channel;
mod config;
mod engine;
mod error;
mod lifecycle;
mod metrics;
mod registry;
mod router;
mod session;

pub mod http;
pub mod stdio;

pub use channel::{
    ChannelState, CloseReason, Connection, EventChannel, Frame, FrameKind, FrameSink, FrameStream,
};
pub use config::{ConfigurationBuilder, ENV_PREFIX, TransportConfig, TransportKind};
pub use engine::{Outbound, ProtocolEngine};
pub use error::{TransportError, TransportResult};
pub use http::MCP_SESSION_ID;
pub use lifecycle::TransportController;
pub use metrics::{AtomicMetrics, TransportMetrics};
pub use registry::SessionRegistry;
pub use router::IngressRouter;
pub use session::{LifecycleState, MAX_SESSION_ID_LEN, Session, SessionId};
