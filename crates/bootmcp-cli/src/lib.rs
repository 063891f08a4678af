//! # bootmcp CLI
//!
//! Launches the session-multiplexed transport with a demo engine.
//!
//! ## Usage
//!
//! ```bash
//! # SSE + HTTP POST on localhost:3000
//! bootmcp serve
//!
//! # Custom port and paths, JSON logs
//! bootmcp serve --port 8080 --sse-path /events --messages-path /post --log-json
//!
//! # One session over stdin/stdout
//! bootmcp serve --transport stdio
//!
//! # Show the configuration that would be used
//! bootmcp config --config bootmcp.toml
//! ```

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms, clippy::all)]
#![deny(unsafe_code)]

pub mod cli;
pub mod engine;
pub mod error;
pub mod logging;

use std::sync::Arc;

use bootmcp_transport::{TransportConfig, TransportController, TransportKind, http, stdio};
use clap::Parser;
use tracing::{info, warn};

pub use cli::{Cli, Commands, ServeArgs};
pub use engine::DemoEngine;
pub use error::{CliError, CliResult};
pub use logging::{LoggingConfig, LoggingGuard};

/// Run the CLI application
///
/// # Errors
///
/// Returns the first configuration, logging or transport error encountered.
pub async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let config = args.resolve()?;
            let _guard = args
                .logging()
                .init()
                .map_err(|e| CliError::Logging(e.to_string()))?;
            serve(config).await
        }
        Commands::Config(args) => {
            let config = args.resolve()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Serve the demo engine with `config` until interrupted.
///
/// # Errors
///
/// Returns the transport error that stopped the server.
pub async fn serve(config: TransportConfig) -> CliResult<()> {
    let engine = Arc::new(DemoEngine::new(config.server_name.clone()));
    let controller = TransportController::new(engine, config);

    match controller.config().transport {
        TransportKind::Sse => http::run(controller, shutdown_signal()).await?,
        TransportKind::Stdio => {
            info!("serving on stdin/stdout");
            let on_signal = controller.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                on_signal.shutdown().await;
            });
            stdio::serve(&controller, tokio::io::stdin(), tokio::io::stdout())
                .await?;
            controller.shutdown().await;
        }
    }
    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl+C received, initiating shutdown"),
        () = terminate => info!("SIGTERM received, initiating shutdown"),
    }
}
