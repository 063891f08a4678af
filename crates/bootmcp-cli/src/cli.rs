//! CLI argument parsing

use std::path::PathBuf;

use bootmcp_transport::{TransportConfig, TransportKind};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::error::CliResult;
use crate::logging::LoggingConfig;

/// Main CLI application structure
#[derive(Parser, Debug)]
#[command(
    name = "bootmcp",
    version,
    about = "Serve an MCP protocol engine over SSE + HTTP POST or stdio",
    long_about = "bootmcp runs a session-multiplexed transport: each client opens an SSE stream,\n\
                  receives the URL to post messages to, and gets the engine's replies on that stream.\n\
                  With --transport stdio a single session is served over stdin/stdout instead.\n\n\
                  Settings come from (lowest to highest priority): defaults, --config file,\n\
                  BOOTMCP_* environment variables, command-line flags."
)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve(ServeArgs),

    /// Print the effective configuration as JSON and exit
    Config(ServeArgs),
}

/// Transport selection on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    /// SSE stream + HTTP POST
    Sse,
    /// Line-delimited stdin/stdout
    Stdio,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Sse => Self::Sse,
            TransportArg::Stdio => Self::Stdio,
        }
    }
}

/// Server options
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Transport to serve
    #[arg(long, short = 't', value_enum)]
    pub transport: Option<TransportArg>,

    /// Bind host
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Path of the SSE stream endpoint
    #[arg(long)]
    pub sse_path: Option<String>,

    /// Path of the inbound message endpoint
    #[arg(long)]
    pub messages_path: Option<String>,

    /// Disable CORS headers
    #[arg(long)]
    pub no_cors: bool,

    /// Server name reported by the status endpoint
    #[arg(long)]
    pub name: Option<String>,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short = 'c', env = "BOOTMCP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Abandon engine invocations running longer than this many milliseconds
    #[arg(long)]
    pub handler_timeout_ms: Option<u64>,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Also write logs to daily-rotated files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl ServeArgs {
    /// Resolve the transport configuration: file or environment, then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the result is invalid.
    pub fn resolve(&self) -> CliResult<TransportConfig> {
        let mut config = match &self.config {
            Some(path) => TransportConfig::from_file(path)?,
            None => TransportConfig::from_env()?,
        };

        if let Some(transport) = self.transport {
            config.transport = transport.into();
        }
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = &self.sse_path {
            config.sse_path.clone_from(path);
        }
        if let Some(path) = &self.messages_path {
            config.messages_path.clone_from(path);
        }
        if self.no_cors {
            config.enable_cors = false;
        }
        if let Some(name) = &self.name {
            config.server_name.clone_from(name);
        }
        if let Some(ms) = self.handler_timeout_ms {
            config.handler_timeout_ms = Some(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Logging settings derived from the flags.
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            structured: self.log_json,
            directory: self.log_dir.clone(),
            ..LoggingConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_flags() {
        let cli = Cli::parse_from([
            "bootmcp",
            "serve",
            "--transport",
            "stdio",
            "--port",
            "9000",
            "--no-cors",
            "--name",
            "demo",
        ]);
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.transport, Some(TransportArg::Stdio));
        assert_eq!(args.port, Some(9000));
        assert!(args.no_cors);
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootmcp.json");
        std::fs::write(&path, r#"{"port": 4000, "server_name": "from-file"}"#).unwrap();

        let args = ServeArgs {
            config: Some(path),
            port: Some(5000),
            handler_timeout_ms: Some(750),
            ..ServeArgs::default()
        };
        let config = args.resolve().unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.server_name, "from-file");
        assert_eq!(config.handler_timeout_ms, Some(750));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = ServeArgs {
            sse_path: Some("no-slash".into()),
            ..ServeArgs::default()
        };
        assert!(args.resolve().is_err());
    }
}
