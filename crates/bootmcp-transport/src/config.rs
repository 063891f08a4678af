//! Transport configuration management

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TransportError, TransportResult};

/// Default environment variable prefix (`BOOTMCP_PORT=9000`).
pub const ENV_PREFIX: &str = "BOOTMCP";

/// Which transport the server exposes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// SSE stream + HTTP POST, many concurrent sessions.
    #[default]
    Sse,
    /// Newline-delimited messages over stdin/stdout, one session.
    Stdio,
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Server name reported by the status route
    pub server_name: String,
    /// Transport to serve
    pub transport: TransportKind,
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Path of the SSE stream endpoint
    pub sse_path: String,
    /// Path of the inbound message endpoint
    pub messages_path: String,
    /// Path of the status endpoint
    pub status_path: String,
    /// Enable permissive CORS headers
    pub enable_cors: bool,
    /// Interval between SSE keep-alive comments, in seconds
    pub keep_alive_secs: u64,
    /// Maximum inbound message size in bytes
    pub max_body_size: usize,
    /// Abandon engine invocations running longer than this, in milliseconds
    pub handler_timeout_ms: Option<u64>,
    /// Identifier regeneration attempts before giving up on a new session
    pub max_register_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_name: "MCP Server".to_string(),
            transport: TransportKind::Sse,
            host: "localhost".to_string(),
            port: 3000,
            sse_path: "/sse".to_string(),
            messages_path: "/messages".to_string(),
            status_path: "/status".to_string(),
            enable_cors: true,
            keep_alive_secs: 30,
            max_body_size: 4 * 1024 * 1024, // 4 MB
            handler_timeout_ms: None,
            max_register_attempts: 8,
        }
    }
}

impl TransportConfig {
    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The file format is auto-detected from the file extension. Environment
    /// variables with the `BOOTMCP_` prefix override file settings, for
    /// example `BOOTMCP_PORT=9000`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use bootmcp_transport::TransportConfig;
    ///
    /// let config = TransportConfig::from_file("bootmcp.toml").expect("Failed to load config");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if the file doesn't exist,
    /// has an unsupported extension, or contains invalid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> TransportResult<Self> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Load configuration from a file with a custom environment prefix
    ///
    /// # Errors
    ///
    /// Same as [`TransportConfig::from_file`].
    pub fn from_file_with_prefix(path: impl AsRef<Path>, env_prefix: &str) -> TransportResult<Self> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(TransportError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => {
                return Err(TransportError::Configuration(
                    "Unsupported configuration file format. Use .toml, .yaml, .yml, or .json"
                        .to_string(),
                ));
            }
        };
        let name = path.to_str().ok_or_else(|| {
            TransportError::Configuration(format!("Non UTF-8 path: {}", path.display()))
        })?;

        let config = Config::builder()
            .add_source(File::new(name, format))
            // Environment variables override file settings
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Defaults overridden by `BOOTMCP_*` environment variables, without a file.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if a variable cannot be
    /// parsed or the result fails validation.
    pub fn from_env() -> TransportResult<Self> {
        let loaded: Self = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Create a configuration builder
    ///
    /// # Example
    ///
    /// ```rust
    /// use bootmcp_transport::TransportConfig;
    ///
    /// let config = TransportConfig::builder()
    ///     .server_name("my-server")
    ///     .port(9000)
    ///     .build();
    /// assert_eq!(config.port, 9000);
    /// ```
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    /// Check that the configuration can be served.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] describing the first problem found.
    pub fn validate(&self) -> TransportResult<()> {
        for (name, path) in [
            ("sse_path", &self.sse_path),
            ("messages_path", &self.messages_path),
            ("status_path", &self.status_path),
        ] {
            if !path.starts_with('/') {
                return Err(TransportError::Configuration(format!(
                    "{name} must start with '/': {path:?}"
                )));
            }
        }
        if self.sse_path == self.messages_path
            || self.sse_path == self.status_path
            || self.messages_path == self.status_path
        {
            return Err(TransportError::Configuration(
                "sse_path, messages_path and status_path must differ".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(TransportError::Configuration("host must not be empty".to_string()));
        }
        if self.keep_alive_secs == 0 {
            return Err(TransportError::Configuration(
                "keep_alive_secs must be at least 1".to_string(),
            ));
        }
        if self.max_register_attempts == 0 {
            return Err(TransportError::Configuration(
                "max_register_attempts must be at least 1".to_string(),
            ));
        }
        if self.handler_timeout_ms == Some(0) {
            return Err(TransportError::Configuration(
                "handler_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` string to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// SSE keep-alive interval.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Handler watchdog limit, if enabled.
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration builder
#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
    config: TransportConfig,
}

impl ConfigurationBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set server name
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Set transport kind
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.config.transport = transport;
        self
    }

    /// Set bind host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set bind port
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set SSE stream path
    pub fn sse_path(mut self, path: impl Into<String>) -> Self {
        self.config.sse_path = path.into();
        self
    }

    /// Set inbound message path
    pub fn messages_path(mut self, path: impl Into<String>) -> Self {
        self.config.messages_path = path.into();
        self
    }

    /// Enable or disable CORS
    pub const fn enable_cors(mut self, enable: bool) -> Self {
        self.config.enable_cors = enable;
        self
    }

    /// Set SSE keep-alive interval
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.config.keep_alive_secs = interval.as_secs().max(1);
        self
    }

    /// Set maximum inbound message size
    pub const fn max_body_size(mut self, bytes: usize) -> Self {
        self.config.max_body_size = bytes;
        self
    }

    /// Set the handler watchdog limit
    pub fn handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.handler_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Build the configuration
    pub fn build(self) -> TransportConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.bind_address(), "localhost:3000");
        assert_eq!(config.sse_path, "/sse");
        assert_eq!(config.messages_path, "/messages");
        assert_eq!(config.keep_alive(), Duration::from_secs(30));
        assert_eq!(config.handler_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = TransportConfig::builder()
            .server_name("test")
            .port(9000)
            .enable_cors(false)
            .handler_timeout(Some(Duration::from_millis(250)))
            .build();

        assert_eq!(config.server_name, "test");
        assert_eq!(config.port, 9000);
        assert!(!config.enable_cors);
        assert_eq!(config.handler_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_validate_rejects_bad_paths() {
        let config = TransportConfig::builder().sse_path("sse").build();
        assert!(config.validate().is_err());

        let config = TransportConfig::builder()
            .sse_path("/same")
            .messages_path("/same")
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "server_name = \"from-file\"\nport = 4100\nhandler_timeout_ms = 500").unwrap();

        let config = TransportConfig::from_file_with_prefix(file.path(), "BOOTMCP_TEST_UNUSED")
            .unwrap();
        assert_eq!(config.server_name, "from-file");
        assert_eq!(config.port, 4100);
        assert_eq!(config.handler_timeout_ms, Some(500));
        // Unspecified keys keep their defaults
        assert_eq!(config.sse_path, "/sse");
    }

    #[test]
    fn test_from_file_missing() {
        let err = TransportConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = TransportConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }
}
