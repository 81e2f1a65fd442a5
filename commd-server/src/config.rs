//! Server configuration.
//!
//! Configuration is defaults plus environment variable overrides; the
//! wire protocol itself carries no negotiable parameters.

use commd_protocol::{DEFAULT_BACKLOG, DEFAULT_PORT};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host name the listening socket binds against; resolution takes
    /// the first address the resolver returns.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// Per-read timeout inside a session.
    pub read_timeout: Duration,
    /// Maximum exchanged-message count per session.
    pub message_budget: u32,
    /// Maximum consecutive read timeouts before the session ends.
    pub max_timeouts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            read_timeout: Duration::from_secs(10),
            message_budget: 10,
            max_timeouts: 5,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the default configuration with environment overrides
    /// (`COMMD_HOST`, `COMMD_PORT`, `COMMD_BACKLOG`,
    /// `COMMD_READ_TIMEOUT_SECS`) applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("COMMD_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }
        if let Ok(port) = std::env::var("COMMD_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }
        if let Ok(backlog) = std::env::var("COMMD_BACKLOG") {
            if let Ok(parsed) = backlog.parse() {
                self.backlog = parsed;
            }
        }
        if let Ok(timeout) = std::env::var("COMMD_READ_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.read_timeout = Duration::from_secs(secs);
            }
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}
