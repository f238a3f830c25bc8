//! Transport configuration for the `apishell` server.

use std::time::Duration;

/// Errors from validating a [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("threads must be at least 1")]
    ZeroThreads,
    #[error("connection_limit must be at least 1")]
    ZeroConnectionLimit,
    #[error("host must not be empty")]
    EmptyHost,
}

/// Top-level configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Number of runtime worker threads serving requests.
    pub threads: usize,
    /// Maximum number of requests processed concurrently.
    pub connection_limit: usize,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    /// Checks the invariants the transport relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.connection_limit == 0 {
            return Err(ConfigError::ZeroConnectionLimit);
        }
        Ok(())
    }

    /// `host:port` string suitable for binding.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 12345,
            threads: 4,
            connection_limit: 100,
            request_timeout: Duration::from_secs(30),
            cors_origins: vec!["*".to_string()],
        }
    }
}
