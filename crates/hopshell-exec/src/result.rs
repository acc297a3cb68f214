//! Result and connection types for chained execution

use std::fmt;

use serde::{Deserialize, Serialize};

/// Port used when a hop leaves it unset or zero
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Result of a command execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    /// Command text as submitted
    pub command: String,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Exit status code (0 for success)
    pub exit_code: i32,
}

impl CommandResult {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Connection target and credentials for one hop
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopConfig {
    /// Host address
    pub host: String,
    /// Port (0 or unset means 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user
    pub username: String,
    /// Login password
    pub password: String,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl HopConfig {
    /// Create a hop on the default port
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Port to dial, with zero mapped to 22
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_SSH_PORT
        } else {
            self.port
        }
    }

    /// `host:port` using the effective port
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }
}

impl fmt::Debug for HopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HopConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for HopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.address())
    }
}
