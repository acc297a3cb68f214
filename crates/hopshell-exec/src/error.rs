//! Error types for hopshell-exec

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::result::CommandResult;

/// Caller-facing failure categories
///
/// The set is closed: every failure surfaced by the library maps to exactly one
/// of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Input rejected before any network I/O
    ValidationError,
    /// A hop rejected the supplied credentials
    AuthenticationFailed,
    /// A hop actively refused the TCP connection
    ConnectionRefused,
    /// A dial, handshake or command exceeded its deadline
    ConnectionTimeout,
    /// A hop's address could not be resolved
    HostNotFound,
    /// Opening the hop-through-hop tunnel failed
    TunnelingFailed,
    /// Session or channel failure while running a command
    CommandExecutionFailed,
    /// Anything else; the message keeps the underlying error text
    UnknownError,
}

impl ErrorKind {
    /// Stable identifier, identical to the serialized form
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorKind::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorKind::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorKind::HostNotFound => "HOST_NOT_FOUND",
            ErrorKind::TunnelingFailed => "TUNNELING_FAILED",
            ErrorKind::CommandExecutionFailed => "COMMAND_EXECUTION_FAILED",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure with optional host and command context
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}{}{}", context("host", .host), context("command", .command))]
pub struct SshError {
    /// Failure category
    pub kind: ErrorKind,
    /// Human readable detail
    pub message: String,
    /// Hop the failure is attributed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Command that was running when the failure happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl SshError {
    /// Create an error without host or command context
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            host: None,
            command: None,
        }
    }

    /// Shorthand for a `ValidationError`
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    /// Attach the host the failure belongs to
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Attach the command that was running
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

/// " (label: value)" suffix, empty when the context is absent
fn context(label: &str, value: &Option<String>) -> String {
    value
        .as_deref()
        .map(|value| format!(" ({label}: {value})"))
        .unwrap_or_default()
}

/// Raw failure reported by a transport before classification
#[derive(Error, Debug)]
pub enum TransportError {
    /// A step did not finish before its deadline
    #[error("operation timed out after {0:?}")]
    Elapsed(Duration),

    /// Socket level failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The server refused to open a channel (session or direct-tcpip)
    #[error("channel open failed: {0}")]
    ChannelOpen(String),

    /// Credentials were rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Any other protocol level failure
    #[error("{0}")]
    Protocol(String),
}

/// A batch that stopped early
///
/// `completed` holds the results of every command that finished before
/// `error` occurred, in submission order.
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct BatchFailure {
    /// Results produced before the failure
    pub completed: Vec<CommandResult>,
    /// The failure that stopped the batch
    pub error: SshError,
}

impl BatchFailure {
    /// Failure kind shorthand
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }
}

impl From<SshError> for BatchFailure {
    fn from(error: SshError) -> Self {
        Self {
            completed: Vec::new(),
            error,
        }
    }
}
