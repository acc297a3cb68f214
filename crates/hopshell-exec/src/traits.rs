//! Transport traits the dialer and executor are generic over

use async_trait::async_trait;

use crate::error::TransportError;
use crate::result::HopConfig;

/// Something that can open hop connections
///
/// Implementations perform connect + handshake + password authentication.
/// Deadlines are applied by the caller.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Live connection type produced for each hop
    type Link: Link;

    /// Dial `hop` directly
    async fn connect(&self, hop: &HopConfig) -> Result<Self::Link, TransportError>;

    /// Reach `hop` through an already established connection
    async fn tunnel(&self, via: &Self::Link, hop: &HopConfig)
    -> Result<Self::Link, TransportError>;
}

/// An authenticated connection to one hop
#[async_trait]
pub trait Link: Send + Sync {
    /// Host this link is connected to
    fn host(&self) -> &str;

    /// Open a fresh session channel for running one command
    async fn open_session(&self) -> Result<Box<dyn ExecChannel>, TransportError>;

    /// Disconnect
    async fn close(self) -> Result<(), TransportError>;
}

/// Event read from a session channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Chunk of standard output
    Stdout(Vec<u8>),
    /// Chunk of standard error
    Stderr(Vec<u8>),
    /// Remote process exit status
    ExitStatus(u32),
    /// Remote process was killed by a signal (name without `SIG` prefix)
    ExitSignal(String),
    /// Server refused the exec request
    Rejected,
    /// No more data will be sent by the server
    Eof,
}

/// One remote execution context
#[async_trait]
pub trait ExecChannel: Send {
    /// Start `command` on the remote shell
    async fn exec(&mut self, command: &str) -> Result<(), TransportError>;

    /// Next event, `None` once the channel is closed
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Close the channel, ignoring errors
    async fn close(&mut self);
}
