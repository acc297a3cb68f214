//! hopshell-exec: Command execution through SSH hop chains
//!
//! Dials a chain of password-authenticated SSH connections, each hop tunneled
//! through the previous one, runs commands on the last hop and returns their
//! output or a classified error. Connections are always closed in reverse.

pub mod chain;
pub mod classify;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod result;
pub mod ssh;
pub mod traits;

pub use chain::{DialFailure, HopChain, dial_chain};
pub use classify::classify;
pub use error::{BatchFailure, ErrorKind, SshError, TransportError};
pub use executor::execute_batch;
pub use orchestrator::{ChainExecutor, DEFAULT_TIMEOUT, run_commands};
pub use result::{CommandResult, DEFAULT_SSH_PORT, HopConfig};
pub use ssh::{RusshConnector, RusshLink};
pub use traits::{ChannelEvent, Connector, ExecChannel, Link};
