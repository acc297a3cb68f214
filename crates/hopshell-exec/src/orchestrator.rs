//! Entry point: validate, dial, execute, tear down

use std::time::Duration;

use tracing::{debug, instrument};

use crate::chain::{DialFailure, dial_chain};
use crate::error::{BatchFailure, SshError};
use crate::executor::execute_batch;
use crate::result::{CommandResult, HopConfig};
use crate::ssh::RusshConnector;
use crate::traits::Connector;

/// Timeout used when the caller does not pick one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs command batches through a hop chain
///
/// Every call dials its own chain and closes it, last hop first, before
/// returning. Nothing is shared between calls.
#[derive(Debug, Clone)]
pub struct ChainExecutor<C: Connector = RusshConnector> {
    connector: C,
    timeout: Duration,
}

impl ChainExecutor<RusshConnector> {
    /// Executor over real SSH with the default timeout
    #[must_use]
    pub fn ssh() -> Self {
        Self::new(RusshConnector::new())
    }
}

impl Default for ChainExecutor<RusshConnector> {
    fn default() -> Self {
        Self::ssh()
    }
}

impl<C: Connector> ChainExecutor<C> {
    /// Create an executor over `connector` with the default timeout
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-hop dial and per-command timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configured timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the underlying connector
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Run `commands` on the last of `hops`
    ///
    /// # Errors
    /// Returns `BatchFailure` with a `ValidationError` before any I/O when
    /// either list is empty, with the classified dial error (and no results)
    /// when a hop cannot be reached, or with the results completed so far
    /// when a command fails.
    #[instrument(skip_all, fields(hops = hops.len(), commands = commands.len()))]
    pub async fn run(
        &self,
        hops: &[HopConfig],
        commands: &[String],
    ) -> Result<Vec<CommandResult>, BatchFailure> {
        validate(hops, commands)?;

        let chain = match dial_chain(&self.connector, hops, self.timeout).await {
            Ok(chain) => chain,
            Err(DialFailure { partial, error }) => {
                debug!(opened = partial.len(), "closing partial chain");
                partial.close().await;
                return Err(error.into());
            }
        };

        let outcome = match chain.last() {
            Some(target) => execute_batch(target, commands, self.timeout).await,
            None => Err(SshError::validation("hop chain is empty").into()),
        };

        chain.close().await;
        outcome
    }
}

/// Run `commands` over SSH through `hops`
///
/// # Errors
/// See [`ChainExecutor::run`].
pub async fn run_commands(
    hops: &[HopConfig],
    commands: &[String],
    timeout: Duration,
) -> Result<Vec<CommandResult>, BatchFailure> {
    ChainExecutor::ssh()
        .with_timeout(timeout)
        .run(hops, commands)
        .await
}

fn validate(hops: &[HopConfig], commands: &[String]) -> Result<(), SshError> {
    if hops.is_empty() {
        return Err(SshError::validation("at least one hop is required"));
    }
    if commands.is_empty() {
        return Err(SshError::validation("at least one command is required"));
    }
    for (index, hop) in hops.iter().enumerate() {
        if hop.host.trim().is_empty() {
            return Err(SshError::validation(format!("hop {index} has an empty host")));
        }
        if hop.username.trim().is_empty() {
            return Err(SshError::validation(format!("hop {index} has an empty username"))
                .with_host(&hop.host));
        }
    }
    Ok(())
}
