//! Hop chain dialing and reverse-order teardown

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::classify::classify;
use crate::error::{SshError, TransportError};
use crate::result::HopConfig;
use crate::traits::{Connector, Link};

/// Live connections for one invocation, in the order they were opened
///
/// Index 0 is the directly dialed hop, index k was tunneled through k-1.
/// Links are released last-opened first, either by [`HopChain::close`] or,
/// if the chain is dropped without closing, by its `Drop` impl.
pub struct HopChain<L: Link> {
    links: Vec<L>,
}

impl<L: Link> HopChain<L> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            links: Vec::with_capacity(capacity),
        }
    }

    /// Number of live links
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether no link is open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Most recently opened link (the final hop once fully dialed)
    #[must_use]
    pub fn last(&self) -> Option<&L> {
        self.links.last()
    }

    /// Hosts in establishment order
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|link| link.host())
    }

    fn push(&mut self, link: L) {
        self.links.push(link);
    }

    /// Disconnect every link, last opened first
    ///
    /// Close failures are logged and otherwise ignored so that every link
    /// gets its turn.
    pub async fn close(mut self) {
        let total = self.links.len();
        while let Some(link) = self.links.pop() {
            let host = link.host().to_string();
            match link.close().await {
                Ok(()) => debug!(host = %host, "hop disconnected"),
                Err(e) => warn!(host = %host, error = %e, "failed to disconnect hop"),
            }
        }
        if total > 0 {
            info!(hops = total, "hop chain closed");
        }
    }
}

impl<L: Link> Drop for HopChain<L> {
    fn drop(&mut self) {
        while let Some(link) = self.links.pop() {
            debug!(host = %link.host(), "dropping hop without disconnect");
            drop(link);
        }
    }
}

impl<L: Link> std::fmt::Debug for HopChain<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HopChain")
            .field("hosts", &self.hosts().collect::<Vec<_>>())
            .finish()
    }
}

/// A dial that stopped at some hop
///
/// `partial` still owns the hops opened before the failure; close it.
pub struct DialFailure<L: Link> {
    /// Hops opened before the failing one
    pub partial: HopChain<L>,
    /// Failure of the hop that could not be reached
    pub error: SshError,
}

impl<L: Link> std::fmt::Debug for DialFailure<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialFailure")
            .field("partial", &self.partial)
            .field("error", &self.error)
            .finish()
    }
}

/// Open one connection per hop, each tunneled through the previous one
///
/// `timeout_duration` bounds each hop's dial separately. Dialing stops at the
/// first failing hop; the error carries that hop's host.
///
/// # Errors
/// Returns `DialFailure` with the already opened prefix of the chain when any
/// hop cannot be reached or authenticated.
#[instrument(skip_all, fields(hops = hops.len()))]
pub async fn dial_chain<C: Connector>(
    connector: &C,
    hops: &[HopConfig],
    timeout_duration: Duration,
) -> Result<HopChain<C::Link>, DialFailure<C::Link>> {
    let mut chain = HopChain::with_capacity(hops.len());

    for (index, hop) in hops.iter().enumerate() {
        debug!(
            index,
            host = %hop.host,
            port = hop.effective_port(),
            user = %hop.username,
            tunneled = index > 0,
            "dialing hop"
        );

        let attempt = match chain.last() {
            None => timeout(timeout_duration, connector.connect(hop)).await,
            Some(via) => timeout(timeout_duration, connector.tunnel(via, hop)).await,
        };

        let outcome = match attempt {
            Ok(result) => result,
            Err(_) => Err(TransportError::Elapsed(timeout_duration)),
        };

        match outcome {
            Ok(link) => chain.push(link),
            Err(e) => {
                let error = classify(&e, Some(&hop.host));
                warn!(index, host = %hop.host, kind = %error.kind, error = %e, "hop dial failed");
                return Err(DialFailure {
                    partial: chain,
                    error,
                });
            }
        }
    }

    info!(hosts = ?chain.hosts().collect::<Vec<_>>(), "hop chain established");
    Ok(chain)
}
