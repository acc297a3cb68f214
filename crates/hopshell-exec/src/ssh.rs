//! SSH transport using russh crate

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::{ChannelId, ChannelMsg, ChannelOpenFailure, Disconnect, Sig, client};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, instrument};

use crate::error::TransportError;
use crate::result::HopConfig;
use crate::traits::{ChannelEvent, Connector, ExecChannel, Link};

/// Extended data stream number carrying stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// How long to wait for the server's description of a refused channel open
///
/// russh wakes the opener before the handler sees the description.
const OPEN_FAILURE_WAIT: Duration = Duration::from_millis(500);

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler {
    open_failures: mpsc::UnboundedSender<String>,
}

impl SshClientHandler {
    fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { open_failures: tx }, rx)
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        Ok(true)
    }

    async fn channel_open_failure(
        &mut self,
        channel: ChannelId,
        reason: ChannelOpenFailure,
        description: &str,
        _language: &str,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        debug!(%channel, ?reason, description, "channel open refused");
        let _ = self.open_failures.send(description.to_string());
        Ok(())
    }
}

/// Refused `direct-tcpip` open, carrying the server's reason text
///
/// The description is what tells a refused, unresolved or unreachable target
/// apart, e.g. "Connection refused" from OpenSSH.
fn tunnel_open_error(reason: ChannelOpenFailure, description: Option<&str>) -> TransportError {
    match description.map(str::trim).filter(|d| !d.is_empty()) {
        Some(description) => TransportError::ChannelOpen(format!("{reason:?} ({description})")),
        None => TransportError::ChannelOpen(format!("{reason:?}")),
    }
}

impl From<russh::Error> for TransportError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::IO(e) => TransportError::Io(e),
            russh::Error::ChannelOpenFailure(reason) => {
                TransportError::ChannelOpen(format!("{reason:?}"))
            }
            russh::Error::NotAuthenticated => TransportError::Auth("not authenticated".to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

/// Password-authenticated russh connector
///
/// Hop 0 is reached over TCP. Every later hop is reached by opening a
/// `direct-tcpip` channel on the previous hop's session and running a new SSH
/// handshake over that channel.
#[derive(Clone)]
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl RusshConnector {
    /// Create a connector with default client settings
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(client::Config::default())
    }

    /// Create a connector with custom client settings
    #[must_use]
    pub fn with_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Password authentication on a freshly handshaked session
    async fn authenticate(
        mut session: client::Handle<SshClientHandler>,
        open_failures: mpsc::UnboundedReceiver<String>,
        hop: &HopConfig,
    ) -> Result<RusshLink, TransportError> {
        let auth_res = session
            .authenticate_password(&hop.username, &hop.password)
            .await?;

        if !auth_res.success() {
            return Err(TransportError::Auth(format!(
                "password authentication rejected for user {}",
                hop.username
            )));
        }

        info!(host = %hop.host, user = %hop.username, "SSH connected and authenticated");

        Ok(RusshLink {
            host: hop.host.clone(),
            session,
            open_failures: Mutex::new(open_failures),
        })
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RusshConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshConnector").finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for RusshConnector {
    type Link = RusshLink;

    #[instrument(skip(self, hop), fields(host = %hop.host, port = hop.effective_port()))]
    async fn connect(&self, hop: &HopConfig) -> Result<RusshLink, TransportError> {
        debug!(user = %hop.username, "connecting to SSH");

        let (handler, open_failures) = SshClientHandler::new();
        let session = client::connect(
            Arc::clone(&self.config),
            (&hop.host[..], hop.effective_port()),
            handler,
        )
        .await?;

        Self::authenticate(session, open_failures, hop).await
    }

    #[instrument(skip(self, via, hop), fields(jump = %via.host, host = %hop.host))]
    async fn tunnel(&self, via: &RusshLink, hop: &HopConfig) -> Result<RusshLink, TransportError> {
        debug!(port = hop.effective_port(), "opening tunnel");

        let mut open_failures = via.open_failures.lock().await;
        // stale descriptions from earlier opens on this session
        while open_failures.try_recv().is_ok() {}

        let opened = via
            .session
            .channel_open_direct_tcpip(
                hop.host.clone(),
                u32::from(hop.effective_port()),
                "127.0.0.1",
                0,
            )
            .await;

        let channel = match opened {
            Ok(channel) => channel,
            Err(russh::Error::ChannelOpenFailure(reason)) => {
                let description = tokio::time::timeout(OPEN_FAILURE_WAIT, open_failures.recv())
                    .await
                    .ok()
                    .flatten();
                return Err(tunnel_open_error(reason, description.as_deref()));
            }
            Err(e) => {
                return Err(match TransportError::from(e) {
                    TransportError::Protocol(msg) => {
                        TransportError::ChannelOpen(format!("tunnel through {}: {msg}", via.host))
                    }
                    other => other,
                });
            }
        };
        drop(open_failures);

        let (handler, next_failures) = SshClientHandler::new();
        let session =
            client::connect_stream(Arc::clone(&self.config), channel.into_stream(), handler)
                .await?;

        Self::authenticate(session, next_failures, hop).await
    }
}

/// Authenticated russh session for one hop
pub struct RusshLink {
    host: String,
    session: client::Handle<SshClientHandler>,
    open_failures: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl std::fmt::Debug for RusshLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshLink")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Link for RusshLink {
    fn host(&self) -> &str {
        &self.host
    }

    async fn open_session(&self) -> Result<Box<dyn ExecChannel>, TransportError> {
        let channel = self.session.channel_open_session().await?;
        Ok(Box::new(RusshChannel { channel }))
    }

    async fn close(self) -> Result<(), TransportError> {
        self.session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await?;
        info!(host = %self.host, "SSH disconnected");
        Ok(())
    }
}

/// Session channel running one command
struct RusshChannel {
    channel: russh::Channel<client::Msg>,
}

#[async_trait]
impl ExecChannel for RusshChannel {
    async fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        self.channel.exec(true, command).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.channel.wait().await? {
                ChannelMsg::Data { data } => ChannelEvent::Stdout(data.to_vec()),
                ChannelMsg::ExtendedData { data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                    ChannelEvent::Stderr(data.to_vec())
                }
                ChannelMsg::ExitStatus { exit_status } => ChannelEvent::ExitStatus(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    ChannelEvent::ExitSignal(signal_label(signal_name))
                }
                ChannelMsg::Failure => ChannelEvent::Rejected,
                ChannelMsg::Eof => ChannelEvent::Eof,
                _ => continue,
            };
            return Some(event);
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close().await {
            debug!(error = %e, "closing session channel failed");
        }
    }
}

fn signal_label(sig: Sig) -> String {
    match sig {
        Sig::Custom(name) => name,
        other => format!("{other:?}"),
    }
}
