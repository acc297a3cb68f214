//! Mapping raw transport failures onto the caller-facing taxonomy

use std::io;

use crate::error::{ErrorKind, SshError, TransportError};

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout"];
const REFUSED_MARKERS: &[&str] = &["connection refused"];
const HOST_NOT_FOUND_MARKERS: &[&str] = &[
    "no such host",
    "name or service not known",
    "failed to lookup address",
    "nodename nor servname",
    "could not resolve",
    "unknown host",
];
const TUNNEL_MARKERS: &[&str] = &[
    "channel open",
    "tunnel",
    "direct-tcpip",
    "administratively prohibited",
];
const AUTH_MARKERS: &[&str] = &[
    "authentication",
    "unable to authenticate",
    "permission denied",
    "no supported methods",
];

/// Classify a raw transport failure
///
/// Structured error variants are checked first, the message text only when the
/// variant does not decide it. The first matching category wins, in this order:
/// timeout, refused, unresolved host, tunnel, authentication. Everything else
/// becomes `UnknownError` with the underlying message.
///
/// Never returns `ValidationError`.
#[must_use]
pub fn classify(err: &TransportError, host: Option<&str>) -> SshError {
    let message = err.to_string();
    let lowered = message.to_lowercase();

    let kind = if is_timeout(err, &lowered) {
        ErrorKind::ConnectionTimeout
    } else if is_refused(err, &lowered) {
        ErrorKind::ConnectionRefused
    } else if contains_any(&lowered, HOST_NOT_FOUND_MARKERS) {
        ErrorKind::HostNotFound
    } else if matches!(err, TransportError::ChannelOpen(_)) || contains_any(&lowered, TUNNEL_MARKERS)
    {
        ErrorKind::TunnelingFailed
    } else if matches!(err, TransportError::Auth(_)) || contains_any(&lowered, AUTH_MARKERS) {
        ErrorKind::AuthenticationFailed
    } else {
        ErrorKind::UnknownError
    };

    let classified = SshError::new(kind, message);
    match host {
        Some(host) => classified.with_host(host),
        None => classified,
    }
}

fn is_timeout(err: &TransportError, lowered: &str) -> bool {
    match err {
        TransportError::Elapsed(_) => true,
        TransportError::Io(e) if e.kind() == io::ErrorKind::TimedOut => true,
        _ => contains_any(lowered, TIMEOUT_MARKERS),
    }
}

fn is_refused(err: &TransportError, lowered: &str) -> bool {
    match err {
        TransportError::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused => true,
        _ => contains_any(lowered, REFUSED_MARKERS),
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
