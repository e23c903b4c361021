//! Error types surfaced by the download core.
//!
//! Every failure carries a human-readable message (via `Display`) and a
//! stable symbolic [`ErrorKind`] for programmatic handling, so callers can
//! match on kinds without parsing message strings.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DownloadError>;

/// Stable symbolic error kinds.
///
/// The snake_case form returned by [`ErrorKind::as_str`] is part of the
/// public contract and will not change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NetworkError,
    Timeout,
    Refused,
    NotFound,
    ServerError,
    PermissionDenied,
    DiskFull,
    FileExists,
    InvalidUrl,
    InvalidRange,
    ResumeFailed,
    Cancelled,
    NoBandwidth,
    StallDetected,
    TooManyRedirects,
    SslError,
    DnsError,
    ConnectionLost,
}

impl ErrorKind {
    /// The stable snake_case name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Refused => "refused",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ServerError => "server_error",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::DiskFull => "disk_full",
            ErrorKind::FileExists => "file_exists",
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::InvalidRange => "invalid_range",
            ErrorKind::ResumeFailed => "resume_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NoBandwidth => "no_bandwidth",
            ErrorKind::StallDetected => "stall_detected",
            ErrorKind::TooManyRedirects => "too_many_redirects",
            ErrorKind::SslError => "ssl_error",
            ErrorKind::DnsError => "dns_error",
            ErrorKind::ConnectionLost => "connection_lost",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the download engine and its collaborators.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out")]
    Timeout,

    #[error("connection refused")]
    Refused,

    #[error("resource not found (404)")]
    NotFound,

    #[error("server error (HTTP {0})")]
    ServerError(u16),

    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid byte range")]
    InvalidRange,

    #[error("resume failed: {0}")]
    ResumeFailed(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("no usable bandwidth")]
    NoBandwidth,

    #[error("download stalled")]
    StallDetected,

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("TLS error: {0}")]
    Ssl(String),

    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("connection lost")]
    ConnectionLost,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DownloadError {
    /// The stable symbolic kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::Network(_) => ErrorKind::NetworkError,
            DownloadError::Timeout => ErrorKind::Timeout,
            DownloadError::Refused => ErrorKind::Refused,
            DownloadError::NotFound => ErrorKind::NotFound,
            DownloadError::ServerError(_) => ErrorKind::ServerError,
            DownloadError::PermissionDenied => ErrorKind::PermissionDenied,
            DownloadError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            DownloadError::InvalidRange => ErrorKind::InvalidRange,
            DownloadError::ResumeFailed(_) => ErrorKind::ResumeFailed,
            DownloadError::Cancelled => ErrorKind::Cancelled,
            DownloadError::NoBandwidth => ErrorKind::NoBandwidth,
            DownloadError::StallDetected => ErrorKind::StallDetected,
            DownloadError::TooManyRedirects => ErrorKind::TooManyRedirects,
            DownloadError::Ssl(_) => ErrorKind::SslError,
            DownloadError::Dns(_) => ErrorKind::DnsError,
            DownloadError::ConnectionLost => ErrorKind::ConnectionLost,
            DownloadError::Io(err) => io_kind(err),
        }
    }

    /// Whether a worker may retry this error with backoff.
    ///
    /// Covers the transient transport failures: resets, timeouts, truncated
    /// bodies and TLS handshake hiccups. Everything else is final for the
    /// worker that hit it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NetworkError
                | ErrorKind::Timeout
                | ErrorKind::ConnectionLost
                | ErrorKind::SslError
        )
    }

    /// Classify a non-2xx HTTP status.
    pub(crate) fn from_status(status: u16) -> DownloadError {
        match status {
            416 => DownloadError::InvalidRange,
            404 => DownloadError::NotFound,
            401 | 403 => DownloadError::PermissionDenied,
            s if s >= 500 => DownloadError::ServerError(s),
            s => DownloadError::Network(format!("unexpected HTTP status {s}")),
        }
    }

    /// Classify a transport-level `reqwest` error.
    pub(crate) fn from_http(err: reqwest::Error) -> DownloadError {
        if err.is_timeout() {
            return DownloadError::Timeout;
        }
        if err.is_redirect() {
            return DownloadError::TooManyRedirects;
        }

        // reqwest does not expose the underlying cause as a typed value, so
        // walk the source chain and match on the usual suspects.
        let chain = source_chain(&err);
        if chain_contains(&chain, &["dns", "resolve", "name or service not known"]) {
            return DownloadError::Dns(chain_tail(&chain));
        }
        if chain_contains(&chain, &["certificate", "handshake", "tls", "ssl"]) {
            return DownloadError::Ssl(chain_tail(&chain));
        }
        if chain_contains(&chain, &["connection refused"]) {
            return DownloadError::Refused;
        }
        if err.is_body()
            || err.is_decode()
            || chain_contains(&chain, &["reset", "broken pipe", "unexpected eof", "incomplete"])
        {
            return DownloadError::ConnectionLost;
        }

        DownloadError::Network(chain_tail(&chain))
    }
}

/// Map an I/O error onto the public kind set.
fn io_kind(err: &io::Error) -> ErrorKind {
    // ENOSPC has no stable io::ErrorKind on every toolchain we support.
    if err.raw_os_error() == Some(28) {
        return ErrorKind::DiskFull;
    }
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        io::ErrorKind::AlreadyExists => ErrorKind::FileExists,
        io::ErrorKind::TimedOut => ErrorKind::Timeout,
        io::ErrorKind::ConnectionRefused => ErrorKind::Refused,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ErrorKind::ConnectionLost,
        _ => ErrorKind::NetworkError,
    }
}

fn source_chain(err: &dyn std::error::Error) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut cur = err.source();
    while let Some(src) = cur {
        chain.push(src.to_string());
        cur = src.source();
    }
    chain
}

fn chain_contains(chain: &[String], needles: &[&str]) -> bool {
    chain
        .iter()
        .any(|msg| needles.iter().any(|n| msg.to_ascii_lowercase().contains(n)))
}

fn chain_tail(chain: &[String]) -> String {
    chain.last().cloned().unwrap_or_default()
}
