use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type used at connector boundaries.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Host name lookup failed or returned no addresses.
#[derive(Error, Debug)]
#[error("unknown host '{host}'")]
pub struct UnknownHostError {
    /// The host name that could not be resolved
    pub host: String,
    /// Underlying resolver failure, if any
    #[source]
    pub source: Option<std::io::Error>,
}

impl UnknownHostError {
    #[must_use]
    pub fn new(host: impl Into<String>, source: Option<std::io::Error>) -> Self {
        Self {
            host: host.into(),
            source,
        }
    }
}

/// Returned by the connector when an `https` destination is requested but no
/// TLS context could be installed at build time.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("TLS is not installed on this transport")]
pub struct TlsNotInstalled;

/// Transport error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Configuration cannot be turned into a transport
    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// Proxy settings are malformed
    #[error("Invalid proxy configuration: {reason}")]
    InvalidProxy { reason: String },

    /// Supplied dispatcher object exposes no recognized admission interface
    #[error("Unsupported dispatcher type: expected `Dispatcher` or `Arc<dyn Admission>`")]
    UnsupportedDispatcher,

    /// Named TLS provider is not available in this build
    #[error("Unknown TLS provider '{0}'")]
    UnknownTlsProvider(String),

    /// TLS context or verifier construction failed
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// `https` request on a transport that has no TLS context installed
    #[error("TLS is not installed on this transport")]
    TlsUnavailable,

    /// DNS lookup failed for the destination
    #[error("Unknown host '{host}'")]
    UnknownHost {
        host: String,
        #[source]
        source: UnknownHostError,
    },

    /// Whole call exceeded the configured call timeout
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// Proxy rejected the supplied credentials
    #[error("Proxy authentication failed with status {status}")]
    ProxyAuthentication { status: http::StatusCode },

    /// Dispatcher was shut down while a request waited for admission
    #[error("Dispatcher closed")]
    DispatcherClosed,

    /// Transport error (network, connection, protocol, socket timeouts)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),
}

impl TransportError {
    /// Classify a boxed error by walking its source chain.
    ///
    /// Markers raised inside the connector stack (unknown host, missing TLS)
    /// are surfaced as their dedicated variants; everything else is kept as
    /// `Transport` with the chain intact.
    #[must_use]
    pub fn from_boxed(err: BoxError) -> Self {
        let err = match err.downcast::<TransportError>() {
            Ok(transport) => return *transport,
            Err(other) => other,
        };

        let mut current: Option<&(dyn StdError + 'static)> = Some(err.as_ref());
        while let Some(e) = current {
            if let Some(unknown) = e.downcast_ref::<UnknownHostError>() {
                let host = unknown.host.clone();
                return TransportError::UnknownHost {
                    source: UnknownHostError::new(host.clone(), None),
                    host,
                };
            }
            if e.is::<TlsNotInstalled>() {
                return TransportError::TlsUnavailable;
            }
            current = e.source();
        }

        TransportError::Transport(err)
    }
}

impl From<hyper::Error> for TransportError {
    fn from(err: hyper::Error) -> Self {
        TransportError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for TransportError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        TransportError::from_boxed(Box::new(err))
    }
}

impl From<rustls::Error> for TransportError {
    fn from(err: rustls::Error) -> Self {
        TransportError::Tls(Box::new(err))
    }
}
