use crate::config::HttpProtocol;
use crate::dispatch::DispatchLimits;
use crate::error::{BoxError, TransportError};
use crate::proxy::HttpProxy;
use crate::tls::{TlsContextSource, TrustDecision};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tower::util::BoxCloneSyncService;

/// Streaming response body
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Type-erased service stack behind a [`TransportHandle`].
pub(crate) type TransportService =
    BoxCloneSyncService<Request<Full<Bytes>>, Response<ResponseBody>, TransportError>;

/// Whether `https` destinations can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsState {
    /// A TLS context is installed; the stage that produced it is recorded
    Installed(TlsContextSource),
    /// No TLS context; `https` requests fail with `TlsUnavailable`
    Unavailable,
}

/// Read-only facts about a built transport.
#[derive(Debug)]
pub(crate) struct TransportInfo {
    pub(crate) protocols: Vec<HttpProtocol>,
    pub(crate) trust: Option<TrustDecision>,
    pub(crate) tls: TlsState,
    pub(crate) dispatch_limits: DispatchLimits,
    pub(crate) proxy: Option<Arc<HttpProxy>>,
    pub(crate) call_timeout: Option<Duration>,
}

/// A configured, immutable HTTP transport.
///
/// Cheap to clone; clones share the connection pool and the dispatcher.
///
/// # Example
///
/// ```rust,no_run
/// use bytes::Bytes;
/// use http_body_util::Full;
/// use objstore_transport::{ConnectionConfig, TransportBuilder};
///
/// # async fn run() -> Result<(), objstore_transport::TransportError> {
/// let transport = TransportBuilder::new(ConnectionConfig::default()).build()?;
/// let request = http::Request::get("https://obs.example.com/bucket/key")
///     .body(Full::new(Bytes::new()))
///     .expect("valid request");
/// let response = transport.send(request).await?;
/// println!("status: {}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TransportHandle {
    pub(crate) service: TransportService,
    pub(crate) info: Arc<TransportInfo>,
}

impl TransportHandle {
    /// Execute one request.
    ///
    /// Returns `Ok` for every HTTP status, including 3xx (redirects are not
    /// followed) and 4xx/5xx. The body streams from the connection; the
    /// dispatch slot is released once it is fully read or dropped.
    ///
    /// # Errors
    /// `UnknownHost`, `Timeout`, `TlsUnavailable`, `ProxyAuthentication`, or
    /// `Transport` for connection and protocol failures.
    pub async fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<ResponseBody>, TransportError> {
        self.service.clone().oneshot(request).await
    }

    /// Negotiable protocols, HTTP/1.1 first
    #[must_use]
    pub fn protocols(&self) -> &[HttpProtocol] {
        &self.info.protocols
    }

    /// Trust decision taken at build time; `None` if trust resolution failed
    #[must_use]
    pub fn trust_decision(&self) -> Option<&TrustDecision> {
        self.info.trust.as_ref()
    }

    #[must_use]
    pub fn tls_state(&self) -> &TlsState {
        &self.info.tls
    }

    #[must_use]
    pub fn is_tls_installed(&self) -> bool {
        matches!(self.info.tls, TlsState::Installed(_))
    }

    #[must_use]
    pub fn dispatch_limits(&self) -> DispatchLimits {
        self.info.dispatch_limits
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&HttpProxy> {
        self.info.proxy.as_deref()
    }

    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.info.call_timeout
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
