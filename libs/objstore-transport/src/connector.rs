//! The connector installed into the pooled client.

use crate::config::{ConnectionConfig, HttpProtocol};
use crate::dns::{NameResolver, ResolverService};
use crate::error::{BoxError, TlsNotInstalled};
use crate::proxy::{HttpProxy, ProxyConnector};
use crate::socket::{SocketTuning, TunedConnector};
use crate::stream::TransportStream;
use http::Uri;
use http::uri::Scheme;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder, MaybeHttpsStream};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::ClientConfig;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// DNS, TCP connect and proxy routing; yields untuned streams.
pub type BaseConnector = ProxyConnector<HttpConnector<ResolverService>>;

/// Build the shared base connector from `config`.
#[must_use]
pub fn base_connector(
    config: &ConnectionConfig,
    resolver: Arc<dyn NameResolver>,
    proxy: Option<Arc<HttpProxy>>,
) -> BaseConnector {
    let mut http = HttpConnector::new_with_resolver(ResolverService::new(resolver));
    // Scheme checks happen in `TransportConnector`
    http.enforce_http(false);
    http.set_connect_timeout(config.connect_timeout());

    ProxyConnector::new(http, proxy).with_timeouts(config.read_timeout(), config.write_timeout())
}

/// Connector used by the pooled client.
///
/// `Plain` is installed when no TLS context could be built; it serves `http`
/// and fails `https` destinations with [`TlsNotInstalled`].
#[derive(Clone, Debug)]
pub enum TransportConnector {
    Plain(TunedConnector<BaseConnector>),
    Tls(TunedConnector<HttpsConnector<BaseConnector>>),
}

impl TransportConnector {
    #[must_use]
    pub fn plain(base: BaseConnector, tuning: SocketTuning) -> Self {
        TransportConnector::Plain(TunedConnector::new(base, tuning))
    }

    /// Wrap `base` with TLS using `tls_config`.
    ///
    /// ALPN is driven by `protocols`; any ALPN list already present in the
    /// config is replaced.
    #[must_use]
    pub fn tls(
        base: BaseConnector,
        tuning: SocketTuning,
        tls_config: &ClientConfig,
        protocols: &[HttpProtocol],
    ) -> Self {
        let mut tls_config = tls_config.clone();
        tls_config.alpn_protocols.clear();

        let builder = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1();
        let https = if protocols.contains(&HttpProtocol::Http2) {
            builder.enable_http2().wrap_connector(base)
        } else {
            builder.wrap_connector(base)
        };
        TransportConnector::Tls(TunedConnector::new(https, tuning))
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, TransportConnector::Tls(_))
    }
}

impl Service<Uri> for TransportConnector {
    type Response = MaybeHttpsStream<TransportStream>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self {
            TransportConnector::Plain(connector) => connector.poll_ready(cx),
            TransportConnector::Tls(connector) => connector.poll_ready(cx),
        }
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        match self {
            TransportConnector::Plain(connector) => {
                if dst.scheme() == Some(&Scheme::HTTPS) {
                    return Box::pin(async { Err(TlsNotInstalled.into()) });
                }
                let connecting = connector.call(dst);
                Box::pin(async move { connecting.await.map(MaybeHttpsStream::Http) })
            }
            TransportConnector::Tls(connector) => connector.call(dst),
        }
    }
}
