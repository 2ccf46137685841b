//! Pluggable host name resolution.

use crate::error::{BoxError, UnknownHostError};
use hyper_util::client::legacy::connect::dns::Name;
use std::future::Future;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::vec;
use tower::Service;

/// Synchronous host name lookup.
///
/// Called from the blocking pool, so implementations may block.
pub trait NameResolver: Send + Sync {
    /// Resolve `hostname` to one or more addresses.
    ///
    /// # Errors
    /// Returns `UnknownHostError` when the name cannot be resolved.
    fn lookup(&self, hostname: &str) -> Result<Vec<IpAddr>, UnknownHostError>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Clone, Copy)]
pub struct SystemResolver;

impl SystemResolver {
    #[must_use]
    pub fn new() -> Self {
        tracing::info!("using system name resolver");
        SystemResolver
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl NameResolver for SystemResolver {
    fn lookup(&self, hostname: &str) -> Result<Vec<IpAddr>, UnknownHostError> {
        let addrs: Vec<IpAddr> = (hostname, 0)
            .to_socket_addrs()
            .map_err(|e| UnknownHostError::new(hostname, Some(e)))?
            .map(|addr| addr.ip())
            .collect();

        if addrs.is_empty() {
            return Err(UnknownHostError::new(hostname, None));
        }
        tracing::info!(host = hostname, addresses = ?addrs, "resolved host");
        Ok(addrs)
    }
}

/// Adapts a [`NameResolver`] to the resolver service `HttpConnector` expects.
///
/// Lookups run on the blocking pool; the connecting task waits for the answer.
#[derive(Clone)]
pub struct ResolverService {
    resolver: Arc<dyn NameResolver>,
}

impl ResolverService {
    #[must_use]
    pub fn new(resolver: Arc<dyn NameResolver>) -> Self {
        Self { resolver }
    }
}

impl std::fmt::Debug for ResolverService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverService").finish_non_exhaustive()
    }
}

impl Service<Name> for ResolverService {
    type Response = vec::IntoIter<SocketAddr>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, name: Name) -> Self::Future {
        let resolver = Arc::clone(&self.resolver);
        Box::pin(async move {
            let host = name.as_str().to_owned();
            let addrs = tokio::task::spawn_blocking(move || resolver.lookup(&host)).await??;
            // HttpConnector fills in the port from the request URI
            let addrs: Vec<SocketAddr> = addrs.into_iter().map(|ip| SocketAddr::new(ip, 0)).collect();
            Ok(addrs.into_iter())
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::str::FromStr;
    use tower::ServiceExt;

    struct StaticResolver(Vec<IpAddr>);

    impl NameResolver for StaticResolver {
        fn lookup(&self, hostname: &str) -> Result<Vec<IpAddr>, UnknownHostError> {
            if hostname == "bucket.test" {
                Ok(self.0.clone())
            } else {
                Err(UnknownHostError::new(hostname, None))
            }
        }
    }

    #[test]
    fn test_system_resolver_localhost() {
        let addrs = SystemResolver::new().lookup("localhost").unwrap();
        assert!(addrs.iter().all(IpAddr::is_loopback));
    }

    #[test]
    fn test_system_resolver_unknown_host() {
        let err = SystemResolver::new()
            .lookup("no-such-host.invalid")
            .unwrap_err();
        assert_eq!(err.host, "no-such-host.invalid");
    }

    #[tokio::test]
    async fn test_resolver_service_uses_custom_resolver() {
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        let service = ResolverService::new(Arc::new(StaticResolver(vec![ip])));

        let addrs: Vec<SocketAddr> = service
            .oneshot(Name::from_str("bucket.test").unwrap())
            .await
            .unwrap()
            .collect();
        assert_eq!(addrs, vec![SocketAddr::new(ip, 0)]);
    }

    #[tokio::test]
    async fn test_resolver_service_error_keeps_unknown_host() {
        let service = ResolverService::new(Arc::new(StaticResolver(Vec::new())));
        let err = service
            .oneshot(Name::from_str("elsewhere.test").unwrap())
            .await
            .unwrap_err();

        let unknown = err.downcast_ref::<UnknownHostError>().unwrap();
        assert_eq!(unknown.host, "elsewhere.test");
    }
}
