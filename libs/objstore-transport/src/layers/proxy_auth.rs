use crate::error::TransportError;
use crate::transport::ResponseBody;
use bytes::Bytes;
use http::header::PROXY_AUTHORIZATION;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service, ServiceExt};

/// Tower layer that answers a proxy `407` challenge with Basic credentials.
///
/// The original request is re-issued once with `Proxy-Authorization`. A
/// second `407` fails with `TransportError::ProxyAuthentication`.
#[derive(Clone)]
pub struct ProxyAuthLayer {
    credential: HeaderValue,
}

impl ProxyAuthLayer {
    /// `credential` is the full header value, e.g. from
    /// [`basic_credential`](crate::proxy::basic_credential)
    #[must_use]
    pub fn new(credential: HeaderValue) -> Self {
        Self { credential }
    }
}

impl<S> Layer<S> for ProxyAuthLayer {
    type Service = ProxyAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ProxyAuthService {
            inner,
            credential: self.credential.clone(),
        }
    }
}

/// Service that re-issues a request once after a proxy challenge
#[derive(Clone)]
pub struct ProxyAuthService<S> {
    inner: S,
    credential: HeaderValue,
}

fn copy_request(req: &Request<Full<Bytes>>) -> Request<Full<Bytes>> {
    let mut copy = Request::new(req.body().clone());
    *copy.method_mut() = req.method().clone();
    *copy.uri_mut() = req.uri().clone();
    *copy.version_mut() = req.version();
    *copy.headers_mut() = req.headers().clone();
    copy
}

impl<S> Service<Request<Full<Bytes>>> for ProxyAuthService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = TransportError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = Response<ResponseBody>;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let credential = self.credential.clone();

        Box::pin(async move {
            let already_authorized = req.headers().contains_key(PROXY_AUTHORIZATION);
            let mut retry = copy_request(&req);

            let response = inner.call(req).await?;
            if response.status() != StatusCode::PROXY_AUTHENTICATION_REQUIRED {
                return Ok(response);
            }
            if already_authorized {
                return Err(TransportError::ProxyAuthentication {
                    status: response.status(),
                });
            }
            drop(response);

            tracing::info!(uri = %retry.uri(), "proxy requested authentication; re-issuing with credentials");
            retry.headers_mut().insert(PROXY_AUTHORIZATION, credential);

            let response = inner.ready().await?.call(retry).await?;
            if response.status() == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
                tracing::warn!("proxy rejected credentials");
                return Err(TransportError::ProxyAuthentication {
                    status: response.status(),
                });
            }
            Ok(response)
        })
    }
}
