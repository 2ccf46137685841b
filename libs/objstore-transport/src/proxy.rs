//! HTTP proxy routing.
//!
//! Plain `http` destinations are sent to the proxy with an absolute-form
//! request target. `https` destinations are tunneled with `CONNECT`; a `407`
//! on the tunnel is answered once with Basic credentials.

use crate::config::PROXY_PORT_UNSET;
use crate::error::{BoxError, TransportError};
use crate::stream::TransportStream;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::{HeaderValue, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tower::{Service, ServiceExt};

/// Largest `CONNECT` response head accepted from a proxy
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Build `Basic base64(user:password)` as a sensitive header value.
///
/// # Errors
/// Never fails for base64 output; the `Result` mirrors `HeaderValue` parsing.
pub fn basic_credential(
    user: &str,
    password: &str,
) -> Result<HeaderValue, http::header::InvalidHeaderValue> {
    let encoded = STANDARD.encode(format!("{user}:{password}"));
    let mut value = HeaderValue::try_from(format!("Basic {encoded}"))?;
    value.set_sensitive(true);
    Ok(value)
}

/// A configured HTTP proxy.
#[derive(Clone)]
pub struct HttpProxy {
    host: String,
    port: u16,
    user: Option<String>,
    authorization: Option<HeaderValue>,
}

impl HttpProxy {
    /// Proxy described by the flat configuration fields.
    ///
    /// Returns `Ok(None)` unless `host` is present and `port` is set.
    /// Credentials are attached only for a non-blank `user`; a missing
    /// password is treated as empty.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidProxy` for a port outside `1..=65535`
    /// or a blank host.
    pub fn from_config(
        host: Option<&str>,
        port: i32,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Option<Self>, TransportError> {
        let Some(host) = host else {
            return Ok(None);
        };
        if port == PROXY_PORT_UNSET {
            return Ok(None);
        }

        let host = host.trim();
        if host.is_empty() {
            return Err(TransportError::InvalidProxy {
                reason: "proxy host is blank".to_owned(),
            });
        }
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| TransportError::InvalidProxy {
                reason: format!("proxy port {port} is out of range"),
            })?;

        let user = user.filter(|u| !u.trim().is_empty());
        let authorization = user
            .map(|u| basic_credential(u, password.unwrap_or_default()))
            .transpose()
            .map_err(|e| TransportError::InvalidProxy {
                reason: format!("proxy credentials cannot be encoded: {e}"),
            })?;

        let proxy = Self {
            host: host.to_owned(),
            port,
            user: user.map(str::to_owned),
            authorization,
        };
        tracing::info!(proxy = %proxy, authenticated = proxy.authorization.is_some(), "Using proxy");
        Ok(Some(proxy))
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `Proxy-Authorization` value, present when credentials are configured
    #[must_use]
    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.authorization.as_ref()
    }

    fn uri(&self) -> Result<Uri, http::uri::InvalidUri> {
        format!("http://{self}").parse()
    }
}

impl fmt::Display for HttpProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for HttpProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProxy")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Connector that routes through an optional [`HttpProxy`] and yields
/// [`TransportStream`]s carrying the socket read and write timeouts.
#[derive(Clone, Debug)]
pub struct ProxyConnector<C> {
    inner: C,
    proxy: Option<Arc<HttpProxy>>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl<C> ProxyConnector<C> {
    #[must_use]
    pub fn new(inner: C, proxy: Option<Arc<HttpProxy>>) -> Self {
        Self {
            inner,
            proxy,
            read_timeout: None,
            write_timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, read: Option<Duration>, write: Option<Duration>) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }
}

impl<C> Service<Uri> for ProxyConnector<C>
where
    C: Service<Uri, Response = TokioIo<TcpStream>> + Clone + Send + 'static,
    C::Future: Send + 'static,
    C::Error: Into<BoxError>,
{
    type Response = TransportStream;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let proxy = self.proxy.clone();
        let (read_timeout, write_timeout) = (self.read_timeout, self.write_timeout);

        Box::pin(async move {
            let (io, proxied) = match proxy {
                None => (connect(&mut inner, dst).await?, false),
                Some(proxy) if dst.scheme() == Some(&http::uri::Scheme::HTTPS) => {
                    (tunnel(&mut inner, &proxy, &dst, read_timeout).await?, false)
                }
                Some(proxy) => (connect(&mut inner, proxy.uri()?).await?, true),
            };
            Ok(TransportStream::new(io)
                .proxied(proxied)
                .with_timeouts(read_timeout, write_timeout))
        })
    }
}

async fn connect<C>(inner: &mut C, uri: Uri) -> Result<TokioIo<TcpStream>, BoxError>
where
    C: Service<Uri, Response = TokioIo<TcpStream>>,
    C::Error: Into<BoxError>,
{
    inner
        .ready()
        .await
        .map_err(Into::into)?
        .call(uri)
        .await
        .map_err(Into::into)
}

/// Open a `CONNECT` tunnel to `dst` through `proxy`.
async fn tunnel<C>(
    inner: &mut C,
    proxy: &HttpProxy,
    dst: &Uri,
    read_timeout: Option<Duration>,
) -> Result<TokioIo<TcpStream>, BoxError>
where
    C: Service<Uri, Response = TokioIo<TcpStream>>,
    C::Error: Into<BoxError>,
{
    let host = dst.host().ok_or("destination URI has no host")?;
    let authority = format!("{host}:{}", dst.port_u16().unwrap_or(443));

    let mut io = connect(inner, proxy.uri()?).await?;
    let status = connect_handshake(io.inner_mut(), &authority, None, read_timeout).await?;
    if status.is_success() {
        return Ok(io);
    }

    match (status, proxy.authorization()) {
        (StatusCode::PROXY_AUTHENTICATION_REQUIRED, Some(credential)) => {
            tracing::info!(proxy = %proxy, "proxy requested authentication; retrying CONNECT with credentials");
            drop(io);
            let mut io = connect(inner, proxy.uri()?).await?;
            let status =
                connect_handshake(io.inner_mut(), &authority, Some(credential), read_timeout).await?;
            if status.is_success() {
                Ok(io)
            } else if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
                Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "proxy rejected credentials for CONNECT (407)",
                )
                .into())
            } else {
                Err(tunnel_refused(status).into())
            }
        }
        _ => Err(tunnel_refused(status).into()),
    }
}

fn tunnel_refused(status: StatusCode) -> io::Error {
    io::Error::other(format!("proxy refused CONNECT with status {status}"))
}

/// Write a `CONNECT` request and read the response head, returning its status.
async fn connect_handshake(
    tcp: &mut TcpStream,
    authority: &str,
    authorization: Option<&HeaderValue>,
    read_timeout: Option<Duration>,
) -> io::Result<StatusCode> {
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n").into_bytes();
    if let Some(credential) = authorization {
        request.extend_from_slice(b"Proxy-Authorization: ");
        request.extend_from_slice(credential.as_bytes());
        request.extend_from_slice(b"\r\n");
    }
    request.extend_from_slice(b"\r\n");
    tcp.write_all(&request).await?;

    let head = match read_timeout {
        Some(timeout) => tokio::time::timeout(timeout, read_response_head(tcp))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "proxy CONNECT response timed out"))??,
        None => read_response_head(tcp).await?,
    };
    parse_status(&head)
}

async fn read_response_head(tcp: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(256);
    let mut chunk = [0u8; 512];
    loop {
        let n = tcp.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "proxy closed connection during CONNECT",
            ));
        }
        head.extend_from_slice(&chunk[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > MAX_CONNECT_RESPONSE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "proxy CONNECT response head too large",
            ));
        }
    }
}

fn parse_status(head: &[u8]) -> io::Result<StatusCode> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidData, "malformed proxy CONNECT response");
    let line = head.split(|b| *b == b'\n').next().ok_or_else(invalid)?;
    let line = std::str::from_utf8(line).map_err(|_| invalid())?;
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some(version) if version.starts_with("HTTP/1.") => {}
        _ => return Err(invalid()),
    }
    parts
        .next()
        .and_then(|code| StatusCode::from_bytes(code.as_bytes()).ok())
        .ok_or_else(invalid)
}
