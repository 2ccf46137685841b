use crate::error::TransportError;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Default connect timeout (60 seconds)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 60_000;

/// Default socket read and write timeout (60 seconds)
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 60_000;

/// Default whole-call timeout (120 seconds)
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 120_000;

/// Default number of idle connections kept per host
pub const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 1000;

/// Default idle-connection lifetime (30 seconds)
pub const DEFAULT_IDLE_CONNECTION_TIME_MS: u64 = 30_000;

/// Default dispatch ceiling for total and per-destination requests
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Marker for "no proxy port configured"
pub const PROXY_PORT_UNSET: i32 = -1;

/// HTTP protocol selection.
///
/// HTTP/1.1 is always offered; selecting `Http2` adds HTTP/2 after it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[non_exhaustive]
pub enum HttpProtocolType {
    #[default]
    #[serde(rename = "http1.1", alias = "HTTP1_1")]
    Http1_1,
    #[serde(rename = "http2", alias = "HTTP2_0")]
    Http2,
}

/// A protocol the transport may negotiate, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpProtocol {
    Http11,
    Http2,
}

/// TLS root certificate source used by the default trust manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use OS native root certificate store
    #[default]
    Native,
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    WebPki,
}

/// Flat transport configuration.
///
/// Built once, then consumed by [`crate::TransportBuilder`]. All durations are
/// milliseconds; a timeout of `0` disables that timeout.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// TCP connect timeout (default: 60s)
    pub connect_timeout_ms: u64,

    /// Socket read timeout: maximum time a read may stay pending (default: 60s)
    pub read_timeout_ms: u64,

    /// Socket write timeout: maximum time a write may stay pending (default: 60s)
    pub write_timeout_ms: u64,

    /// Whole-call timeout, including time spent queued for admission (default: 120s)
    pub call_timeout_ms: u64,

    /// Maximum idle connections kept in the pool for each destination host
    /// (default: 1000). There is no cap across hosts.
    pub max_idle_connections: usize,

    /// Idle connections older than this are closed (default: 30s)
    pub idle_connection_time_ms: u64,

    /// Concurrency ceiling used for both the total and the per-destination
    /// dispatch limit (default: 1000)
    pub max_connections: usize,

    /// `SO_RCVBUF` in bytes; `<= 0` leaves the OS default (default: -1)
    pub socket_read_buffer_size: i32,

    /// `SO_SNDBUF` in bytes; `<= 0` leaves the OS default (default: -1)
    pub socket_write_buffer_size: i32,

    /// Protocol selection (default: HTTP/1.1 only)
    pub protocol: HttpProtocolType,

    /// Validate server certificates (default: true)
    ///
    /// When `false` every certificate chain is accepted. Use only against
    /// endpoints with self-signed certificates in controlled networks.
    pub validate_certificate: bool,

    /// Crypto provider to pin the TLS context to before trying the default
    /// provider (`aws-lc-rs`, or `ring` with the `ring` feature)
    pub tls_provider: Option<String>,

    /// Root store used by the default trust manager (default: native)
    pub tls_roots: TlsRootConfig,

    /// Enforce hostname verification (default: false)
    pub strict_hostname_verification: bool,

    /// Service endpoint; its host is what the default hostname verifier
    /// checks certificates against. Accepts a bare host or a URL.
    pub endpoint: Option<String>,

    /// Proxy host; a proxy is used only together with `proxy_port`
    pub proxy_host: Option<String>,

    /// Proxy port, `-1` when unset
    pub proxy_port: i32,

    /// Proxy user; a non-blank value enables the proxy authenticator
    pub proxy_user: Option<String>,

    /// Proxy password
    pub proxy_password: Option<String>,

    /// Retry requests whose pooled connection was closed before any byte was
    /// written (default: false)
    pub retry_on_connection_failure: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_SOCKET_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_SOCKET_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            idle_connection_time_ms: DEFAULT_IDLE_CONNECTION_TIME_MS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            socket_read_buffer_size: -1,
            socket_write_buffer_size: -1,
            protocol: HttpProtocolType::default(),
            validate_certificate: true,
            tls_provider: None,
            tls_roots: TlsRootConfig::default(),
            strict_hostname_verification: false,
            endpoint: None,
            proxy_host: None,
            proxy_port: PROXY_PORT_UNSET,
            proxy_user: None,
            proxy_password: None,
            retry_on_connection_failure: false,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("write_timeout_ms", &self.write_timeout_ms)
            .field("call_timeout_ms", &self.call_timeout_ms)
            .field("max_idle_connections", &self.max_idle_connections)
            .field("idle_connection_time_ms", &self.idle_connection_time_ms)
            .field("max_connections", &self.max_connections)
            .field("socket_read_buffer_size", &self.socket_read_buffer_size)
            .field("socket_write_buffer_size", &self.socket_write_buffer_size)
            .field("protocol", &self.protocol)
            .field("validate_certificate", &self.validate_certificate)
            .field("tls_provider", &self.tls_provider)
            .field("tls_roots", &self.tls_roots)
            .field(
                "strict_hostname_verification",
                &self.strict_hostname_verification,
            )
            .field("endpoint", &self.endpoint)
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("proxy_user", &self.proxy_user)
            .field(
                "proxy_password",
                &self.proxy_password.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "retry_on_connection_failure",
                &self.retry_on_connection_failure,
            )
            .finish()
    }
}

impl ConnectionConfig {
    /// Ordered protocol list: HTTP/1.1, then HTTP/2 when selected
    #[must_use]
    pub fn protocols(&self) -> Vec<HttpProtocol> {
        let mut protocols = Vec::with_capacity(2);
        protocols.push(HttpProtocol::Http11);
        if self.protocol == HttpProtocolType::Http2 {
            protocols.push(HttpProtocol::Http2);
        }
        protocols
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    #[must_use]
    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        millis(self.call_timeout_ms)
    }

    #[must_use]
    pub fn idle_connection_time(&self) -> Option<Duration> {
        millis(self.idle_connection_time_ms)
    }

    /// Host part of the configured endpoint.
    ///
    /// `https://obs.example.com:443/` and `obs.example.com` both yield
    /// `obs.example.com`. Returns `None` when no endpoint is configured.
    #[must_use]
    pub fn endpoint_host(&self) -> Option<String> {
        let endpoint = self.endpoint.as_deref()?.trim();
        if endpoint.is_empty() {
            return None;
        }
        if endpoint.contains("://") {
            let url = url::Url::parse(endpoint).ok()?;
            return url.host_str().map(|h| h.trim_matches(['[', ']']).to_owned());
        }
        let host = endpoint.split(['/', '?']).next().unwrap_or(endpoint);
        let host = match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') && port.parse::<u16>().is_ok() => name,
            _ => host,
        };
        Some(host.trim_matches(['[', ']']).to_owned())
    }

    /// Check that the configuration can be built into a transport
    ///
    /// # Errors
    /// Returns `TransportError::InvalidConfig` when the dispatch ceiling is zero.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.max_connections == 0 {
            return Err(TransportError::InvalidConfig(
                "max_connections must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
