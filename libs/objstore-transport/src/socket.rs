//! Per-socket buffer and latency tuning.
//!
//! [`TunedConnector`] wraps any connector and tunes every connection it
//! yields: receive and send buffer sizes when configured, and `TCP_NODELAY`
//! always. The wrapped connector keeps full control of how the connection is
//! established (DNS, TLS handshake, ALPN); only the tuning step is added.

use crate::error::BoxError;
use http::Uri;
use hyper_rustls::MaybeHttpsStream;
use hyper_util::rt::TokioIo;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tower::Service;

/// Socket options applied to every socket at creation time.
///
/// Sizes `<= 0` mean "leave the OS default": they are never written, so a
/// size is never forced to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketTuning {
    read_buffer_size: i32,
    write_buffer_size: i32,
}

impl SocketTuning {
    #[must_use]
    pub fn new(read_buffer_size: i32, write_buffer_size: i32) -> Self {
        Self {
            read_buffer_size,
            write_buffer_size,
        }
    }

    /// Configured `SO_RCVBUF`, if it will be applied
    #[must_use]
    pub fn read_buffer_size(&self) -> Option<usize> {
        positive(self.read_buffer_size)
    }

    /// Configured `SO_SNDBUF`, if it will be applied
    #[must_use]
    pub fn write_buffer_size(&self) -> Option<usize> {
        positive(self.write_buffer_size)
    }

    /// Apply the tuning to a socket.
    ///
    /// # Errors
    /// Returns the OS error if any socket option cannot be set.
    pub fn apply<S>(&self, socket: &S) -> io::Result<()>
    where
        for<'a> SockRef<'a>: From<&'a S>,
    {
        let sock = SockRef::from(socket);
        if let Some(size) = self.read_buffer_size() {
            sock.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.write_buffer_size() {
            sock.set_send_buffer_size(size)?;
        }
        sock.set_nodelay(true)
    }

    /// Create an unconnected TCP socket with the tuning already applied.
    ///
    /// Setting buffer sizes before `connect` lets the kernel pick a matching
    /// TCP window scale.
    ///
    /// # Errors
    /// Returns the OS error if the socket cannot be created or tuned.
    pub fn unconnected_socket(&self, domain: Domain) -> io::Result<Socket> {
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        self.apply(&socket)?;
        Ok(socket)
    }
}

fn positive(size: i32) -> Option<usize> {
    usize::try_from(size).ok().filter(|s| *s > 0)
}

/// A connection whose underlying TCP socket can be tuned.
pub trait TuneSocket {
    /// Apply `tuning` to the TCP socket under this connection.
    ///
    /// # Errors
    /// Returns the OS error if a socket option cannot be set.
    fn tune(&self, tuning: &SocketTuning) -> io::Result<()>;
}

impl TuneSocket for TcpStream {
    fn tune(&self, tuning: &SocketTuning) -> io::Result<()> {
        tuning.apply(self)
    }
}

impl<T: TuneSocket> TuneSocket for TokioIo<T> {
    fn tune(&self, tuning: &SocketTuning) -> io::Result<()> {
        self.inner().tune(tuning)
    }
}

impl<T: TuneSocket> TuneSocket for MaybeHttpsStream<T> {
    fn tune(&self, tuning: &SocketTuning) -> io::Result<()> {
        match self {
            MaybeHttpsStream::Http(stream) => stream.tune(tuning),
            MaybeHttpsStream::Https(stream) => {
                // The TLS session sits on top of the TCP stream; options go to
                // the socket underneath it.
                let (tcp, _session) = stream.inner().get_ref();
                tcp.tune(tuning)
            }
        }
    }
}

/// Connector wrapper that tunes every connection produced by `inner`.
#[derive(Debug, Clone)]
pub struct TunedConnector<C> {
    inner: C,
    tuning: SocketTuning,
}

impl<C> TunedConnector<C> {
    #[must_use]
    pub fn new(inner: C, tuning: SocketTuning) -> Self {
        Self { inner, tuning }
    }
}

impl<C> Service<Uri> for TunedConnector<C>
where
    C: Service<Uri>,
    C::Response: TuneSocket + Send + 'static,
    C::Future: Send + 'static,
    C::Error: Into<BoxError>,
{
    type Response = C::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let connecting = self.inner.call(dst);
        let tuning = self.tuning;
        Box::pin(async move {
            let conn = connecting.await.map_err(Into::into)?;
            conn.tune(&tuning)?;
            Ok(conn)
        })
    }
}
