//! Connection type produced by the plain connector.

use crate::socket::{SocketTuning, TuneSocket};
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, Sleep};

/// TCP connection with socket read and write timeouts.
///
/// A read or write that stays pending longer than its timeout fails with
/// `io::ErrorKind::TimedOut`. Any progress re-arms the timer.
///
/// The read timeout counts silence from the peer after the last write
/// progress: a pending read does not expire while a request body is still
/// being sent.
#[derive(Debug)]
pub struct TransportStream {
    io: TokioIo<TcpStream>,
    proxied: bool,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    read_timer: Option<Pin<Box<Sleep>>>,
    write_timer: Option<Pin<Box<Sleep>>>,
}

impl TransportStream {
    #[must_use]
    pub fn new(io: TokioIo<TcpStream>) -> Self {
        Self {
            io,
            proxied: false,
            read_timeout: None,
            write_timeout: None,
            read_timer: None,
            write_timer: None,
        }
    }

    /// Mark the connection as going through an HTTP proxy, so requests use
    /// the absolute-form target.
    #[must_use]
    pub fn proxied(mut self, proxied: bool) -> Self {
        self.proxied = proxied;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, read: Option<Duration>, write: Option<Duration>) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    #[must_use]
    pub fn is_proxied(&self) -> bool {
        self.proxied
    }

    #[must_use]
    pub fn tcp(&self) -> &TcpStream {
        self.io.inner()
    }
}

/// Poll the deadline for a pending operation; `Err` once it has elapsed.
fn poll_deadline(
    timer: &mut Option<Pin<Box<Sleep>>>,
    timeout: Option<Duration>,
    cx: &mut Context<'_>,
) -> io::Result<()> {
    let Some(timeout) = timeout else {
        return Ok(());
    };
    let sleep = timer.get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
    match sleep.as_mut().poll(cx) {
        Poll::Ready(()) => {
            *timer = None;
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("socket operation timed out after {timeout:?}"),
            ))
        }
        Poll::Pending => Ok(()),
    }
}

impl Read for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.io).poll_read(cx, buf) {
            Poll::Ready(res) => {
                this.read_timer = None;
                Poll::Ready(res)
            }
            Poll::Pending => match poll_deadline(&mut this.read_timer, this.read_timeout, cx) {
                Ok(()) => Poll::Pending,
                Err(e) => Poll::Ready(Err(e)),
            },
        }
    }
}

impl TransportStream {
    fn extend_read_deadline(&mut self) {
        if let (Some(timer), Some(timeout)) = (self.read_timer.as_mut(), self.read_timeout) {
            timer.as_mut().reset(Instant::now() + timeout);
        }
    }

    fn finish_write<T>(&mut self, polled: Poll<io::Result<T>>, cx: &mut Context<'_>) -> Poll<io::Result<T>> {
        match polled {
            Poll::Ready(res) => {
                self.write_timer = None;
                if res.is_ok() {
                    self.extend_read_deadline();
                }
                Poll::Ready(res)
            }
            Poll::Pending => match poll_deadline(&mut self.write_timer, self.write_timeout, cx) {
                Ok(()) => Poll::Pending,
                Err(e) => Poll::Ready(Err(e)),
            },
        }
    }
}

impl Write for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.io).poll_write(cx, buf);
        this.finish_write(polled, cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.io).poll_write_vectored(cx, bufs);
        this.finish_write(polled, cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.io.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.io).poll_flush(cx);
        this.finish_write(polled, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

impl Connection for TransportStream {
    fn connected(&self) -> Connected {
        self.io.connected().proxy(self.proxied)
    }
}

impl TuneSocket for TransportStream {
    fn tune(&self, tuning: &SocketTuning) -> io::Result<()> {
        self.io.tune(tuning)
    }
}
