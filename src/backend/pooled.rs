// src/backend/pooled.rs
use super::pool::ConnectionPool;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// A connection borrowed from a [`ConnectionPool`].
///
/// Reads, writes and shutdown delegate to the underlying stream, so the
/// proxy engine treats it exactly like a plain `TcpStream`. Dropping the
/// wrapper returns the stream to the pool; the `Option::take` in `Drop`
/// makes the return happen exactly once.
pub struct PooledConnection {
    stream: Option<TcpStream>,
    pool: Arc<ConnectionPool>,
}

impl PooledConnection {
    pub(crate) fn new(stream: TcpStream, pool: Arc<ConnectionPool>) -> Self {
        Self {
            stream: Some(stream),
            pool,
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner()?.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner()?.local_addr()
    }

    fn inner(&self) -> io::Result<&TcpStream> {
        self.stream.as_ref().ok_or_else(returned_error)
    }
}

fn returned_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        "connection already returned to pool",
    )
}

impl AsyncRead for PooledConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Err(returned_error())),
        }
    }
}

impl AsyncWrite for PooledConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, buf),
            None => Poll::Ready(Err(returned_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Err(returned_error())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Err(returned_error())),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.pool.put(stream);
        }
    }
}
