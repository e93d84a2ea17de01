// src/proxy/handler.rs
use crate::backend::{Backend, PooledConnection};
use crate::load_balancer::LoadBalancer;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_READ_TIMEOUT: Duration = Duration::from_secs(5);
const PROXY_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const COPY_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("request timed out after {attempts} attempts")]
    AcquisitionTimeout { attempts: u32 },
    #[error("all backends failed after {attempts} attempts: {last_error}")]
    AllBackendsFailed { attempts: u32, last_error: String },
}

/// Per-client proxy engine: selects a backend with bounded retries, then
/// splices bytes in both directions until either side closes.
pub struct ConnectionHandler {
    balancer: Arc<dyn LoadBalancer>,
    max_retries: u32,
    retry_delay: Duration,
    connect_timeout: Duration,
    request_timeout: Duration,
    // Armed on the client at entry and cleared once streaming begins; no
    // client read happens in between, so it is parity with the acquisition
    // deadline rather than an independent trigger.
    #[allow(dead_code)]
    handshake_timeout: Duration,
    proxy_idle_timeout: Duration,
    write_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(balancer: Arc<dyn LoadBalancer>) -> Self {
        Self {
            balancer,
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            handshake_timeout: HANDSHAKE_READ_TIMEOUT,
            proxy_idle_timeout: PROXY_IDLE_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
        }
    }

    pub async fn handle_connection(&self, mut client: TcpStream) {
        let peer = client
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        info!("new connection from {}", peer);

        let deadline = Instant::now() + self.request_timeout;

        let (backend_conn, backend) = match self.acquire_backend(deadline).await {
            Ok(pair) => pair,
            Err(e) => {
                error!("failed to reach any backend for {}: {}", peer, e);
                send_unavailable(&mut client).await;
                return;
            }
        };

        info!(
            "proxying client {} to backend {}",
            peer,
            backend.address()
        );

        self.stream(client, backend_conn, &peer).await;
    }

    /// Acquire a pooled connection to some live backend, never dialing the
    /// same address twice for one client and never outliving the request
    /// deadline.
    async fn acquire_backend(
        &self,
        deadline: Instant,
    ) -> Result<(PooledConnection, Arc<Backend>), ProxyError> {
        let mut attempted: HashSet<String> = HashSet::new();
        let mut last_error = String::from("no backend attempted");

        for attempt in 1..=self.max_retries {
            if Instant::now() >= deadline {
                return Err(ProxyError::AcquisitionTimeout {
                    attempts: attempt - 1,
                });
            }

            let backend = match self.balancer.next().await {
                Ok(backend) => backend,
                Err(e) => {
                    debug!("attempt {}: {}", attempt, e);
                    last_error = e.to_string();
                    if attempt < self.max_retries {
                        self.retry_pause(deadline).await;
                    }
                    continue;
                }
            };

            if attempted.contains(backend.address()) {
                debug!(
                    "attempt {}: skipping already tried backend {}",
                    attempt,
                    backend.address()
                );

                let available = self.balancer.available_count();
                if attempted.len() >= available {
                    debug!("all {} available backends have been tried", available);
                    break;
                }

                if attempt < self.max_retries {
                    self.retry_pause(deadline).await;
                }
                continue;
            }

            attempted.insert(backend.address().to_string());

            let remaining = deadline.saturating_duration_since(Instant::now());
            let dial_timeout = self.connect_timeout.min(remaining);

            match timeout(dial_timeout, backend.pool().get()).await {
                Ok(Ok(conn)) => {
                    debug!(
                        "attempt {}: connected to backend {}",
                        attempt,
                        backend.address()
                    );
                    return Ok((conn, backend));
                }
                Ok(Err(e)) => {
                    debug!(
                        "attempt {}: backend {} failed: {}",
                        attempt,
                        backend.address(),
                        e
                    );
                    last_error = e.to_string();
                }
                Err(_) => {
                    debug!(
                        "attempt {}: backend {} connect timed out",
                        attempt,
                        backend.address()
                    );
                    last_error = format!("backend connect timeout ({:?})", dial_timeout);
                }
            }

            if attempt < self.max_retries {
                self.retry_pause(deadline).await;
            }
        }

        Err(ProxyError::AllBackendsFailed {
            attempts: self.max_retries,
            last_error,
        })
    }

    /// Sleep `retry_delay`, clipped to the request deadline.
    async fn retry_pause(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let pause = self.retry_delay.min(remaining);
        if !pause.is_zero() {
            sleep(pause).await;
        }
    }

    /// Run both copy directions to completion, half-closing each target when
    /// its source ends so the reverse direction can drain, then tear down.
    /// Dropping the backend handle returns it to its pool.
    async fn stream(&self, mut client: TcpStream, backend_conn: PooledConnection, peer: &str) {
        let (mut client_read, mut client_write) = client.split();
        let (mut backend_read, mut backend_write) = tokio::io::split(backend_conn);

        let client_to_backend = copy_half(
            &mut client_read,
            &mut backend_write,
            self.proxy_idle_timeout,
            self.write_timeout,
        );
        let backend_to_client = copy_half(
            &mut backend_read,
            &mut client_write,
            self.proxy_idle_timeout,
            self.write_timeout,
        );

        let (to_backend, to_client) = tokio::join!(client_to_backend, backend_to_client);

        match to_backend {
            Ok(n) => debug!("client {} sent {} bytes to backend", peer, n),
            Err(e) => debug!("client to backend copy for {} ended: {}", peer, e),
        }
        match to_client {
            Ok(n) => debug!("client {} received {} bytes from backend", peer, n),
            Err(e) => debug!("backend to client copy for {} ended: {}", peer, e),
        }

        debug!("closing connection from {}", peer);
        let backend_conn = backend_read.unsplit(backend_write);
        drop(backend_conn);
    }
}

/// Copy one direction. Every read is bounded by the idle timeout and every
/// write by the write timeout. Whatever way the loop ends, the target's
/// write side is shut down so the peer observes EOF. EOF on the source is
/// a clean end, not an error.
async fn copy_half<R, W>(
    src: &mut R,
    dst: &mut W,
    read_timeout: Duration,
    write_timeout: Duration,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    let result = loop {
        let n = match timeout(read_timeout, src.read(&mut buf)).await {
            Ok(Ok(0)) => break Ok(()),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => break Err(e),
            Err(_) => break Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout")),
        };

        match timeout(write_timeout, dst.write_all(&buf[..n])).await {
            Ok(Ok(())) => total += n as u64,
            Ok(Err(e)) => break Err(e),
            Err(_) => break Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout")),
        }
    };

    let _ = dst.shutdown().await;
    result.map(|_| total)
}

/// Minimal 503 written to clients no backend could be found for. A courtesy
/// for HTTP clients; anything else just sees these bytes followed by FIN.
fn service_unavailable(message: &str) -> String {
    format!(
        "HTTP/1.1 503 Service Unavailable\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n\
         {}",
        message.len(),
        message
    )
}

async fn send_unavailable(client: &mut TcpStream) {
    let response = service_unavailable("Service temporarily unavailable");
    let _ = client.write_all(response.as_bytes()).await;
    let _ = client.shutdown().await;
}
