// src/backend/pool.rs
use super::pooled::PooledConnection;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const DEFAULT_MAX_IDLE: usize = 10;
pub const DEFAULT_MAX_ACTIVE: usize = 100;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool is closed")]
    Closed,
    #[error("connection pool exhausted")]
    Exhausted,
    #[error("backend connect timed out")]
    ConnectTimeout,
    #[error("failed to connect to backend: {0}")]
    Connect(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
struct PoolConfig {
    address: String,
    max_idle: usize,
    max_active: usize,
    idle_timeout: Duration,
    connect_timeout: Duration,
}

struct IdleConn {
    stream: TcpStream,
    last_used_at: Instant,
}

/// Interior pool state. One mutex covers all three fields; the lock is
/// never held across an await point.
struct PoolInner {
    idle: Vec<IdleConn>,
    active_count: usize,
    closed: bool,
}

/// A bounded pool of TCP connections to one backend address.
///
/// Connections handed out are counted in `active_count` until returned;
/// returned connections sit on a LIFO idle stack so the warmest one is
/// reused first. `active_count + idle.len()` never exceeds `max_active`.
pub struct ConnectionPool {
    config: PoolConfig,
    inner: Arc<Mutex<PoolInner>>,
    shutdown_tx: watch::Sender<bool>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

/// Counter snapshot used by callers that watch pool pressure.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
}

impl ConnectionPool {
    pub fn new(
        address: String,
        max_idle: usize,
        max_active: usize,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        let config = PoolConfig {
            address,
            max_idle,
            max_active,
            idle_timeout,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        };

        let inner = Arc::new(Mutex::new(PoolInner {
            idle: Vec::with_capacity(max_idle),
            active_count: 0,
            closed: false,
        }));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cleanup = spawn_cleanup(Arc::clone(&inner), idle_timeout, shutdown_rx);

        Arc::new(Self {
            config,
            inner,
            shutdown_tx,
            cleanup: Mutex::new(Some(cleanup)),
        })
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Get a connection: pop an idle one if available, otherwise dial a new
    /// one, failing fast when the pool is closed or at its active cap.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection, PoolError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(PoolError::Closed);
            }

            if let Some(idle) = inner.idle.pop() {
                inner.active_count += 1;
                debug!("reusing idle connection to {}", self.config.address);
                return Ok(PooledConnection::new(idle.stream, Arc::clone(self)));
            }

            if inner.active_count >= self.config.max_active {
                warn!(
                    "connection pool for {} exhausted ({} active)",
                    self.config.address, inner.active_count
                );
                return Err(PoolError::Exhausted);
            }

            // Reserve the slot before releasing the lock so concurrent gets
            // cannot over-admit while this one is dialing.
            inner.active_count += 1;
        }

        let stream = match timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.address),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.release_slot();
                debug!("failed to connect to {}: {}", self.config.address, e);
                return Err(PoolError::Connect(e));
            }
            Err(_) => {
                self.release_slot();
                debug!("connect to {} timed out", self.config.address);
                return Err(PoolError::ConnectTimeout);
            }
        };

        {
            // A close that raced the dial wins; drop the fresh stream.
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                inner.active_count -= 1;
                return Err(PoolError::Closed);
            }
        }

        debug!("new connection established to {}", self.config.address);
        Ok(PooledConnection::new(stream, Arc::clone(self)))
    }

    /// Return a checked-out connection. Only called by the wrapper's drop.
    pub(crate) fn put(&self, stream: TcpStream) {
        let mut inner = self.inner.lock().unwrap();

        if inner.closed {
            // Dropping the stream closes it.
            return;
        }

        if !connection_is_reusable(&stream) {
            debug!(
                "discarding returned connection to {} (peer closed or dirty)",
                self.config.address
            );
            inner.active_count -= 1;
            return;
        }

        if inner.idle.len() >= self.config.max_idle {
            inner.active_count -= 1;
            return;
        }

        inner.idle.push(IdleConn {
            stream,
            last_used_at: Instant::now(),
        });
        inner.active_count -= 1;
    }

    /// Close the pool: fail further gets, release all idle connections and
    /// join the cleanup worker. Checked-out connections keep working; their
    /// eventual return drops the underlying stream.
    pub async fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
            inner.idle.clear();
        }

        let _ = self.shutdown_tx.send(true);
        let handle = self.cleanup.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        debug!("connection pool for {} closed", self.config.address);
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().unwrap();
        PoolStats {
            active: inner.active_count,
            idle: inner.idle.len(),
        }
    }

    fn release_slot(&self) {
        self.inner.lock().unwrap().active_count -= 1;
    }
}

/// Non-blocking peek at a returned connection. A readable socket means the
/// peer either closed (EOF) or sent bytes nobody will consume; both make
/// the connection unfit for reuse.
fn connection_is_reusable(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.try_read(&mut probe) {
        Ok(_) => false,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
        Err(_) => false,
    }
}

/// Background worker releasing idle connections older than `idle_timeout`.
/// Exits when the pool signals shutdown or drops its sender.
fn spawn_cleanup(
    inner: Arc<Mutex<PoolInner>>,
    idle_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = idle_timeout / 2;
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut inner = inner.lock().unwrap();
                    if inner.closed {
                        break;
                    }
                    let now = Instant::now();
                    let before = inner.idle.len();
                    inner
                        .idle
                        .retain(|conn| now.duration_since(conn.last_used_at) <= idle_timeout);
                    let released = before - inner.idle.len();
                    if released > 0 {
                        debug!("released {} expired idle connections", released);
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
