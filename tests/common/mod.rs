// tests/common/mod.rs
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tcplb::backend::BackendRegistry;
use tcplb::load_balancer::create_load_balancer;
use tcplb::proxy::ConnectionHandler;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub struct ProxyHandle {
    pub addr: SocketAddr,
    pub registry: Arc<BackendRegistry>,
}

/// Spin up the full proxy path (registry, balancer, handler, accept loop)
/// on an ephemeral port.
pub async fn spawn_proxy(upstreams: &[String]) -> ProxyHandle {
    let registry = Arc::new(BackendRegistry::new(upstreams));
    let balancer = create_load_balancer(Arc::clone(&registry));
    let handler = Arc::new(ConnectionHandler::new(balancer));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                handler.handle_connection(stream).await;
            });
        }
    });

    ProxyHandle { addr, registry }
}

pub struct EchoBackend {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
}

/// Backend that echoes every read straight back.
pub async fn spawn_echo_backend() -> EchoBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    EchoBackend { addr, connections }
}

/// Backend that drains its input to EOF before echoing anything, so it only
/// answers clients whose half-close made it through.
pub async fn spawn_late_echo_backend() -> EchoBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut data = Vec::new();
                if stream.read_to_end(&mut data).await.is_ok() {
                    let _ = stream.write_all(&data).await;
                }
                let _ = stream.shutdown().await;
            });
        }
    });

    EchoBackend { addr, connections }
}

/// A port with nothing listening on it.
pub async fn reserve_dead_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
