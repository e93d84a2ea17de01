// src/server/listener.rs
// Encapsulates low-level TCP bind so the accept loop stays trivial.
use anyhow::{Context, Result};
use tokio::net::TcpListener;

pub async fn bind_tcp(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind listener on {}", addr))?;
    Ok(listener)
}
