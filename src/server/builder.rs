// src/server/builder.rs
use crate::proxy::ConnectionHandler;
use crate::server::listener::bind_tcp;
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

/// Builder pattern so `main.rs` can inject the proxy engine.
pub struct ServerBuilder {
    addr: String,
    handler: Option<Arc<ConnectionHandler>>,
}

impl ServerBuilder {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: Arc<ConnectionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Consume the builder, bind the listener, spawn one task per client.
    /// Accept failures close nothing; they are logged and the loop goes on.
    pub async fn serve(self) -> Result<()> {
        let handler = self.handler.expect("handler must be set via with_handler()");

        let listener = bind_tcp(&self.addr).await?;
        info!("load balancer listening on {}", self.addr);

        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        handler.handle_connection(stream).await;
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}
