// src/main.rs
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use tcplb::backend::BackendRegistry;
use tcplb::config;
use tcplb::health::{HealthCheckConfig, HealthChecker};
use tcplb::load_balancer::create_load_balancer;
use tcplb::proxy::ConnectionHandler;
use tcplb::server::ServerBuilder;

#[derive(Parser)]
#[command(name = "tcplb")]
#[command(about = "Layer-4 TCP load balancer with connection pooling and health checks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    info!("loading configuration from {}", cli.config.display());
    let config = config::load_config(&cli.config).await?;

    info!(
        "initializing backend registry with {} upstream servers",
        config.upstream.len()
    );
    let registry = Arc::new(BackendRegistry::new(&config.upstream));
    let (total, alive) = registry.count();
    info!("backend registry initialized: {}/{} backends alive", alive, total);

    let checker = if config.health_check.enabled {
        let checker = Arc::new(HealthChecker::new(
            HealthCheckConfig {
                interval: config.health_check.interval,
                timeout: config.health_check.timeout,
                healthy_threshold: config.health_check.healthy_threshold,
                unhealthy_threshold: config.health_check.unhealthy_threshold,
            },
            Arc::clone(&registry),
        ));
        checker.start();
        Some(checker)
    } else {
        info!("health checking disabled");
        None
    };

    let balancer = create_load_balancer(Arc::clone(&registry));
    let handler = Arc::new(ConnectionHandler::new(balancer));

    let addr = format!("0.0.0.0:{}", config.server.port);
    let server = ServerBuilder::new(addr).with_handler(handler);

    info!("load balancer ready on port {}", config.server.port);

    let serve_result = tokio::select! {
        result = server.serve() => result,
        _ = shutdown_signal() => Ok(()),
    };
    if let Err(e) = &serve_result {
        error!("server error: {:#}", e);
    }

    info!("shutting down server");
    if let Some(checker) = checker {
        checker.stop().await;
    }
    registry.close().await;

    // Brief grace period for in-flight streams.
    tokio::time::sleep(Duration::from_secs(1)).await;

    info!("server shut down");
    serve_result
}

fn init_tracing() {
    let default_filter = if std::env::var("DEBUG").as_deref() == Ok("1") {
        "tcplb=debug"
    } else {
        "tcplb=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
