// src/health/checker.rs
use crate::backend::BackendRegistry;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        }
    }
}

/// Coarse classification of a failed probe, kept for logs and the
/// health snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    Refused,
    Timeout,
    Unreachable,
    Other(String),
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::Refused => write!(f, "connection refused"),
            ProbeFailure::Timeout => write!(f, "connection timeout"),
            ProbeFailure::Unreachable => write!(f, "network unreachable"),
            ProbeFailure::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<std::io::Error> for ProbeFailure {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused => ProbeFailure::Refused,
            ErrorKind::TimedOut => ProbeFailure::Timeout,
            ErrorKind::NetworkUnreachable | ErrorKind::HostUnreachable => {
                ProbeFailure::Unreachable
            }
            _ => ProbeFailure::Other(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthState {
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<ProbeFailure>,
}

/// Probes every registered backend on a fixed interval and flips liveness
/// through the registry once the consecutive-success/failure thresholds
/// are crossed, damping flapping backends.
pub struct HealthChecker {
    config: HealthCheckConfig,
    registry: Arc<BackendRegistry>,
    states: Mutex<HashMap<String, HealthState>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, registry: Arc<BackendRegistry>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            registry,
            states: Mutex::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            worker: Mutex::new(None),
        }
    }

    /// Seed per-backend state and launch the check loop. Seeding with
    /// `consecutive_successes = healthy_threshold` keeps backends that are
    /// already live from being perturbed by the first cycles.
    pub fn start(self: &Arc<Self>) {
        {
            let mut states = self.states.lock().unwrap();
            for backend in self.registry.all_backends() {
                states.insert(
                    backend.address().to_string(),
                    HealthState {
                        consecutive_successes: self.config.healthy_threshold,
                        ..HealthState::default()
                    },
                );
            }
        }

        let checker = Arc::clone(self);
        let handle = tokio::spawn(async move { checker.run().await });
        *self.worker.lock().unwrap() = Some(handle);

        info!(
            "health checker started with interval {:?}",
            self.config.interval
        );
    }

    pub async fn stop(&self) {
        info!("stopping health checker");
        let _ = self.shutdown_tx.send(true);

        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("health checker stopped");
    }

    /// Deep copy of the per-backend probe state.
    pub fn health_snapshot(&self) -> HashMap<String, HealthState> {
        self.states.lock().unwrap().clone()
    }

    async fn run(&self) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let start = tokio::time::Instant::now() + self.config.interval;
        let mut ticker = tokio::time::interval_at(start, self.config.interval);

        self.check_all_backends().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all_backends().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One cycle: probe every backend in parallel, then apply all outcomes.
    /// Cycles never overlap; the worst-case duration is one probe timeout.
    async fn check_all_backends(&self) {
        let backends = self.registry.all_backends();

        let mut tasks = Vec::with_capacity(backends.len());
        for backend in &backends {
            let address = backend.address().to_string();
            let probe_timeout = self.config.timeout;
            tasks.push(tokio::spawn(async move {
                let outcome = probe(&address, probe_timeout).await;
                (address, outcome)
            }));
        }

        for result in futures::future::join_all(tasks).await {
            match result {
                Ok((address, outcome)) => self.apply_outcome(&address, outcome),
                Err(e) => error!("health probe task failed: {}", e),
            }
        }

        debug!("health check cycle completed for {} backends", backends.len());
    }

    /// Record one probe outcome and, when a threshold is crossed, flip the
    /// backend through the registry. The state transition and the registry
    /// publish happen under the same lock hold.
    fn apply_outcome(&self, address: &str, outcome: Result<(), ProbeFailure>) {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(address.to_string()).or_default();
        state.last_check = Some(Utc::now());

        match outcome {
            Ok(()) => {
                state.consecutive_successes += 1;
                state.consecutive_failures = 0;
                state.last_error = None;
                debug!("health check success for {}", address);
            }
            Err(failure) => {
                state.consecutive_failures += 1;
                state.consecutive_successes = 0;
                debug!("health check failed for {}: {}", address, failure);
                state.last_error = Some(failure);
            }
        }

        let Some(backend) = self.registry.find(address) else {
            warn!("probed unknown backend {}", address);
            return;
        };

        let currently_alive = backend.is_alive();
        if !currently_alive && state.consecutive_successes >= self.config.healthy_threshold {
            info!(
                "backend {} is healthy again ({} consecutive successes)",
                address, state.consecutive_successes
            );
            self.registry.update_status(address, true);
        } else if currently_alive && state.consecutive_failures >= self.config.unhealthy_threshold
        {
            warn!(
                "backend {} marked unhealthy ({} consecutive failures)",
                address, state.consecutive_failures
            );
            self.registry.update_status(address, false);
        }
    }
}

/// A probe is a bare TCP dial, closed immediately on success.
async fn probe(address: &str, probe_timeout: Duration) -> Result<(), ProbeFailure> {
    match timeout(probe_timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            Ok(())
        }
        Ok(Err(e)) => Err(ProbeFailure::from(e)),
        Err(_) => Err(ProbeFailure::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn checker_with(
        healthy_threshold: u32,
        unhealthy_threshold: u32,
        addresses: &[&str],
    ) -> Arc<HealthChecker> {
        let registry = Arc::new(BackendRegistry::new(addresses));
        let config = HealthCheckConfig {
            interval: Duration::from_secs(30),
            timeout: Duration::from_millis(100),
            healthy_threshold,
            unhealthy_threshold,
        };
        Arc::new(HealthChecker::new(config, registry))
    }

    #[tokio::test]
    async fn test_single_failure_does_not_demote() {
        let checker = checker_with(2, 3, &["127.0.0.1:9001"]);
        let backend = checker.registry.find("127.0.0.1:9001").unwrap();

        checker.apply_outcome("127.0.0.1:9001", Err(ProbeFailure::Refused));
        assert!(backend.is_alive());

        checker.apply_outcome("127.0.0.1:9001", Err(ProbeFailure::Refused));
        assert!(backend.is_alive());

        checker.apply_outcome("127.0.0.1:9001", Err(ProbeFailure::Refused));
        assert!(!backend.is_alive());
        assert_eq!(checker.registry.alive_backends().len(), 0);
    }

    #[tokio::test]
    async fn test_single_success_does_not_promote() {
        let checker = checker_with(2, 1, &["127.0.0.1:9001"]);
        let backend = checker.registry.find("127.0.0.1:9001").unwrap();

        checker.apply_outcome("127.0.0.1:9001", Err(ProbeFailure::Refused));
        assert!(!backend.is_alive());

        checker.apply_outcome("127.0.0.1:9001", Ok(()));
        assert!(!backend.is_alive());

        checker.apply_outcome("127.0.0.1:9001", Ok(()));
        assert!(backend.is_alive());
    }

    #[tokio::test]
    async fn test_alternating_results_never_promote() {
        let checker = checker_with(2, 1, &["127.0.0.1:9001"]);
        let backend = checker.registry.find("127.0.0.1:9001").unwrap();

        checker.apply_outcome("127.0.0.1:9001", Err(ProbeFailure::Refused));
        assert!(!backend.is_alive());

        for _ in 0..5 {
            checker.apply_outcome("127.0.0.1:9001", Ok(()));
            checker.apply_outcome("127.0.0.1:9001", Err(ProbeFailure::Timeout));
            assert!(!backend.is_alive());
        }
    }

    #[tokio::test]
    async fn test_seeding_absorbs_initial_failures() {
        let checker = checker_with(2, 3, &["127.0.0.1:9001"]);
        checker.start();
        checker.stop().await;

        let snapshot = checker.health_snapshot();
        let state = snapshot.get("127.0.0.1:9001").unwrap();
        assert!(state.consecutive_successes >= 2 || state.consecutive_failures > 0);
    }

    #[tokio::test]
    async fn test_failure_recorded_with_category() {
        let checker = checker_with(2, 3, &["127.0.0.1:9001"]);

        checker.apply_outcome("127.0.0.1:9001", Err(ProbeFailure::Timeout));

        let snapshot = checker.health_snapshot();
        let state = snapshot.get("127.0.0.1:9001").unwrap();
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.last_error, Some(ProbeFailure::Timeout));
        assert!(state.last_check.is_some());

        checker.apply_outcome("127.0.0.1:9001", Ok(()));
        let snapshot = checker.health_snapshot();
        let state = snapshot.get("127.0.0.1:9001").unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn test_probe_against_live_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        assert!(probe(&address, Duration::from_millis(500)).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_against_dead_port_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        match probe(&address, Duration::from_millis(500)).await {
            Err(ProbeFailure::Refused) => {}
            other => panic!("expected Refused, got {:?}", other),
        }
    }
}
