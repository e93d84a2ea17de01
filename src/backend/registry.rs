// src/backend/registry.rs
use super::backend::Backend;
use arc_swap::ArcSwap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Owns the full backend universe and publishes the live subset.
///
/// Selection reads the snapshot with a single atomic load; status updates
/// rebuild a fresh vector under the write lock and swap it in, so a
/// snapshot is never mutated after publication. Readers may observe a
/// slightly stale snapshot, which is acceptable at health-check tempo.
pub struct BackendRegistry {
    all_backends: RwLock<Vec<Arc<Backend>>>,
    live: ArcSwap<Vec<Arc<Backend>>>,
}

impl BackendRegistry {
    pub fn new<S: AsRef<str>>(addresses: &[S]) -> Self {
        let all: Vec<Arc<Backend>> = addresses
            .iter()
            .map(|addr| Arc::new(Backend::new(addr.as_ref())))
            .collect();
        let live = all.clone();

        info!("backend registry created with {} backends", all.len());

        Self {
            all_backends: RwLock::new(all),
            live: ArcSwap::from_pointee(live),
        }
    }

    /// Hot path: one atomic load, never blocks.
    pub fn alive_backends(&self) -> Arc<Vec<Arc<Backend>>> {
        self.live.load_full()
    }

    /// Copy of the full universe, used by the health checker.
    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.all_backends.read().unwrap().clone()
    }

    pub fn find(&self, address: &str) -> Option<Arc<Backend>> {
        self.all_backends
            .read()
            .unwrap()
            .iter()
            .find(|b| b.address() == address)
            .cloned()
    }

    /// Flip a backend's liveness and republish the live snapshot in
    /// `all_backends` order.
    pub fn update_status(&self, address: &str, alive: bool) {
        let all = self.all_backends.write().unwrap();

        let Some(backend) = all.iter().find(|b| b.address() == address) else {
            warn!("backend {} not found during status update", address);
            return;
        };
        backend.compare_and_set_alive(!alive, alive);

        let live: Vec<Arc<Backend>> = all.iter().filter(|b| b.is_alive()).cloned().collect();
        let alive_count = live.len();
        self.live.store(Arc::new(live));

        info!(
            "backend rotation updated: {}/{} backends alive",
            alive_count,
            all.len()
        );
    }

    pub fn count(&self) -> (usize, usize) {
        let total = self.all_backends.read().unwrap().len();
        let alive = self.live.load().len();
        (total, alive)
    }

    /// Close every backend's connection pool.
    pub async fn close(&self) {
        let backends = self.all_backends();
        for backend in backends {
            backend.pool().close().await;
        }
        info!("backend registry closed");
    }
}
