// src/backend/backend.rs
use super::pool::{
    ConnectionPool, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_ACTIVE, DEFAULT_MAX_IDLE,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A single upstream endpoint plus its dedicated connection pool.
///
/// The address is immutable after construction; liveness is flipped
/// concurrently by the health checker and read on every selection.
pub struct Backend {
    address: String,
    pool: Arc<ConnectionPool>,
    alive: AtomicBool,
}

impl Backend {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let pool = ConnectionPool::new(
            address.clone(),
            DEFAULT_MAX_IDLE,
            DEFAULT_MAX_ACTIVE,
            DEFAULT_IDLE_TIMEOUT,
        );

        Self {
            address,
            pool,
            // Backends start in the rotation until a health check says otherwise.
            alive: AtomicBool::new(true),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    pub fn compare_and_set_alive(&self, old: bool, new: bool) -> bool {
        self.alive
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("address", &self.address)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backend_starts_alive() {
        let backend = Backend::new("127.0.0.1:9001");
        assert!(backend.is_alive());
        assert_eq!(backend.address(), "127.0.0.1:9001");
    }

    #[tokio::test]
    async fn test_compare_and_set_alive() {
        let backend = Backend::new("127.0.0.1:9001");

        assert!(backend.compare_and_set_alive(true, false));
        assert!(!backend.is_alive());

        // Stale expectation must not flip the flag back.
        assert!(!backend.compare_and_set_alive(true, true));
        assert!(!backend.is_alive());

        backend.set_alive(true);
        assert!(backend.is_alive());
    }
}
