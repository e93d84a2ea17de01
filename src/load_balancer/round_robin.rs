// src/load_balancer/round_robin.rs
use super::{BalancerError, LoadBalancer};
use crate::backend::{Backend, BackendRegistry};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct RoundRobinBalancer {
    registry: Arc<BackendRegistry>,
    counter: AtomicU64,
}

impl RoundRobinBalancer {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn next(&self) -> Result<Arc<Backend>, BalancerError> {
        let snapshot = self.registry.alive_backends();
        if snapshot.is_empty() {
            return Err(BalancerError::NoBackendsAvailable);
        }

        // The modulo is against the snapshot this call loaded, so a set that
        // shrank since the previous call still yields a valid index.
        let next = self.counter.fetch_add(1, Ordering::Relaxed);
        let index = (next % snapshot.len() as u64) as usize;
        Ok(Arc::clone(&snapshot[index]))
    }

    fn available_count(&self) -> usize {
        self.registry.alive_backends().len()
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn registry() -> Arc<BackendRegistry> {
        Arc::new(BackendRegistry::new(&[
            "127.0.0.1:9001",
            "127.0.0.1:9002",
            "127.0.0.1:9003",
        ]))
    }

    #[tokio::test]
    async fn test_round_robin_is_fair_over_stable_set() {
        let balancer = RoundRobinBalancer::new(registry());

        let mut hits: HashMap<String, usize> = HashMap::new();
        for _ in 0..10 {
            let backend = balancer.next().await.unwrap();
            *hits.entry(backend.address().to_string()).or_insert(0) += 1;
        }

        // 10 selections over 3 backends: each hit 3 or 4 times.
        assert_eq!(hits.len(), 3);
        for (_, count) in hits {
            assert!((3..=4).contains(&count));
        }
    }

    #[tokio::test]
    async fn test_empty_live_set_errors() {
        let registry = registry();
        for backend in registry.all_backends() {
            registry.update_status(&backend.address().to_string(), false);
        }

        let balancer = RoundRobinBalancer::new(registry);
        assert!(matches!(
            balancer.next().await,
            Err(BalancerError::NoBackendsAvailable)
        ));
        assert_eq!(balancer.available_count(), 0);
    }

    #[tokio::test]
    async fn test_dead_backend_leaves_rotation() {
        let registry = registry();
        registry.update_status("127.0.0.1:9002", false);

        let balancer = RoundRobinBalancer::new(registry);
        assert_eq!(balancer.available_count(), 2);

        for _ in 0..6 {
            let backend = balancer.next().await.unwrap();
            assert_ne!(backend.address(), "127.0.0.1:9002");
        }
    }
}
