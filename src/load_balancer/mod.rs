// src/load_balancer/mod.rs
mod round_robin;

pub use round_robin::RoundRobinBalancer;

use crate::backend::{Backend, BackendRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("no available backends")]
    NoBackendsAvailable,
}

#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Select the next backend from the live set.
    async fn next(&self) -> Result<Arc<Backend>, BalancerError>;

    /// Number of backends currently in the live set.
    fn available_count(&self) -> usize;

    fn name(&self) -> &'static str;
}

pub fn create_load_balancer(registry: Arc<BackendRegistry>) -> Arc<dyn LoadBalancer> {
    Arc::new(RoundRobinBalancer::new(registry))
}
