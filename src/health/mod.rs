// src/health/mod.rs
mod checker;

pub use checker::{HealthCheckConfig, HealthChecker, HealthState, ProbeFailure};
