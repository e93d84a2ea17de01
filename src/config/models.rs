// src/config/models.rs
use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: Vec<String>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
    #[serde(default = "defaults::interval", with = "duration_str")]
    pub interval: Duration,
    #[serde(default = "defaults::timeout", with = "duration_str")]
    pub timeout: Duration,
    #[serde(default = "defaults::healthy_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "defaults::unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            interval: defaults::interval(),
            timeout: defaults::timeout(),
            healthy_threshold: defaults::healthy_threshold(),
            unhealthy_threshold: defaults::unhealthy_threshold(),
        }
    }
}

mod defaults {
    use std::time::Duration;

    pub fn enabled() -> bool {
        true
    }

    pub fn interval() -> Duration {
        Duration::from_secs(30)
    }

    pub fn timeout() -> Duration {
        Duration::from_secs(5)
    }

    pub fn healthy_threshold() -> u32 {
        2
    }

    pub fn unhealthy_threshold() -> u32 {
        3
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.server.port.trim().is_empty() {
            bail!("server.port must not be empty");
        }
        if self.upstream.is_empty() {
            bail!("at least one upstream server is required");
        }
        for addr in &self.upstream {
            if addr.trim().is_empty() {
                bail!("upstream entries must not be empty");
            }
        }
        if self.health_check.enabled {
            if self.health_check.interval.is_zero() {
                bail!("health_check.interval must be greater than zero");
            }
            if self.health_check.timeout.is_zero() {
                bail!("health_check.timeout must be greater than zero");
            }
            if self.health_check.healthy_threshold == 0 {
                bail!("health_check.healthy_threshold must be at least 1");
            }
            if self.health_check.unhealthy_threshold == 0 {
                bail!("health_check.unhealthy_threshold must be at least 1");
            }
        }
        Ok(())
    }
}

/// Parse a duration string like "500ms", "30s", "5m" into a Duration.
/// Bare integers are taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("duration cannot be empty");
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else {
        bail!("invalid duration format: {}", s);
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid duration format: {}", s))?;

    match unit {
        "ms" => Ok(Duration::from_millis(num)),
        "s" => Ok(Duration::from_secs(num)),
        "m" => Ok(Duration::from_secs(num * 60)),
        _ => unreachable!(),
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
