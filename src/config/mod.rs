// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let ext = path.extension().and_then(|s| s.to_str());
    let config: Config = if ext == Some("json") {
        serde_json::from_str(&contents).context("Failed to parse JSON config")?
    } else {
        serde_yaml::from_str(&contents).context("Failed to parse YAML config")?
    };

    config.validate()?;
    Ok(config)
}
