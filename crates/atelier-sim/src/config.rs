//! Configuration loading for the headless host

use anyhow::{Context, Result};
use atelier_core::ArConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// `atelier.toml`: the AR core sections plus a `[host]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub ar: ArConfig,
    #[serde(default)]
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Model catalog (`[[model]]` tables)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
    /// Frames to simulate per session
    #[serde(default = "default_frames")]
    pub frames: u32,
    /// Simulated frame interval in milliseconds
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: f64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            catalog: None,
            frames: default_frames(),
            frame_interval_ms: default_frame_interval(),
        }
    }
}

fn default_frames() -> u32 {
    300
}

fn default_frame_interval() -> f64 {
    1000.0 / 60.0
}

pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Write a default configuration file
pub fn save_default_config(path: &Path) -> Result<()> {
    let mut config = Config::default();
    config.ar.session.model_url = Some("https://cdn.example.com/models/armchair.glb".to_string());
    config.ar.session.handoff_url = Some("https://atelier.example.com/ar".to_string());
    let content = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Wrote default configuration");
    Ok(())
}
