//! Configuration for the AR core
//!
//! Every field has a default so a partial (or missing) `atelier.toml` is valid.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub surface: SurfaceConfig,
    #[serde(default)]
    pub placement: PlacementConfig,
}

impl ArConfig {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Inbound properties from the hosting page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model shown and placed by the session
    #[serde(default)]
    pub model_url: Option<String>,
    /// Uniform scale applied on placement
    #[serde(default = "default_scale")]
    pub model_scale: f32,
    /// Allow more than one placed object at a time
    #[serde(default)]
    pub enable_multiple_objects: bool,
    /// Page that opens the model on a phone (desktop QR hand-off)
    #[serde(default)]
    pub handoff_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model_url: None,
            model_scale: default_scale(),
            enable_multiple_objects: false,
            handoff_url: None,
        }
    }
}

fn default_scale() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_true")]
    pub compression_enabled: bool,
    /// Total attempts per load, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Hard limit on a single attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Delay before the second attempt; doubles per attempt up to 5s
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Where the compressed-mesh decoder assets live
    #[serde(default = "default_decoder_path")]
    pub decoder_path: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            compression_enabled: true,
            max_retries: default_max_retries(),
            timeout_ms: default_timeout_ms(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            decoder_path: default_decoder_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_decoder_path() -> String {
    "/draco/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Capacity of the rolling FPS window
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Minimum time between two quality reductions
    #[serde(default = "default_reduction_cooldown_ms")]
    pub reduction_cooldown_ms: f64,
    /// Improvements wait this many reduction cooldowns
    #[serde(default = "default_improvement_factor")]
    pub improvement_cooldown_factor: f64,
    /// Samples required before quality decisions are made
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Minimum time between two warnings of the same kind
    #[serde(default = "default_warning_interval_ms")]
    pub warning_interval_ms: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            reduction_cooldown_ms: default_reduction_cooldown_ms(),
            improvement_cooldown_factor: default_improvement_factor(),
            min_samples: default_min_samples(),
            warning_interval_ms: default_warning_interval_ms(),
        }
    }
}

fn default_window_size() -> usize {
    120
}

fn default_reduction_cooldown_ms() -> f64 {
    2_000.0
}

fn default_improvement_factor() -> f64 {
    2.0
}

fn default_min_samples() -> usize {
    10
}

fn default_warning_interval_ms() -> f64 {
    1_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceConfig {
    /// Elapsed times without a surface at which guidance escalates
    #[serde(default = "default_guidance_thresholds")]
    pub guidance_thresholds_ms: [f64; 3],
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            guidance_thresholds_ms: default_guidance_thresholds(),
        }
    }
}

fn default_guidance_thresholds() -> [f64; 3] {
    [3_000.0, 8_000.0, 15_000.0]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    #[serde(default = "default_min_scale")]
    pub min_scale: f32,
    #[serde(default = "default_max_scale")]
    pub max_scale: f32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
        }
    }
}

fn default_min_scale() -> f32 {
    0.1
}

fn default_max_scale() -> f32 {
    10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let toml = r#"
[session]
model_url = "https://cdn.example.com/sofa.glb"
enable_multiple_objects = true

[loader]
max_retries = 5
"#;
        let config = ArConfig::from_toml(toml).unwrap();
        assert_eq!(config.session.model_url.as_deref(), Some("https://cdn.example.com/sofa.glb"));
        assert!(config.session.enable_multiple_objects);
        assert_eq!(config.session.model_scale, 1.0);
        assert_eq!(config.loader.max_retries, 5);
        assert_eq!(config.loader.timeout_ms, 30_000);
        assert_eq!(config.performance.window_size, 120);
        assert_eq!(config.placement.max_scale, 10.0);
    }

    #[test]
    fn test_round_trip_defaults() {
        let content = ArConfig::default().to_toml().unwrap();
        let config = ArConfig::from_toml(&content).unwrap();
        assert_eq!(config.loader.decoder_path, "/draco/");
        assert_eq!(config.surface.guidance_thresholds_ms, [3_000.0, 8_000.0, 15_000.0]);
    }

    #[test]
    fn test_empty_config() {
        let config = ArConfig::from_toml("").unwrap();
        assert!(config.session.model_url.is_none());
        assert!(config.loader.compression_enabled);
    }
}
