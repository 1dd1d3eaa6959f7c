//! Quality tiers and the renderer settings they map to

use serde::{Deserialize, Serialize};

/// Named bundle of rendering-cost settings, ordered cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Low,
    Medium,
    High,
}

impl QualityLevel {
    /// One tier cheaper, or `None` at the bottom
    pub fn step_down(self) -> Option<Self> {
        match self {
            Self::High => Some(Self::Medium),
            Self::Medium => Some(Self::Low),
            Self::Low => None,
        }
    }

    /// One tier more expensive, or `None` at the top
    pub fn step_up(self) -> Option<Self> {
        match self {
            Self::Low => Some(Self::Medium),
            Self::Medium => Some(Self::High),
            Self::High => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Renderer settings for this tier
    pub fn settings(self, is_mobile: bool, device_pixel_ratio: f32) -> QualitySettings {
        QualitySettings::for_level(self, is_mobile, device_pixel_ratio)
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete renderer configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualitySettings {
    pub level: QualityLevel,
    pub pixel_ratio: f32,
    pub shadow_map_size: u32,
    pub anisotropy: u8,
    pub antialias: bool,
    pub shadows: bool,
    pub post_processing: bool,
}

impl QualitySettings {
    pub fn for_level(level: QualityLevel, is_mobile: bool, device_pixel_ratio: f32) -> Self {
        let (base_ratio, mobile_cap, shadow_map_size, anisotropy, antialias, shadows, post_processing): (f32, f32, _, _, _, _, _) =
            match level {
                QualityLevel::High => (2.0, 1.5, 2048, 16, true, true, true),
                QualityLevel::Medium => (1.5, 1.25, 1024, 4, true, true, false),
                QualityLevel::Low => (1.0, 0.75, 512, 1, false, false, false),
            };

        let dpr = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
        // Never render above the display's native density
        let mut pixel_ratio = base_ratio.min(dpr);
        if is_mobile {
            pixel_ratio = pixel_ratio.min(mobile_cap);
        }

        Self {
            level,
            pixel_ratio,
            shadow_map_size,
            anisotropy,
            antialias,
            shadows,
            post_processing,
        }
    }
}
