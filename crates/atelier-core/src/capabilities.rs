//! Capability detection: which AR technique the current device should use
//!
//! Detection inspects environment facts only (user agent, touch points, the
//! immersive-session API) and never touches the network. Any failure while
//! probing native support counts as "unsupported".

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::performance::DeviceHints;
use crate::platform::{SessionMode, XrSystem};

/// Minimum iOS major version shipping AR Quick Look
const MIN_QUICK_LOOK_IOS: u32 = 12;
/// Minimum Android major version supported by ARCore / Scene Viewer
const MIN_SCENE_VIEWER_ANDROID: u32 = 7;

/// Rendering strategy, most capable first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArMode {
    /// Immersive session with hit testing and anchors
    Native,
    /// Declarative viewer handing over to Quick Look / Scene Viewer
    Viewer,
    /// Non-immersive 3D preview
    Fallback,
}

impl ArMode {
    /// The next less capable mode, one step at a time
    pub fn downgrade(self) -> Option<ArMode> {
        match self {
            Self::Native => Some(Self::Viewer),
            Self::Viewer => Some(Self::Fallback),
            Self::Fallback => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Viewer => "viewer",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for ArMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse platform family derived from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePlatform {
    Ios,
    Android,
    Headset,
    Desktop,
}

/// Snapshot computed once per page load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub native_session_supported: bool,
    pub quick_look_supported: bool,
    pub scene_viewer_supported: bool,
    pub is_mobile: bool,
    pub platform: DevicePlatform,
    pub recommended_mode: ArMode,
}

impl DeviceCapabilities {
    /// Apply the mode precedence: native > viewer > fallback
    pub fn from_probes(
        native_session_supported: bool,
        quick_look_supported: bool,
        scene_viewer_supported: bool,
        is_mobile: bool,
        platform: DevicePlatform,
    ) -> Self {
        let recommended_mode = if native_session_supported {
            ArMode::Native
        } else if quick_look_supported || scene_viewer_supported || is_mobile {
            ArMode::Viewer
        } else {
            ArMode::Fallback
        };

        Self {
            native_session_supported,
            quick_look_supported,
            scene_viewer_supported,
            is_mobile,
            platform,
            recommended_mode,
        }
    }

    /// Desktop browsers without native support get a phone hand-off link
    pub fn wants_handoff(&self) -> bool {
        !self.is_mobile && !self.native_session_supported
    }
}

/// Environment facts available to the page (`navigator` equivalent)
#[derive(Clone)]
pub struct Environment {
    pub user_agent: String,
    pub max_touch_points: u32,
    /// `navigator.deviceMemory`, in GiB
    pub device_memory_gb: Option<f32>,
    /// `navigator.hardwareConcurrency`
    pub hardware_concurrency: Option<u32>,
    pub device_pixel_ratio: f32,
    pub webgl_available: bool,
    /// Immersive-session API, absent on browsers without it
    pub xr: Option<Arc<dyn XrSystem>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("user_agent", &self.user_agent)
            .field("max_touch_points", &self.max_touch_points)
            .field("device_memory_gb", &self.device_memory_gb)
            .field("hardware_concurrency", &self.hardware_concurrency)
            .field("device_pixel_ratio", &self.device_pixel_ratio)
            .field("webgl_available", &self.webgl_available)
            .field("xr", &self.xr.is_some())
            .finish()
    }
}

impl Environment {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            max_touch_points: 0,
            device_memory_gb: None,
            hardware_concurrency: None,
            device_pixel_ratio: 1.0,
            webgl_available: true,
            xr: None,
        }
    }

    pub fn with_xr(mut self, xr: Arc<dyn XrSystem>) -> Self {
        self.xr = Some(xr);
        self
    }

    pub fn user_agent(&self) -> UserAgent {
        UserAgent::parse(&self.user_agent, self.max_touch_points)
    }

    /// Hints used for device-tier classification
    pub fn device_hints(&self) -> DeviceHints {
        DeviceHints {
            device_memory_gb: self.device_memory_gb,
            hardware_concurrency: self.hardware_concurrency,
            is_mobile: self.user_agent().is_mobile,
            device_pixel_ratio: self.device_pixel_ratio,
        }
    }
}

/// Facts extracted from a user-agent string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgent {
    pub is_ios: bool,
    pub is_android: bool,
    pub is_headset: bool,
    pub is_safari: bool,
    pub is_chrome: bool,
    pub is_mobile: bool,
    pub ios_major: Option<u32>,
    pub android_major: Option<u32>,
}

impl UserAgent {
    pub fn parse(ua: &str, max_touch_points: u32) -> Self {
        // iPadOS reports a desktop Safari UA but exposes touch points
        let ipados = ua.contains("Macintosh") && max_touch_points > 1;
        let is_ios = ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") || ipados;
        let is_android = ua.contains("Android");
        let is_headset = ua.contains("OculusBrowser") || ua.contains("Quest");

        let other_ios_browser = ["CriOS", "FxiOS", "EdgiOS", "OPiOS"]
            .iter()
            .any(|m| ua.contains(m));
        let is_safari = ua.contains("Safari")
            && !ua.contains("Chrome")
            && !ua.contains("Chromium")
            && !other_ios_browser;
        let is_chrome = ua.contains("Chrome/")
            && !ua.contains("Edg/")
            && !ua.contains("OPR/")
            && !ua.contains("SamsungBrowser");

        let ios_major = if is_ios {
            version_after(ua, "OS ").or_else(|| version_after(ua, "Version/"))
        } else {
            None
        };
        let android_major = if is_android {
            version_after(ua, "Android ")
        } else {
            None
        };

        let is_mobile = is_ios || is_android || ua.contains("Mobi");

        Self {
            is_ios,
            is_android,
            is_headset,
            is_safari,
            is_chrome,
            is_mobile,
            ios_major,
            android_major,
        }
    }

    pub fn platform(&self) -> DevicePlatform {
        if self.is_headset {
            DevicePlatform::Headset
        } else if self.is_ios {
            DevicePlatform::Ios
        } else if self.is_android {
            DevicePlatform::Android
        } else {
            DevicePlatform::Desktop
        }
    }

    /// iOS Safari with AR Quick Look; an unreadable version is accepted
    pub fn quick_look_supported(&self) -> bool {
        self.is_ios
            && self.is_safari
            && self.ios_major.map_or(true, |v| v >= MIN_QUICK_LOOK_IOS)
    }

    /// Android Chrome with Scene Viewer; an unreadable version is accepted
    pub fn scene_viewer_supported(&self) -> bool {
        self.is_android
            && self.is_chrome
            && self
                .android_major
                .map_or(true, |v| v >= MIN_SCENE_VIEWER_ANDROID)
    }
}

/// Major version number following `marker` (e.g. "OS 16_4" -> 16)
fn version_after(ua: &str, marker: &str) -> Option<u32> {
    let mut rest = ua;
    while let Some(idx) = rest.find(marker) {
        let tail = &rest[idx + marker.len()..];
        let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(v) = digits.parse() {
            return Some(v);
        }
        rest = tail;
    }
    None
}

/// Probe the environment and recommend a mode
pub async fn detect_capabilities(env: &Environment) -> DeviceCapabilities {
    let ua = env.user_agent();

    let native = match &env.xr {
        Some(xr) => match xr.is_session_supported(SessionMode::ImmersiveAr).await {
            Ok(supported) => supported,
            Err(e) => {
                warn!(error = %e, "Immersive AR support query failed, treating as unsupported");
                false
            }
        },
        None => {
            debug!("No immersive-session API available");
            false
        }
    };

    let capabilities = DeviceCapabilities::from_probes(
        native,
        ua.quick_look_supported(),
        ua.scene_viewer_supported(),
        ua.is_mobile,
        ua.platform(),
    );

    info!(
        native = capabilities.native_session_supported,
        quick_look = capabilities.quick_look_supported,
        scene_viewer = capabilities.scene_viewer_supported,
        mobile = capabilities.is_mobile,
        mode = %capabilities.recommended_mode,
        "Device capabilities detected"
    );

    capabilities
}
