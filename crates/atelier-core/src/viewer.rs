//! Viewer-mode element configuration and the non-immersive fallback preview

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::capabilities::{DeviceCapabilities, DevicePlatform};
use crate::catalog::ModelInfo;
use crate::loader::LoadedModel;
use crate::scene::{Camera, SceneNode, Transform};

/// AR hand-off paths understood by the viewer element, in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerArMode {
    Webxr,
    SceneViewer,
    QuickLook,
}

impl ViewerArMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Webxr => "webxr",
            Self::SceneViewer => "scene-viewer",
            Self::QuickLook => "quick-look",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArScale {
    /// Let the user resize the model
    Auto,
    /// Keep the model at real-world scale
    Fixed,
}

/// Declarative configuration of the embeddable viewer element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    pub src: String,
    pub ios_src: Option<String>,
    pub ar: bool,
    pub ar_modes: Vec<ViewerArMode>,
    pub ar_scale: ArScale,
    pub camera_controls: bool,
    pub auto_rotate: bool,
    pub alt: String,
    /// Credit line shown next to the element
    pub attribution: Option<String>,
}

impl ViewerConfig {
    pub fn for_model(model_url: &str, name: &str, capabilities: &DeviceCapabilities, info: Option<&ModelInfo>) -> Self {
        let mut ar_modes = Vec::new();
        if capabilities.native_session_supported {
            ar_modes.push(ViewerArMode::Webxr);
        }
        if capabilities.scene_viewer_supported {
            ar_modes.push(ViewerArMode::SceneViewer);
        }
        if capabilities.quick_look_supported {
            ar_modes.push(ViewerArMode::QuickLook);
        }
        if ar_modes.is_empty() && capabilities.is_mobile {
            // Inconclusive detection on a phone: let the element pick
            ar_modes = match capabilities.platform {
                DevicePlatform::Ios => vec![ViewerArMode::QuickLook],
                _ => vec![ViewerArMode::Webxr, ViewerArMode::SceneViewer, ViewerArMode::QuickLook],
            };
        }

        Self {
            src: model_url.to_string(),
            ios_src: info.and_then(|i| i.ios_src.clone()),
            ar: !ar_modes.is_empty(),
            ar_modes,
            ar_scale: ArScale::Auto,
            camera_controls: true,
            auto_rotate: true,
            alt: format!("3D model of {}", name),
            attribution: info.and_then(|i| i.attribution.as_ref()).map(|a| a.text()),
        }
    }

    /// Element attributes in document order; boolean attributes carry an empty value
    pub fn to_attributes(&self) -> Vec<(&'static str, String)> {
        let mut attributes = vec![("src", self.src.clone())];
        if let Some(ios_src) = &self.ios_src {
            attributes.push(("ios-src", ios_src.clone()));
        }
        if self.ar {
            attributes.push(("ar", String::new()));
            let modes: Vec<&str> = self.ar_modes.iter().map(|m| m.as_str()).collect();
            attributes.push(("ar-modes", modes.join(" ")));
            let scale = match self.ar_scale {
                ArScale::Auto => "auto",
                ArScale::Fixed => "fixed",
            };
            attributes.push(("ar-scale", scale.to_string()));
        }
        if self.camera_controls {
            attributes.push(("camera-controls", String::new()));
        }
        if self.auto_rotate {
            attributes.push(("auto-rotate", String::new()));
        }
        attributes.push(("alt", self.alt.clone()));
        attributes
    }
}

/// Non-immersive 3D preview used by fallback mode
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackPreview {
    pub node: SceneNode,
    pub fit_scale: f32,
    /// Radians per second around +Y
    pub rotation_speed: f32,
    started_at: Option<f64>,
}

impl FallbackPreview {
    /// Largest extent of the fitted model
    pub const TARGET_EXTENT: f32 = 1.0;
    pub const DEFAULT_ROTATION_SPEED: f32 = 0.35;

    pub fn new(model: LoadedModel) -> Self {
        let extent = model.max_extent();
        let fit_scale = if extent.is_finite() && extent > 0.0 {
            Self::TARGET_EXTENT / extent
        } else {
            1.0
        };

        let mut content = model.scene;
        content.transform.translation -= model.center;
        let node = SceneNode::new("preview")
            .with_transform(Transform {
                scale: Vec3::splat(fit_scale),
                ..Transform::IDENTITY
            })
            .with_child(content);

        Self {
            node,
            fit_scale,
            rotation_speed: Self::DEFAULT_ROTATION_SPEED,
            started_at: None,
        }
    }

    /// Advance the turntable rotation
    pub fn animate(&mut self, now_ms: f64) {
        let start = *self.started_at.get_or_insert(now_ms);
        let elapsed_secs = ((now_ms - start) / 1000.0) as f32;
        self.node.transform.rotation = Quat::from_rotation_y(elapsed_secs * self.rotation_speed);
    }

    /// Camera framing the fitted model
    pub fn camera(&self, aspect: f32) -> Camera {
        let distance = Self::TARGET_EXTENT * 2.2;
        Camera::perspective(Vec3::new(0.0, distance * 0.25, distance), Vec3::ZERO, 45f32.to_radians(), aspect)
    }
}
