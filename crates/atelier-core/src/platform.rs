//! Platform seam: the immersive-session API and the embeddable viewer
//!
//! These traits are consumed, not defined, by the browser. The core only
//! relies on the operations listed here; see [`crate::sim`] for an
//! in-process implementation.

use async_trait::async_trait;
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::viewer::ViewerConfig;

/// Kind of session requested from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    ImmersiveAr,
    ImmersiveVr,
    Inline,
}

/// Features requested alongside a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInit {
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
}

impl SessionInit {
    /// Features used by the native placement path
    pub fn placement() -> Self {
        Self {
            required_features: vec!["hit-test".to_string()],
            optional_features: vec![
                "anchors".to_string(),
                "light-estimation".to_string(),
                "dom-overlay".to_string(),
                "local-floor".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceSpaceType {
    Viewer,
    Local,
    LocalFloor,
}

/// Handle to a reference space issued by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReferenceSpace {
    pub id: u32,
    pub kind: ReferenceSpaceType,
}

/// Position and orientation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position)
    }

    pub fn from_matrix(matrix: &Mat4) -> Self {
        let (_, orientation, position) = matrix.to_scale_rotation_translation();
        Self {
            position,
            orientation,
        }
    }
}

/// One candidate surface returned by a hit-test source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitTestResult {
    /// Surface pose expressed in the requested reference space
    pub pose: Pose,
}

/// Live estimate of the real-world lighting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightEstimate {
    /// Direction towards the dominant light source
    pub primary_light_direction: Vec3,
    /// Linear RGB intensity of the dominant light
    pub primary_light_intensity: Vec3,
}

/// Continuous hit-test subscription
pub trait HitTestSource: Send + Sync + std::fmt::Debug {
    fn id(&self) -> u32;
    /// Stop producing results and release platform resources
    fn cancel(&mut self);
    fn is_cancelled(&self) -> bool;
}

/// Platform-tracked point keeping a virtual object aligned with the world
pub trait Anchor: Send + Sync + std::fmt::Debug {
    fn id(&self) -> u32;
    /// Latest tracked pose, `None` while tracking is lost
    fn pose(&self) -> Option<Pose>;
    /// Stop tracking and free the anchor
    fn delete(&mut self);
}

/// Entry point of the immersive-session API
#[async_trait]
pub trait XrSystem: Send + Sync {
    async fn is_session_supported(&self, mode: SessionMode) -> Result<bool, PlatformError>;

    async fn request_session(
        &self,
        mode: SessionMode,
        init: &SessionInit,
    ) -> Result<Box<dyn XrSession>, PlatformError>;
}

/// A running immersive session
#[async_trait]
pub trait XrSession: Send + Sync {
    async fn request_reference_space(
        &self,
        kind: ReferenceSpaceType,
    ) -> Result<ReferenceSpace, PlatformError>;

    async fn request_hit_test_source(
        &self,
        space: ReferenceSpace,
    ) -> Result<Box<dyn HitTestSource>, PlatformError>;

    fn supports_anchors(&self) -> bool;

    async fn create_anchor(
        &self,
        pose: Pose,
        space: ReferenceSpace,
    ) -> Result<Box<dyn Anchor>, PlatformError>;

    /// Whether the platform ended the session on its own (system UI, navigation)
    fn is_ended(&self) -> bool;

    async fn end(&self) -> Result<(), PlatformError>;
}

/// Per-frame view of the platform state
pub trait XrFrame {
    /// Frame time in milliseconds
    fn timestamp(&self) -> f64;

    fn hit_test_results(
        &self,
        source: &dyn HitTestSource,
        space: ReferenceSpace,
    ) -> Vec<HitTestResult>;

    fn light_estimate(&self) -> Option<LightEstimate>;
}

/// The embeddable declarative viewer used by viewer mode
#[async_trait]
pub trait ViewerHost: Send + Sync {
    /// Configure the element and hand over to the OS-level AR viewer
    async fn activate_ar(&self, config: &ViewerConfig) -> Result<(), PlatformError>;

    /// Remove the element and release what it holds
    fn dismiss(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_matrix_round_trip() {
        let pose = Pose::new(Vec3::new(1.0, 0.0, -2.0), Quat::from_rotation_y(0.5));
        let back = Pose::from_matrix(&pose.matrix());
        assert!(back.position.abs_diff_eq(pose.position, 1e-5));
        assert!(back.orientation.abs_diff_eq(pose.orientation, 1e-5));
    }

    #[test]
    fn test_placement_init_requires_hit_test() {
        let init = SessionInit::placement();
        assert_eq!(init.required_features, vec!["hit-test"]);
        assert!(init.optional_features.iter().any(|f| f == "anchors"));
    }
}
