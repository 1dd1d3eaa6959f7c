//! Surface detection for the native session
//!
//! Owns the hit-test source, the placement reticle and the scan guidance.
//! Reticle visibility is frame-local: it is shown on frames with a hit and
//! hidden on every frame without one.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use tracing::{debug, info, trace};

use crate::config::SurfaceConfig;
use crate::error::PlatformError;
use crate::platform::{HitTestSource, Pose, ReferenceSpace, ReferenceSpaceType, XrFrame, XrSession};
use crate::scene::Transform;

/// Confidence reported with every hit; the platform exposes none
pub const HIT_CONFIDENCE: f32 = 1.0;

/// A detected surface pose
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitTestData {
    pub position: Vec3,
    pub rotation: Quat,
    pub matrix: Mat4,
    /// Placeholder, always [`HIT_CONFIDENCE`]
    pub confidence: f32,
    pub timestamp_ms: f64,
}

impl HitTestData {
    pub fn from_pose(pose: &Pose, timestamp_ms: f64) -> Self {
        let matrix = pose.matrix();
        let (_, rotation, position) = matrix.to_scale_rotation_translation();
        Self {
            position,
            rotation,
            matrix,
            confidence: HIT_CONFIDENCE,
            timestamp_ms,
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }
}

/// Placement indicator
#[derive(Debug, Clone, PartialEq)]
pub struct Reticle {
    pub visible: bool,
    /// Pose of the detected surface
    pub transform: Transform,
    /// Scale multiplier of the pulse animation
    pub pulse: f32,
    /// Spin around the surface normal, radians
    pub spin: f32,
}

impl Default for Reticle {
    fn default() -> Self {
        Self {
            visible: false,
            transform: Transform::IDENTITY,
            pulse: 1.0,
            spin: 0.0,
        }
    }
}

impl Reticle {
    const PULSE_PERIOD_MS: f64 = 1_500.0;
    const PULSE_AMPLITUDE: f32 = 0.08;
    const SPIN_RADIANS_PER_SEC: f64 = 0.6;

    pub fn show_at(&mut self, hit: &HitTestData) {
        self.visible = true;
        self.transform = Transform {
            translation: hit.position,
            rotation: hit.rotation,
            scale: Vec3::ONE,
        };
    }

    pub fn hide(&mut self) {
        self.visible = false;
    }

    /// Advance the idle animation; independent of hit results
    pub fn animate(&mut self, now_ms: f64) {
        let phase = (now_ms / Self::PULSE_PERIOD_MS).fract() as f32 * TAU;
        self.pulse = 1.0 + Self::PULSE_AMPLITUDE * phase.sin();
        self.spin = ((now_ms / 1000.0 * Self::SPIN_RADIANS_PER_SEC) % TAU as f64) as f32;
    }

    /// Transform the renderer draws: surface pose plus animation
    pub fn display_transform(&self) -> Transform {
        Transform {
            translation: self.transform.translation,
            rotation: self.transform.rotation * Quat::from_rotation_y(self.spin),
            scale: self.transform.scale * self.pulse,
        }
    }
}

/// User-facing hint shown while looking for a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceHint {
    Scanning,
    PointAtFlatSurface,
    MoveSlowly,
    TryWellLitArea,
    SurfaceDetected,
}

impl GuidanceHint {
    pub fn message(self) -> &'static str {
        match self {
            Self::Scanning => "Scanning for surfaces...",
            Self::PointAtFlatSurface => "Point your camera at a flat surface like the floor",
            Self::MoveSlowly => "Move your phone slowly from side to side",
            Self::TryWellLitArea => "Try a well-lit area with a textured floor",
            Self::SurfaceDetected => "Tap to place",
        }
    }
}

/// Escalates hints with time spent without a surface
#[derive(Debug, Clone)]
pub struct ScanGuidance {
    thresholds_ms: [f64; 3],
    searching_since: Option<f64>,
    current: Option<GuidanceHint>,
}

impl ScanGuidance {
    pub fn new(thresholds_ms: [f64; 3]) -> Self {
        Self {
            thresholds_ms,
            searching_since: None,
            current: None,
        }
    }

    /// Hint for a given time spent searching
    pub fn hint_for(&self, elapsed_ms: f64) -> GuidanceHint {
        let [point, slow, light] = self.thresholds_ms;
        if elapsed_ms >= light {
            GuidanceHint::TryWellLitArea
        } else if elapsed_ms >= slow {
            GuidanceHint::MoveSlowly
        } else if elapsed_ms >= point {
            GuidanceHint::PointAtFlatSurface
        } else {
            GuidanceHint::Scanning
        }
    }

    /// Record this frame's outcome; returns the new hint when it changed
    pub fn update(&mut self, surface_found: bool, now_ms: f64) -> Option<GuidanceHint> {
        let next = if surface_found {
            self.searching_since = None;
            GuidanceHint::SurfaceDetected
        } else {
            let since = *self.searching_since.get_or_insert(now_ms);
            self.hint_for(now_ms - since)
        };

        if self.current == Some(next) {
            None
        } else {
            self.current = Some(next);
            Some(next)
        }
    }

    pub fn current(&self) -> Option<GuidanceHint> {
        self.current
    }

    pub fn reset(&mut self) {
        self.searching_since = None;
        self.current = None;
    }
}

/// Hit testing, reticle and guidance for one native session
#[derive(Debug)]
pub struct SurfaceDetector {
    hit_test_source: Option<Box<dyn HitTestSource>>,
    viewer_space: Option<ReferenceSpace>,
    reticle: Reticle,
    guidance: ScanGuidance,
    pending_hint: Option<GuidanceHint>,
    last_hit: Option<HitTestData>,
}

impl SurfaceDetector {
    pub fn new(config: &SurfaceConfig) -> Self {
        Self {
            hit_test_source: None,
            viewer_space: None,
            reticle: Reticle::default(),
            guidance: ScanGuidance::new(config.guidance_thresholds_ms),
            pending_hint: None,
            last_hit: None,
        }
    }

    /// Establish a continuous hit-test source against the viewer space
    pub async fn setup_hit_test(&mut self, session: &dyn XrSession) -> Result<(), PlatformError> {
        self.teardown();
        let viewer_space = session.request_reference_space(ReferenceSpaceType::Viewer).await?;
        let source = session.request_hit_test_source(viewer_space).await?;
        info!(source = source.id(), "Hit-test source ready");
        self.viewer_space = Some(viewer_space);
        self.hit_test_source = Some(source);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.hit_test_source.as_ref().is_some_and(|s| !s.is_cancelled())
    }

    /// Per-frame update; returns the surface under the reticle, if any
    pub fn update_reticle(&mut self, frame: &dyn XrFrame, space: ReferenceSpace) -> Option<HitTestData> {
        let now = frame.timestamp();
        self.reticle.animate(now);

        let source = self.hit_test_source.as_deref().filter(|s| !s.is_cancelled())?;
        let hit = frame
            .hit_test_results(source, space)
            .first()
            .map(|result| HitTestData::from_pose(&result.pose, now));

        match hit {
            Some(data) => self.reticle.show_at(&data),
            None => {
                trace!(timestamp = now, "No surface this frame");
                self.reticle.hide();
            }
        }
        self.last_hit = hit;

        if let Some(hint) = self.guidance.update(hit.is_some(), now) {
            debug!(?hint, "Scan guidance changed");
            self.pending_hint = Some(hint);
        }
        hit
    }

    /// No frame this tick: the last hit is stale, so hide the reticle
    pub fn frame_missed(&mut self) {
        self.reticle.hide();
        self.last_hit = None;
    }

    /// Guidance hint that changed since the last call
    pub fn take_guidance_change(&mut self) -> Option<GuidanceHint> {
        self.pending_hint.take()
    }

    pub fn guidance(&self) -> Option<GuidanceHint> {
        self.guidance.current()
    }

    pub fn reticle(&self) -> &Reticle {
        &self.reticle
    }

    /// Hit from the most recent frame
    pub fn last_hit(&self) -> Option<&HitTestData> {
        self.last_hit.as_ref()
    }

    pub fn viewer_space(&self) -> Option<ReferenceSpace> {
        self.viewer_space
    }

    /// Cancel the hit-test source and reset per-session state
    pub fn teardown(&mut self) {
        if let Some(mut source) = self.hit_test_source.take() {
            source.cancel();
            debug!(source = source.id(), "Hit-test source cancelled");
        }
        self.viewer_space = None;
        self.reticle.hide();
        self.guidance.reset();
        self.pending_hint = None;
        self.last_hit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::XrSystem;
    use crate::platform::{SessionInit, SessionMode};
    use crate::sim::{SimulatedFrame, SimulatedXr};

    async fn detector_with_session() -> (SurfaceDetector, Box<dyn XrSession>, SimulatedXr) {
        let xr = SimulatedXr::new();
        let session = xr
            .request_session(SessionMode::ImmersiveAr, &SessionInit::placement())
            .await
            .unwrap();
        let mut detector = SurfaceDetector::new(&SurfaceConfig::default());
        detector.setup_hit_test(session.as_ref()).await.unwrap();
        (detector, session, xr)
    }

    #[tokio::test]
    async fn test_reticle_follows_hits_frame_by_frame() {
        let (mut detector, _session, _xr) = detector_with_session().await;
        let space = detector.viewer_space().unwrap();

        let hit = detector
            .update_reticle(&SimulatedFrame::looking_down(0.0), space)
            .unwrap();
        assert!(hit.position.abs_diff_eq(Vec3::new(0.0, 0.0, -1.5), 1e-4));
        assert_eq!(hit.confidence, 1.0);
        assert!(detector.reticle().visible);

        assert!(detector.update_reticle(&SimulatedFrame::looking_ahead(16.0), space).is_none());
        assert!(!detector.reticle().visible);
        assert!(detector.last_hit().is_none());
    }

    #[tokio::test]
    async fn test_missed_frame_hides_reticle() {
        let (mut detector, _session, _xr) = detector_with_session().await;
        let space = detector.viewer_space().unwrap();

        detector.update_reticle(&SimulatedFrame::looking_down(0.0), space);
        assert!(detector.reticle().visible);

        detector.frame_missed();
        assert!(!detector.reticle().visible);
        assert!(detector.last_hit().is_none());
        assert!(detector.is_active());
    }

    #[tokio::test]
    async fn test_guidance_escalates_and_resets() {
        let (mut detector, _session, _xr) = detector_with_session().await;
        let space = detector.viewer_space().unwrap();

        let mut hints = Vec::new();
        for t in [0.0, 2_000.0, 3_000.0, 8_000.0, 14_000.0, 15_000.0] {
            detector.update_reticle(&SimulatedFrame::looking_ahead(t), space);
            hints.extend(detector.take_guidance_change());
        }
        assert_eq!(
            hints,
            vec![
                GuidanceHint::Scanning,
                GuidanceHint::PointAtFlatSurface,
                GuidanceHint::MoveSlowly,
                GuidanceHint::TryWellLitArea,
            ]
        );

        detector.update_reticle(&SimulatedFrame::looking_down(16_000.0), space);
        assert_eq!(detector.take_guidance_change(), Some(GuidanceHint::SurfaceDetected));

        // Losing the surface restarts the clock
        detector.update_reticle(&SimulatedFrame::looking_ahead(17_000.0), space);
        assert_eq!(detector.take_guidance_change(), Some(GuidanceHint::Scanning));
        detector.update_reticle(&SimulatedFrame::looking_ahead(19_000.0), space);
        assert_eq!(detector.guidance(), Some(GuidanceHint::Scanning));
    }

    #[tokio::test]
    async fn test_teardown_releases_source() {
        let (mut detector, _session, xr) = detector_with_session().await;
        assert!(detector.is_active());
        assert_eq!(xr.resources().live_hit_test_sources(), 1);

        detector.teardown();
        assert!(!detector.is_active());
        assert_eq!(xr.resources().live_hit_test_sources(), 0);

        let space = ReferenceSpace {
            id: 0,
            kind: ReferenceSpaceType::Viewer,
        };
        assert!(detector.update_reticle(&SimulatedFrame::looking_down(0.0), space).is_none());
    }

    #[test]
    fn test_reticle_animates_without_hits() {
        let mut reticle = Reticle::default();
        reticle.animate(0.0);
        let start = (reticle.pulse, reticle.spin);
        reticle.animate(400.0);
        assert_ne!((reticle.pulse, reticle.spin), start);
        assert!(!reticle.visible);
        assert!(reticle.pulse > 0.9 && reticle.pulse < 1.1);
    }

    #[test]
    fn test_hint_thresholds() {
        let guidance = ScanGuidance::new([3_000.0, 8_000.0, 15_000.0]);
        assert_eq!(guidance.hint_for(2_999.0), GuidanceHint::Scanning);
        assert_eq!(guidance.hint_for(3_000.0), GuidanceHint::PointAtFlatSurface);
        assert_eq!(guidance.hint_for(8_000.0), GuidanceHint::MoveSlowly);
        assert_eq!(guidance.hint_for(60_000.0), GuidanceHint::TryWellLitArea);
    }
}
