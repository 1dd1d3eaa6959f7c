//! In-process platform used by tests and the headless host
//!
//! `SimulatedXr` hands out sessions whose hit-test sources and anchors are
//! counted in a shared [`ResourceTracker`], so session teardown can be
//! checked for leaks. `SimulatedFrame` models a flat floor: a hit is found
//! whenever the viewer looks downward at it.

use async_trait::async_trait;
use glam::{Quat, Vec3};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::{LoadError, PlatformError};
use crate::loader::ModelFetcher;
use crate::platform::{
    Anchor, HitTestResult, HitTestSource, LightEstimate, Pose, ReferenceSpace, ReferenceSpaceType, SessionInit,
    SessionMode, ViewerHost, XrFrame, XrSession, XrSystem,
};
use crate::viewer::ViewerConfig;

/// Unit cube resting on its base, with a 2.5s "spin" animation
pub const SAMPLE_GLTF: &str = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [{ "nodes": [0] }],
  "nodes": [{ "name": "ottoman", "mesh": 0, "translation": [0.0, 0.5, 0.0] }],
  "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 }] }],
  "materials": [{
    "name": "fabric",
    "pbrMetallicRoughness": { "baseColorFactor": [0.5, 0.4, 0.3, 1.0] },
    "emissiveFactor": [0.1, 0.0, 0.0]
  }],
  "animations": [{
    "name": "spin",
    "channels": [{ "sampler": 0, "target": { "node": 0, "path": "rotation" } }],
    "samplers": [{ "input": 2, "output": 3, "interpolation": "LINEAR" }]
  }],
  "accessors": [
    { "bufferView": 0, "componentType": 5126, "count": 8, "type": "VEC3", "min": [-0.5, -0.5, -0.5], "max": [0.5, 0.5, 0.5] },
    { "bufferView": 1, "componentType": 5123, "count": 36, "type": "SCALAR" },
    { "bufferView": 2, "componentType": 5126, "count": 2, "type": "SCALAR", "min": [0], "max": [2.5] },
    { "bufferView": 3, "componentType": 5126, "count": 2, "type": "VEC4" }
  ],
  "bufferViews": [
    { "buffer": 0, "byteOffset": 0, "byteLength": 96, "target": 34962 },
    { "buffer": 0, "byteOffset": 96, "byteLength": 72, "target": 34963 },
    { "buffer": 0, "byteOffset": 168, "byteLength": 8 },
    { "buffer": 0, "byteOffset": 176, "byteLength": 32 }
  ],
  "buffers": [{
    "byteLength": 208,
    "uri": "data:application/octet-stream;base64,AAAAvwAAAL8AAAC/AAAAPwAAAL8AAAC/AAAAPwAAAD8AAAC/AAAAvwAAAD8AAAC/AAAAvwAAAL8AAAA/AAAAPwAAAL8AAAA/AAAAPwAAAD8AAAA/AAAAvwAAAD8AAAA/AAACAAEAAAADAAIABAAFAAYABAAGAAcAAAABAAUAAAAFAAQAAwAHAAYAAwAGAAIAAAAEAAcAAAAHAAMAAQACAAYAAQAGAAUAAAAAAAAAIEAAAAAAAAAAAAAAAAAAAIA/AAAAAPQENT8AAAAA9AQ1Pw=="
  }]
}"#;

/// User-agent strings of common browsers
pub mod presets {
    use crate::capabilities::Environment;

    pub const IOS_SAFARI: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1";
    pub const IOS_CHROME: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) CriOS/120.0.6099.119 Mobile/15E148 Safari/604.1";
    pub const DESKTOP_SAFARI: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15";
    pub const ANDROID_CHROME: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.144 Mobile Safari/537.36";
    pub const DESKTOP_CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    pub const QUEST_BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64; Quest 3) AppleWebKit/537.36 (KHTML, like Gecko) OculusBrowser/31.0 Chrome/120.0.6099.283 VR Safari/537.36";

    /// Environment a browser with this user agent typically reports (no XR API attached)
    pub fn environment(user_agent: &str) -> Environment {
        let touch = ["iPhone", "iPad", "Android", "Mobile"]
            .iter()
            .any(|marker| user_agent.contains(marker));
        let mut env = Environment::new(user_agent);
        if touch {
            env.max_touch_points = 5;
            env.device_memory_gb = Some(4.0);
            env.hardware_concurrency = Some(8);
            env.device_pixel_ratio = 3.0;
        } else {
            env.device_memory_gb = Some(8.0);
            env.hardware_concurrency = Some(8);
            env.device_pixel_ratio = 2.0;
        }
        env
    }
}

/// Live platform resources handed out by simulated sessions
#[derive(Debug, Default)]
pub struct ResourceTracker {
    hit_test_sources: AtomicI64,
    anchors: AtomicI64,
    sessions_started: AtomicU64,
    sessions_ended: AtomicU64,
    next_id: AtomicU32,
}

impl ResourceTracker {
    pub fn live_hit_test_sources(&self) -> i64 {
        self.hit_test_sources.load(Ordering::SeqCst)
    }

    pub fn live_anchors(&self) -> i64 {
        self.anchors.load(Ordering::SeqCst)
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::SeqCst)
    }

    pub fn sessions_ended(&self) -> u64 {
        self.sessions_ended.load(Ordering::SeqCst)
    }

    /// No session running and nothing left allocated
    pub fn is_clean(&self) -> bool {
        self.live_hit_test_sources() == 0
            && self.live_anchors() == 0
            && self.sessions_started() == self.sessions_ended()
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Simulated immersive-session API
#[derive(Debug, Clone)]
pub struct SimulatedXr {
    ar_supported: bool,
    query_fails: bool,
    reject_sessions: bool,
    anchors: bool,
    resources: Arc<ResourceTracker>,
    active: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

impl Default for SimulatedXr {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedXr {
    /// Device with immersive AR, hit testing and anchors
    pub fn new() -> Self {
        Self {
            ar_supported: true,
            query_fails: false,
            reject_sessions: false,
            anchors: true,
            resources: Arc::new(ResourceTracker::default()),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn without_ar(mut self) -> Self {
        self.ar_supported = false;
        self
    }

    /// The support query itself errors
    pub fn failing_support_query(mut self) -> Self {
        self.query_fails = true;
        self
    }

    /// Support is reported but session requests are refused (e.g. camera permission denied)
    pub fn rejecting_sessions(mut self) -> Self {
        self.reject_sessions = true;
        self
    }

    pub fn without_anchors(mut self) -> Self {
        self.anchors = false;
        self
    }

    pub fn resources(&self) -> Arc<ResourceTracker> {
        self.resources.clone()
    }

    /// End the running session from the platform side (system UI, navigation)
    pub fn end_active_session(&self) {
        if let Some(ended) = self.active.lock().as_ref() {
            if !ended.swap(true, Ordering::SeqCst) {
                self.resources.sessions_ended.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl XrSystem for SimulatedXr {
    async fn is_session_supported(&self, mode: SessionMode) -> Result<bool, PlatformError> {
        if self.query_fails {
            return Err(PlatformError::Failed("isSessionSupported threw".to_string()));
        }
        Ok(self.ar_supported && mode == SessionMode::ImmersiveAr)
    }

    async fn request_session(&self, mode: SessionMode, init: &SessionInit) -> Result<Box<dyn XrSession>, PlatformError> {
        if !self.ar_supported || mode != SessionMode::ImmersiveAr {
            return Err(PlatformError::Unsupported(format!("{:?}", mode)));
        }
        if self.reject_sessions {
            return Err(PlatformError::Rejected("NotAllowedError: permission denied".to_string()));
        }

        let ended = Arc::new(AtomicBool::new(false));
        *self.active.lock() = Some(ended.clone());
        self.resources.sessions_started.fetch_add(1, Ordering::SeqCst);
        debug!(required = ?init.required_features, "Simulated session started");

        Ok(Box::new(SimulatedSession {
            anchors: self.anchors && init.optional_features.iter().any(|f| f == "anchors"),
            ended,
            resources: self.resources.clone(),
        }))
    }
}

/// Session handed out by [`SimulatedXr`]
#[derive(Debug)]
pub struct SimulatedSession {
    anchors: bool,
    ended: Arc<AtomicBool>,
    resources: Arc<ResourceTracker>,
}

impl SimulatedSession {
    fn ensure_running(&self) -> Result<(), PlatformError> {
        if self.ended.load(Ordering::SeqCst) {
            Err(PlatformError::SessionEnded)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl XrSession for SimulatedSession {
    async fn request_reference_space(&self, kind: ReferenceSpaceType) -> Result<ReferenceSpace, PlatformError> {
        self.ensure_running()?;
        Ok(ReferenceSpace {
            id: self.resources.next_id(),
            kind,
        })
    }

    async fn request_hit_test_source(&self, _space: ReferenceSpace) -> Result<Box<dyn HitTestSource>, PlatformError> {
        self.ensure_running()?;
        self.resources.hit_test_sources.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedHitTestSource {
            id: self.resources.next_id(),
            cancelled: false,
            resources: self.resources.clone(),
        }))
    }

    fn supports_anchors(&self) -> bool {
        self.anchors
    }

    async fn create_anchor(&self, pose: Pose, _space: ReferenceSpace) -> Result<Box<dyn Anchor>, PlatformError> {
        self.ensure_running()?;
        if !self.anchors {
            return Err(PlatformError::Unsupported("anchors".to_string()));
        }
        self.resources.anchors.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedAnchor {
            id: self.resources.next_id(),
            pose,
            deleted: false,
            resources: self.resources.clone(),
        }))
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    async fn end(&self) -> Result<(), PlatformError> {
        if !self.ended.swap(true, Ordering::SeqCst) {
            self.resources.sessions_ended.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimulatedHitTestSource {
    id: u32,
    cancelled: bool,
    resources: Arc<ResourceTracker>,
}

impl HitTestSource for SimulatedHitTestSource {
    fn id(&self) -> u32 {
        self.id
    }

    fn cancel(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            self.resources.hit_test_sources.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

#[derive(Debug)]
pub struct SimulatedAnchor {
    id: u32,
    pose: Pose,
    deleted: bool,
    resources: Arc<ResourceTracker>,
}

impl Anchor for SimulatedAnchor {
    fn id(&self) -> u32 {
        self.id
    }

    fn pose(&self) -> Option<Pose> {
        (!self.deleted).then_some(self.pose)
    }

    fn delete(&mut self) {
        if !self.deleted {
            self.deleted = true;
            self.resources.anchors.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// One frame over a flat floor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedFrame {
    pub timestamp_ms: f64,
    pub viewer: Pose,
    pub floor_height: f32,
    pub light: Option<LightEstimate>,
}

impl SimulatedFrame {
    /// Eye height of the default viewer
    pub const EYE_HEIGHT: f32 = 1.5;

    pub fn new(timestamp_ms: f64, viewer: Pose) -> Self {
        Self {
            timestamp_ms,
            viewer,
            floor_height: 0.0,
            light: None,
        }
    }

    /// Viewer pitched 45 degrees down; the floor is hit 1.5m ahead
    pub fn looking_down(timestamp_ms: f64) -> Self {
        Self::new(
            timestamp_ms,
            Pose::new(
                Vec3::new(0.0, Self::EYE_HEIGHT, 0.0),
                Quat::from_rotation_x(-std::f32::consts::FRAC_PI_4),
            ),
        )
    }

    /// Viewer looking at the horizon; nothing is hit
    pub fn looking_ahead(timestamp_ms: f64) -> Self {
        Self::new(timestamp_ms, Pose::new(Vec3::new(0.0, Self::EYE_HEIGHT, 0.0), Quat::IDENTITY))
    }

    pub fn with_floor(mut self, height: f32) -> Self {
        self.floor_height = height;
        self
    }

    pub fn with_light(mut self, light: LightEstimate) -> Self {
        self.light = Some(light);
        self
    }
}

impl XrFrame for SimulatedFrame {
    fn timestamp(&self) -> f64 {
        self.timestamp_ms
    }

    fn hit_test_results(&self, source: &dyn HitTestSource, _space: ReferenceSpace) -> Vec<HitTestResult> {
        if source.is_cancelled() {
            return Vec::new();
        }
        let direction = self.viewer.orientation * Vec3::NEG_Z;
        if direction.y > -1e-4 {
            return Vec::new();
        }
        let t = (self.floor_height - self.viewer.position.y) / direction.y;
        if t <= 0.0 {
            return Vec::new();
        }
        vec![HitTestResult {
            pose: Pose::new(self.viewer.position + direction * t, Quat::IDENTITY),
        }]
    }

    fn light_estimate(&self) -> Option<LightEstimate> {
        self.light
    }
}

/// Viewer element stand-in recording activations
#[derive(Debug, Default)]
pub struct SimulatedViewerHost {
    fail: bool,
    activations: AtomicU32,
    dismissals: AtomicU32,
    last_config: Mutex<Option<ViewerConfig>>,
}

impl SimulatedViewerHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every activation is refused
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn activations(&self) -> u32 {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn dismissals(&self) -> u32 {
        self.dismissals.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<ViewerConfig> {
        self.last_config.lock().clone()
    }
}

#[async_trait]
impl ViewerHost for SimulatedViewerHost {
    async fn activate_ar(&self, config: &ViewerConfig) -> Result<(), PlatformError> {
        if self.fail {
            return Err(PlatformError::Rejected("viewer element failed to activate".to_string()));
        }
        self.activations.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock() = Some(config.clone());
        Ok(())
    }

    fn dismiss(&self) {
        self.dismissals.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory model server
#[derive(Debug, Default)]
pub struct StaticFetcher {
    models: HashMap<String, Vec<u8>>,
    fallback: Option<Vec<u8>>,
    fetches: AtomicU32,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves [`SAMPLE_GLTF`] for every URL
    pub fn sample() -> Self {
        Self {
            fallback: Some(SAMPLE_GLTF.as_bytes().to_vec()),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.models.insert(url.into(), bytes);
        self
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.models
            .get(url)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| LoadError::Fetch {
                url: url.to_string(),
                reason: "404 Not Found".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_resources_are_tracked() {
        let xr = SimulatedXr::new();
        let session = xr
            .request_session(SessionMode::ImmersiveAr, &SessionInit::placement())
            .await
            .unwrap();
        let space = session.request_reference_space(ReferenceSpaceType::Viewer).await.unwrap();
        let mut source = session.request_hit_test_source(space).await.unwrap();
        let mut anchor = session.create_anchor(Pose::IDENTITY, space).await.unwrap();
        assert!(!xr.resources().is_clean());

        source.cancel();
        source.cancel();
        anchor.delete();
        assert!(anchor.pose().is_none());
        session.end().await.unwrap();
        session.end().await.unwrap();
        assert!(xr.resources().is_clean());
        assert_eq!(xr.resources().sessions_ended(), 1);
        assert!(matches!(
            session.request_reference_space(ReferenceSpaceType::Local).await,
            Err(PlatformError::SessionEnded)
        ));
    }

    #[tokio::test]
    async fn test_rejecting_and_unsupported() {
        let xr = SimulatedXr::new().rejecting_sessions();
        assert!(xr.is_session_supported(SessionMode::ImmersiveAr).await.unwrap());
        assert!(matches!(
            xr.request_session(SessionMode::ImmersiveAr, &SessionInit::placement()).await,
            Err(PlatformError::Rejected(_))
        ));

        let xr = SimulatedXr::new().without_ar();
        assert!(!xr.is_session_supported(SessionMode::ImmersiveAr).await.unwrap());
        assert!(xr.is_session_supported(SessionMode::ImmersiveVr).await.is_ok());
    }

    #[tokio::test]
    async fn test_platform_side_end() {
        let xr = SimulatedXr::new();
        let session = xr
            .request_session(SessionMode::ImmersiveAr, &SessionInit::placement())
            .await
            .unwrap();
        assert!(!session.is_ended());
        xr.end_active_session();
        assert!(session.is_ended());
        session.end().await.unwrap();
        assert!(xr.resources().is_clean());
    }

    #[test]
    fn test_floor_hit_geometry() {
        let source = SimulatedHitTestSource {
            id: 1,
            cancelled: false,
            resources: Arc::new(ResourceTracker::default()),
        };
        let space = ReferenceSpace {
            id: 1,
            kind: ReferenceSpaceType::Viewer,
        };

        let hits = SimulatedFrame::looking_down(0.0).hit_test_results(&source, space);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].pose.position.abs_diff_eq(Vec3::new(0.0, 0.0, -1.5), 1e-4));

        let raised = SimulatedFrame::looking_down(0.0).with_floor(0.5);
        assert!((raised.hit_test_results(&source, space)[0].pose.position.z + 1.0).abs() < 1e-4);

        assert!(SimulatedFrame::looking_ahead(0.0).hit_test_results(&source, space).is_empty());
    }

    #[test]
    fn test_preset_environments() {
        let phone = presets::environment(presets::IOS_SAFARI);
        assert_eq!(phone.max_touch_points, 5);
        assert!(phone.device_hints().is_mobile);

        let desktop = presets::environment(presets::DESKTOP_CHROME);
        assert_eq!(desktop.max_touch_points, 0);
        assert!(!desktop.device_hints().is_mobile);
        assert!(desktop.xr.is_none());
    }
}
