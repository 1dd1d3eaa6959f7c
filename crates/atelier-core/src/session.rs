//! AR session orchestrator
//!
//! `ArSessionManager` owns the component instances and drives the session
//! state machine:
//!
//! ```text
//! uninitialized -> detecting -> ready(mode) | unsupported
//! ready(mode) -> session_active(mode) -> session_ended(mode) -> ready(mode)
//! ```
//!
//! Capability errors step the mode down one tier (native -> viewer ->
//! fallback) and return to `ready`; errors with nowhere left to go end up in
//! `failed`, which only `retry` leaves. Every transition and host callback is
//! published on a broadcast channel of [`ArEvent`]s.
//!
//! The host drives rendering by calling [`ArSessionManager::tick`] once per
//! frame. Each tick samples performance, applies any quality change, updates
//! surface detection, then renders.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::capabilities::{detect_capabilities, ArMode, DeviceCapabilities, Environment};
use crate::catalog::ModelCatalog;
use crate::config::ArConfig;
use crate::error::{ArError, PlatformError};
use crate::handoff::HandoffLink;
use crate::loader::AssetLoader;
use crate::notice::NoticeBoard;
use crate::performance::{PerformanceEvent, PerformanceMonitor};
use crate::placement::{AnchorTarget, ObjectId, PlacementEngine};
use crate::platform::{ReferenceSpace, ReferenceSpaceType, SessionInit, SessionMode, ViewerHost, XrFrame, XrSession};
use crate::quality::QualityLevel;
use crate::scene::{Camera, Renderer, SceneView};
use crate::surface::{GuidanceHint, SurfaceDetector};
use crate::viewer::{FallbackPreview, ViewerConfig};

use std::sync::Arc;

const EVENT_CAPACITY: usize = 256;

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "mode", rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Detecting,
    Ready(ArMode),
    /// Nothing can be shown on this device
    Unsupported,
    SessionActive(ArMode),
    SessionEnded(ArMode),
    /// Blocking error displayed; leave through [`ArSessionManager::retry`]
    Failed,
}

impl SessionState {
    pub fn mode(&self) -> Option<ArMode> {
        match self {
            Self::Ready(mode) | Self::SessionActive(mode) | Self::SessionEnded(mode) => Some(*mode),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::SessionActive(_))
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Detecting => write!(f, "detecting"),
            Self::Ready(mode) => write!(f, "ready({})", mode),
            Self::Unsupported => write!(f, "unsupported"),
            Self::SessionActive(mode) => write!(f, "session_active({})", mode),
            Self::SessionEnded(mode) => write!(f, "session_ended({})", mode),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Host-facing notifications
#[derive(Debug, Clone, PartialEq)]
pub enum ArEvent {
    StateChanged { from: SessionState, to: SessionState },
    Started(ArMode),
    Ended(ArMode),
    ObjectPlaced(ObjectId),
    ObjectRemoved(ObjectId),
    Error(ArError),
    ModeDowngraded { from: ArMode, to: ArMode },
    QualityChanged(QualityLevel),
    Guidance(GuidanceHint),
}

/// Immersive session and the space objects are placed in
pub struct NativeSession {
    pub session: Box<dyn XrSession>,
    pub local_space: ReferenceSpace,
}

impl std::fmt::Debug for NativeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeSession")
            .field("local_space", &self.local_space)
            .field("ended", &self.session.is_ended())
            .finish()
    }
}

pub struct ViewerSession {
    pub config: ViewerConfig,
    host: Arc<dyn ViewerHost>,
}

impl std::fmt::Debug for ViewerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSession").field("config", &self.config).finish()
    }
}

#[derive(Debug)]
pub struct FallbackSession {
    /// `None` when no model is configured or it failed to load
    pub preview: Option<FallbackPreview>,
    pub handoff: Option<HandoffLink>,
}

/// Running session, one variant per mode
#[derive(Debug)]
pub enum ActiveSession {
    Native(NativeSession),
    Viewer(ViewerSession),
    Fallback(FallbackSession),
}

impl ActiveSession {
    pub fn mode(&self) -> ArMode {
        match self {
            Self::Native(_) => ArMode::Native,
            Self::Viewer(_) => ArMode::Viewer,
            Self::Fallback(_) => ArMode::Fallback,
        }
    }
}

/// Result of one render-loop tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Frame drawn; schedule the next tick
    Rendered,
    /// Session running but drawn by the platform viewer
    Skipped,
    /// No session; stop the loop
    Stopped,
}

/// Edit applied to the selected object
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransformOp {
    MoveTo(Vec3),
    /// Absolute XYZ Euler angles, radians
    RotateTo(Vec3),
    /// Relative factor, clamped cumulatively
    Scale(f32),
}

pub struct ArSessionManager<R: Renderer> {
    config: ArConfig,
    env: Environment,
    catalog: ModelCatalog,
    viewer_host: Option<Arc<dyn ViewerHost>>,
    renderer: R,
    state: SessionState,
    capabilities: Option<DeviceCapabilities>,
    active: Option<ActiveSession>,
    surface: SurfaceDetector,
    placement: PlacementEngine,
    performance: PerformanceMonitor,
    performance_events: broadcast::Receiver<PerformanceEvent>,
    notices: NoticeBoard,
    events: broadcast::Sender<ArEvent>,
    clock_ms: f64,
}

impl<R: Renderer> ArSessionManager<R> {
    pub fn new(config: ArConfig, env: Environment, loader: AssetLoader, renderer: R) -> Self {
        let performance = PerformanceMonitor::new(config.performance.clone(), env.device_hints());
        let performance_events = performance.subscribe();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            surface: SurfaceDetector::new(&config.surface),
            placement: PlacementEngine::new(loader, config.placement.clone()),
            catalog: ModelCatalog::default(),
            viewer_host: None,
            renderer,
            state: SessionState::Uninitialized,
            capabilities: None,
            active: None,
            performance,
            performance_events,
            notices: NoticeBoard::new(),
            events,
            clock_ms: 0.0,
            config,
            env,
        }
    }

    /// Embeddable viewer element used by viewer mode
    pub fn with_viewer_host(mut self, host: Arc<dyn ViewerHost>) -> Self {
        self.viewer_host = Some(host);
        self
    }

    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ArEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        let from = std::mem::replace(&mut self.state, next);
        info!(from = %from, to = %next, "Session state changed");
        self.emit(ArEvent::StateChanged { from, to: next });
    }

    /// Run capability detection and pick the starting mode
    pub async fn initialize(&mut self) -> SessionState {
        if self.state != SessionState::Uninitialized {
            debug!(state = %self.state, "Already initialized");
            return self.state;
        }
        self.set_state(SessionState::Detecting);

        let capabilities = detect_capabilities(&self.env).await;
        let mode = capabilities.recommended_mode;
        self.capabilities = Some(capabilities);

        if !self.env.webgl_available {
            warn!("No WebGL context, nothing can be rendered");
            self.set_state(SessionState::Unsupported);
            let error = ArError::not_supported("This browser cannot display 3D content")
                .with_suggested_action("Try a recent version of Chrome, Safari or Firefox");
            self.emit(ArEvent::Error(error.clone()));
            self.notices.block(error, self.clock_ms);
        } else {
            self.set_state(SessionState::Ready(mode));
        }
        self.state
    }

    /// Start a session in the current mode
    pub async fn start_session(&mut self) -> Result<(), ArError> {
        let SessionState::Ready(mode) = self.state else {
            warn!(state = %self.state, "start_session outside ready");
            return Err(ArError::session_failed(format!("Cannot start a session while {}", self.state)));
        };

        info!(mode = %mode, "Starting AR session");
        let started = match mode {
            ArMode::Native => self.start_native().await,
            ArMode::Viewer => self.start_viewer().await,
            ArMode::Fallback => Ok(self.start_fallback().await),
        };

        match started {
            Ok(active) => {
                self.active = Some(active);
                self.set_state(SessionState::SessionActive(mode));
                self.emit(ArEvent::Started(mode));
                Ok(())
            }
            Err(error) => {
                self.report_error(error.clone()).await;
                Err(error)
            }
        }
    }

    fn reset_performance(&mut self) {
        self.performance = PerformanceMonitor::new(self.config.performance.clone(), self.env.device_hints());
        self.performance_events = self.performance.subscribe();
        self.renderer.apply_quality(&self.performance.quality_settings());
    }

    async fn start_native(&mut self) -> Result<ActiveSession, ArError> {
        let xr = self
            .env
            .xr
            .clone()
            .ok_or_else(|| ArError::not_supported("Immersive AR is not available in this browser"))?;

        let session = xr
            .request_session(SessionMode::ImmersiveAr, &SessionInit::placement())
            .await
            .map_err(|e| match e {
                PlatformError::Unsupported(_) => {
                    ArError::not_supported("Immersive AR is not supported on this device").with_details(e.to_string())
                }
                _ => ArError::session_failed("Could not start the AR session")
                    .with_details(e.to_string())
                    .with_suggested_action("Allow camera access and try again"),
            })?;

        let local_space = match session.request_reference_space(ReferenceSpaceType::LocalFloor).await {
            Ok(space) => space,
            Err(e) => {
                debug!(error = %e, "local-floor unavailable, using local");
                match session.request_reference_space(ReferenceSpaceType::Local).await {
                    Ok(space) => space,
                    Err(e) => {
                        end_quietly(session.as_ref()).await;
                        return Err(ArError::session_failed("No reference space available").with_details(e.to_string()));
                    }
                }
            }
        };

        if let Err(e) = self.surface.setup_hit_test(session.as_ref()).await {
            self.surface.teardown();
            end_quietly(session.as_ref()).await;
            return Err(ArError::session_failed("Surface detection is unavailable").with_details(e.to_string()));
        }

        if let Some(url) = self.config.session.model_url.clone() {
            // Warm the cache; a failure resurfaces on placement
            if let Err(e) = self.placement.loader().load(&url).await {
                warn!(url = %url, error = %e, "Model preload failed");
            }
        }

        self.reset_performance();
        Ok(ActiveSession::Native(NativeSession { session, local_space }))
    }

    async fn start_viewer(&mut self) -> Result<ActiveSession, ArError> {
        let host = self
            .viewer_host
            .clone()
            .ok_or_else(|| ArError::not_supported("No AR viewer is available"))?;
        let url = self.config.session.model_url.clone().ok_or_else(|| {
            ArError::load_failed("No model configured").unrecoverable()
        })?;
        let capabilities = self
            .capabilities
            .as_ref()
            .ok_or_else(|| ArError::session_failed("Capabilities not detected"))?;

        let name = self.catalog.display_name(&url);
        let config = ViewerConfig::for_model(&url, &name, capabilities, self.catalog.lookup(&url));
        host.activate_ar(&config)
            .await
            .map_err(|e| ArError::session_failed("The AR viewer could not be opened").with_details(e.to_string()))?;

        info!(src = %config.src, modes = ?config.ar_modes, "Viewer activated");
        Ok(ActiveSession::Viewer(ViewerSession { config, host }))
    }

    async fn start_fallback(&mut self) -> ActiveSession {
        let model_url = self.config.session.model_url.clone();

        let preview = match &model_url {
            Some(url) => match self.placement.loader().load(url).await {
                Ok(model) => Some(FallbackPreview::new(model)),
                Err(e) => {
                    self.raise(e.into());
                    None
                }
            },
            None => None,
        };

        let wants_handoff = self.capabilities.as_ref().is_some_and(|c| c.wants_handoff());
        let handoff = match (&self.config.session.handoff_url, &model_url) {
            (Some(base), Some(url)) if wants_handoff => match HandoffLink::new(base, url) {
                Ok(link) => Some(link),
                Err(e) => {
                    warn!(base = %base, error = %e, "Invalid hand-off page URL");
                    None
                }
            },
            _ => None,
        };
        if let Some(link) = &handoff {
            info!(url = %link.url, "Phone hand-off link ready");
        }

        self.reset_performance();
        ActiveSession::Fallback(FallbackSession { preview, handoff })
    }

    /// End the running session and return to `ready`
    pub async fn end_session(&mut self) {
        if !self.state.is_active() {
            debug!(state = %self.state, "No active session to end");
            return;
        }
        let Some(active) = self.active.take() else {
            return;
        };
        let mode = active.mode();

        self.release(&active);
        if let ActiveSession::Native(native) = &active {
            if !native.session.is_ended() {
                if let Err(e) = native.session.end().await {
                    warn!(error = %e, "Session end reported an error");
                }
            }
        }
        drop(active);
        self.finish(mode);
    }

    /// Free per-session resources: hit-test source, anchors, placed objects, selection
    fn release(&mut self, active: &ActiveSession) {
        match active {
            ActiveSession::Native(_) => {
                self.surface.teardown();
                for id in self.placement.remove_all_objects() {
                    self.emit(ArEvent::ObjectRemoved(id));
                }
                self.placement.reset_lighting();
            }
            ActiveSession::Viewer(viewer) => viewer.host.dismiss(),
            ActiveSession::Fallback(_) => {}
        }
        self.placement.deselect_object();
    }

    fn finish(&mut self, mode: ArMode) {
        info!(mode = %mode, "AR session ended");
        self.set_state(SessionState::SessionEnded(mode));
        self.emit(ArEvent::Ended(mode));
        self.set_state(SessionState::Ready(mode));
    }

    /// One render-loop step
    ///
    /// `frame` is the platform frame in native mode and `None` otherwise.
    pub fn tick(&mut self, now_ms: f64, frame: Option<&dyn XrFrame>) -> TickOutcome {
        self.clock_ms = now_ms;
        self.notices.expire(now_ms);

        if !self.state.is_active() {
            return TickOutcome::Stopped;
        }

        let platform_ended = matches!(&self.active, Some(ActiveSession::Native(n)) if n.session.is_ended());
        if platform_ended {
            if let Some(active) = self.active.take() {
                info!("Session ended by the platform");
                let mode = active.mode();
                self.release(&active);
                self.finish(mode);
            }
            return TickOutcome::Stopped;
        }
        if matches!(&self.active, Some(ActiveSession::Viewer(_))) {
            return TickOutcome::Skipped;
        }

        self.performance.update(now_ms);
        self.apply_performance_events();

        match &mut self.active {
            Some(ActiveSession::Native(native)) => {
                self.placement.sync_anchors();
                if let Some(frame) = frame {
                    self.surface.update_reticle(frame, native.local_space);
                    if let Some(hint) = self.surface.take_guidance_change() {
                        let _ = self.events.send(ArEvent::Guidance(hint));
                    }
                    if let Some(estimate) = frame.light_estimate() {
                        self.placement.update_environmental_lighting(&estimate);
                    }
                } else {
                    self.surface.frame_missed();
                }
            }
            Some(ActiveSession::Fallback(fallback)) => {
                if let Some(preview) = fallback.preview.as_mut() {
                    preview.animate(now_ms);
                }
            }
            _ => return TickOutcome::Stopped,
        }

        let (preview, reticle) = match &self.active {
            Some(ActiveSession::Native(_)) => (None, Some(self.surface.reticle())),
            Some(ActiveSession::Fallback(fallback)) => (fallback.preview.as_ref().map(|p| &p.node), None),
            _ => (None, None),
        };
        let view = SceneView {
            objects: self.placement.nodes(),
            preview,
            lighting: self.placement.lighting(),
            reticle,
            timestamp_ms: now_ms,
        };
        self.renderer.render(&view);
        TickOutcome::Rendered
    }

    fn apply_performance_events(&mut self) {
        loop {
            match self.performance_events.try_recv() {
                Ok(PerformanceEvent::QualityAdjusted { from, to, reason }) => {
                    info!(from = %from, to = %to, ?reason, "Applying quality change");
                    self.renderer.apply_quality(&self.performance.quality_settings());
                    self.emit(ArEvent::QualityChanged(to));
                }
                Ok(PerformanceEvent::Warning(warning)) => {
                    debug!(kind = ?warning.kind, value = warning.value, "Performance warning");
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Performance events lagged");
                    self.renderer.apply_quality(&self.performance.quality_settings());
                }
                Err(_) => break,
            }
        }
    }

    /// Surface a non-blocking notice without touching the mode
    fn raise(&mut self, error: ArError) {
        warn!(code = %error.code, message = %error.message, "AR error");
        self.emit(ArEvent::Error(error.clone()));
        self.notices.toast(error, self.clock_ms);
    }

    /// Surface an error and apply the downgrade rule
    ///
    /// Capability errors step the mode down one tier and show a toast; at
    /// the lowest tier they become a blocking panel. Load errors show a
    /// toast, or abort the session when marked unrecoverable.
    pub async fn report_error(&mut self, error: ArError) {
        if !error.code.affects_capability() {
            if error.recoverable {
                self.raise(error);
            } else {
                self.fail(error).await;
            }
            return;
        }

        let current = self.state.mode();
        match current.and_then(ArMode::downgrade) {
            Some(next) => {
                let from = current.unwrap_or(next);
                self.end_session().await;
                warn!(from = %from, to = %next, code = %error.code, "Downgrading AR mode");
                self.raise(error);
                self.emit(ArEvent::ModeDowngraded { from, to: next });
                self.set_state(SessionState::Ready(next));
            }
            None => self.fail(error).await,
        }
    }

    async fn fail(&mut self, error: ArError) {
        self.end_session().await;
        warn!(code = %error.code, message = %error.message, "Unrecoverable AR error");
        self.emit(ArEvent::Error(error.clone()));
        self.notices.block(error, self.clock_ms);
        self.set_state(SessionState::Failed);
    }

    /// Retry action of the blocking panel: detect capabilities from scratch
    pub async fn retry(&mut self) -> SessionState {
        if self.state.is_active() {
            self.end_session().await;
        }
        info!("Retrying capability detection");
        self.notices.clear_blocking();
        self.capabilities = None;
        self.set_state(SessionState::Uninitialized);
        self.initialize().await
    }

    /// Place the configured model where the reticle is
    ///
    /// Returns `Ok(None)` outside a native session or when no surface is
    /// under the reticle.
    pub async fn place_at_reticle(&mut self) -> Result<Option<ObjectId>, ArError> {
        let Some(ActiveSession::Native(native)) = &self.active else {
            debug!("Placement needs a native session");
            return Ok(None);
        };
        let Some(hit) = self.surface.last_hit().copied() else {
            debug!("No surface under the reticle");
            return Ok(None);
        };
        let url = match &self.config.session.model_url {
            Some(url) => url.clone(),
            None => {
                let error = ArError::load_failed("No model configured");
                self.raise(error.clone());
                return Err(error);
            }
        };
        let entry = self.catalog.lookup(&url);
        let name = entry.and_then(|m| m.name.clone());
        let scale = self.config.session.model_scale * entry.and_then(|m| m.default_scale).unwrap_or(1.0);

        let target = AnchorTarget {
            session: native.session.as_ref(),
            space: native.local_space,
        };
        let placed = self.placement.place_object(&url, name.as_deref(), hit.matrix, scale, Some(target)).await;

        match placed {
            Ok(id) => {
                if !self.config.session.enable_multiple_objects {
                    let previous: Vec<ObjectId> = self
                        .placement
                        .objects()
                        .into_iter()
                        .map(|o| o.id.clone())
                        .filter(|other| *other != id)
                        .collect();
                    for other in previous {
                        if self.placement.remove_object(&other).is_ok() {
                            self.emit(ArEvent::ObjectRemoved(other));
                        }
                    }
                }
                self.emit(ArEvent::ObjectPlaced(id.clone()));
                Ok(Some(id))
            }
            Err(e) => {
                let error = ArError::from(e);
                self.report_error(error.clone()).await;
                Err(error)
            }
        }
    }

    /// Select the object under a screen point, or clear the selection
    pub fn select_at(&mut self, screen_point: Vec2, camera: &Camera) -> Option<ObjectId> {
        match self.placement.raycast(screen_point, camera) {
            Some(id) => {
                if let Err(e) = self.placement.select_object(&id) {
                    warn!(error = %e, "Selection failed");
                    return None;
                }
                Some(id)
            }
            None => {
                self.placement.deselect_object();
                None
            }
        }
    }

    /// Apply an edit to the selection; false when nothing is selected
    pub fn transform_selected(&mut self, op: TransformOp) -> bool {
        let Some(id) = self.placement.get_selected_object().map(|o| o.id.clone()) else {
            return false;
        };
        let result = match op {
            TransformOp::MoveTo(position) => self.placement.move_object(&id, position),
            TransformOp::RotateTo(euler) => self.placement.rotate_object(&id, euler),
            TransformOp::Scale(factor) => self.placement.scale_object(&id, factor).map(|_| ()),
        };
        result.is_ok()
    }

    pub fn remove_selected(&mut self) -> Option<ObjectId> {
        let id = self.placement.get_selected_object().map(|o| o.id.clone())?;
        self.placement.remove_object(&id).ok()?;
        self.emit(ArEvent::ObjectRemoved(id.clone()));
        Some(id)
    }

    /// Remove every placed object; returns how many were removed
    pub fn clear_objects(&mut self) -> usize {
        let removed = self.placement.remove_all_objects();
        for id in &removed {
            self.emit(ArEvent::ObjectRemoved(id.clone()));
        }
        removed.len()
    }

    pub fn dismiss_notice(&mut self, id: u64) -> bool {
        self.notices.dismiss(id)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn handoff(&self) -> Option<&HandoffLink> {
        match &self.active {
            Some(ActiveSession::Fallback(fallback)) => fallback.handoff.as_ref(),
            _ => None,
        }
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn placement(&self) -> &PlacementEngine {
        &self.placement
    }

    pub fn surface(&self) -> &SurfaceDetector {
        &self.surface
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.performance
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn config(&self) -> &ArConfig {
        &self.config
    }
}

async fn end_quietly(session: &dyn XrSession) {
    if let Err(e) = session.end().await {
        debug!(error = %e, "Ending half-started session failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::error::ArErrorCode;
    use crate::notice::NoticeKind;
    use crate::scene::RecordingRenderer;
    use crate::sim::{presets, SimulatedFrame, SimulatedViewerHost, SimulatedXr, StaticFetcher};

    const MODEL: &str = "https://cdn.example.com/ottoman.gltf";

    fn config() -> ArConfig {
        let mut config = ArConfig::default();
        config.session.model_url = Some(MODEL.to_string());
        config.session.handoff_url = Some("https://shop.example.com/ar".to_string());
        config.loader.retry_base_delay_ms = 1;
        config
    }

    fn loader() -> AssetLoader {
        let fetcher = StaticFetcher::new().with_model(MODEL, crate::sim::SAMPLE_GLTF.as_bytes().to_vec());
        AssetLoader::with_gltf(Arc::new(fetcher), LoaderConfig::default())
    }

    fn manager(env: Environment) -> ArSessionManager<RecordingRenderer> {
        ArSessionManager::new(config(), env, loader(), RecordingRenderer::default())
    }

    fn drain(rx: &mut broadcast::Receiver<ArEvent>) -> Vec<ArEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn count(events: &[ArEvent], pred: impl Fn(&ArEvent) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    async fn native_manager(xr: SimulatedXr) -> ArSessionManager<RecordingRenderer> {
        let env = presets::environment(presets::ANDROID_CHROME).with_xr(Arc::new(xr));
        let mut manager = manager(env).with_viewer_host(Arc::new(SimulatedViewerHost::new()));
        assert_eq!(manager.initialize().await, SessionState::Ready(ArMode::Native));
        manager
    }

    #[tokio::test]
    async fn test_ios_safari_viewer_session() {
        let host = Arc::new(SimulatedViewerHost::new());
        let mut manager = manager(presets::environment(presets::IOS_SAFARI)).with_viewer_host(host.clone());
        let mut rx = manager.subscribe();

        assert_eq!(manager.initialize().await, SessionState::Ready(ArMode::Viewer));
        let caps = manager.capabilities().unwrap();
        assert!(!caps.native_session_supported);
        assert!(caps.quick_look_supported);

        manager.start_session().await.unwrap();
        assert_eq!(manager.state(), SessionState::SessionActive(ArMode::Viewer));
        assert_eq!(host.activations(), 1);
        assert_eq!(host.last_config().unwrap().src, MODEL);
        // Viewer renders itself
        assert_eq!(manager.tick(16.0, None), TickOutcome::Skipped);

        manager.end_session().await;
        manager.end_session().await;
        assert_eq!(manager.state(), SessionState::Ready(ArMode::Viewer));
        assert_eq!(host.dismissals(), 1);

        let events = drain(&mut rx);
        assert_eq!(count(&events, |e| matches!(e, ArEvent::Started(ArMode::Viewer))), 1);
        assert_eq!(count(&events, |e| matches!(e, ArEvent::Ended(ArMode::Viewer))), 1);
        assert_eq!(count(&events, |e| matches!(e, ArEvent::Error(_))), 0);
    }

    #[tokio::test]
    async fn test_start_requires_ready() {
        let mut manager = manager(presets::environment(presets::IOS_SAFARI));
        let err = manager.start_session().await.unwrap_err();
        assert_eq!(err.code, ArErrorCode::SessionFailed);
        assert_eq!(manager.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_downgrade_one_step_at_a_time() {
        let xr = SimulatedXr::new().rejecting_sessions();
        let env = presets::environment(presets::ANDROID_CHROME).with_xr(Arc::new(xr));
        let mut manager = manager(env).with_viewer_host(Arc::new(SimulatedViewerHost::failing()));
        let mut rx = manager.subscribe();
        assert_eq!(manager.initialize().await, SessionState::Ready(ArMode::Native));

        let err = manager.start_session().await.unwrap_err();
        assert_eq!(err.code, ArErrorCode::SessionFailed);
        assert_eq!(manager.state(), SessionState::Ready(ArMode::Viewer));

        let err = manager.start_session().await.unwrap_err();
        assert_eq!(err.code, ArErrorCode::SessionFailed);
        assert_eq!(manager.state(), SessionState::Ready(ArMode::Fallback));

        let events = drain(&mut rx);
        let downgrades: Vec<(ArMode, ArMode)> = events
            .iter()
            .filter_map(|e| match e {
                ArEvent::ModeDowngraded { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            downgrades,
            vec![(ArMode::Native, ArMode::Viewer), (ArMode::Viewer, ArMode::Fallback)]
        );
        assert_eq!(manager.notices().toasts().count(), 2);
        assert!(manager.notices().blocking().is_none());

        // Fallback always starts
        manager.start_session().await.unwrap();
        assert_eq!(manager.state(), SessionState::SessionActive(ArMode::Fallback));
    }

    #[tokio::test]
    async fn test_error_at_lowest_tier_blocks_until_retry() {
        let mut manager = manager(presets::environment(presets::DESKTOP_CHROME));
        assert_eq!(manager.initialize().await, SessionState::Ready(ArMode::Fallback));
        manager.start_session().await.unwrap();

        manager.report_error(ArError::session_failed("GPU context lost")).await;
        assert_eq!(manager.state(), SessionState::Failed);
        assert!(manager.active().is_none());
        let panel = manager.notices().blocking().unwrap();
        assert!(panel.retry_available());
        assert_eq!(panel.kind, NoticeKind::Blocking);
        assert_eq!(manager.start_session().await.unwrap_err().code, ArErrorCode::SessionFailed);

        assert_eq!(manager.retry().await, SessionState::Ready(ArMode::Fallback));
        assert!(manager.notices().blocking().is_none());
    }

    #[tokio::test]
    async fn test_load_error_does_not_end_session() {
        let mut manager = native_manager(SimulatedXr::new()).await;
        manager.start_session().await.unwrap();

        manager.report_error(ArError::timeout("Slow network")).await;
        assert_eq!(manager.state(), SessionState::SessionActive(ArMode::Native));
        assert_eq!(manager.notices().toasts().count(), 1);

        // Toast expires after 5s of ticks
        manager.tick(1_000.0, None);
        assert_eq!(manager.notices().toasts().count(), 1);
        manager.tick(5_000.0, None);
        assert_eq!(manager.notices().toasts().count(), 0);
    }

    #[tokio::test]
    async fn test_native_place_and_clear() {
        let xr = SimulatedXr::new();
        let resources = xr.resources();
        let mut manager = native_manager(xr).await;
        let mut rx = manager.subscribe();
        manager.start_session().await.unwrap();

        // Nothing under the reticle yet
        assert_eq!(manager.place_at_reticle().await.unwrap(), None);

        let frame = SimulatedFrame::looking_down(16.0);
        assert_eq!(manager.tick(16.0, Some(&frame)), TickOutcome::Rendered);
        assert!(manager.renderer().last_reticle_visible);

        let first = manager.place_at_reticle().await.unwrap().unwrap();
        assert_eq!(manager.placement().get_object_count(), 1);
        assert_eq!(resources.live_anchors(), 1);

        // Single-object mode replaces the previous placement
        let second = manager.place_at_reticle().await.unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(manager.placement().get_object_count(), 1);
        assert_eq!(resources.live_anchors(), 1);

        manager.tick(32.0, Some(&frame));
        assert_eq!(manager.renderer().last_object_count, 1);

        // A tick without a frame drops the stale reticle
        assert_eq!(manager.tick(48.0, None), TickOutcome::Rendered);
        assert!(!manager.renderer().last_reticle_visible);
        assert_eq!(manager.place_at_reticle().await.unwrap(), None);
        manager.tick(64.0, Some(&frame));
        assert!(manager.renderer().last_reticle_visible);

        let camera = Camera::perspective(Vec3::new(0.0, 1.5, 0.0), Vec3::new(0.0, 0.25, -1.5), 60f32.to_radians(), 1.0);
        assert_eq!(manager.select_at(Vec2::ZERO, &camera), Some(second.clone()));
        assert!(manager.transform_selected(TransformOp::Scale(100.0)));
        assert_eq!(manager.placement().get(&second).unwrap().scale_factor(), 10.0);

        assert_eq!(manager.clear_objects(), 1);
        assert_eq!(manager.placement().get_object_count(), 0);
        assert!(manager.placement().get_selected_object().is_none());
        assert!(!manager.transform_selected(TransformOp::MoveTo(Vec3::ONE)));

        let events = drain(&mut rx);
        assert_eq!(count(&events, |e| matches!(e, ArEvent::ObjectPlaced(_))), 2);
        assert_eq!(count(&events, |e| matches!(e, ArEvent::ObjectRemoved(_))), 2);
    }

    #[tokio::test]
    async fn test_repeated_sessions_release_resources() {
        let xr = SimulatedXr::new();
        let resources = xr.resources();
        let mut manager = native_manager(xr).await;
        let mut rx = manager.subscribe();

        for cycle in 0..3 {
            manager.start_session().await.unwrap();
            let frame = SimulatedFrame::looking_down(cycle as f64 * 1_000.0);
            manager.tick(frame.timestamp_ms, Some(&frame));
            manager.place_at_reticle().await.unwrap().unwrap();
            assert_eq!(resources.live_hit_test_sources(), 1);

            manager.end_session().await;
            assert_eq!(manager.state(), SessionState::Ready(ArMode::Native));
            assert!(resources.is_clean());
            assert!(!manager.surface().is_active());
        }

        let events = drain(&mut rx);
        assert_eq!(count(&events, |e| matches!(e, ArEvent::Started(_))), 3);
        assert_eq!(count(&events, |e| matches!(e, ArEvent::Ended(_))), 3);
    }

    #[tokio::test]
    async fn test_platform_ended_session() {
        let xr = SimulatedXr::new();
        let resources = xr.resources();
        let mut manager = native_manager(xr.clone()).await;
        let mut rx = manager.subscribe();
        manager.start_session().await.unwrap();

        let frame = SimulatedFrame::looking_down(16.0);
        manager.tick(16.0, Some(&frame));
        manager.place_at_reticle().await.unwrap();

        xr.end_active_session();
        assert_eq!(manager.tick(32.0, Some(&frame)), TickOutcome::Stopped);
        assert_eq!(manager.state(), SessionState::Ready(ArMode::Native));
        assert!(resources.is_clean());
        assert_eq!(manager.tick(48.0, Some(&frame)), TickOutcome::Stopped);

        let events = drain(&mut rx);
        assert_eq!(count(&events, |e| matches!(e, ArEvent::Ended(_))), 1);
    }

    #[tokio::test]
    async fn test_quality_change_applies_before_render() {
        let mut manager = native_manager(SimulatedXr::new()).await;
        let mut rx = manager.subscribe();
        manager.start_session().await.unwrap();
        assert_eq!(manager.renderer().settings.unwrap().level, QualityLevel::High);

        // 20 fps frames
        let mut now = 0.0;
        let mut frames = 0;
        while manager.renderer().settings.unwrap().level == QualityLevel::High && frames < 40 {
            now += 50.0;
            let frame = SimulatedFrame::looking_ahead(now);
            manager.tick(now, Some(&frame));
            frames += 1;
        }
        assert_eq!(manager.renderer().settings.unwrap().level, QualityLevel::Medium);
        assert_eq!(manager.renderer().last_render_quality, Some(QualityLevel::Medium));

        let events = drain(&mut rx);
        assert!(events.contains(&ArEvent::QualityChanged(QualityLevel::Medium)));
    }

    #[tokio::test]
    async fn test_scan_guidance_events() {
        let mut manager = native_manager(SimulatedXr::new()).await;
        let mut rx = manager.subscribe();
        manager.start_session().await.unwrap();

        for i in 0..5 {
            let now = 1_000.0 + i as f64 * 1_000.0;
            manager.tick(now, Some(&SimulatedFrame::looking_ahead(now)));
        }
        manager.tick(6_500.0, Some(&SimulatedFrame::looking_down(6_500.0)));

        let hints: Vec<GuidanceHint> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ArEvent::Guidance(hint) => Some(hint),
                _ => None,
            })
            .collect();
        assert_eq!(hints.first(), Some(&GuidanceHint::Scanning));
        assert_eq!(hints.last(), Some(&GuidanceHint::SurfaceDetected));
    }

    #[tokio::test]
    async fn test_desktop_fallback_handoff() {
        let mut manager = manager(presets::environment(presets::DESKTOP_CHROME));
        assert_eq!(manager.initialize().await, SessionState::Ready(ArMode::Fallback));
        manager.start_session().await.unwrap();

        let link = manager.handoff().unwrap();
        assert!(link.url.starts_with("https://shop.example.com/ar?model=https%3A%2F%2Fcdn"));

        let Some(ActiveSession::Fallback(fallback)) = manager.active() else {
            panic!("expected fallback session");
        };
        assert!(fallback.preview.is_some());

        assert_eq!(manager.tick(16.0, None), TickOutcome::Rendered);
        assert_eq!(manager.tick(33.0, None), TickOutcome::Rendered);
        assert_eq!(manager.renderer().frames, 2);
        assert!(!manager.renderer().last_reticle_visible);

        manager.end_session().await;
        assert!(manager.handoff().is_none());
        assert_eq!(manager.tick(50.0, None), TickOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_fallback_survives_missing_model() {
        let mut config = config();
        config.session.model_url = Some("https://cdn.example.com/missing.glb".to_string());
        config.loader.max_retries = 1;
        let fetcher = StaticFetcher::new();
        let loader = AssetLoader::with_gltf(Arc::new(fetcher), config.loader.clone());
        let mut manager = ArSessionManager::new(
            config,
            presets::environment(presets::DESKTOP_CHROME),
            loader,
            RecordingRenderer::default(),
        );
        manager.initialize().await;

        manager.start_session().await.unwrap();
        assert_eq!(manager.state(), SessionState::SessionActive(ArMode::Fallback));
        let toast = manager.notices().toasts().next().unwrap();
        assert_eq!(toast.error.code, ArErrorCode::LoadFailed);
    }

    #[tokio::test]
    async fn test_no_webgl_is_unsupported() {
        let mut env = presets::environment(presets::DESKTOP_CHROME);
        env.webgl_available = false;
        let mut manager = manager(env);
        assert_eq!(manager.initialize().await, SessionState::Unsupported);
        assert!(manager.notices().blocking().is_some());
        assert!(manager.start_session().await.is_err());
        assert_eq!(manager.state(), SessionState::Unsupported);
    }
}
