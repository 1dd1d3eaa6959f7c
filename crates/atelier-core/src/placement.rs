//! Placed-object registry
//!
//! The [`PlacementEngine`] exclusively owns every placed object and its scene
//! node. Objects are positioned from a hit pose, optionally bound to a
//! platform anchor, and transformed in place. Exactly one object can be
//! selected; selection is shown as an emissive highlight across the
//! object's meshes.

use chrono::{DateTime, Utc};
use glam::{EulerRot, Mat4, Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::catalog::file_stem;
use crate::config::PlacementConfig;
use crate::error::PlacementError;
use crate::loader::AssetLoader;
use crate::platform::{Anchor, LightEstimate, Pose, ReferenceSpace, XrSession};
use crate::scene::{ray_hits_obb, Aabb, Camera, SceneLighting, SceneNode, Transform};

/// Emissive colour applied to the selected object
pub const SELECTION_HIGHLIGHT: Vec3 = Vec3::new(0.15, 0.35, 0.9);

/// Unique id of a placed object: `object_<counter>_<unix millis>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(counter: u64, timestamp_ms: i64) -> Self {
        Self(format!("object_{}_{}", counter, timestamp_ms))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session and space anchors are created in
#[derive(Clone, Copy)]
pub struct AnchorTarget<'a> {
    pub session: &'a dyn XrSession,
    pub space: ReferenceSpace,
}

/// An object placed in the scene
#[derive(Debug)]
pub struct PlacedObject {
    pub id: ObjectId,
    pub model_url: String,
    pub model_name: String,
    /// Last tracked anchor pose; `None` for unanchored objects
    pub anchor_pose: Option<Pose>,
    pub transform: Transform,
    pub created_at: DateTime<Utc>,
    pub is_selected: bool,
    /// Root node; its transform mirrors `transform`
    pub node: SceneNode,
    anchor: Option<Box<dyn Anchor>>,
    /// Scale at placement time
    base_scale: Vec3,
    /// Cumulative user scale relative to `base_scale`
    scale_factor: f32,
    sequence: u64,
}

impl PlacedObject {
    pub fn is_anchored(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    /// Rotation as XYZ Euler angles in radians
    pub fn rotation_euler(&self) -> Vec3 {
        self.transform.euler()
    }

    fn sync_node(&mut self) {
        self.node.transform = self.transform;
    }

    fn release_anchor(&mut self) {
        if let Some(mut anchor) = self.anchor.take() {
            anchor.delete();
            debug!(object = %self.id, anchor = anchor.id(), "Anchor deleted");
        }
    }
}

/// Owner of placed objects, selection and scene lighting
pub struct PlacementEngine {
    loader: AssetLoader,
    config: PlacementConfig,
    objects: HashMap<ObjectId, PlacedObject>,
    selected: Option<ObjectId>,
    lighting: SceneLighting,
    next_sequence: u64,
}

impl PlacementEngine {
    pub fn new(loader: AssetLoader, config: PlacementConfig) -> Self {
        Self {
            loader,
            config,
            objects: HashMap::new(),
            selected: None,
            lighting: SceneLighting::default(),
            next_sequence: 0,
        }
    }

    /// Load `model_url` and place it at `pose` (a hit-test transform)
    ///
    /// `model_name` is the display name; the URL's file stem is used without one.
    pub async fn place_object(
        &mut self,
        model_url: &str,
        model_name: Option<&str>,
        pose: Mat4,
        scale: f32,
        anchor_target: Option<AnchorTarget<'_>>,
    ) -> Result<ObjectId, PlacementError> {
        let model = self.loader.load(model_url).await?;

        let (pose_scale, rotation, translation) = pose.to_scale_rotation_translation();
        let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
        let transform = Transform {
            translation,
            rotation,
            scale: pose_scale * scale,
        };

        // Rest the model's base on the surface, centred on the hit point
        let offset = Vec3::new(model.center.x, model.bounds.min.y, model.center.z);
        let mut content = model.scene;
        if offset.is_finite() {
            content.transform.translation -= offset;
        }

        let anchor = match anchor_target {
            Some(target) if target.session.supports_anchors() => {
                let anchor_pose = Pose::new(translation, rotation);
                match target.session.create_anchor(anchor_pose, target.space).await {
                    Ok(anchor) => Some(anchor),
                    Err(e) => {
                        warn!(url = %model_url, error = %e, "Anchor creation failed, placing unanchored");
                        None
                    }
                }
            }
            _ => None,
        };

        self.next_sequence += 1;
        let id = ObjectId::new(self.next_sequence, Utc::now().timestamp_millis());
        let node = SceneNode::new(id.to_string()).with_transform(transform).with_child(content);

        let object = PlacedObject {
            id: id.clone(),
            model_url: model_url.to_string(),
            model_name: model_name.map_or_else(|| file_stem(model_url), str::to_string),
            anchor_pose: anchor.as_ref().map(|_| Pose::new(translation, rotation)),
            transform,
            created_at: Utc::now(),
            is_selected: false,
            node,
            anchor,
            base_scale: transform.scale,
            scale_factor: 1.0,
            sequence: self.next_sequence,
        };

        info!(
            object = %id,
            url = %model_url,
            anchored = object.is_anchored(),
            x = translation.x,
            y = translation.y,
            z = translation.z,
            "Object placed"
        );
        self.objects.insert(id.clone(), object);
        Ok(id)
    }

    fn object_mut(&mut self, id: &ObjectId) -> Result<&mut PlacedObject, PlacementError> {
        self.objects
            .get_mut(id)
            .ok_or_else(|| PlacementError::UnknownObject(id.clone()))
    }

    /// Move to `position`; a manually moved object no longer follows its anchor
    pub fn move_object(&mut self, id: &ObjectId, position: Vec3) -> Result<(), PlacementError> {
        let object = self.object_mut(id)?;
        object.release_anchor();
        object.anchor_pose = None;
        object.transform.translation = position;
        object.sync_node();
        Ok(())
    }

    /// Set the rotation from XYZ Euler angles (radians)
    pub fn rotate_object(&mut self, id: &ObjectId, euler: Vec3) -> Result<(), PlacementError> {
        let object = self.object_mut(id)?;
        object.transform.rotation = Quat::from_euler(EulerRot::XYZ, euler.x, euler.y, euler.z);
        object.sync_node();
        Ok(())
    }

    /// Multiply the cumulative scale by `factor`, clamped to the configured range
    pub fn scale_object(&mut self, id: &ObjectId, factor: f32) -> Result<f32, PlacementError> {
        let (a, b) = (self.config.min_scale, self.config.max_scale);
        let (min, max) = (a.min(b), a.max(b));
        let object = self.object_mut(id)?;
        if !factor.is_finite() || factor <= 0.0 {
            warn!(object = %id, factor, "Ignoring invalid scale factor");
            return Ok(object.scale_factor);
        }
        object.scale_factor = (object.scale_factor * factor).clamp(min, max);
        object.transform.scale = object.base_scale * object.scale_factor;
        object.sync_node();
        Ok(object.scale_factor)
    }

    /// Select `id`, clearing the highlight of any previous selection
    pub fn select_object(&mut self, id: &ObjectId) -> Result<(), PlacementError> {
        if !self.objects.contains_key(id) {
            return Err(PlacementError::UnknownObject(id.clone()));
        }
        if self.selected.as_ref() == Some(id) {
            return Ok(());
        }
        self.deselect_object();

        let object = self.object_mut(id)?;
        object.is_selected = true;
        object.node.set_highlight(Some(SELECTION_HIGHLIGHT));
        self.selected = Some(id.clone());
        debug!(object = %id, "Object selected");
        Ok(())
    }

    pub fn deselect_object(&mut self) {
        if let Some(previous) = self.selected.take() {
            if let Some(object) = self.objects.get_mut(&previous) {
                object.is_selected = false;
                object.node.set_highlight(None);
            }
        }
    }

    pub fn remove_object(&mut self, id: &ObjectId) -> Result<(), PlacementError> {
        let mut object = self
            .objects
            .remove(id)
            .ok_or_else(|| PlacementError::UnknownObject(id.clone()))?;
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
        object.release_anchor();
        info!(object = %id, "Object removed");
        Ok(())
    }

    /// Remove every object; returns the removed ids
    pub fn remove_all_objects(&mut self) -> Vec<ObjectId> {
        self.selected = None;
        let mut removed: Vec<PlacedObject> = self.objects.drain().map(|(_, o)| o).collect();
        removed.sort_by_key(|o| o.sequence);
        for object in &mut removed {
            object.release_anchor();
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "All objects removed");
        }
        removed.into_iter().map(|o| o.id).collect()
    }

    /// Follow tracked anchor positions; untracked anchors keep the last pose
    ///
    /// Rotation stays under user control.
    pub fn sync_anchors(&mut self) {
        for object in self.objects.values_mut() {
            let Some(pose) = object.anchor.as_ref().and_then(|a| a.pose()) else {
                continue;
            };
            object.anchor_pose = Some(pose);
            object.transform.translation = pose.position;
            object.sync_node();
        }
    }

    /// Drive the directional light from a live estimate
    pub fn update_environmental_lighting(&mut self, estimate: &LightEstimate) {
        let intensity = estimate.primary_light_intensity;
        let peak = intensity.max_element();
        if !peak.is_finite() || peak <= 0.0 {
            return;
        }
        let directional = &mut self.lighting.directional;
        directional.intensity = peak.clamp(0.1, 3.0);
        directional.color = intensity / peak;
        let towards_light = estimate.primary_light_direction.normalize_or_zero();
        if towards_light != Vec3::ZERO {
            directional.direction = -towards_light;
        }
    }

    /// Nearest object under a screen point (normalized device coordinates)
    pub fn raycast(&self, screen_point: Vec2, camera: &Camera) -> Option<ObjectId> {
        let (origin, direction) = camera.ray_from_ndc(screen_point);
        if direction == Vec3::ZERO {
            return None;
        }
        self.objects
            .values()
            .filter_map(|object| {
                let local: Aabb = object.node.local_bounds();
                ray_hits_obb(origin, direction, object.node.transform.matrix(), &local).map(|t| (t, object))
            })
            .min_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(_, object)| object.id.clone())
    }

    pub fn get_object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn get_selected_object(&self) -> Option<&PlacedObject> {
        self.selected.as_ref().and_then(|id| self.objects.get(id))
    }

    pub fn get(&self, id: &ObjectId) -> Option<&PlacedObject> {
        self.objects.get(id)
    }

    /// Objects in placement order
    pub fn objects(&self) -> Vec<&PlacedObject> {
        let mut objects: Vec<&PlacedObject> = self.objects.values().collect();
        objects.sort_by_key(|o| o.sequence);
        objects
    }

    pub fn nodes(&self) -> Vec<&SceneNode> {
        self.objects().into_iter().map(|o| &o.node).collect()
    }

    pub fn lighting(&self) -> SceneLighting {
        self.lighting
    }

    pub fn reset_lighting(&mut self) {
        self.lighting = SceneLighting::default();
    }

    pub fn loader(&self) -> &AssetLoader {
        &self.loader
    }
}
