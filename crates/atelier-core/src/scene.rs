//! Scene graph driven by the AR core
//!
//! The rendering engine is a collaborator behind the [`Renderer`] trait; the
//! core only needs a small hierarchy of transformed nodes carrying meshes and
//! materials. Geometry is shared behind an `Arc` so that cloning a node for a
//! new consumer copies transforms and materials but never vertex data.

use glam::{EulerRot, Mat4, Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::quality::{QualityLevel, QualitySettings};
use crate::surface::Reticle;

/// Translation / rotation / scale of a node relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Rotation as XYZ Euler angles in radians
    pub fn euler(&self) -> Vec3 {
        let (x, y, z) = self.rotation.to_euler(EulerRot::XYZ);
        Vec3::new(x, y, z)
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut aabb = Self::EMPTY;
        for p in points {
            aabb.extend(*p);
        }
        aabb
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    pub fn center(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            (self.min + self.max) * 0.5
        }
    }

    /// Box enclosing this one after transformation by `matrix`
    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut out = Aabb::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.extend(matrix.transform_point3(corner));
        }
        out
    }
}

/// Surface material; only the parameters the core touches are modelled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub base_color: [f32; 4],
    /// Current emissive colour (may carry a selection highlight)
    pub emissive: Vec3,
    /// Emissive colour authored in the asset, restored on deselection
    pub authored_emissive: Vec3,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: [0.8, 0.8, 0.8, 1.0],
            emissive: Vec3::ZERO,
            authored_emissive: Vec3::ZERO,
        }
    }
}

/// Vertex data of a single primitive
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Geometry {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub local_bounds: Aabb,
}

impl Geometry {
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        let local_bounds = Aabb::from_points(&positions);
        Self {
            positions,
            indices,
            local_bounds,
        }
    }

    /// Axis-aligned box centred on the origin
    pub fn cuboid(size: Vec3) -> Self {
        let h = size * 0.5;
        let positions = vec![
            Vec3::new(-h.x, -h.y, -h.z),
            Vec3::new(h.x, -h.y, -h.z),
            Vec3::new(h.x, h.y, -h.z),
            Vec3::new(-h.x, h.y, -h.z),
            Vec3::new(-h.x, -h.y, h.z),
            Vec3::new(h.x, -h.y, h.z),
            Vec3::new(h.x, h.y, h.z),
            Vec3::new(-h.x, h.y, h.z),
        ];
        let indices = vec![
            0, 2, 1, 0, 3, 2, // back
            4, 5, 6, 4, 6, 7, // front
            0, 1, 5, 0, 5, 4, // bottom
            3, 7, 6, 3, 6, 2, // top
            0, 4, 7, 0, 7, 3, // left
            1, 2, 6, 1, 6, 5, // right
        ];
        Self::new(positions, indices)
    }
}

/// A mesh surface: shared geometry plus a per-instance material
#[derive(Debug, Clone, PartialEq)]
pub struct MeshSurface {
    pub geometry: Arc<Geometry>,
    pub material: Material,
}

/// A node in the scene hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub name: String,
    pub transform: Transform,
    pub visible: bool,
    pub meshes: Vec<MeshSurface>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Transform::IDENTITY,
            visible: true,
            meshes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_mesh(mut self, geometry: Geometry, material: Material) -> Self {
        self.meshes.push(MeshSurface {
            geometry: Arc::new(geometry),
            material,
        });
        self
    }

    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    /// Bounding box of the subtree expressed in this node's parent space
    pub fn bounds(&self) -> Aabb {
        self.bounds_with(Mat4::IDENTITY)
    }

    fn bounds_with(&self, parent: Mat4) -> Aabb {
        let world = parent * self.transform.matrix();
        let mut aabb = Aabb::EMPTY;
        for mesh in &self.meshes {
            aabb = aabb.union(&mesh.geometry.local_bounds.transformed(&world));
        }
        for child in &self.children {
            aabb = aabb.union(&child.bounds_with(world));
        }
        aabb
    }

    /// Bounding box of the subtree ignoring this node's own transform
    pub fn local_bounds(&self) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        for mesh in &self.meshes {
            aabb = aabb.union(&mesh.geometry.local_bounds);
        }
        for child in &self.children {
            aabb = aabb.union(&child.bounds());
        }
        aabb
    }

    /// Visit every material in the subtree
    pub fn for_each_material_mut(&mut self, f: &mut impl FnMut(&mut Material)) {
        for mesh in &mut self.meshes {
            f(&mut mesh.material);
        }
        for child in &mut self.children {
            child.for_each_material_mut(f);
        }
    }

    pub fn materials(&self) -> Vec<&Material> {
        let mut out: Vec<&Material> = self.meshes.iter().map(|m| &m.material).collect();
        for child in &self.children {
            out.extend(child.materials());
        }
        out
    }

    /// Apply (or clear) an emissive highlight on every mesh in the subtree
    pub fn set_highlight(&mut self, highlight: Option<Vec3>) {
        self.for_each_material_mut(&mut |material| {
            material.emissive = highlight.unwrap_or(material.authored_emissive);
        });
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len() + self.children.iter().map(|c| c.mesh_count()).sum::<usize>()
    }
}

/// Ambient light
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
}

/// Directional (sun-like) light
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLight {
    pub color: Vec3,
    pub intensity: f32,
    /// Direction the light travels, normalized
    pub direction: Vec3,
    pub cast_shadows: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneLighting {
    pub ambient: AmbientLight,
    pub directional: DirectionalLight,
}

impl Default for SceneLighting {
    fn default() -> Self {
        Self {
            ambient: AmbientLight {
                color: Vec3::ONE,
                intensity: 0.6,
            },
            directional: DirectionalLight {
                color: Vec3::ONE,
                intensity: 0.8,
                direction: Vec3::new(-0.5, -1.0, -0.5).normalize(),
                cast_shadows: true,
            },
        }
    }
}

/// Perspective camera used for picking and the preview view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Camera-to-world transform
    pub world_from_view: Mat4,
    pub projection: Mat4,
}

impl Camera {
    pub fn new(world_from_view: Mat4, projection: Mat4) -> Self {
        Self {
            world_from_view,
            projection,
        }
    }

    pub fn perspective(position: Vec3, target: Vec3, fov_y: f32, aspect: f32) -> Self {
        let view = Mat4::look_at_rh(position, target, Vec3::Y);
        Self {
            world_from_view: view.inverse(),
            projection: Mat4::perspective_rh(fov_y, aspect, 0.01, 100.0),
        }
    }

    /// World-space ray through a point in normalized device coordinates ([-1, 1] on both axes)
    pub fn ray_from_ndc(&self, ndc: Vec2) -> (Vec3, Vec3) {
        let inv = self.world_from_view * self.projection.inverse();
        let near = inv.project_point3(ndc.extend(-1.0));
        let far = inv.project_point3(ndc.extend(1.0));
        (near, (far - near).normalize_or_zero())
    }
}

/// Everything the renderer needs for one frame
#[derive(Debug)]
pub struct SceneView<'a> {
    pub objects: Vec<&'a SceneNode>,
    pub preview: Option<&'a SceneNode>,
    pub lighting: SceneLighting,
    pub reticle: Option<&'a Reticle>,
    pub timestamp_ms: f64,
}

/// Seam to the rendering engine
pub trait Renderer: Send {
    /// Apply new renderer settings; called before the next `render`
    fn apply_quality(&mut self, settings: &QualitySettings);

    /// Draw one frame
    fn render(&mut self, view: &SceneView<'_>);
}

/// Renderer that records what it was asked to draw
#[derive(Debug, Default, Clone)]
pub struct RecordingRenderer {
    pub frames: u64,
    pub last_object_count: usize,
    pub last_reticle_visible: bool,
    pub last_timestamp_ms: f64,
    pub settings: Option<QualitySettings>,
    pub settings_changes: u32,
    /// Quality level in effect when the last frame was drawn
    pub last_render_quality: Option<QualityLevel>,
}

impl Renderer for RecordingRenderer {
    fn apply_quality(&mut self, settings: &QualitySettings) {
        self.settings = Some(*settings);
        self.settings_changes += 1;
    }

    fn render(&mut self, view: &SceneView<'_>) {
        self.frames += 1;
        self.last_object_count = view.objects.len();
        self.last_reticle_visible = view.reticle.map(|r| r.visible).unwrap_or(false);
        self.last_timestamp_ms = view.timestamp_ms;
        self.last_render_quality = self.settings.map(|s| s.level);
    }
}

/// Slab-method ray/AABB intersection, returns the entry distance along the ray
pub fn ray_aabb_hit_t(origin: Vec3, direction: Vec3, min: Vec3, max: Vec3) -> Option<f32> {
    let inv = Vec3::new(
        if direction.x != 0.0 { 1.0 / direction.x } else { f32::INFINITY },
        if direction.y != 0.0 { 1.0 / direction.y } else { f32::INFINITY },
        if direction.z != 0.0 { 1.0 / direction.z } else { f32::INFINITY },
    );

    let t1 = (min - origin) * inv;
    let t2 = (max - origin) * inv;
    let t_near = t1.min(t2);
    let t_far = t1.max(t2);

    let t_min = t_near.x.max(t_near.y).max(t_near.z);
    let t_max = t_far.x.min(t_far.y).min(t_far.z);

    if t_min > t_max || t_max < 0.0 {
        return None;
    }
    Some(if t_min >= 0.0 { t_min } else { t_max })
}

/// Ray against an oriented box: `local` is the box in its own space, `world_from_local` places it
pub fn ray_hits_obb(origin: Vec3, direction: Vec3, world_from_local: Mat4, local: &Aabb) -> Option<f32> {
    if local.is_empty() {
        return None;
    }
    let inv = world_from_local.inverse();
    let o_local = inv.transform_point3(origin);
    let d_local = inv.transform_vector3(direction);
    let t_local = ray_aabb_hit_t(o_local, d_local, local.min, local.max)?;
    // Distances are compared in world space
    let hit_world = world_from_local.transform_point3(o_local + d_local * t_local);
    Some((hit_world - origin).length())
}
