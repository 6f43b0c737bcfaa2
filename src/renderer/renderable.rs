use std::sync::{Arc, RwLock};

use glam::{Mat4, Vec3};

use super::uniforms::{names, UniformValue};
use super::{GeometryHandle, TextureHandle};
use crate::backend::{GraphicsBackend, TEXTURE_SLOTS};

/// One drawable instance as the pipeline sees it.
///
/// Implementors do not own GPU geometry; they refer to it by handle and must
/// keep that geometry alive for as long as they are registered. Two
/// renderables with the same geometry handle are the same renderable as far
/// as batching and removal are concerned.
pub trait Renderable: Send + Sync {
    fn geometry(&self) -> GeometryHandle;

    /// Texture bound to `slot` (0..4). Slot 0 decides the batch.
    fn texture(&self, slot: usize) -> Option<TextureHandle>;

    fn model_matrix(&self) -> Mat4;

    /// Binds vertex state and pushes any per-instance uniforms beyond the
    /// ones the pipeline sets itself.
    fn prepare(&self, backend: &mut dyn GraphicsBackend) {
        backend.bind_geometry(self.geometry());
    }

    fn render(&self, backend: &mut dyn GraphicsBackend) {
        backend.draw_geometry();
    }

    /// Called once per texture bucket after its last draw.
    fn cleanup(&self, backend: &mut dyn GraphicsBackend) {
        backend.unbind_geometry();
    }
}

/// Position, rotation in degrees (applied X, then Y, then Z) and scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position)
            * Mat4::from_rotation_x(self.rotation.x.to_radians())
            * Mat4::from_rotation_y(self.rotation.y.to_radians())
            * Mat4::from_rotation_z(self.rotation.z.to_radians())
            * Mat4::from_scale(self.scale)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ViewState {
    transform: Transform,
    tint: Option<Vec3>,
}

/// A view onto shared geometry with its own transform, texture slots and an
/// optional tint.
///
/// Views are handed to the renderer as `Arc<ModelView>`; the transform sits
/// behind a lock so game logic can move a view while it is registered.
#[derive(Debug)]
pub struct ModelView {
    geometry: GeometryHandle,
    textures: [Option<TextureHandle>; TEXTURE_SLOTS],
    state: RwLock<ViewState>,
}

impl ModelView {
    pub fn new(geometry: GeometryHandle) -> Self {
        Self {
            geometry,
            textures: [None; TEXTURE_SLOTS],
            state: RwLock::new(ViewState::default()),
        }
    }

    pub fn with_texture(mut self, slot: usize, texture: TextureHandle) -> Self {
        if let Some(bound) = self.textures.get_mut(slot) {
            *bound = Some(texture);
        }
        self
    }

    pub fn with_tint(self, tint: Vec3) -> Self {
        self.write_state(|state| state.tint = Some(tint));
        self
    }

    /// New view on the same geometry and textures with a fresh transform and
    /// no tint.
    pub fn share(&self) -> Self {
        Self {
            geometry: self.geometry,
            textures: self.textures,
            state: RwLock::new(ViewState::default()),
        }
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn transform(&self) -> Transform {
        self.read_state().transform
    }

    pub fn set_transform(&self, transform: Transform) {
        self.write_state(|state| state.transform = transform);
    }

    pub fn set_position(&self, position: Vec3) {
        self.write_state(|state| state.transform.position = position);
    }

    pub fn translate(&self, offset: Vec3) {
        self.write_state(|state| state.transform.position += offset);
    }

    pub fn set_rotation(&self, degrees: Vec3) {
        self.write_state(|state| state.transform.rotation = degrees);
    }

    pub fn set_scale(&self, scale: Vec3) {
        self.write_state(|state| state.transform.scale = scale);
    }

    pub fn tint(&self) -> Option<Vec3> {
        self.read_state().tint
    }

    pub fn set_tint(&self, tint: Option<Vec3>) {
        self.write_state(|state| state.tint = tint);
    }

    // A poisoned lock still holds a valid transform; keep using it.
    fn read_state(&self) -> ViewState {
        *self.state.read().unwrap_or_else(|poison| poison.into_inner())
    }

    fn write_state(&self, f: impl FnOnce(&mut ViewState)) {
        let mut state = self.state.write().unwrap_or_else(|poison| poison.into_inner());
        f(&mut state);
    }
}

impl Renderable for ModelView {
    fn geometry(&self) -> GeometryHandle {
        self.geometry
    }

    fn texture(&self, slot: usize) -> Option<TextureHandle> {
        self.textures.get(slot).copied().flatten()
    }

    fn model_matrix(&self) -> Mat4 {
        self.transform().matrix()
    }

    fn prepare(&self, backend: &mut dyn GraphicsBackend) {
        backend.bind_geometry(self.geometry);
        if let Some(tint) = self.tint() {
            backend.set_uniform(names::PLAYER_COLOR, UniformValue::Vec3(tint));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_applies_scale_then_rotation_then_translation() {
        let transform = Transform {
            position: Vec3::new(10.0, 0.0, 0.0),
            rotation: Vec3::new(0.0, 0.0, 90.0),
            scale: Vec3::splat(2.0),
        };
        let p = transform.matrix().transform_point3(Vec3::X);
        assert!((p - Vec3::new(10.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn shared_view_keeps_geometry_but_not_transform() {
        let original = ModelView::new(GeometryHandle::new(7))
            .with_texture(0, TextureHandle::new(3))
            .with_tint(Vec3::X);
        original.set_position(Vec3::new(1.0, 2.0, 3.0));

        let copy = original.share();
        assert_eq!(copy.geometry(), original.geometry());
        assert_eq!(copy.texture(0), Some(TextureHandle::new(3)));
        assert_eq!(copy.transform(), Transform::default());
        assert_eq!(copy.tint(), None);

        copy.translate(Vec3::Y);
        assert_eq!(original.transform().position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn texture_slots_out_of_range_are_empty() {
        let view = ModelView::new(GeometryHandle::new(1)).with_texture(9, TextureHandle::new(1));
        assert_eq!(view.texture(9), None);
        assert_eq!(view.texture(0), None);
    }
}
