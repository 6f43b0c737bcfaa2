use std::sync::{Arc, Mutex, MutexGuard};

use glam::{Mat4, Vec3};

use crate::renderer::uniforms::UniformValue;
use crate::renderer::ViewUniforms;

/// Uniform carrying the camera's combined view and projection.
pub const VIEW_PROJECTION: &str = "viewProjection";

#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
    /// Seen from below the y = 0 plane, for the mirror pass.
    pub reflected: bool,
}

impl Camera {
    /// The reflected view looks from the eye mirrored across y = 0 with its
    /// up axis flipped, which keeps the view a rotation. The image comes out
    /// mirrored horizontally compared to a true reflection; the combine pass
    /// undoes that when sampling.
    pub fn view(&self) -> Mat4 {
        if self.reflected {
            let flip = Vec3::new(1.0, -1.0, 1.0);
            Mat4::look_at_rh(self.eye * flip, self.target * flip, -self.up)
        } else {
            Mat4::look_at_rh(self.eye, self.target, self.up)
        }
    }

    pub fn proj(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, self.aspect, self.near, self.far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj() * self.view()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 6.0, 9.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_radians: 60f32.to_radians(),
            near: 0.1,
            far: 100.0,
            aspect: 16.0 / 9.0,
            reflected: false,
        }
    }
}

/// Camera shared between the application, which moves it, and the renderer,
/// which reflects it around the mirror pass and reads its uniforms.
#[derive(Clone, Default)]
pub struct SharedCamera(Arc<Mutex<Camera>>);

impl SharedCamera {
    pub fn new(camera: Camera) -> Self {
        Self(Arc::new(Mutex::new(camera)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Camera> {
        self.0.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn get(&self) -> Camera {
        *self.lock()
    }

    pub fn update(&self, f: impl FnOnce(&mut Camera)) {
        f(&mut self.lock());
    }

    /// Callback flipping the camera for the renderer's mirror pass.
    pub fn reflection_toggle(&self) -> impl FnMut(bool) + Send + 'static {
        let camera = self.clone();
        move |reflected| camera.lock().reflected = reflected
    }
}

impl ViewUniforms for SharedCamera {
    fn view_uniforms(&self) -> Vec<(&'static str, UniformValue)> {
        vec![(VIEW_PROJECTION, UniformValue::Mat4(self.get().view_proj()))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn view_proj_is_invertible() {
        let vp = Camera::default().view_proj();
        let id = vp * vp.inverse();
        assert!(id.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn reflected_view_sees_points_from_below() {
        let camera = Camera {
            reflected: true,
            ..Camera::default()
        };
        // the eye sits at y = -6, so the origin lies above it in view space
        let eye_world = camera.view().inverse() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((eye_world.y + 6.0).abs() < 1e-4);
    }

    #[test]
    fn reflected_view_is_a_rotation() {
        let camera = Camera {
            reflected: true,
            ..Camera::default()
        };
        // a reflection would flip the determinant's sign and with it the winding
        assert!(camera.view().determinant() > 0.0);
    }

    #[test]
    fn toggle_flips_the_shared_camera() {
        let camera = SharedCamera::default();
        let mut toggle = camera.reflection_toggle();
        toggle(true);
        assert!(camera.get().reflected);
        toggle(false);
        assert!(!camera.get().reflected);
    }
}
