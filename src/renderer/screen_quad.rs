// renderer/screen_quad.rs
use glam::Vec2;

use super::vertex::{QuadVertex, QuadVertices};
use super::VertexBufferHandle;
use crate::backend::{BufferUsage, Capability, Extent, GraphicsBackend};

/// Rectangle in window pixels, origin at the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenRect {
    pub origin: Vec2,
    pub size: Vec2,
}

impl ScreenRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            origin: Vec2::new(x, y),
            size: Vec2::new(width, height),
        }
    }
}

/// Two triangles spanning `[ul, lr]` in normalized device coordinates.
/// Texture coordinates start at the bottom-left corner.
fn quad(ul: Vec2, lr: Vec2) -> QuadVertices {
    let ur = [lr.x, ul.y];
    let ll = [ul.x, lr.y];
    [
        QuadVertex::new(ur, [1.0, 1.0]),
        QuadVertex::new(lr.into(), [1.0, 0.0]),
        QuadVertex::new(ul.into(), [0.0, 1.0]),
        QuadVertex::new(lr.into(), [1.0, 0.0]),
        QuadVertex::new(ll, [0.0, 0.0]),
        QuadVertex::new(ul.into(), [0.0, 1.0]),
    ]
}

pub fn full_screen_vertices() -> QuadVertices {
    quad(Vec2::new(-1.0, 1.0), Vec2::new(1.0, -1.0))
}

/// Maps a pixel rectangle into NDC. Screen Y grows downward, NDC Y upward.
pub fn rect_vertices(rect: ScreenRect, viewport: Extent) -> QuadVertices {
    let viewport = viewport.clamped();
    let viewport = Vec2::new(viewport.width as f32, viewport.height as f32);
    let origin = 2.0 * rect.origin / viewport;
    let extent = 2.0 * rect.size / viewport;
    let ul = Vec2::new(origin.x - 1.0, 1.0 - origin.y);
    let lr = Vec2::new(ul.x + extent.x, ul.y - extent.y);
    quad(ul, lr)
}

/// Draws textured quads with whatever shader is in use: full-viewport from a
/// static buffer, or positioned from a dynamic buffer rewritten on every call.
pub struct ScreenQuad {
    full: VertexBufferHandle,
    positioned: VertexBufferHandle,
}

impl ScreenQuad {
    pub fn new(backend: &mut dyn GraphicsBackend) -> Self {
        let full_screen = full_screen_vertices();
        Self {
            full: backend.create_vertex_buffer(&full_screen, BufferUsage::Static),
            positioned: backend.create_vertex_buffer(&full_screen, BufferUsage::Dynamic),
        }
    }

    pub fn draw(&self, backend: &mut dyn GraphicsBackend) {
        draw_flat(backend, self.full);
    }

    pub fn draw_rect(&self, backend: &mut dyn GraphicsBackend, rect: ScreenRect) {
        let vertices = rect_vertices(rect, backend.surface_size());
        backend.write_vertex_buffer(self.positioned, &vertices);
        draw_flat(backend, self.positioned);
    }

    pub fn release(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_vertex_buffer(self.full);
        backend.destroy_vertex_buffer(self.positioned);
    }
}

// Quads ignore depth and face culling; the caller's settings are restored
// afterwards.
fn draw_flat(backend: &mut dyn GraphicsBackend, buffer: VertexBufferHandle) {
    let depth_test = backend.is_enabled(Capability::DepthTest);
    let cull_face = backend.is_enabled(Capability::CullFace);
    backend.set_capability(Capability::DepthTest, false);
    backend.set_capability(Capability::CullFace, false);
    backend.draw_quad(buffer);
    backend.set_capability(Capability::DepthTest, depth_test);
    backend.set_capability(Capability::CullFace, cull_face);
}
