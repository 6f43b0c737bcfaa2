//! Graphics API seam.
//!
//! The pipeline talks to the GPU through [`GraphicsBackend`], a GL-flavoured
//! immediate-mode interface: bind a target, toggle state, use a shader, set
//! uniforms by name, draw. Implementations are thread-affine and are only
//! ever driven from the render thread.

pub mod headless;
pub mod gpu;

use bitflags::bitflags;
use glam::Vec4;

use crate::error::Result;
use crate::renderer::uniforms::UniformValue;
use crate::renderer::vertex::QuadVertex;
use crate::renderer::{
    FramebufferHandle, GeometryHandle, RenderbufferHandle, ShaderHandle, TextureHandle,
    VertexBufferHandle,
};

pub use self::headless::HeadlessBackend;
pub use self::gpu::WgpuBackend;

/// Texture units a draw can sample from.
pub const TEXTURE_SLOTS: usize = 4;

/// Color attachments a single framebuffer may carry unless a backend says
/// otherwise.
pub const DEFAULT_MAX_COLOR_ATTACHMENTS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Zero-sized surfaces (minimized windows) are clamped to one pixel.
    pub fn clamped(self) -> Self {
        Self::new(self.width.max(1), self.height.max(1))
    }

    pub fn inverse(self) -> glam::Vec2 {
        let size = self.clamped();
        glam::Vec2::new(1.0 / size.width as f32, 1.0 / size.height as f32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ColorFormat {
    #[default]
    Rgba8Unorm,
    Rgba16Float,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub size: Extent,
    pub format: ColorFormat,
    pub wrap: WrapMode,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FramebufferAttachments {
    pub color: Vec<TextureHandle>,
    pub depth_stencil: Option<RenderbufferHandle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    MissingAttachment,
    SizeMismatch,
    TooManyColorAttachments,
    /// The attachment combination is valid but the driver refuses it.
    Unsupported,
}

/// Completeness rules shared by every backend: at least one attachment, all
/// attachments alive and equally sized, and no more color attachments than
/// the backend supports.
///
/// `None` entries stand for handles the backend no longer knows about.
pub fn check_completeness(
    colors: &[Option<Extent>],
    depth_stencil: Option<Option<Extent>>,
    max_color_attachments: usize,
) -> FramebufferStatus {
    if colors.is_empty() && depth_stencil.is_none() {
        return FramebufferStatus::MissingAttachment;
    }
    if colors.len() > max_color_attachments {
        return FramebufferStatus::TooManyColorAttachments;
    }

    let mut sizes = Vec::with_capacity(colors.len() + 1);
    for size in colors.iter().copied().chain(depth_stencil) {
        match size {
            Some(size) => sizes.push(size),
            None => return FramebufferStatus::MissingAttachment,
        }
    }

    if sizes.windows(2).any(|pair| pair[0] != pair[1]) {
        return FramebufferStatus::SizeMismatch;
    }
    FramebufferStatus::Complete
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ClearMask: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Blend,
    DepthTest,
    StencilTest,
    CullFace,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum StencilCompare {
    #[default]
    Always,
    Equal,
    NotEqual,
    Never,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Replace,
    Zero,
}

/// Stencil function and the op applied when both stencil and depth pass.
/// Failing fragments always keep the stored value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilConfig {
    pub compare: StencilCompare,
    pub reference: u8,
    pub read_mask: u8,
    pub pass_op: StencilOp,
}

impl Default for StencilConfig {
    fn default() -> Self {
        Self {
            compare: StencilCompare::Always,
            reference: 1,
            read_mask: 0xFF,
            pass_op: StencilOp::Keep,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Written once at creation.
    Static,
    /// Rewritten between draws; every write replaces the whole content.
    Dynamic,
}

/// GL-style rendering interface the pipeline is written against.
///
/// State set through this trait (bound target, capabilities, shader, texture
/// slots, uniforms) persists until changed, exactly like a GL context.
/// Uniforms are stored per shader and survive switching shaders.
pub trait GraphicsBackend {
    /// Size of the presentation surface, which is also the viewport of every
    /// off-screen target.
    fn surface_size(&self) -> Extent;
    fn resize_surface(&mut self, size: Extent);

    fn begin_frame(&mut self) -> Result<()>;
    fn end_frame(&mut self) -> Result<()>;

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle;
    fn destroy_texture(&mut self, texture: TextureHandle);
    /// Combined depth (24 bit) and stencil (8 bit) storage.
    fn create_renderbuffer(&mut self, size: Extent) -> RenderbufferHandle;
    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle);

    fn create_framebuffer(
        &mut self,
        label: &'static str,
        attachments: FramebufferAttachments,
    ) -> FramebufferHandle;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);
    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus;
    /// `None` binds the default framebuffer (the window surface).
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);
    fn bound_framebuffer(&self) -> Option<FramebufferHandle>;

    fn create_vertex_buffer(
        &mut self,
        vertices: &[QuadVertex],
        usage: BufferUsage,
    ) -> VertexBufferHandle;
    fn write_vertex_buffer(&mut self, buffer: VertexBufferHandle, vertices: &[QuadVertex]);
    fn destroy_vertex_buffer(&mut self, buffer: VertexBufferHandle);

    fn set_clear_color(&mut self, color: Vec4);
    /// Clears the selected planes of the bound framebuffer.
    fn clear(&mut self, mask: ClearMask);
    fn set_capability(&mut self, capability: Capability, enabled: bool);
    fn is_enabled(&self, capability: Capability) -> bool;
    fn set_stencil(&mut self, stencil: StencilConfig);
    fn set_stencil_write_mask(&mut self, mask: u8);

    /// Passthrough screen shader sampling slot 0.
    fn default_screen_shader(&self) -> ShaderHandle;
    fn shader_exists(&self, shader: ShaderHandle) -> bool;
    fn use_shader(&mut self, shader: ShaderHandle);
    /// Sets a uniform of the shader in use. Names the shader does not declare
    /// are ignored.
    fn set_uniform(&mut self, name: &str, value: UniformValue);
    fn bind_texture(&mut self, slot: usize, texture: Option<TextureHandle>);

    fn bind_geometry(&mut self, geometry: GeometryHandle);
    /// Draws the bound geometry with the current state.
    fn draw_geometry(&mut self);
    fn unbind_geometry(&mut self);
    /// Draws the six vertices of a screen quad buffer with the current state.
    fn draw_quad(&mut self, buffer: VertexBufferHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: Extent = Extent::new(64, 32);

    #[test]
    fn completeness_accepts_matching_attachments() {
        let status = check_completeness(&[Some(SIZE), Some(SIZE)], Some(Some(SIZE)), 4);
        assert_eq!(status, FramebufferStatus::Complete);
    }

    #[test]
    fn completeness_rejects_empty_and_dead_attachments() {
        assert_eq!(
            check_completeness(&[], None, 4),
            FramebufferStatus::MissingAttachment
        );
        assert_eq!(
            check_completeness(&[Some(SIZE)], Some(None), 4),
            FramebufferStatus::MissingAttachment
        );
    }

    #[test]
    fn completeness_rejects_mismatched_sizes() {
        let status = check_completeness(&[Some(SIZE)], Some(Some(Extent::new(64, 64))), 4);
        assert_eq!(status, FramebufferStatus::SizeMismatch);
    }

    #[test]
    fn completeness_honours_attachment_limit() {
        let status = check_completeness(&[Some(SIZE), Some(SIZE)], None, 1);
        assert_eq!(status, FramebufferStatus::TooManyColorAttachments);
    }

    #[test]
    fn zero_extent_is_clamped() {
        assert_eq!(Extent::new(0, 10).clamped(), Extent::new(1, 10));
        assert_eq!(Extent::new(4, 2).inverse(), glam::Vec2::new(0.25, 0.5));
    }
}
