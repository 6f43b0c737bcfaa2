//! Frame recording for the wgpu backend.
//!
//! GL-style calls arrive one at a time while wgpu wants whole render passes,
//! so draws and clears are recorded per target and replayed when the frame
//! ends. Nothing here touches the device.

use glam::Vec4;

use crate::backend::{ClearMask, StencilConfig, TEXTURE_SLOTS};
use crate::renderer::vertex::QuadVertex;
use crate::renderer::{FramebufferHandle, GeometryHandle, ShaderHandle, TextureHandle, VertexBufferHandle};

/// Bytes reserved per draw in the uniform arena. Matches the minimum
/// dynamic-offset alignment every adapter supports, and caps the size of a
/// shader's uniform block.
pub const UNIFORM_STRIDE: u64 = 256;

/// Fixed-function state baked into a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub blend: bool,
    pub depth_test: bool,
    pub cull: bool,
    pub stencil_test: bool,
    pub stencil: StencilConfig,
    pub stencil_write_mask: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub shader: ShaderHandle,
    pub color_formats: Vec<wgpu::TextureFormat>,
    pub depth_stencil: bool,
    pub state: RasterState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawSource {
    Mesh(GeometryHandle),
    /// A static quad buffer, drawn in place.
    Quad(VertexBufferHandle),
    /// Six vertices copied into the frame's quad arena.
    QuadArena { first: u32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub pipeline: PipelineKey,
    pub uniform_offset: u32,
    pub textures: [Option<TextureHandle>; TEXTURE_SLOTS],
    pub source: DrawSource,
}

/// Load operations of a pass. Set planes are cleared, the rest loaded.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClearOps {
    pub color: Option<Vec4>,
    pub depth: bool,
    pub stencil: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PassRecord {
    /// `None` is the window surface.
    pub target: Option<FramebufferHandle>,
    pub clear: ClearOps,
    pub draws: Vec<DrawRecord>,
}

impl PassRecord {
    fn new(target: Option<FramebufferHandle>) -> Self {
        Self {
            target,
            clear: ClearOps::default(),
            draws: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct FrameRecorder {
    passes: Vec<PassRecord>,
    uniforms: Vec<u8>,
    quads: Vec<QuadVertex>,
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clear on a pass that has not drawn yet becomes its load op; after
    /// draws it starts a new pass.
    pub fn clear(&mut self, target: Option<FramebufferHandle>, mask: ClearMask, color: Vec4) {
        let pass = match self.passes.last_mut() {
            Some(pass) if pass.target == target && pass.draws.is_empty() => pass,
            _ => self.open(target),
        };
        if mask.contains(ClearMask::COLOR) {
            pass.clear.color = Some(color);
        }
        pass.clear.depth |= mask.contains(ClearMask::DEPTH);
        pass.clear.stencil |= mask.contains(ClearMask::STENCIL);
    }

    pub fn draw(&mut self, target: Option<FramebufferHandle>, draw: DrawRecord) {
        match self.passes.last_mut() {
            Some(pass) if pass.target == target => pass.draws.push(draw),
            _ => self.open(target).draws.push(draw),
        }
    }

    /// Copies a shader's uniform block into the arena and returns its
    /// dynamic offset.
    pub fn push_uniforms(&mut self, block: &[u8]) -> u32 {
        let offset = self.uniforms.len();
        let len = block.len().min(UNIFORM_STRIDE as usize);
        self.uniforms.extend_from_slice(&block[..len]);
        self.uniforms.resize(offset + UNIFORM_STRIDE as usize, 0);
        offset as u32
    }

    /// Appends quad vertices and returns the index of the first one.
    pub fn push_quad(&mut self, vertices: &[QuadVertex]) -> u32 {
        let first = self.quads.len() as u32;
        self.quads.extend_from_slice(vertices);
        first
    }

    pub fn passes(&self) -> &[PassRecord] {
        &self.passes
    }

    pub fn uniform_bytes(&self) -> &[u8] {
        &self.uniforms
    }

    pub fn quad_vertices(&self) -> &[QuadVertex] {
        &self.quads
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn reset(&mut self) {
        self.passes.clear();
        self.uniforms.clear();
        self.quads.clear();
    }

    fn open(&mut self, target: Option<FramebufferHandle>) -> &mut PassRecord {
        self.passes.push(PassRecord::new(target));
        let last = self.passes.len() - 1;
        &mut self.passes[last]
    }
}
