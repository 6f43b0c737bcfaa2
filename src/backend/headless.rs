//! CPU reference backend.
//!
//! Every call is appended to a log. Screen-quad draws are rasterized on the
//! CPU into RGBA float textures using per-shader fragment closures, which is
//! enough to check compositing results pixel by pixel without a GPU. Mesh
//! draws are only logged.

use std::collections::HashMap;

use glam::{Vec2, Vec3, Vec4};

use super::{
    check_completeness, BufferUsage, Capability, ClearMask, Extent, FramebufferAttachments,
    FramebufferStatus, GraphicsBackend, StencilConfig, TextureDesc, WrapMode,
    DEFAULT_MAX_COLOR_ATTACHMENTS, TEXTURE_SLOTS,
};
use crate::error::Result;
use crate::renderer::uniforms::UniformValue;
use crate::renderer::vertex::QuadVertex;
use crate::renderer::{
    FramebufferHandle, GeometryHandle, RenderbufferHandle, ShaderHandle, TextureHandle,
    VertexBufferHandle,
};

pub type FragmentFn = Box<dyn Fn(&Fragment<'_>) -> Vec4 + Send>;

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    BeginFrame,
    EndFrame,
    BindFramebuffer(Option<FramebufferHandle>),
    Clear {
        target: Option<FramebufferHandle>,
        mask: ClearMask,
    },
    SetCapability(Capability, bool),
    SetStencil(StencilConfig),
    SetStencilWriteMask(u8),
    UseShader(ShaderHandle),
    SetUniform {
        shader: ShaderHandle,
        name: String,
        value: UniformValue,
    },
    BindTexture {
        slot: usize,
        texture: Option<TextureHandle>,
    },
    BindGeometry(GeometryHandle),
    DrawGeometry {
        target: Option<FramebufferHandle>,
        shader: Option<ShaderHandle>,
        geometry: Option<GeometryHandle>,
    },
    UnbindGeometry,
    WriteVertexBuffer(VertexBufferHandle),
    DrawQuad {
        target: Option<FramebufferHandle>,
        shader: Option<ShaderHandle>,
        buffer: VertexBufferHandle,
    },
}

/// RGBA float image, row 0 at the top.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    pub size: Extent,
    pub wrap: WrapMode,
    pub pixels: Vec<Vec4>,
}

impl TextureData {
    fn new(size: Extent, wrap: WrapMode) -> Self {
        let size = size.clamped();
        Self {
            size,
            wrap,
            pixels: vec![Vec4::ZERO; (size.width * size.height) as usize],
        }
    }

    pub fn texel(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[(y * self.size.width + x) as usize]
    }

    /// Nearest sampling with the texture's wrap mode. `uv` has its origin in
    /// the bottom-left corner.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        let u = wrap(uv.x, self.wrap);
        let v = wrap(uv.y, self.wrap);
        let x = texel_index(u, self.size.width);
        let y = texel_index(1.0 - v, self.size.height);
        self.texel(x, y)
    }
}

fn wrap(coord: f32, mode: WrapMode) -> f32 {
    match mode {
        WrapMode::ClampToEdge => coord.clamp(0.0, 1.0),
        WrapMode::Repeat => coord.rem_euclid(1.0),
        WrapMode::MirroredRepeat => {
            let period = coord.rem_euclid(2.0);
            if period > 1.0 {
                2.0 - period
            } else {
                period
            }
        }
    }
}

fn texel_index(coord: f32, extent: u32) -> u32 {
    ((coord * extent as f32).floor().max(0.0) as u32).min(extent - 1)
}

/// Inputs visible to a fragment closure.
pub struct Fragment<'a> {
    pub uv: Vec2,
    textures: [Option<&'a TextureData>; TEXTURE_SLOTS],
    uniforms: Option<&'a HashMap<String, UniformValue>>,
}

impl Fragment<'_> {
    /// Unbound slots read as opaque white.
    pub fn sample(&self, slot: usize) -> Vec4 {
        self.textures
            .get(slot)
            .copied()
            .flatten()
            .map_or(Vec4::ONE, |texture| texture.sample(self.uv))
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.and_then(|uniforms| uniforms.get(name)).copied()
    }

    pub fn float(&self, name: &str) -> f32 {
        self.uniform(name)
            .and_then(|value| value.as_f32())
            .unwrap_or(0.0)
    }
}

struct ShaderEntry {
    label: &'static str,
    fragment: Option<FragmentFn>,
}

struct FramebufferEntry {
    label: &'static str,
    attachments: FramebufferAttachments,
}

struct VertexBufferEntry {
    vertices: Vec<QuadVertex>,
    usage: BufferUsage,
}

#[derive(Default)]
struct ContextState {
    framebuffer: Option<FramebufferHandle>,
    shader: Option<ShaderHandle>,
    textures: [Option<TextureHandle>; TEXTURE_SLOTS],
    geometry: Option<GeometryHandle>,
    capabilities: HashMap<Capability, bool>,
    stencil: StencilConfig,
    stencil_write_mask: u8,
    clear_color: Vec4,
}

fn push<T>(slab: &mut Vec<Option<T>>, value: T) -> u32 {
    slab.push(Some(value));
    (slab.len() - 1) as u32
}

pub struct HeadlessBackend {
    size: Extent,
    max_color_attachments: usize,
    unsupported_framebuffers: Vec<&'static str>,
    screen: TextureData,
    shaders: Vec<ShaderEntry>,
    textures: Vec<Option<TextureData>>,
    renderbuffers: Vec<Option<Extent>>,
    framebuffers: Vec<Option<FramebufferEntry>>,
    vertex_buffers: Vec<Option<VertexBufferEntry>>,
    geometries: Vec<&'static str>,
    uniforms: HashMap<ShaderHandle, HashMap<String, UniformValue>>,
    state: ContextState,
    calls: Vec<Call>,
    default_screen_shader: ShaderHandle,
}

impl HeadlessBackend {
    pub fn new(size: Extent) -> Self {
        let size = size.clamped();
        let mut backend = Self {
            size,
            max_color_attachments: DEFAULT_MAX_COLOR_ATTACHMENTS,
            unsupported_framebuffers: Vec::new(),
            screen: TextureData::new(size, WrapMode::ClampToEdge),
            shaders: Vec::new(),
            textures: Vec::new(),
            renderbuffers: Vec::new(),
            framebuffers: Vec::new(),
            vertex_buffers: Vec::new(),
            geometries: Vec::new(),
            uniforms: HashMap::new(),
            state: ContextState {
                stencil_write_mask: 0xFF,
                ..ContextState::default()
            },
            calls: Vec::new(),
            default_screen_shader: ShaderHandle::new(0),
        };
        backend.default_screen_shader =
            backend.register_shader("screen", Some(Box::new(|frag: &Fragment<'_>| frag.sample(0))));
        backend
    }

    /// Limits how many color attachments a framebuffer may have, to exercise
    /// completeness failures.
    pub fn with_max_color_attachments(mut self, max: usize) -> Self {
        self.max_color_attachments = max;
        self
    }

    /// Makes every later completeness check of a framebuffer labelled
    /// `label` report [`FramebufferStatus::Unsupported`].
    pub fn reject_framebuffer(&mut self, label: &'static str) {
        self.unsupported_framebuffers.push(label);
    }

    /// Registers a shader. Screen shaders pass a fragment closure; model
    /// shaders, whose draws are only logged, pass `None`.
    pub fn register_shader(
        &mut self,
        label: &'static str,
        fragment: Option<FragmentFn>,
    ) -> ShaderHandle {
        self.shaders.push(ShaderEntry { label, fragment });
        ShaderHandle::new((self.shaders.len() - 1) as u32)
    }

    pub fn shader_label(&self, shader: ShaderHandle) -> Option<&'static str> {
        self.shaders.get(shader.index()).map(|entry| entry.label)
    }

    pub fn create_geometry(&mut self, label: &'static str) -> GeometryHandle {
        self.geometries.push(label);
        GeometryHandle::new((self.geometries.len() - 1) as u32)
    }

    pub fn texture_data(&self, texture: TextureHandle) -> Option<&TextureData> {
        self.textures.get(texture.index()).and_then(Option::as_ref)
    }

    /// Overwrites a texture's content. `pixels` must match its size.
    pub fn write_pixels(&mut self, texture: TextureHandle, pixels: &[Vec4]) -> bool {
        match self.textures.get_mut(texture.index()).and_then(Option::as_mut) {
            Some(data) if data.pixels.len() == pixels.len() => {
                data.pixels.copy_from_slice(pixels);
                true
            }
            _ => false,
        }
    }

    /// Content of the default framebuffer.
    pub fn screen(&self) -> &TextureData {
        &self.screen
    }

    pub fn uniform(&self, shader: ShaderHandle, name: &str) -> Option<UniformValue> {
        self.uniforms.get(&shader)?.get(name).copied()
    }

    pub fn stencil(&self) -> StencilConfig {
        self.state.stencil
    }

    pub fn stencil_write_mask(&self) -> u8 {
        self.state.stencil_write_mask
    }

    pub fn bound_textures(&self) -> [Option<TextureHandle>; TEXTURE_SLOTS] {
        self.state.textures
    }

    pub fn live_textures(&self) -> usize {
        self.textures.iter().filter(|t| t.is_some()).count()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.iter().filter(|f| f.is_some()).count()
    }

    pub fn live_renderbuffers(&self) -> usize {
        self.renderbuffers.iter().filter(|r| r.is_some()).count()
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    fn color_attachments(&self, framebuffer: Option<FramebufferHandle>) -> Vec<TextureHandle> {
        framebuffer
            .and_then(|fb| self.framebuffers.get(fb.index()))
            .and_then(Option::as_ref)
            .map(|entry| entry.attachments.color.clone())
            .unwrap_or_default()
    }

    fn target_mut(&mut self, texture: Option<TextureHandle>) -> Option<&mut TextureData> {
        match texture {
            Some(texture) => self.textures.get_mut(texture.index()).and_then(Option::as_mut),
            None => Some(&mut self.screen),
        }
    }

    fn rasterize_quad(&mut self, buffer: VertexBufferHandle) {
        let Some(shader) = self.state.shader else {
            log::warn!("Quad drawn without a shader in use");
            return;
        };
        let Some(fragment_fn) = self
            .shaders
            .get(shader.index())
            .and_then(|entry| entry.fragment.as_ref())
        else {
            return;
        };
        let Some(vertices) = self
            .vertex_buffers
            .get(buffer.index())
            .and_then(Option::as_ref)
            .map(|entry| entry.vertices.as_slice())
        else {
            log::warn!("Quad drawn from unknown buffer {:?}", buffer);
            return;
        };

        // Only attachment 0 receives quad output.
        let target = match self.state.framebuffer {
            Some(fb) => match self.color_attachments(Some(fb)).first() {
                Some(&texture) => Some(texture),
                None => return,
            },
            None => None,
        };
        let target_size = match target {
            Some(texture) => match self.texture_data(texture) {
                Some(data) => data.size,
                None => return,
            },
            None => self.screen.size,
        };

        let textures = self
            .state
            .textures
            .map(|slot| slot.and_then(|t| self.textures.get(t.index()).and_then(Option::as_ref)));
        let uniforms = self.uniforms.get(&shader);

        let mut shaded = Vec::new();
        rasterize(vertices, target_size, |x, y, uv| {
            let fragment = Fragment {
                uv,
                textures,
                uniforms,
            };
            shaded.push(((y * target_size.width + x) as usize, fragment_fn(&fragment)));
        });

        let blend = self.is_enabled(Capability::Blend);
        let Some(data) = self.target_mut(target) else {
            return;
        };
        for (index, src) in shaded {
            let dst = data.pixels[index];
            data.pixels[index] = if blend {
                src * src.w + dst * (1.0 - src.w)
            } else {
                src
            };
        }
    }
}

/// Visits every pixel whose center lies in one of the triangles, handing out
/// the interpolated texture coordinate. A pixel is shaded at most once even
/// when it sits on a shared edge.
fn rasterize(vertices: &[QuadVertex], size: Extent, mut shade: impl FnMut(u32, u32, Vec2)) {
    for y in 0..size.height {
        for x in 0..size.width {
            let p = Vec2::new(
                (x as f32 + 0.5) / size.width as f32 * 2.0 - 1.0,
                1.0 - (y as f32 + 0.5) / size.height as f32 * 2.0,
            );
            for triangle in vertices.chunks_exact(3) {
                if let Some(weights) = barycentric(p, triangle) {
                    let uv = Vec2::from(triangle[0].uv) * weights.x
                        + Vec2::from(triangle[1].uv) * weights.y
                        + Vec2::from(triangle[2].uv) * weights.z;
                    shade(x, y, uv);
                    break;
                }
            }
        }
    }
}

fn barycentric(p: Vec2, triangle: &[QuadVertex]) -> Option<Vec3> {
    const EPSILON: f32 = 1e-6;
    let [a, b, c] = [0, 1, 2].map(|i| Vec2::from(triangle[i].pos));
    let area = edge(a, b, c);
    if area.abs() < EPSILON {
        return None;
    }
    let weights = Vec3::new(edge(b, c, p), edge(c, a, p), edge(a, b, p)) / area;
    (weights.min_element() >= -EPSILON).then_some(weights)
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

impl GraphicsBackend for HeadlessBackend {
    fn surface_size(&self) -> Extent {
        self.size
    }

    fn resize_surface(&mut self, size: Extent) {
        self.size = size.clamped();
        self.screen = TextureData::new(self.size, WrapMode::ClampToEdge);
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.calls.push(Call::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.calls.push(Call::EndFrame);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle {
        TextureHandle::new(push(
            &mut self.textures,
            TextureData::new(desc.size, desc.wrap),
        ))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(slot) = self.textures.get_mut(texture.index()) {
            *slot = None;
        }
    }

    fn create_renderbuffer(&mut self, size: Extent) -> RenderbufferHandle {
        RenderbufferHandle::new(push(&mut self.renderbuffers, size.clamped()))
    }

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        if let Some(slot) = self.renderbuffers.get_mut(renderbuffer.index()) {
            *slot = None;
        }
    }

    fn create_framebuffer(
        &mut self,
        label: &'static str,
        attachments: FramebufferAttachments,
    ) -> FramebufferHandle {
        FramebufferHandle::new(push(
            &mut self.framebuffers,
            FramebufferEntry { label, attachments },
        ))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.state.framebuffer == Some(framebuffer) {
            self.state.framebuffer = None;
        }
        if let Some(slot) = self.framebuffers.get_mut(framebuffer.index()) {
            *slot = None;
        }
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        let Some(entry) = self
            .framebuffers
            .get(framebuffer.index())
            .and_then(Option::as_ref)
        else {
            return FramebufferStatus::MissingAttachment;
        };
        let colors: Vec<_> = entry
            .attachments
            .color
            .iter()
            .map(|&t| self.texture_data(t).map(|data| data.size))
            .collect();
        let depth = entry.attachments.depth_stencil.map(|rb| {
            self.renderbuffers
                .get(rb.index())
                .copied()
                .flatten()
        });
        let mut status = check_completeness(&colors, depth, self.max_color_attachments);
        if status == FramebufferStatus::Complete && self.unsupported_framebuffers.contains(&entry.label) {
            status = FramebufferStatus::Unsupported;
        }
        if status != FramebufferStatus::Complete {
            log::debug!("{} framebuffer check: {:?}", entry.label, status);
        }
        status
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.state.framebuffer = framebuffer;
        self.calls.push(Call::BindFramebuffer(framebuffer));
    }

    fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.state.framebuffer
    }

    fn create_vertex_buffer(
        &mut self,
        vertices: &[QuadVertex],
        usage: BufferUsage,
    ) -> VertexBufferHandle {
        VertexBufferHandle::new(push(
            &mut self.vertex_buffers,
            VertexBufferEntry {
                vertices: vertices.to_vec(),
                usage,
            },
        ))
    }

    fn write_vertex_buffer(&mut self, buffer: VertexBufferHandle, vertices: &[QuadVertex]) {
        match self.vertex_buffers.get_mut(buffer.index()).and_then(Option::as_mut) {
            Some(entry) => {
                if entry.usage == BufferUsage::Static {
                    log::warn!("Rewriting static vertex buffer {:?}", buffer);
                }
                entry.vertices.clear();
                entry.vertices.extend_from_slice(vertices);
            }
            None => log::warn!("Write to unknown vertex buffer {:?}", buffer),
        }
        self.calls.push(Call::WriteVertexBuffer(buffer));
    }

    fn destroy_vertex_buffer(&mut self, buffer: VertexBufferHandle) {
        if let Some(slot) = self.vertex_buffers.get_mut(buffer.index()) {
            *slot = None;
        }
    }

    fn set_clear_color(&mut self, color: Vec4) {
        self.state.clear_color = color;
    }

    fn clear(&mut self, mask: ClearMask) {
        let target = self.state.framebuffer;
        self.calls.push(Call::Clear { target, mask });
        if !mask.contains(ClearMask::COLOR) {
            return;
        }

        let color = self.state.clear_color;
        let attachments: Vec<Option<TextureHandle>> = match target {
            Some(fb) => self.color_attachments(Some(fb)).into_iter().map(Some).collect(),
            None => vec![None],
        };
        for attachment in attachments {
            if let Some(data) = self.target_mut(attachment) {
                data.pixels.fill(color);
            }
        }
    }

    fn set_capability(&mut self, capability: Capability, enabled: bool) {
        self.state.capabilities.insert(capability, enabled);
        self.calls.push(Call::SetCapability(capability, enabled));
    }

    fn is_enabled(&self, capability: Capability) -> bool {
        self.state
            .capabilities
            .get(&capability)
            .copied()
            .unwrap_or(false)
    }

    fn set_stencil(&mut self, stencil: StencilConfig) {
        self.state.stencil = stencil;
        self.calls.push(Call::SetStencil(stencil));
    }

    fn set_stencil_write_mask(&mut self, mask: u8) {
        self.state.stencil_write_mask = mask;
        self.calls.push(Call::SetStencilWriteMask(mask));
    }

    fn default_screen_shader(&self) -> ShaderHandle {
        self.default_screen_shader
    }

    fn shader_exists(&self, shader: ShaderHandle) -> bool {
        shader.index() < self.shaders.len()
    }

    fn use_shader(&mut self, shader: ShaderHandle) {
        self.state.shader = Some(shader);
        self.calls.push(Call::UseShader(shader));
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        let Some(shader) = self.state.shader else {
            log::warn!("Uniform {} set without a shader in use", name);
            return;
        };
        self.uniforms
            .entry(shader)
            .or_default()
            .insert(name.to_owned(), value);
        self.calls.push(Call::SetUniform {
            shader,
            name: name.to_owned(),
            value,
        });
    }

    fn bind_texture(&mut self, slot: usize, texture: Option<TextureHandle>) {
        if let Some(bound) = self.state.textures.get_mut(slot) {
            *bound = texture;
            self.calls.push(Call::BindTexture { slot, texture });
        } else {
            log::warn!("Texture slot {} out of range", slot);
        }
    }

    fn bind_geometry(&mut self, geometry: GeometryHandle) {
        self.state.geometry = Some(geometry);
        self.calls.push(Call::BindGeometry(geometry));
    }

    fn draw_geometry(&mut self) {
        self.calls.push(Call::DrawGeometry {
            target: self.state.framebuffer,
            shader: self.state.shader,
            geometry: self.state.geometry,
        });
    }

    fn unbind_geometry(&mut self) {
        self.state.geometry = None;
        self.calls.push(Call::UnbindGeometry);
    }

    fn draw_quad(&mut self, buffer: VertexBufferHandle) {
        self.calls.push(Call::DrawQuad {
            target: self.state.framebuffer,
            shader: self.state.shader,
            buffer,
        });
        self.rasterize_quad(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ColorFormat;

    fn full_quad() -> [QuadVertex; 6] {
        [
            QuadVertex::new([1.0, 1.0], [1.0, 1.0]),
            QuadVertex::new([1.0, -1.0], [1.0, 0.0]),
            QuadVertex::new([-1.0, 1.0], [0.0, 1.0]),
            QuadVertex::new([1.0, -1.0], [1.0, 0.0]),
            QuadVertex::new([-1.0, -1.0], [0.0, 0.0]),
            QuadVertex::new([-1.0, 1.0], [0.0, 1.0]),
        ]
    }

    fn desc(size: Extent) -> TextureDesc {
        TextureDesc {
            label: "test",
            size,
            format: ColorFormat::Rgba8Unorm,
            wrap: WrapMode::ClampToEdge,
        }
    }

    #[test]
    fn full_quad_shades_every_pixel_once() {
        let mut count = 0;
        rasterize(&full_quad(), Extent::new(8, 8), |_, _, _| count += 1);
        assert_eq!(count, 64);
    }

    #[test]
    fn passthrough_copy_is_pixel_exact() {
        let size = Extent::new(5, 3);
        let mut backend = HeadlessBackend::new(size);
        let source = backend.create_texture(&desc(size));
        let target = backend.create_texture(&desc(size));
        let pixels: Vec<Vec4> = (0..15)
            .map(|i| Vec4::new(i as f32 / 15.0, 0.5, 1.0 - i as f32 / 15.0, 1.0))
            .collect();
        assert!(backend.write_pixels(source, &pixels));

        let fb = backend.create_framebuffer(
            "target",
            FramebufferAttachments {
                color: vec![target],
                depth_stencil: None,
            },
        );
        let quad = backend.create_vertex_buffer(&full_quad(), BufferUsage::Static);
        backend.bind_framebuffer(Some(fb));
        backend.use_shader(backend.default_screen_shader());
        backend.bind_texture(0, Some(source));
        backend.draw_quad(quad);

        assert_eq!(backend.texture_data(target).unwrap().pixels, pixels);
    }

    #[test]
    fn mirrored_repeat_reflects_past_the_edge() {
        assert!((wrap(1.25, WrapMode::MirroredRepeat) - 0.75).abs() < 1e-6);
        assert!((wrap(-0.25, WrapMode::MirroredRepeat) - 0.25).abs() < 1e-6);
        assert!((wrap(1.25, WrapMode::Repeat) - 0.25).abs() < 1e-6);
        assert_eq!(wrap(1.25, WrapMode::ClampToEdge), 1.0);
    }

    #[test]
    fn clear_fills_every_color_attachment() {
        let size = Extent::new(2, 2);
        let mut backend = HeadlessBackend::new(size);
        let a = backend.create_texture(&desc(size));
        let b = backend.create_texture(&desc(size));
        let fb = backend.create_framebuffer(
            "pair",
            FramebufferAttachments {
                color: vec![a, b],
                depth_stencil: None,
            },
        );
        backend.bind_framebuffer(Some(fb));
        backend.set_clear_color(Vec4::new(1.0, 1.0, 0.0, 0.0));
        backend.clear(ClearMask::all());

        for texture in [a, b] {
            assert!(backend
                .texture_data(texture)
                .unwrap()
                .pixels
                .iter()
                .all(|&p| p == Vec4::new(1.0, 1.0, 0.0, 0.0)));
        }
    }

    #[test]
    fn destroyed_attachment_makes_framebuffer_incomplete() {
        let size = Extent::new(4, 4);
        let mut backend = HeadlessBackend::new(size);
        let color = backend.create_texture(&desc(size));
        let depth = backend.create_renderbuffer(size);
        let fb = backend.create_framebuffer(
            "scene",
            FramebufferAttachments {
                color: vec![color],
                depth_stencil: Some(depth),
            },
        );
        assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::Complete);

        backend.destroy_renderbuffer(depth);
        assert_eq!(
            backend.framebuffer_status(fb),
            FramebufferStatus::MissingAttachment
        );
    }
}
