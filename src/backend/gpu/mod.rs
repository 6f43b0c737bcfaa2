//! wgpu implementation of [`GraphicsBackend`].
//!
//! Calls only update context state and record passes (see [`recorder`]).
//! Pipelines and texture bind groups are created on demand when the frame
//! is flushed in [`GraphicsBackend::end_frame`], then cached.
//!
//! Bindings every shader sees:
//! - group 0, binding 0: the shader's uniform block (dynamic offset)
//! - group 1, bindings 0..=3: texture slots, 4..=7: their samplers

pub mod context;
pub mod pipeline_builder;
pub mod recorder;

use std::borrow::Cow;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use glam::Vec4;
use wgpu::util::DeviceExt;
use winit::window::Window;

use self::context::{DepthStencil, GpuContext};
use self::pipeline_builder::PipelineBuilder;
use self::recorder::{DrawRecord, DrawSource, FrameRecorder, PipelineKey, RasterState, UNIFORM_STRIDE};
use super::{
    check_completeness, BufferUsage, Capability, ClearMask, ColorFormat, Extent,
    FramebufferAttachments, FramebufferStatus, GraphicsBackend, StencilCompare, StencilConfig,
    StencilOp, TextureDesc, WrapMode, TEXTURE_SLOTS,
};
use crate::error::{RenderError, Result};
use crate::renderer::uniforms::{UniformLayout, UniformValue};
use crate::renderer::vertex::{QuadVertex, Vertex};
use crate::renderer::{
    FramebufferHandle, GeometryHandle, RenderbufferHandle, ShaderHandle, TextureHandle,
    VertexBufferHandle,
};
use crate::settings::PipelineSettings;

const INITIAL_UNIFORM_SLOTS: u64 = 256;
const INITIAL_QUAD_VERTICES: u64 = 6 * 64;

/// Vertex input a shader expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderInput {
    /// Indexed [`Vertex`] geometry.
    Mesh,
    /// Six [`QuadVertex`] corners of a screen quad.
    ScreenQuad,
}

/// Everything needed to register a WGSL shader with `vs_main` and `fs_main`
/// entry points.
#[derive(Clone, Debug)]
pub struct ShaderDesc {
    pub label: &'static str,
    pub wgsl: Cow<'static, str>,
    pub input: ShaderInput,
    /// Layout of the group 0 uniform struct, addressed by name through
    /// `set_uniform`.
    pub uniforms: UniformLayout,
    /// Color locations the fragment stage writes. Further attachments of the
    /// bound target are left untouched.
    pub color_outputs: u32,
}

impl ShaderDesc {
    pub fn new(label: &'static str, wgsl: impl Into<Cow<'static, str>>, input: ShaderInput) -> Self {
        Self {
            label,
            wgsl: wgsl.into(),
            input,
            uniforms: UniformLayout::default(),
            color_outputs: 1,
        }
    }

    pub fn with_uniforms(mut self, uniforms: UniformLayout) -> Self {
        self.uniforms = uniforms;
        self
    }

    pub fn with_color_outputs(mut self, outputs: u32) -> Self {
        self.color_outputs = outputs;
        self
    }
}

struct GpuShader {
    label: &'static str,
    module: wgpu::ShaderModule,
    input: ShaderInput,
    layout: UniformLayout,
    /// Current uniform values, snapshotted into the arena at every draw.
    staging: Vec<u8>,
    color_outputs: u32,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: Extent,
    format: wgpu::TextureFormat,
    wrap: WrapMode,
}

struct FramebufferEntry {
    label: &'static str,
    attachments: FramebufferAttachments,
}

enum GpuVertexBuffer {
    Static { buffer: wgpu::Buffer, count: u32 },
    /// Kept on the CPU and copied into the quad arena per draw, so every
    /// draw sees the content written right before it.
    Dynamic(Vec<QuadVertex>),
}

struct GpuGeometry {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct SurfaceFrame {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

#[derive(Default)]
struct ContextState {
    framebuffer: Option<FramebufferHandle>,
    shader: Option<ShaderHandle>,
    textures: [Option<TextureHandle>; TEXTURE_SLOTS],
    geometry: Option<GeometryHandle>,
    blend: bool,
    depth_test: bool,
    stencil_test: bool,
    cull: bool,
    stencil: StencilConfig,
    stencil_write_mask: u8,
    clear_color: Vec4,
}

/// GPU buffer that is rewritten every frame and grows to fit.
struct ArenaBuffer {
    label: &'static str,
    buffer: wgpu::Buffer,
    capacity: u64,
    usage: wgpu::BufferUsages,
}

impl ArenaBuffer {
    fn new(device: &wgpu::Device, label: &'static str, usage: wgpu::BufferUsages, capacity: u64) -> Self {
        let usage = usage | wgpu::BufferUsages::COPY_DST;
        Self {
            label,
            buffer: Self::allocate(device, label, usage, capacity),
            capacity,
            usage,
        }
    }

    fn allocate(device: &wgpu::Device, label: &str, usage: wgpu::BufferUsages, size: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Uploads `bytes`, returns true when the buffer had to be replaced.
    fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, bytes: &[u8]) -> bool {
        let required = bytes.len() as u64;
        let mut grew = false;
        if required > self.capacity {
            let new_capacity = required.max(self.capacity * 2);
            log::info!(
                "Growing {}: {} -> {} bytes",
                self.label,
                self.capacity,
                new_capacity
            );
            self.buffer = Self::allocate(device, self.label, self.usage, new_capacity);
            self.capacity = new_capacity;
            grew = true;
        }
        if !bytes.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytes);
        }
        grew
    }
}

struct BindLayouts {
    uniforms: wgpu::BindGroupLayout,
    textures: wgpu::BindGroupLayout,
    pipeline: wgpu::PipelineLayout,
}

impl BindLayouts {
    fn new(device: &wgpu::Device) -> Self {
        let uniforms = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("UniformsLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let slots = TEXTURE_SLOTS as u32;
        let texture_entries = (0..slots).map(|slot| wgpu::BindGroupLayoutEntry {
            binding: slot,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        let sampler_entries = (0..slots).map(|slot| wgpu::BindGroupLayoutEntry {
            binding: slots + slot,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
        let entries: Vec<_> = texture_entries.chain(sampler_entries).collect();
        let textures = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("TexturesLayout"),
            entries: &entries,
        });

        let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ShaderPipelineLayout"),
            bind_group_layouts: &[&uniforms, &textures],
            push_constant_ranges: &[],
        });

        Self {
            uniforms,
            textures,
            pipeline,
        }
    }
}

fn create_sampler(device: &wgpu::Device, wrap: WrapMode) -> wgpu::Sampler {
    let address_mode = match wrap {
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("TargetSampler"),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn wrap_index(wrap: WrapMode) -> usize {
    match wrap {
        WrapMode::ClampToEdge => 0,
        WrapMode::Repeat => 1,
        WrapMode::MirroredRepeat => 2,
    }
}

fn texture_format(format: ColorFormat) -> wgpu::TextureFormat {
    match format {
        ColorFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        ColorFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

/// `glBlendFunc(SRC_ALPHA, ONE_MINUS_SRC_ALPHA)` on color and alpha alike.
const ALPHA_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

fn stencil_state(state: &RasterState) -> wgpu::StencilState {
    if !state.stencil_test {
        return wgpu::StencilState::default();
    }
    let compare = match state.stencil.compare {
        StencilCompare::Always => wgpu::CompareFunction::Always,
        StencilCompare::Equal => wgpu::CompareFunction::Equal,
        StencilCompare::NotEqual => wgpu::CompareFunction::NotEqual,
        StencilCompare::Never => wgpu::CompareFunction::Never,
    };
    let pass_op = match state.stencil.pass_op {
        StencilOp::Keep => wgpu::StencilOperation::Keep,
        StencilOp::Replace => wgpu::StencilOperation::Replace,
        StencilOp::Zero => wgpu::StencilOperation::Zero,
    };
    let face = wgpu::StencilFaceState {
        compare,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op,
    };
    wgpu::StencilState {
        front: face,
        back: face,
        read_mask: state.stencil.read_mask as u32,
        write_mask: state.stencil_write_mask as u32,
    }
}

fn push<T>(slab: &mut Vec<Option<T>>, value: T) -> u32 {
    slab.push(Some(value));
    (slab.len() - 1) as u32
}

fn live<T>(slab: &[Option<T>], index: usize) -> Option<&T> {
    slab.get(index).and_then(Option::as_ref)
}

type TextureKey = [Option<TextureHandle>; TEXTURE_SLOTS];

pub struct WgpuBackend {
    ctx: GpuContext,
    frame: Option<SurfaceFrame>,
    layouts: BindLayouts,
    samplers: [wgpu::Sampler; 3],
    placeholder: GpuTexture,
    shaders: Vec<GpuShader>,
    textures: Vec<Option<GpuTexture>>,
    renderbuffers: Vec<Option<DepthStencil>>,
    framebuffers: Vec<Option<FramebufferEntry>>,
    vertex_buffers: Vec<Option<GpuVertexBuffer>>,
    geometries: Vec<Option<GpuGeometry>>,
    /// `None` marks a pipeline that failed validation.
    pipelines: HashMap<PipelineKey, Option<wgpu::RenderPipeline>>,
    texture_groups: HashMap<TextureKey, wgpu::BindGroup>,
    uniform_arena: ArenaBuffer,
    uniform_group: wgpu::BindGroup,
    quad_arena: ArenaBuffer,
    recorder: FrameRecorder,
    state: ContextState,
    default_screen_shader: ShaderHandle,
}

impl WgpuBackend {
    pub async fn new(window: Arc<Window>, settings: &PipelineSettings) -> Result<Self> {
        let ctx = GpuContext::new(window, settings).await?;
        let device = &ctx.device;

        let layouts = BindLayouts::new(device);
        let samplers = [
            WrapMode::ClampToEdge,
            WrapMode::Repeat,
            WrapMode::MirroredRepeat,
        ]
        .map(|wrap| create_sampler(device, wrap));

        let uniform_arena = ArenaBuffer::new(
            device,
            "UniformArena",
            wgpu::BufferUsages::UNIFORM,
            INITIAL_UNIFORM_SLOTS * UNIFORM_STRIDE,
        );
        let uniform_group = Self::create_uniform_group(device, &layouts, &uniform_arena);
        let quad_arena = ArenaBuffer::new(
            device,
            "QuadArena",
            wgpu::BufferUsages::VERTEX,
            INITIAL_QUAD_VERTICES * std::mem::size_of::<QuadVertex>() as u64,
        );

        let placeholder = Self::allocate_texture(
            device,
            &TextureDesc {
                label: "WhitePlaceholder",
                size: Extent::new(1, 1),
                format: ColorFormat::Rgba8Unorm,
                wrap: WrapMode::ClampToEdge,
            },
        );
        Self::write_texture(&ctx.queue, &placeholder, &[255; 4]);

        let mut backend = Self {
            ctx,
            frame: None,
            layouts,
            samplers,
            placeholder,
            shaders: Vec::new(),
            textures: Vec::new(),
            renderbuffers: Vec::new(),
            framebuffers: Vec::new(),
            vertex_buffers: Vec::new(),
            geometries: Vec::new(),
            pipelines: HashMap::new(),
            texture_groups: HashMap::new(),
            uniform_arena,
            uniform_group,
            quad_arena,
            recorder: FrameRecorder::new(),
            state: ContextState {
                stencil_write_mask: 0xFF,
                ..ContextState::default()
            },
            default_screen_shader: ShaderHandle::new(0),
        };
        backend.default_screen_shader = backend.register_shader(ShaderDesc::new(
            "screen",
            include_str!("../../shader/screen.wgsl"),
            ShaderInput::ScreenQuad,
        ))?;
        Ok(backend)
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.ctx.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.ctx.queue
    }

    /// Compiles a shader. WGSL errors come back as
    /// [`RenderError::ShaderCompilation`] instead of aborting the device.
    pub fn register_shader(&mut self, desc: ShaderDesc) -> Result<ShaderHandle> {
        let size = desc.uniforms.size();
        if size > UNIFORM_STRIDE {
            return Err(RenderError::UniformBlockTooLarge {
                size,
                limit: UNIFORM_STRIDE,
            });
        }

        self.ctx
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.wgsl),
            });
        if let Some(err) = pollster::block_on(self.ctx.device.pop_error_scope()) {
            log::error!("Shader {} rejected: {}", desc.label, err);
            return Err(RenderError::ShaderCompilation {
                label: desc.label,
                message: err.to_string(),
            });
        }

        self.shaders.push(GpuShader {
            label: desc.label,
            module,
            input: desc.input,
            staging: vec![0; size as usize],
            layout: desc.uniforms,
            color_outputs: desc.color_outputs,
        });
        let handle = ShaderHandle::new((self.shaders.len() - 1) as u32);
        log::info!("Registered shader {} as {:?}", desc.label, handle);
        Ok(handle)
    }

    /// Uploads indexed model geometry.
    pub fn upload_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> GeometryHandle {
        let device = &self.ctx.device;
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("MeshVertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("MeshIndices"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        GeometryHandle::new(push(
            &mut self.geometries,
            GpuGeometry {
                vertices: vertex_buffer,
                indices: index_buffer,
                index_count: indices.len() as u32,
            },
        ))
    }

    pub fn release_mesh(&mut self, geometry: GeometryHandle) {
        if let Some(slot) = self.geometries.get_mut(geometry.index()) {
            *slot = None;
        }
    }

    /// Creates a texture filled with tightly packed RGBA8 `pixels`, top row
    /// first.
    pub fn upload_texture(&mut self, desc: &TextureDesc, pixels: &[u8]) -> TextureHandle {
        let texture = Self::allocate_texture(&self.ctx.device, desc);
        let expected = (texture.size.width * texture.size.height * 4) as usize;
        if pixels.len() == expected && desc.format == ColorFormat::Rgba8Unorm {
            Self::write_texture(&self.ctx.queue, &texture, pixels);
        } else {
            log::warn!(
                "Texture {} left empty: got {} bytes, expected {} RGBA8 bytes",
                desc.label,
                pixels.len(),
                expected
            );
        }
        TextureHandle::new(push(&mut self.textures, texture))
    }

    fn allocate_texture(device: &wgpu::Device, desc: &TextureDesc) -> GpuTexture {
        let size = desc.size.clamped();
        let format = texture_format(desc.format);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            texture,
            view,
            size,
            format,
            wrap: desc.wrap,
        }
    }

    fn write_texture(queue: &wgpu::Queue, texture: &GpuTexture, pixels: &[u8]) {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * texture.size.width),
                rows_per_image: Some(texture.size.height),
            },
            wgpu::Extent3d {
                width: texture.size.width,
                height: texture.size.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn create_uniform_group(
        device: &wgpu::Device,
        layouts: &BindLayouts,
        arena: &ArenaBuffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("UniformArenaGroup"),
            layout: &layouts.uniforms,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &arena.buffer,
                    offset: 0,
                    size: NonZeroU64::new(UNIFORM_STRIDE),
                }),
            }],
        })
    }

    fn texture(&self, texture: TextureHandle) -> Option<&GpuTexture> {
        live(&self.textures, texture.index())
    }

    fn color_formats(&self, framebuffer: Option<FramebufferHandle>) -> Option<(Vec<wgpu::TextureFormat>, bool)> {
        let Some(framebuffer) = framebuffer else {
            return Some((vec![self.ctx.config.format], true));
        };
        let entry = live(&self.framebuffers, framebuffer.index())?;
        let formats = entry
            .attachments
            .color
            .iter()
            .map(|&t| self.texture(t).map(|tex| tex.format))
            .collect::<Option<Vec<_>>>()?;
        Some((formats, entry.attachments.depth_stencil.is_some()))
    }

    fn is_attachment_of_bound(&self, texture: TextureHandle) -> bool {
        self.state
            .framebuffer
            .and_then(|fb| live(&self.framebuffers, fb.index()))
            .is_some_and(|entry| entry.attachments.color.contains(&texture))
    }

    /// Texture slots for a draw into the bound target. Dead handles and
    /// textures that are also attachments of the target read the white
    /// placeholder instead.
    fn draw_textures(&self) -> TextureKey {
        let mut slots = self.state.textures;
        for (slot, bound) in slots.iter_mut().enumerate() {
            let Some(texture) = *bound else { continue };
            if self.texture(texture).is_none() {
                log::warn!("Slot {} holds destroyed texture {:?}", slot, texture);
                *bound = None;
            } else if self.is_attachment_of_bound(texture) {
                log::warn!(
                    "Slot {} samples {:?}, which is being rendered to; using placeholder",
                    slot,
                    texture
                );
                *bound = None;
            }
        }
        slots
    }

    fn record_draw(&mut self, source: DrawSource) {
        let Some(shader_handle) = self.state.shader else {
            log::warn!("Draw issued without a shader in use");
            return;
        };
        let target = self.state.framebuffer;
        let Some((color_formats, depth_stencil)) = self.color_formats(target) else {
            log::warn!("Draw into incomplete framebuffer {:?} skipped", target);
            return;
        };
        let textures = self.draw_textures();
        let Some(shader) = self.shaders.get(shader_handle.index()) else {
            return;
        };
        let uniform_offset = self.recorder.push_uniforms(&shader.staging);

        let draw = DrawRecord {
            pipeline: PipelineKey {
                shader: shader_handle,
                color_formats,
                depth_stencil,
                state: RasterState {
                    blend: self.state.blend,
                    depth_test: self.state.depth_test,
                    cull: self.state.cull,
                    stencil_test: self.state.stencil_test,
                    stencil: self.state.stencil,
                    stencil_write_mask: self.state.stencil_write_mask,
                },
            },
            uniform_offset,
            textures,
            source,
        };
        self.recorder.draw(target, draw);
    }

    fn current_shader_input(&self) -> Option<ShaderInput> {
        self.state
            .shader
            .and_then(|shader| self.shaders.get(shader.index()))
            .map(|shader| shader.input)
    }

    fn build_pipeline(&self, key: &PipelineKey) -> Option<wgpu::RenderPipeline> {
        let shader = self.shaders.get(key.shader.index())?;
        let vertex_layout = match shader.input {
            ShaderInput::Mesh => Vertex::layout(),
            ShaderInput::ScreenQuad => QuadVertex::layout(),
        };

        let blend = key.state.blend.then_some(ALPHA_BLEND);
        let mut builder = PipelineBuilder::new(&self.ctx.device, &self.layouts.pipeline, &shader.module)
            .with_label(shader.label)
            .with_vertex_buffer(vertex_layout);
        for (location, &format) in key.color_formats.iter().enumerate() {
            builder = builder.with_color_target(format, blend, (location as u32) < shader.color_outputs);
        }
        if key.depth_stencil {
            let (depth_write, compare) = if key.state.depth_test {
                (true, wgpu::CompareFunction::Less)
            } else {
                (false, wgpu::CompareFunction::Always)
            };
            builder = builder.with_depth_stencil(
                DepthStencil::FORMAT,
                depth_write,
                compare,
                stencil_state(&key.state),
            );
        }
        if !key.state.cull {
            builder = builder.with_no_culling();
        }

        self.ctx
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = builder.build();
        match pollster::block_on(self.ctx.device.pop_error_scope()) {
            Some(err) => {
                log::error!("Pipeline for shader {} rejected: {}", shader.label, err);
                None
            }
            None => Some(pipeline),
        }
    }

    fn build_texture_group(&self, key: &TextureKey) -> wgpu::BindGroup {
        let resolved: Vec<&GpuTexture> = key
            .iter()
            .map(|slot| slot.and_then(|t| self.texture(t)).unwrap_or(&self.placeholder))
            .collect();

        let mut entries = Vec::with_capacity(TEXTURE_SLOTS * 2);
        for (slot, texture) in resolved.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: slot as u32,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
        }
        for (slot, texture) in resolved.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: (TEXTURE_SLOTS + slot) as u32,
                resource: wgpu::BindingResource::Sampler(&self.samplers[wrap_index(texture.wrap)]),
            });
        }

        self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("TextureSlots"),
            layout: &self.layouts.textures,
            entries: &entries,
        })
    }

    /// Creates whatever the recorded draws need and is not cached yet.
    fn prepare_resources(&mut self) {
        let mut missing_pipelines = Vec::new();
        let mut missing_groups = Vec::new();
        for draw in self.recorder.passes().iter().flat_map(|pass| &pass.draws) {
            if !self.pipelines.contains_key(&draw.pipeline) && !missing_pipelines.contains(&draw.pipeline) {
                missing_pipelines.push(draw.pipeline.clone());
            }
            if !self.texture_groups.contains_key(&draw.textures) && !missing_groups.contains(&draw.textures) {
                missing_groups.push(draw.textures);
            }
        }

        for key in missing_pipelines {
            let pipeline = self.build_pipeline(&key);
            self.pipelines.insert(key, pipeline);
        }
        for key in missing_groups {
            let group = self.build_texture_group(&key);
            self.texture_groups.insert(key, group);
        }

        if self
            .uniform_arena
            .upload(&self.ctx.device, &self.ctx.queue, self.recorder.uniform_bytes())
        {
            self.uniform_group = Self::create_uniform_group(&self.ctx.device, &self.layouts, &self.uniform_arena);
        }
        self.quad_arena.upload(
            &self.ctx.device,
            &self.ctx.queue,
            bytemuck::cast_slice(self.recorder.quad_vertices()),
        );
    }

    /// Replays the recorded passes into one command buffer and submits it.
    fn flush(&mut self) {
        if self.recorder.is_empty() {
            return;
        }
        self.prepare_resources();

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("FrameEncoder"),
            });

        for pass in self.recorder.passes() {
            let (colors, depth): (Vec<&wgpu::TextureView>, Option<&wgpu::TextureView>) = match pass.target {
                None => match &self.frame {
                    Some(frame) => (vec![&frame.view], Some(&self.ctx.depth.view)),
                    None => {
                        log::warn!("Pass on the surface recorded outside a frame; skipped");
                        continue;
                    }
                },
                Some(fb) => {
                    let Some(entry) = live(&self.framebuffers, fb.index()) else {
                        log::warn!("Pass on destroyed framebuffer {:?} skipped", fb);
                        continue;
                    };
                    let colors: Option<Vec<_>> = entry
                        .attachments
                        .color
                        .iter()
                        .map(|&t| self.texture(t).map(|tex| &tex.view))
                        .collect();
                    let depth = entry
                        .attachments
                        .depth_stencil
                        .and_then(|rb| live(&self.renderbuffers, rb.index()))
                        .map(|rb| &rb.view);
                    match colors {
                        Some(colors) if depth.is_some() == entry.attachments.depth_stencil.is_some() => {
                            (colors, depth)
                        }
                        _ => {
                            log::warn!("Pass on {} framebuffer with dead attachments skipped", entry.label);
                            continue;
                        }
                    }
                }
            };

            let load = match pass.clear.color {
                Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: c.x as f64,
                    g: c.y as f64,
                    b: c.z as f64,
                    a: c.w as f64,
                }),
                None => wgpu::LoadOp::Load,
            };
            let color_attachments: Vec<_> = colors
                .into_iter()
                .map(|view| {
                    Some(wgpu::RenderPassColorAttachment {
                        view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load,
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .collect();
            let depth_stencil_attachment = depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: if pass.clear.depth {
                        wgpu::LoadOp::Clear(1.0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: if pass.clear.stencil {
                        wgpu::LoadOp::Clear(0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
            });

            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("RecordedPass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for draw in &pass.draws {
                let Some(Some(pipeline)) = self.pipelines.get(&draw.pipeline) else {
                    continue;
                };
                let Some(textures) = self.texture_groups.get(&draw.textures) else {
                    continue;
                };
                rpass.set_pipeline(pipeline);
                rpass.set_bind_group(0, &self.uniform_group, &[draw.uniform_offset]);
                rpass.set_bind_group(1, textures, &[]);
                if draw.pipeline.state.stencil_test {
                    rpass.set_stencil_reference(draw.pipeline.state.stencil.reference as u32);
                }

                match draw.source {
                    DrawSource::Mesh(geometry) => {
                        let Some(geometry) = live(&self.geometries, geometry.index()) else {
                            log::warn!("Draw of released geometry skipped");
                            continue;
                        };
                        rpass.set_vertex_buffer(0, geometry.vertices.slice(..));
                        rpass.set_index_buffer(geometry.indices.slice(..), wgpu::IndexFormat::Uint32);
                        rpass.draw_indexed(0..geometry.index_count, 0, 0..1);
                    }
                    DrawSource::Quad(buffer) => match live(&self.vertex_buffers, buffer.index()) {
                        Some(GpuVertexBuffer::Static { buffer, count }) => {
                            rpass.set_vertex_buffer(0, buffer.slice(..));
                            rpass.draw(0..*count, 0..1);
                        }
                        _ => log::warn!("Draw of released quad buffer skipped"),
                    },
                    DrawSource::QuadArena { first } => {
                        rpass.set_vertex_buffer(0, self.quad_arena.buffer.slice(..));
                        rpass.draw(first..first + 6, 0..1);
                    }
                }
            }
        }

        self.ctx.queue.submit(Some(encoder.finish()));
        self.recorder.reset();
    }
}

impl GraphicsBackend for WgpuBackend {
    fn surface_size(&self) -> Extent {
        self.ctx.size()
    }

    fn resize_surface(&mut self, size: Extent) {
        self.ctx.resize(size);
    }

    fn begin_frame(&mut self) -> Result<()> {
        let texture = self.ctx.acquire()?;
        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.frame = Some(SurfaceFrame { texture, view });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.flush();
        if let Some(frame) = self.frame.take() {
            frame.texture.present();
        }
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle {
        let texture = Self::allocate_texture(&self.ctx.device, desc);
        TextureHandle::new(push(&mut self.textures, texture))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(slot) = self.textures.get_mut(texture.index()) {
            *slot = None;
        }
        self.texture_groups
            .retain(|key, _| !key.contains(&Some(texture)));
    }

    fn create_renderbuffer(&mut self, size: Extent) -> RenderbufferHandle {
        let renderbuffer = DepthStencil::new(&self.ctx.device, size, "Renderbuffer");
        RenderbufferHandle::new(push(&mut self.renderbuffers, renderbuffer))
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
        let Some(entry) = live(&self.framebuffers, framebuffer.index()) else {
            return FramebufferStatus::MissingAttachment;
        };
        let colors: Vec<_> = entry
            .attachments
            .color
            .iter()
            .map(|&t| self.texture(t).map(|tex| tex.size))
            .collect();
        let depth = entry
            .attachments
            .depth_stencil
            .map(|rb| live(&self.renderbuffers, rb.index()).map(|rb| rb.size));
        let max = self.ctx.device.limits().max_color_attachments as usize;
        let status = check_completeness(&colors, depth, max);
        if status != FramebufferStatus::Complete {
            log::debug!("{} framebuffer check: {:?}", entry.label, status);
        }
        status
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.state.framebuffer = framebuffer;
    }

    fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.state.framebuffer
    }

    fn create_vertex_buffer(
        &mut self,
        vertices: &[QuadVertex],
        usage: BufferUsage,
    ) -> VertexBufferHandle {
        let buffer = match usage {
            BufferUsage::Static => GpuVertexBuffer::Static {
                buffer: self
                    .ctx
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("QuadVertices"),
                        contents: bytemuck::cast_slice(vertices),
                        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                    }),
                count: vertices.len() as u32,
            },
            BufferUsage::Dynamic => GpuVertexBuffer::Dynamic(vertices.to_vec()),
        };
        VertexBufferHandle::new(push(&mut self.vertex_buffers, buffer))
    }

    fn write_vertex_buffer(&mut self, buffer: VertexBufferHandle, vertices: &[QuadVertex]) {
        match self.vertex_buffers.get_mut(buffer.index()).and_then(Option::as_mut) {
            Some(GpuVertexBuffer::Dynamic(content)) => {
                content.clear();
                content.extend_from_slice(vertices);
            }
            Some(GpuVertexBuffer::Static { buffer: gpu, count }) => {
                log::warn!("Rewriting static vertex buffer {:?}", buffer);
                if vertices.len() as u32 <= *count {
                    self.ctx
                        .queue
                        .write_buffer(gpu, 0, bytemuck::cast_slice(vertices));
                }
            }
            None => log::warn!("Write to unknown vertex buffer {:?}", buffer),
        }
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
        self.recorder
            .clear(self.state.framebuffer, mask, self.state.clear_color);
    }

    fn set_capability(&mut self, capability: Capability, enabled: bool) {
        let flag = match capability {
            Capability::Blend => &mut self.state.blend,
            Capability::DepthTest => &mut self.state.depth_test,
            Capability::StencilTest => &mut self.state.stencil_test,
            Capability::CullFace => &mut self.state.cull,
        };
        *flag = enabled;
    }

    fn is_enabled(&self, capability: Capability) -> bool {
        match capability {
            Capability::Blend => self.state.blend,
            Capability::DepthTest => self.state.depth_test,
            Capability::StencilTest => self.state.stencil_test,
            Capability::CullFace => self.state.cull,
        }
    }

    fn set_stencil(&mut self, stencil: StencilConfig) {
        self.state.stencil = stencil;
    }

    fn set_stencil_write_mask(&mut self, mask: u8) {
        self.state.stencil_write_mask = mask;
    }

    fn default_screen_shader(&self) -> ShaderHandle {
        self.default_screen_shader
    }

    fn shader_exists(&self, shader: ShaderHandle) -> bool {
        shader.index() < self.shaders.len()
    }

    fn use_shader(&mut self, shader: ShaderHandle) {
        if self.shader_exists(shader) {
            self.state.shader = Some(shader);
        } else {
            log::warn!("use_shader with unknown shader {:?}", shader);
        }
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        let Some(shader) = self
            .state
            .shader
            .and_then(|shader| self.shaders.get_mut(shader.index()))
        else {
            log::warn!("Uniform {} set without a shader in use", name);
            return;
        };
        let Some(field) = shader.layout.field(name) else {
            return;
        };
        if field.kind != value.kind() {
            log::warn!(
                "Uniform {} of shader {} is {:?}, got {:?}",
                name,
                shader.label,
                field.kind,
                value.kind()
            );
            return;
        }
        let offset = field.offset as usize;
        value.write_bytes(&mut shader.staging[offset..]);
    }

    fn bind_texture(&mut self, slot: usize, texture: Option<TextureHandle>) {
        match self.state.textures.get_mut(slot) {
            Some(bound) => *bound = texture,
            None => log::warn!("Texture slot {} out of range", slot),
        }
    }

    fn bind_geometry(&mut self, geometry: GeometryHandle) {
        self.state.geometry = Some(geometry);
    }

    fn draw_geometry(&mut self) {
        let Some(geometry) = self.state.geometry else {
            log::warn!("draw_geometry without bound geometry");
            return;
        };
        if self.current_shader_input() != Some(ShaderInput::Mesh) {
            log::warn!("Mesh drawn with a shader that does not take meshes");
            return;
        }
        self.record_draw(DrawSource::Mesh(geometry));
    }

    fn unbind_geometry(&mut self) {
        self.state.geometry = None;
    }

    fn draw_quad(&mut self, buffer: VertexBufferHandle) {
        if self.current_shader_input() != Some(ShaderInput::ScreenQuad) {
            log::warn!("Screen quad drawn with a mesh shader");
            return;
        }
        let source = match live(&self.vertex_buffers, buffer.index()) {
            Some(GpuVertexBuffer::Static { .. }) => DrawSource::Quad(buffer),
            Some(GpuVertexBuffer::Dynamic(vertices)) => DrawSource::QuadArena {
                first: self.recorder.push_quad(vertices),
            },
            None => {
                log::warn!("Draw of unknown quad buffer {:?}", buffer);
                return;
            }
        };
        self.record_draw(source);
    }
}
