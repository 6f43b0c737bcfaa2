// renderer/sorted_renderer.rs
use std::sync::Arc;

use glam::{Vec3, Vec4};

use super::framebuffer::{FramebufferManager, FramebufferTarget};
use super::reflection::{Reflection, ReflectionToggle, ViewUniforms};
use super::registry::{Batch, RenderRegistry};
use super::renderable::Renderable;
use super::screen_quad::{ScreenQuad, ScreenRect};
use super::uniforms::{names, UniformValue};
use super::{ShaderHandle, TextureHandle};
use crate::backend::{
    Capability, ClearMask, GraphicsBackend, StencilConfig, StencilOp, TEXTURE_SLOTS,
};
use crate::error::{RenderError, Result};
use crate::settings::PipelineSettings;
use crate::time::{Clock, SystemClock};

/// Extra inputs a post-process pass can sample besides the Result copy.
pub const MAX_POST_PROCESS_INPUTS: usize = 3;

/// Where the current frame stands. Each stage only accepts the operations
/// that may follow it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStage {
    Idle,
    Prepared,
    Rendering,
    Combined,
    PostProcessed,
    Presented,
}

/// Draw calls issued by one [`SortedRenderer::render_models`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub primary: usize,
    pub mirrored: usize,
}

#[derive(Clone, Copy, Debug)]
struct CompositeOptions {
    background_color: Vec3,
    fxaa: bool,
    reflectiveness: f32,
}

impl From<&PipelineSettings> for CompositeOptions {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            background_color: Vec3::from(settings.background_color),
            fxaa: settings.fxaa,
            reflectiveness: settings.reflectiveness,
        }
    }
}

/// Renders registered models batched by shader and texture into a fixed set
/// of off-screen targets, then composites and post-processes them.
///
/// A frame runs `prepare`, model and effect rendering into the targets the
/// caller binds, `post_process_combine`, any number of `post_process` passes,
/// `render_result_to_screen` and `finish_frame`. The registry may be mutated
/// from other threads at any time through [`SortedRenderer::registry`].
pub struct SortedRenderer<B: GraphicsBackend> {
    backend: B,
    registry: Arc<RenderRegistry>,
    framebuffers: FramebufferManager,
    screen_quad: ScreenQuad,
    reflection: Reflection,
    clock: Box<dyn Clock>,
    view: Option<Arc<dyn ViewUniforms>>,
    options: CompositeOptions,
    stage: FrameStage,
    frame_open: bool,
}

impl<B: GraphicsBackend> SortedRenderer<B> {
    /// Creates every render target at the backend's surface size. An
    /// incomplete target is fatal and returned as
    /// [`RenderError::IncompleteFramebuffer`].
    pub fn new(mut backend: B, settings: &PipelineSettings) -> Result<Self> {
        let size = backend.surface_size();
        let framebuffers = FramebufferManager::new(&mut backend, size)?;
        let screen_quad = ScreenQuad::new(&mut backend);

        backend.set_capability(Capability::DepthTest, true);
        backend.set_capability(Capability::CullFace, true);

        Ok(Self {
            backend,
            registry: Arc::new(RenderRegistry::new()),
            framebuffers,
            screen_quad,
            reflection: Reflection::default(),
            clock: Box::new(SystemClock::new()),
            view: None,
            options: CompositeOptions::from(settings),
            stage: FrameStage::Idle,
            frame_open: false,
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Shared handle for mutating the registry from other threads.
    pub fn registry(&self) -> Arc<RenderRegistry> {
        self.registry.clone()
    }

    pub fn framebuffers(&self) -> &FramebufferManager {
        &self.framebuffers
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    pub fn set_view(&mut self, view: Arc<dyn ViewUniforms>) {
        self.view = Some(view);
    }

    pub fn set_background_color(&mut self, color: Vec3) {
        self.options.background_color = color;
    }

    pub fn set_fxaa(&mut self, enabled: bool) {
        self.options.fxaa = enabled;
    }

    pub fn set_reflectiveness(&mut self, reflectiveness: f32) {
        self.options.reflectiveness = reflectiveness.clamp(0.0, 1.0);
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Registers `renderable` under `shader`. Shaders the backend does not
    /// know are rejected and nothing is registered.
    pub fn add_renderable(&self, renderable: Arc<dyn Renderable>, shader: ShaderHandle) -> Result<()> {
        self.check_shader(shader)?;
        self.registry.add(renderable, shader);
        Ok(())
    }

    pub fn add_renderables(
        &self,
        renderables: Vec<Arc<dyn Renderable>>,
        shader: ShaderHandle,
    ) -> Result<()> {
        self.check_shader(shader)?;
        self.registry.add_all(renderables, shader);
        Ok(())
    }

    pub fn remove_renderable(&self, renderable: &dyn Renderable) -> bool {
        self.registry.remove(renderable)
    }

    pub fn remove_renderables<'a>(
        &self,
        renderables: impl IntoIterator<Item = &'a dyn Renderable>,
    ) -> usize {
        self.registry.remove_all(renderables)
    }

    pub fn clear_all(&self) {
        self.registry.clear();
    }

    fn check_shader(&self, shader: ShaderHandle) -> Result<()> {
        if self.backend.shader_exists(shader) {
            Ok(())
        } else {
            log::error!("Rejected renderable for unknown shader {:?}", shader);
            Err(RenderError::UnknownShader(shader))
        }
    }

    // ------------------------------------------------------------------
    // Targets and context state
    // ------------------------------------------------------------------

    pub fn bind_framebuffer(&mut self, target: FramebufferTarget) -> Result<()> {
        if target == FramebufferTarget::Default {
            self.backend.bind_framebuffer(None);
            return Ok(());
        }
        match self.framebuffers.framebuffer(target) {
            Some(framebuffer) => {
                self.backend.bind_framebuffer(Some(framebuffer));
                Ok(())
            }
            None => Err(missing_target(target)),
        }
    }

    /// Color texture of `target`; `None` for Default and an unallocated
    /// Mirror.
    pub fn framebuffer_texture(&self, target: FramebufferTarget) -> Option<TextureHandle> {
        self.framebuffers.texture(target, 0)
    }

    /// Clears color, depth and stencil of the bound target.
    pub fn clear_framebuffer(&mut self) {
        self.backend.clear(ClearMask::all());
    }

    /// Clears every allocated target, leaving Default bound.
    pub fn clear_framebuffers(&mut self) -> Result<()> {
        self.expect_stage("clear_framebuffers", &[FrameStage::Idle, FrameStage::Prepared])?;
        self.open_frame()?;
        self.backend.set_clear_color(self.clear_color());
        for target in FramebufferTarget::ALL {
            if target == FramebufferTarget::Default || self.framebuffers.is_allocated(target) {
                self.bind_framebuffer(target)?;
                self.clear_framebuffer();
            }
        }
        self.backend.bind_framebuffer(None);
        Ok(())
    }

    pub fn use_stencil(&mut self, enabled: bool) {
        self.backend.set_capability(Capability::StencilTest, enabled);
    }

    pub fn write_stencil(&mut self, enabled: bool) {
        self.backend
            .set_stencil_write_mask(if enabled { 0xFF } else { 0x00 });
    }

    /// Recreates the surface and every target at the new size. Only allowed
    /// between frames.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.expect_stage("resize", &[FrameStage::Idle])?;
        if self.frame_open {
            return Err(RenderError::StageOrder {
                operation: "resize",
                stage: self.stage,
            });
        }
        let size = crate::backend::Extent::new(width, height);
        self.backend.resize_surface(size);
        self.framebuffers.resize(&mut self.backend, size)
    }

    // ------------------------------------------------------------------
    // Mirror
    // ------------------------------------------------------------------

    /// Stores the camera toggle, allocates the Mirror target and turns
    /// mirroring on.
    pub fn enable_mirror(&mut self, toggle: impl ReflectionToggle + 'static) -> Result<()> {
        self.framebuffers.allocate_mirror(&mut self.backend)?;
        self.reflection.enable(Box::new(toggle));
        log::info!("Mirror pass enabled");
        Ok(())
    }

    /// Turns the mirror pass on or off for the following frames.
    pub fn use_mirror(&mut self, enabled: bool) -> Result<()> {
        if self.reflection.set_active(enabled) {
            Ok(())
        } else {
            log::error!("Cannot use the mirror before enable_mirror() was called");
            Err(RenderError::MirrorNotEnabled)
        }
    }

    pub fn mirror_active(&self) -> bool {
        self.reflection.is_active()
    }

    // ------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------

    /// Starts a frame: clears the default framebuffer, sets the stencil to
    /// replace on pass and turns depth testing and culling back on.
    pub fn prepare(&mut self) -> Result<()> {
        self.expect_stage("prepare", &[FrameStage::Idle])?;
        self.open_frame()?;

        self.backend.set_clear_color(self.clear_color());
        self.backend.bind_framebuffer(None);
        self.backend.clear(ClearMask::all());
        self.backend.set_stencil(StencilConfig {
            pass_op: StencilOp::Replace,
            ..StencilConfig::default()
        });
        self.backend.set_capability(Capability::StencilTest, true);
        // composite passes leave depth testing off
        self.backend.set_capability(Capability::DepthTest, true);
        self.backend.set_capability(Capability::CullFace, true);

        self.stage = FrameStage::Prepared;
        Ok(())
    }

    /// Draws every registered renderable into the bound target, then, when
    /// the mirror is active, again into the Mirror target with the camera
    /// reflected. Both traversals run under one registry lock.
    pub fn render_models(&mut self) -> Result<DrawStats> {
        self.expect_stage("render_models", &[FrameStage::Prepared, FrameStage::Rendering])?;
        self.stage = FrameStage::Rendering;

        let previous = self.backend.bound_framebuffer();
        let mirror = self.framebuffers.framebuffer(FramebufferTarget::Mirror);
        let time = self.clock.elapsed_seconds();
        let Self {
            backend,
            registry,
            reflection,
            view,
            ..
        } = self;
        let view = view.as_deref();

        let stats = registry.traverse(|groups| {
            let mut stats = DrawStats::default();
            for (shader, batches) in groups.iter() {
                stats.primary += draw_shader_group(backend, view, shader, batches, time, false);
            }

            if let Some(mirror) = mirror.filter(|_| reflection.is_active()) {
                backend.bind_framebuffer(Some(mirror));
                if let Some(_reflected) = reflection.begin() {
                    for (shader, batches) in groups.iter() {
                        stats.mirrored +=
                            draw_shader_group(backend, view, shader, batches, time, true);
                    }
                }
                backend.bind_framebuffer(previous);
            }
            stats
        });

        log::trace!(
            "render_models: {} draws, {} mirrored",
            stats.primary,
            stats.mirrored
        );
        Ok(stats)
    }

    /// One full-viewport draw with `shader` into the bound target, repeated
    /// into the Mirror target when mirroring is active.
    pub fn render_screen_shader(&mut self, shader: ShaderHandle) -> Result<()> {
        self.expect_stage(
            "render_screen_shader",
            &[FrameStage::Prepared, FrameStage::Rendering],
        )?;
        self.check_shader(shader)?;
        self.stage = FrameStage::Rendering;

        let previous = self.backend.bound_framebuffer();
        self.backend.use_shader(shader);
        self.backend
            .set_uniform(names::IS_REFLECTION, UniformValue::bool(false));
        self.screen_quad.draw(&mut self.backend);

        let mirror = self.framebuffers.framebuffer(FramebufferTarget::Mirror);
        if let Some(mirror) = mirror.filter(|_| self.reflection.is_active()) {
            let Self {
                backend,
                reflection,
                screen_quad,
                ..
            } = self;
            if let Some(_reflected) = reflection.begin() {
                backend.bind_framebuffer(Some(mirror));
                backend.set_uniform(names::IS_REFLECTION, UniformValue::bool(true));
                screen_quad.draw(backend);
            }
            backend.bind_framebuffer(previous);
        }
        Ok(())
    }

    /// Draws `texture` over the bound target with the default screen shader.
    pub fn render_texture(&mut self, texture: TextureHandle) {
        self.bind_screen_texture(texture);
        self.screen_quad.draw(&mut self.backend);
    }

    /// Like [`Self::render_texture`], inside a pixel rectangle.
    pub fn render_texture_rect(&mut self, texture: TextureHandle, rect: ScreenRect) {
        self.bind_screen_texture(texture);
        self.screen_quad.draw_rect(&mut self.backend, rect);
    }

    pub fn render_texture_to_screen(&mut self, texture: TextureHandle) {
        self.backend.bind_framebuffer(None);
        self.render_texture(texture);
    }

    pub fn render_texture_to_screen_rect(&mut self, texture: TextureHandle, rect: ScreenRect) {
        self.backend.bind_framebuffer(None);
        self.render_texture_rect(texture, rect);
    }

    /// Draws `source`'s color into `target` with blending off.
    pub fn copy_framebuffer(
        &mut self,
        source: FramebufferTarget,
        target: FramebufferTarget,
    ) -> Result<()> {
        let Some(texture) = self.framebuffer_texture(source) else {
            return Err(match source {
                FramebufferTarget::Default => RenderError::DefaultTargetAsInput { slot: 0 },
                other => missing_target(other),
            });
        };
        if source == target {
            log::warn!("Skipping copy of {:?} onto itself", source);
            return Ok(());
        }
        self.bind_framebuffer(target)?;
        self.backend.set_capability(Capability::Blend, false);
        self.render_texture(texture);
        Ok(())
    }

    /// Composites Scene, Mirror, Effects and glow into Result with
    /// `shader`, or with the default screen shader when `None`.
    pub fn post_process_combine(&mut self, shader: Option<ShaderHandle>) -> Result<()> {
        self.expect_stage(
            "post_process_combine",
            &[FrameStage::Prepared, FrameStage::Rendering],
        )?;
        let shader = shader.unwrap_or_else(|| self.backend.default_screen_shader());
        self.check_shader(shader)?;

        self.begin_composite(shader)?;
        let inputs = [
            self.framebuffer_texture(FramebufferTarget::Scene),
            self.framebuffer_texture(FramebufferTarget::Mirror),
            self.framebuffer_texture(FramebufferTarget::Effects),
            self.framebuffers.glow(),
        ];
        for (slot, texture) in inputs.into_iter().enumerate() {
            self.backend.bind_texture(slot, texture);
        }
        self.screen_quad.draw(&mut self.backend);

        self.stage = FrameStage::Combined;
        Ok(())
    }

    /// Runs one post-process pass over Result.
    ///
    /// Result is first copied to Spare; the pass then draws into Result
    /// sampling that copy at slot 0 and up to three `inputs` at slots 1..=3.
    /// Spare as an input stands for the glow channel and Result for its
    /// pre-pass copy. A Default input is skipped and reported as
    /// [`RenderError::DefaultTargetAsInput`] after the pass has been drawn.
    pub fn post_process(
        &mut self,
        shader: ShaderHandle,
        strength: f32,
        inputs: &[FramebufferTarget],
    ) -> Result<()> {
        self.expect_stage(
            "post_process",
            &[FrameStage::Combined, FrameStage::PostProcessed],
        )?;
        self.check_shader(shader)?;
        if inputs.len() > MAX_POST_PROCESS_INPUTS {
            log::warn!(
                "post_process takes at most {} inputs, ignoring {}",
                MAX_POST_PROCESS_INPUTS,
                inputs.len() - MAX_POST_PROCESS_INPUTS
            );
        }

        self.copy_framebuffer(FramebufferTarget::Result, FramebufferTarget::Spare)?;

        self.begin_composite(shader)?;
        self.backend
            .set_uniform(names::STRENGTH, UniformValue::Float(strength));

        let spare = self.framebuffer_texture(FramebufferTarget::Spare);
        self.backend.bind_texture(0, spare);

        let mut rejected = None;
        for (i, &input) in inputs.iter().take(MAX_POST_PROCESS_INPUTS).enumerate() {
            let slot = i + 1;
            let texture = match input {
                FramebufferTarget::Default => {
                    log::error!("Cannot post-process with the default framebuffer (slot {slot})");
                    rejected.get_or_insert(slot);
                    None
                }
                FramebufferTarget::Spare => self.framebuffers.glow(),
                FramebufferTarget::Result => spare,
                other => self.framebuffer_texture(other),
            };
            self.backend.bind_texture(slot, texture);
        }
        self.screen_quad.draw(&mut self.backend);

        self.stage = FrameStage::PostProcessed;
        match rejected {
            Some(slot) => Err(RenderError::DefaultTargetAsInput { slot }),
            None => Ok(()),
        }
    }

    /// Draws Result onto the default framebuffer.
    pub fn render_result_to_screen(&mut self) -> Result<()> {
        self.expect_stage(
            "render_result_to_screen",
            &[FrameStage::Combined, FrameStage::PostProcessed],
        )?;
        if let Some(result) = self.framebuffer_texture(FramebufferTarget::Result) {
            self.render_texture_to_screen(result);
        }
        self.stage = FrameStage::Presented;
        Ok(())
    }

    /// Ends the frame and hands it to the backend for presentation.
    pub fn finish_frame(&mut self) -> Result<()> {
        if !self.frame_open {
            return Err(RenderError::StageOrder {
                operation: "finish_frame",
                stage: self.stage,
            });
        }
        if self.stage != FrameStage::Presented {
            log::debug!("Frame finished at stage {:?}", self.stage);
        }
        self.stage = FrameStage::Idle;
        self.frame_open = false;
        self.backend.end_frame()
    }

    /// Releases every GPU resource the pipeline owns and returns the backend.
    pub fn into_backend(mut self) -> B {
        self.framebuffers.release_all(&mut self.backend);
        self.screen_quad.release(&mut self.backend);
        self.backend
    }

    fn expect_stage(&self, operation: &'static str, allowed: &[FrameStage]) -> Result<()> {
        if allowed.contains(&self.stage) {
            return Ok(());
        }
        log::error!("{} called out of order (frame is {:?})", operation, self.stage);
        Err(RenderError::StageOrder {
            operation,
            stage: self.stage,
        })
    }

    fn open_frame(&mut self) -> Result<()> {
        if !self.frame_open {
            self.backend.begin_frame()?;
            self.frame_open = true;
        }
        Ok(())
    }

    fn clear_color(&self) -> Vec4 {
        self.options.background_color.extend(0.0)
    }

    fn bind_screen_texture(&mut self, texture: TextureHandle) {
        let shader = self.backend.default_screen_shader();
        self.backend.use_shader(shader);
        self.backend.bind_texture(0, Some(texture));
    }

    /// Binds Result for a full-viewport pass and sets the uniforms shared by
    /// combine and post-process shaders.
    fn begin_composite(&mut self, shader: ShaderHandle) -> Result<()> {
        self.bind_framebuffer(FramebufferTarget::Result)?;
        self.backend.set_capability(Capability::Blend, true);
        self.backend.set_capability(Capability::DepthTest, false);

        let inverse_size = self.framebuffers.size().inverse();
        self.backend.use_shader(shader);
        self.backend.set_uniform(
            names::INVERSE_TEXTURE_SIZE,
            UniformValue::Vec2(inverse_size),
        );
        self.backend
            .set_uniform(names::FXAA, UniformValue::bool(self.options.fxaa));
        self.backend.set_uniform(
            names::REFLECT,
            UniformValue::bool(self.reflection.is_active()),
        );
        self.backend.set_uniform(
            names::REFLECTIVENESS,
            UniformValue::Float(self.options.reflectiveness),
        );
        Ok(())
    }
}

/// Draws one shader's buckets and returns the number of draw calls.
fn draw_shader_group<B: GraphicsBackend>(
    backend: &mut B,
    view: Option<&dyn ViewUniforms>,
    shader: ShaderHandle,
    batches: &[Batch],
    time: f32,
    reflected: bool,
) -> usize {
    if !backend.shader_exists(shader) {
        log::warn!("Skipping batches of unknown shader {:?}", shader);
        return 0;
    }

    backend.use_shader(shader);
    if let Some(view) = view {
        for (name, value) in view.view_uniforms() {
            backend.set_uniform(name, value);
        }
    }

    let mut draws = 0;
    for batch in batches {
        for renderable in &batch.renderables {
            for slot in 0..TEXTURE_SLOTS {
                backend.bind_texture(slot, renderable.texture(slot));
            }
            renderable.prepare(backend);
            backend.set_uniform(
                names::MODEL_MATRIX,
                UniformValue::Mat4(renderable.model_matrix()),
            );
            backend.set_uniform(names::IS_REFLECTION, UniformValue::bool(reflected));
            backend.set_uniform(names::TIME, UniformValue::Float(time));
            renderable.render(backend);
            draws += 1;
        }
        if let Some(first) = batch.renderables.first() {
            first.cleanup(backend);
        }
    }
    draws
}

/// Mirror is only missing before `enable_mirror`; any other off-screen target
/// is only missing after a fatal allocation failure.
fn missing_target(target: FramebufferTarget) -> RenderError {
    match target {
        FramebufferTarget::Mirror => RenderError::MirrorNotEnabled,
        other => RenderError::TargetUnavailable(other),
    }
}
