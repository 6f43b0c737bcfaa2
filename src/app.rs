// app.rs
use std::sync::Arc;

use glam::Vec3;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::backend::gpu::{ShaderDesc, ShaderInput};
use crate::backend::{ColorFormat, Extent, TextureDesc, WgpuBackend, WrapMode};
use crate::camera::{Camera, SharedCamera, VIEW_PROJECTION};
use crate::error::{RenderError, Result};
use crate::renderer::primitives::cube_mesh;
use crate::renderer::uniforms::{names, UniformKind, UniformLayout};
use crate::renderer::{
    FramebufferTarget, GeometryHandle, ModelView, Renderable, ShaderHandle, SortedRenderer,
    TextureHandle,
};
use crate::settings::PipelineSettings;
use crate::time::Instant;

const BOARD_SIZE: i32 = 8;
const ROBOT_COLORS: [Vec3; 4] = [
    Vec3::new(0.9, 0.2, 0.2),
    Vec3::new(0.2, 0.5, 0.95),
    Vec3::new(0.2, 0.85, 0.3),
    Vec3::new(0.95, 0.8, 0.2),
];

struct DemoShaders {
    tiles: ShaderHandle,
    robots: ShaderHandle,
    combine: ShaderHandle,
    sharpen: ShaderHandle,
}

impl DemoShaders {
    fn register(backend: &mut WgpuBackend) -> Result<Self> {
        let mut model_fields = UniformLayout::model_defaults();
        model_fields.push((VIEW_PROJECTION, UniformKind::Mat4));
        model_fields.push((names::PLAYER_COLOR, UniformKind::Vec3));
        let model_layout = UniformLayout::new(model_fields);
        let screen_layout = UniformLayout::new(UniformLayout::screen_defaults());

        let model = |label| {
            ShaderDesc::new(label, include_str!("shader/model.wgsl"), ShaderInput::Mesh)
                .with_uniforms(model_layout.clone())
                .with_color_outputs(2)
        };

        Ok(Self {
            tiles: backend.register_shader(model("tiles"))?,
            robots: backend.register_shader(model("robots"))?,
            combine: backend.register_shader(
                ShaderDesc::new("combine", include_str!("shader/combine.wgsl"), ShaderInput::ScreenQuad)
                    .with_uniforms(screen_layout.clone()),
            )?,
            sharpen: backend.register_shader(
                ShaderDesc::new("sharpen", include_str!("shader/sharpen.wgsl"), ShaderInput::ScreenQuad)
                    .with_uniforms(screen_layout),
            )?,
        })
    }
}

/// 8x8 RGBA8 texture: a flat color with a darker one-texel border.
fn tile_pixels(color: [u8; 3], alpha: u8) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(8 * 8 * 4);
    for y in 0..8 {
        for x in 0..8 {
            let edge = x == 0 || y == 0 || x == 7 || y == 7;
            let shade = |c: u8| if edge { c / 2 } else { c };
            pixels.extend_from_slice(&[shade(color[0]), shade(color[1]), shade(color[2]), alpha]);
        }
    }
    pixels
}

fn upload_tile(backend: &mut WgpuBackend, label: &'static str, color: [u8; 3], alpha: u8) -> TextureHandle {
    backend.upload_texture(
        &TextureDesc {
            label,
            size: Extent::new(8, 8),
            format: ColorFormat::Rgba8Unorm,
            wrap: WrapMode::Repeat,
        },
        &tile_pixels(color, alpha),
    )
}

struct Demo {
    renderer: SortedRenderer<WgpuBackend>,
    shaders: DemoShaders,
    camera: SharedCamera,
    robots: Vec<Arc<ModelView>>,
    sharpen: f32,
    fxaa: bool,
    started: Instant,
}

impl Demo {
    async fn new(window: Arc<Window>, settings: &PipelineSettings) -> Result<Self> {
        let size = window.inner_size();
        let mut backend = WgpuBackend::new(window, settings).await?;
        let shaders = DemoShaders::register(&mut backend)?;

        let (vertices, indices) = cube_mesh();
        let cube = backend.upload_mesh(&vertices, &indices);
        // floor tiles are partly transparent so the mirror shows through
        let light = upload_tile(&mut backend, "LightTile", [200, 200, 190], 150);
        let dark = upload_tile(&mut backend, "DarkTile", [70, 70, 80], 150);
        let metal = upload_tile(&mut backend, "RobotMetal", [230, 230, 230], 255);

        let mut renderer = SortedRenderer::new(backend, settings)?;

        let camera = SharedCamera::new(Camera {
            aspect: size.width.max(1) as f32 / size.height.max(1) as f32,
            ..Camera::default()
        });
        renderer.set_view(Arc::new(camera.clone()));
        renderer.enable_mirror(camera.reflection_toggle())?;

        renderer.add_renderables(board(cube, light, dark), shaders.tiles)?;
        let robots = robots(cube, metal);
        renderer.add_renderables(
            robots
                .iter()
                .map(|robot| robot.clone() as Arc<dyn Renderable>)
                .collect(),
            shaders.robots,
        )?;
        log::info!(
            "Demo board ready: {} renderables",
            renderer.registry().len()
        );

        Ok(Self {
            renderer,
            shaders,
            camera,
            robots,
            sharpen: settings.sharpen,
            fxaa: settings.fxaa,
            started: Instant::now(),
        })
    }

    fn animate(&self) {
        let t = self.started.elapsed().as_secs_f32();
        for (i, robot) in self.robots.iter().enumerate() {
            let phase = t + i as f32 * std::f32::consts::FRAC_PI_2;
            robot.set_rotation(Vec3::new(0.0, phase.to_degrees() * 0.5, 0.0));
            let position = robot.transform().position;
            robot.set_position(Vec3::new(position.x, 0.5 + 0.15 * phase.sin().abs(), position.z));
        }
        self.camera.update(|camera| {
            let angle = t * 0.1;
            camera.eye = Vec3::new(9.0 * angle.sin(), 6.0, 9.0 * angle.cos());
        });
    }

    fn frame(&mut self) -> Result<()> {
        let renderer = &mut self.renderer;
        renderer.clear_framebuffers()?;
        renderer.prepare()?;
        renderer.bind_framebuffer(FramebufferTarget::Scene)?;
        renderer.render_models()?;
        renderer.post_process_combine(Some(self.shaders.combine))?;
        if self.sharpen > 0.0 {
            renderer.post_process(self.shaders.sharpen, self.sharpen, &[])?;
        }
        renderer.render_result_to_screen()?;
        renderer.finish_frame()
    }

    fn redraw(&mut self) {
        self.animate();
        if let Err(err) = self.frame() {
            match err {
                RenderError::Surface(wgpu::SurfaceError::Timeout) => {
                    log::warn!("Surface timeout, skipping frame")
                }
                err => log::error!("Frame failed: {}", err),
            }
            if let Err(err) = self.renderer.finish_frame() {
                log::debug!("No frame to close after failure: {}", err);
            }
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.camera
            .update(|camera| camera.aspect = width as f32 / height as f32);
        if let Err(err) = self.renderer.resize(width, height) {
            log::error!("Resize to {}x{} failed: {}", width, height, err);
        }
    }

    fn toggle_fxaa(&mut self) {
        self.fxaa = !self.fxaa;
        self.renderer.set_fxaa(self.fxaa);
        log::info!("FXAA {}", if self.fxaa { "on" } else { "off" });
    }

    fn toggle_mirror(&mut self) {
        let enabled = !self.renderer.mirror_active();
        match self.renderer.use_mirror(enabled) {
            Ok(()) => log::info!("Mirror {}", if enabled { "on" } else { "off" }),
            Err(err) => log::error!("{}", err),
        }
    }
}

fn board(cube: GeometryHandle, light: TextureHandle, dark: TextureHandle) -> Vec<Arc<dyn Renderable>> {
    let offset = (BOARD_SIZE - 1) as f32 * 0.5;
    let mut tiles: Vec<Arc<dyn Renderable>> = Vec::new();
    for z in 0..BOARD_SIZE {
        for x in 0..BOARD_SIZE {
            let texture = if (x + z) % 2 == 0 { light } else { dark };
            let tile = ModelView::new(cube).with_texture(0, texture);
            tile.set_position(Vec3::new(x as f32 - offset, -0.05, z as f32 - offset));
            tile.set_scale(Vec3::new(0.98, 0.1, 0.98));
            tiles.push(tile.into_shared());
        }
    }
    tiles
}

fn robots(cube: GeometryHandle, metal: TextureHandle) -> Vec<Arc<ModelView>> {
    let template = ModelView::new(cube).with_texture(0, metal);
    ROBOT_COLORS
        .iter()
        .enumerate()
        .map(|(i, &color)| {
            let robot = template.share().with_tint(color);
            let corner = if i % 2 == 0 { -2.5 } else { 2.5 };
            let side = if i < 2 { -2.5 } else { 2.5 };
            robot.set_position(Vec3::new(corner, 0.5, side));
            robot.set_scale(Vec3::splat(0.7));
            Arc::new(robot)
        })
        .collect()
}

pub struct App {
    settings: PipelineSettings,
    window: Option<Arc<Window>>,
    window_id: Option<WindowId>,
    demo: Option<Demo>,
}

impl App {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            window: None,
            window_id: None,
            demo: None,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("robo-render")
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.settings.resolution.width,
                self.settings.resolution.height,
            ));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {}", err);
                event_loop.exit();
                return;
            }
        };

        match pollster::block_on(Demo::new(window.clone(), &self.settings)) {
            Ok(demo) => self.demo = Some(demo),
            Err(err) => {
                log::error!("Failed to start renderer: {}", err);
                event_loop.exit();
                return;
            }
        }

        self.window_id = Some(window.id());
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if Some(id) != self.window_id {
            return;
        }

        let Some(demo) = self.demo.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                demo.resize(size.width, size.height);
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(w) = &self.window {
                    let size = w.inner_size();
                    demo.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                demo.redraw();
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key,
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => match logical_key {
                Key::Named(NamedKey::Escape) => event_loop.exit(),
                Key::Character(c) if c.as_str() == "m" => demo.toggle_mirror(),
                Key::Character(c) if c.as_str() == "f" => demo.toggle_fxaa(),
                _ => {}
            },
            _ => {}
        }
    }
}
