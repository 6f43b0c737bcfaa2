//! Frame-level behaviour of the sorted renderer on the headless backend:
//! batching order, the mirror pass, frame stage rules and shader checks.

use std::sync::{Arc, Mutex};

use glam::Vec2;
use robo_render::backend::headless::{Call, Fragment};
use robo_render::backend::{
    Capability, ColorFormat, Extent, FramebufferStatus, GraphicsBackend, HeadlessBackend,
    TextureDesc, WrapMode,
};
use robo_render::camera::{SharedCamera, VIEW_PROJECTION};
use robo_render::renderer::uniforms::names;
use robo_render::renderer::{
    DrawStats, FrameStage, FramebufferHandle, FramebufferTarget, GeometryHandle, ModelView, Renderable,
    ShaderHandle, TextureHandle, UniformValue,
};
use robo_render::time::FixedClock;
use robo_render::{PipelineSettings, RenderError, SortedRenderer};

const SIZE: Extent = Extent::new(16, 8);

fn renderer() -> SortedRenderer<HeadlessBackend> {
    SortedRenderer::new(HeadlessBackend::new(SIZE), &PipelineSettings::default()).unwrap()
}

fn texture(backend: &mut HeadlessBackend, label: &'static str) -> TextureHandle {
    backend.create_texture(&TextureDesc {
        label,
        size: Extent::new(2, 2),
        format: ColorFormat::Rgba8Unorm,
        wrap: WrapMode::Repeat,
    })
}

fn view(geometry: GeometryHandle, texture: TextureHandle) -> Arc<dyn Renderable> {
    ModelView::new(geometry).with_texture(0, texture).into_shared()
}

type DrawCall = (Option<FramebufferHandle>, Option<ShaderHandle>, Option<GeometryHandle>);

fn geometry_draws(calls: &[Call]) -> Vec<DrawCall> {
    calls
        .iter()
        .filter_map(|call| match *call {
            Call::DrawGeometry {
                target,
                shader,
                geometry,
            } => Some((target, shader, geometry)),
            _ => None,
        })
        .collect()
}

fn uniform_values(calls: &[Call], uniform: &str) -> Vec<UniformValue> {
    calls
        .iter()
        .filter_map(|call| match call {
            Call::SetUniform { name, value, .. } if name == uniform => Some(*value),
            _ => None,
        })
        .collect()
}

/// Two model shaders and four models:
/// a (S1, T1), b (S2, T1), c (S1, T2), d (S1, T1), registered in that order.
struct Board {
    s1: ShaderHandle,
    s2: ShaderHandle,
    geometries: [GeometryHandle; 4],
}

fn board(renderer: &mut SortedRenderer<HeadlessBackend>) -> Board {
    let backend = renderer.backend_mut();
    let s1 = backend.register_shader("s1", None);
    let s2 = backend.register_shader("s2", None);
    let t1 = texture(backend, "t1");
    let t2 = texture(backend, "t2");
    let geometries = ["a", "b", "c", "d"].map(|label| backend.create_geometry(label));
    let [a, b, c, d] = geometries;

    renderer.add_renderable(view(a, t1), s1).unwrap();
    renderer.add_renderable(view(b, t1), s2).unwrap();
    renderer.add_renderable(view(c, t2), s1).unwrap();
    renderer.add_renderable(view(d, t1), s1).unwrap();
    Board { s1, s2, geometries }
}

#[test]
fn models_are_drawn_grouped_by_shader_then_texture() {
    let mut renderer = renderer();
    let Board { s1, s2, geometries } = board(&mut renderer);
    let [a, b, c, d] = geometries;

    renderer.prepare().unwrap();
    renderer.bind_framebuffer(FramebufferTarget::Scene).unwrap();
    renderer.backend_mut().take_calls();
    let stats = renderer.render_models().unwrap();

    assert_eq!(stats.primary, 4);
    assert_eq!(stats.mirrored, 0);

    let scene = renderer.framebuffers().framebuffer(FramebufferTarget::Scene);
    let draws = geometry_draws(renderer.backend().calls());
    assert_eq!(
        draws,
        vec![
            (scene, Some(s1), Some(a)),
            (scene, Some(s1), Some(d)),
            (scene, Some(s1), Some(c)),
            (scene, Some(s2), Some(b)),
        ]
    );

    // one cleanup per bucket
    let unbinds = renderer
        .backend()
        .calls()
        .iter()
        .filter(|call| **call == Call::UnbindGeometry)
        .count();
    assert_eq!(unbinds, 3);
}

#[test]
fn every_draw_gets_model_matrix_time_and_reflection_flag() {
    let mut renderer = renderer().with_clock(FixedClock::new(2.5));
    board(&mut renderer);

    renderer.prepare().unwrap();
    renderer.backend_mut().take_calls();
    renderer.render_models().unwrap();

    let calls = renderer.backend().calls();
    assert_eq!(uniform_values(calls, names::MODEL_MATRIX).len(), 4);
    assert_eq!(
        uniform_values(calls, names::TIME),
        vec![UniformValue::Float(2.5); 4]
    );
    assert_eq!(
        uniform_values(calls, names::IS_REFLECTION),
        vec![UniformValue::bool(false); 4]
    );
}

#[test]
fn removed_models_are_no_longer_drawn() {
    let mut renderer = renderer();
    let Board { geometries, .. } = board(&mut renderer);
    let [a, _, c, _] = geometries;

    let removed = renderer.remove_renderables([
        &ModelView::new(a) as &dyn Renderable,
        &ModelView::new(c) as &dyn Renderable,
    ]);
    assert_eq!(removed, 2);

    renderer.prepare().unwrap();
    let stats = renderer.render_models().unwrap();
    assert_eq!(stats.primary, 2);

    renderer.clear_all();
    assert!(renderer.registry().is_empty());
    assert_eq!(renderer.render_models().unwrap().primary, 0);
}

#[test]
fn mirror_pass_repeats_every_draw_with_the_camera_reflected() {
    let mut renderer = renderer();
    board(&mut renderer);

    let toggles = Arc::new(Mutex::new(Vec::new()));
    let recorded = toggles.clone();
    renderer
        .enable_mirror(move |reflected: bool| recorded.lock().unwrap().push(reflected))
        .unwrap();
    assert!(renderer.mirror_active());

    renderer.prepare().unwrap();
    renderer.bind_framebuffer(FramebufferTarget::Scene).unwrap();
    renderer.backend_mut().take_calls();
    let stats = renderer.render_models().unwrap();

    assert_eq!(stats.primary, 4);
    assert_eq!(stats.mirrored, stats.primary);
    assert_eq!(*toggles.lock().unwrap(), vec![true, false]);

    let scene = renderer.framebuffers().framebuffer(FramebufferTarget::Scene);
    let mirror = renderer.framebuffers().framebuffer(FramebufferTarget::Mirror);
    let draws = geometry_draws(renderer.backend().calls());
    let (primary, mirrored) = draws.split_at(4);
    assert!(primary.iter().all(|draw| draw.0 == scene));
    assert!(mirrored.iter().all(|draw| draw.0 == mirror));
    // same order in both passes
    let order = |draws: &[DrawCall]| draws.iter().map(|d| (d.1, d.2)).collect::<Vec<_>>();
    assert_eq!(order(primary), order(mirrored));

    let flags = uniform_values(renderer.backend().calls(), names::IS_REFLECTION);
    assert_eq!(flags[..4], [UniformValue::bool(false); 4]);
    assert_eq!(flags[4..], [UniformValue::bool(true); 4]);

    assert_eq!(renderer.backend().bound_framebuffer(), scene);
}

#[test]
fn mirrored_traversal_sees_the_reflected_camera() {
    let mut renderer = renderer();
    let shader = renderer.backend_mut().register_shader("model", None);
    let geometry = renderer.backend_mut().create_geometry("cube");
    let tex = texture(renderer.backend_mut(), "metal");
    renderer.add_renderable(view(geometry, tex), shader).unwrap();

    let camera = SharedCamera::default();
    renderer.set_view(Arc::new(camera.clone()));
    renderer.enable_mirror(camera.reflection_toggle()).unwrap();

    renderer.prepare().unwrap();
    renderer.backend_mut().take_calls();
    renderer.render_models().unwrap();

    let matrices = uniform_values(renderer.backend().calls(), VIEW_PROJECTION);
    assert_eq!(matrices.len(), 2);
    assert_ne!(matrices[0], matrices[1]);
    assert!(!camera.get().reflected);
}

#[test]
fn disabled_mirror_skips_the_second_traversal() {
    let mut renderer = renderer();
    board(&mut renderer);

    let toggles = Arc::new(Mutex::new(Vec::new()));
    let recorded = toggles.clone();
    renderer
        .enable_mirror(move |reflected: bool| recorded.lock().unwrap().push(reflected))
        .unwrap();
    renderer.use_mirror(false).unwrap();

    renderer.prepare().unwrap();
    let stats = renderer.render_models().unwrap();
    assert_eq!(stats.mirrored, 0);
    assert!(toggles.lock().unwrap().is_empty());

    // the target stays allocated while the pass is off
    assert!(renderer.framebuffer_texture(FramebufferTarget::Mirror).is_some());
}

#[test]
fn mirror_toggles_around_an_empty_registry() {
    let mut renderer = renderer();
    let toggles = Arc::new(Mutex::new(Vec::new()));
    let recorded = toggles.clone();
    renderer
        .enable_mirror(move |reflected: bool| recorded.lock().unwrap().push(reflected))
        .unwrap();

    renderer.prepare().unwrap();
    let stats = renderer.render_models().unwrap();

    assert_eq!(stats, DrawStats { primary: 0, mirrored: 0 });
    assert_eq!(*toggles.lock().unwrap(), vec![true, false]);
}

#[test]
fn incomplete_mirror_is_never_bound() {
    let mut renderer = renderer();
    let textures = renderer.backend().live_textures();
    let framebuffers = renderer.backend().live_framebuffers();
    let renderbuffers = renderer.backend().live_renderbuffers();
    renderer.backend_mut().reject_framebuffer("MirrorFramebuffer");

    let err = renderer.enable_mirror(|_: bool| {}).unwrap_err();
    assert!(matches!(
        err,
        RenderError::IncompleteFramebuffer {
            target: FramebufferTarget::Mirror,
            status: FramebufferStatus::Unsupported,
        }
    ));
    assert!(err.is_fatal());
    assert!(!renderer.mirror_active());

    // nothing of the failed target survives
    assert!(!renderer.framebuffers().is_allocated(FramebufferTarget::Mirror));
    assert_eq!(renderer.backend().live_textures(), textures);
    assert_eq!(renderer.backend().live_framebuffers(), framebuffers);
    assert_eq!(renderer.backend().live_renderbuffers(), renderbuffers);
    assert!(matches!(
        renderer.bind_framebuffer(FramebufferTarget::Mirror),
        Err(RenderError::MirrorNotEnabled)
    ));

    renderer.backend_mut().take_calls();
    renderer.clear_framebuffers().unwrap();
    let bound: Vec<_> = renderer
        .backend()
        .calls()
        .iter()
        .filter_map(|call| match *call {
            Call::BindFramebuffer(framebuffer) => Some(framebuffer),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(bound.len(), 4);
    assert!(bound
        .iter()
        .all(|&fb| renderer.framebuffers().target_of(fb) != Some(FramebufferTarget::Mirror)));
}

#[test]
fn targets_lost_in_a_failed_resize_cannot_be_bound() {
    let mut renderer = renderer();
    renderer.backend_mut().reject_framebuffer("ResultFramebuffer");

    let err = renderer.resize(32, 24).unwrap_err();
    assert!(matches!(
        err,
        RenderError::IncompleteFramebuffer {
            target: FramebufferTarget::Result,
            ..
        }
    ));
    assert!(err.is_fatal());

    assert!(!renderer.framebuffers().is_allocated(FramebufferTarget::Result));
    assert!(matches!(
        renderer.bind_framebuffer(FramebufferTarget::Result),
        Err(RenderError::TargetUnavailable(FramebufferTarget::Result))
    ));
    assert!(matches!(
        renderer.bind_framebuffer(FramebufferTarget::Spare),
        Err(RenderError::TargetUnavailable(FramebufferTarget::Spare))
    ));
    assert!(matches!(
        renderer.copy_framebuffer(FramebufferTarget::Result, FramebufferTarget::Scene),
        Err(RenderError::TargetUnavailable(FramebufferTarget::Result))
    ));
}

#[test]
fn mirror_cannot_be_used_before_it_is_enabled() {
    let mut renderer = renderer();

    assert!(matches!(
        renderer.use_mirror(true),
        Err(RenderError::MirrorNotEnabled)
    ));
    assert!(!renderer.mirror_active());
    assert!(matches!(
        renderer.bind_framebuffer(FramebufferTarget::Mirror),
        Err(RenderError::MirrorNotEnabled)
    ));
    assert!(renderer.framebuffer_texture(FramebufferTarget::Mirror).is_none());
    assert!(matches!(
        renderer.copy_framebuffer(FramebufferTarget::Mirror, FramebufferTarget::Result),
        Err(RenderError::MirrorNotEnabled)
    ));
    // turning it off has nothing to refuse
    renderer.use_mirror(false).unwrap();
    assert!(!renderer.mirror_active());
}

#[test]
fn screen_shader_is_repeated_into_the_mirror() {
    let mut renderer = renderer();
    let effect = renderer
        .backend_mut()
        .register_shader("sky", Some(Box::new(|_: &Fragment<'_>| glam::Vec4::ONE)));
    renderer.enable_mirror(|_: bool| {}).unwrap();

    renderer.prepare().unwrap();
    renderer.bind_framebuffer(FramebufferTarget::Effects).unwrap();
    renderer.backend_mut().take_calls();
    renderer.render_screen_shader(effect).unwrap();

    let targets: Vec<_> = renderer
        .backend()
        .calls()
        .iter()
        .filter_map(|call| match *call {
            Call::DrawQuad { target, shader, .. } if shader == Some(effect) => Some(target),
            _ => None,
        })
        .collect();
    let framebuffers = renderer.framebuffers();
    assert_eq!(
        targets,
        vec![
            framebuffers.framebuffer(FramebufferTarget::Effects),
            framebuffers.framebuffer(FramebufferTarget::Mirror),
        ]
    );
    assert_eq!(
        renderer.backend().bound_framebuffer(),
        renderer.framebuffers().framebuffer(FramebufferTarget::Effects)
    );
}

#[test]
fn unknown_shaders_are_rejected() {
    let mut renderer = renderer();
    let geometry = renderer.backend_mut().create_geometry("orphan");
    let tex = texture(renderer.backend_mut(), "t");
    let bogus = ShaderHandle::new(42);

    let err = renderer.add_renderable(view(geometry, tex), bogus).unwrap_err();
    assert!(matches!(err, RenderError::UnknownShader(shader) if shader == bogus));
    assert!(renderer
        .add_renderables(vec![view(geometry, tex)], bogus)
        .is_err());
    assert!(renderer.registry().is_empty());

    renderer.prepare().unwrap();
    assert!(matches!(
        renderer.render_screen_shader(bogus),
        Err(RenderError::UnknownShader(_))
    ));
    assert!(matches!(
        renderer.post_process_combine(Some(bogus)),
        Err(RenderError::UnknownShader(_))
    ));
}

#[test]
fn operations_out_of_order_are_rejected() {
    let mut renderer = renderer();

    assert!(matches!(
        renderer.render_models(),
        Err(RenderError::StageOrder {
            operation: "render_models",
            stage: FrameStage::Idle,
        })
    ));
    assert!(renderer.finish_frame().is_err());

    renderer.prepare().unwrap();
    assert!(renderer.prepare().is_err());
    assert!(matches!(
        renderer.render_result_to_screen(),
        Err(RenderError::StageOrder { .. })
    ));
    let screen = renderer.backend().default_screen_shader();
    assert!(matches!(
        renderer.post_process(screen, 1.0, &[]),
        Err(RenderError::StageOrder {
            operation: "post_process",
            stage: FrameStage::Prepared,
        })
    ));
    assert!(renderer.resize(32, 32).is_err());

    renderer.post_process_combine(None).unwrap();
    assert!(renderer.render_models().is_err());
    assert!(renderer.post_process_combine(None).is_err());
    assert_eq!(renderer.stage(), FrameStage::Combined);

    // rejected calls leave the frame usable
    renderer.render_result_to_screen().unwrap();
    renderer.finish_frame().unwrap();
    assert_eq!(renderer.stage(), FrameStage::Idle);
}

#[test]
fn a_full_frame_opens_and_closes_the_backend_frame_once() {
    let mut renderer = renderer();
    board(&mut renderer);
    renderer.backend_mut().take_calls();

    renderer.clear_framebuffers().unwrap();
    renderer.prepare().unwrap();
    renderer.bind_framebuffer(FramebufferTarget::Scene).unwrap();
    renderer.render_models().unwrap();
    renderer.post_process_combine(None).unwrap();
    renderer.render_result_to_screen().unwrap();
    renderer.finish_frame().unwrap();

    let calls = renderer.backend().calls();
    let count = |wanted: &Call| calls.iter().filter(|call| *call == wanted).count();
    assert_eq!(count(&Call::BeginFrame), 1);
    assert_eq!(count(&Call::EndFrame), 1);
    assert_eq!(calls.first(), Some(&Call::BeginFrame));
    assert_eq!(calls.last(), Some(&Call::EndFrame));
}

#[test]
fn clear_framebuffers_clears_every_allocated_target() {
    let mut renderer = renderer();
    renderer.enable_mirror(|_: bool| {}).unwrap();
    renderer.backend_mut().take_calls();

    renderer.clear_framebuffers().unwrap();

    let cleared: Vec<_> = renderer
        .backend()
        .calls()
        .iter()
        .filter_map(|call| match *call {
            Call::Clear { target, .. } => Some(target),
            _ => None,
        })
        .collect();
    let framebuffers = renderer.framebuffers();
    let expected: Vec<_> = FramebufferTarget::ALL
        .into_iter()
        .map(|target| framebuffers.framebuffer(target))
        .collect();
    assert_eq!(cleared, expected);
    assert_eq!(renderer.backend().bound_framebuffer(), None);
}

#[test]
fn background_color_fills_cleared_targets() {
    let mut renderer = renderer();
    renderer.set_background_color(glam::Vec3::new(0.0, 0.25, 0.5));
    renderer.clear_framebuffers().unwrap();

    let result = renderer.framebuffer_texture(FramebufferTarget::Result).unwrap();
    let data = renderer.backend().texture_data(result).unwrap();
    assert!(data
        .pixels
        .iter()
        .all(|&p| p == glam::Vec4::new(0.0, 0.25, 0.5, 0.0)));
}

#[test]
fn resize_between_frames_recreates_targets() {
    let mut renderer = renderer();
    renderer.enable_mirror(|_: bool| {}).unwrap();

    renderer.resize(32, 24).unwrap();

    let size = Extent::new(32, 24);
    assert_eq!(renderer.backend().surface_size(), size);
    assert_eq!(renderer.framebuffers().size(), size);
    for target in [FramebufferTarget::Scene, FramebufferTarget::Mirror] {
        let texture = renderer.framebuffer_texture(target).unwrap();
        assert_eq!(renderer.backend().texture_data(texture).unwrap().size, size);
    }

    renderer.prepare().unwrap();
    renderer.post_process_combine(None).unwrap();
    assert_eq!(
        renderer
            .backend()
            .uniform(renderer.backend().default_screen_shader(), names::INVERSE_TEXTURE_SIZE),
        Some(UniformValue::Vec2(Vec2::new(1.0 / 32.0, 1.0 / 24.0)))
    );
}

#[test]
fn into_backend_releases_every_target() {
    let mut renderer = renderer();
    renderer.enable_mirror(|_: bool| {}).unwrap();
    assert!(renderer.backend().live_textures() > 0);

    let backend = renderer.into_backend();
    assert_eq!(backend.live_textures(), 0);
}

#[test]
fn stencil_toggles_reach_the_backend() {
    let mut renderer = renderer();
    renderer.use_stencil(true);
    renderer.write_stencil(false);
    assert!(renderer.backend().is_enabled(Capability::StencilTest));
    assert_eq!(renderer.backend().stencil_write_mask(), 0x00);

    renderer.write_stencil(true);
    renderer.use_stencil(false);
    assert!(!renderer.backend().is_enabled(Capability::StencilTest));
    assert_eq!(renderer.backend().stencil_write_mask(), 0xFF);
}
