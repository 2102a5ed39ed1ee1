//! Frame Pipeline Tests
//!
//! End-to-end frames on the headless backend:
//! - Empty frames run the full lifecycle and present
//! - Pass ordering (plain, masked, portals, translucent)
//! - Portal recursion restores matrices, depth, stencil level and state
//! - Missing-texture flood state, hacked primitives included
//! - Texture eviction never leaves a binding on a destroyed image
//! - SSAO budget, deferred light prepass and recursion limits
//! - Stereo eyes and transient presentation failures

use glam::{Vec3, Vec4};

use strata::renderer::commands::{CommandRecorder, DrawPass, RenderCommand};
use strata::renderer::core::{CompareOp, HeadlessDevice, HeadlessSwapChain, SurfaceFault};
use strata::renderer::lights::DynamicLight;
use strata::renderer::material::{Material, MaterialId, MaterialLayer};
use strata::renderer::scene::{
    DrawListKind, MissingTexture, PartitionId, PortalGroupId, PortalSurface, PrimitiveId,
    PrimitiveKind, RenderStyle, SectorId, VisiblePartition, VisiblePrimitive, Viewpoint, WorldView,
};
use strata::renderer::settings::{LightMethod, RendererSettings};
use strata::renderer::state::{BlendFunc, PipelineState, PolygonOffset, StencilState};
use strata::renderer::stereo::Stereo3DMode;
use strata::renderer::texture::{MemoryTexture, TextureId, TextureLibrary};
use strata::{FrameOutcome, Renderer};

type TestRenderer = Renderer<HeadlessDevice, HeadlessSwapChain>;

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Default)]
struct TestWorld {
    partitions: Vec<VisiblePartition>,
    lights: Vec<DynamicLight>,
    flat: Option<MaterialId>,
}

impl TestWorld {
    fn with_primitives(primitives: Vec<VisiblePrimitive>) -> Self {
        Self {
            partitions: vec![VisiblePartition {
                id: PartitionId(1),
                portal_group: None,
                primitives,
            }],
            ..Self::default()
        }
    }
}

impl WorldView for TestWorld {
    fn visible_partitions<'a>(
        &'a self,
        _view: &Viewpoint,
    ) -> Box<dyn Iterator<Item = &'a VisiblePartition> + 'a> {
        Box::new(self.partitions.iter())
    }

    fn frustum_angle(&self, _view: &Viewpoint) -> f32 {
        180.0
    }

    fn dynamic_lights(&self) -> &[DynamicLight] {
        &self.lights
    }

    fn sector_flat(&self, _sector: SectorId, _ceiling: bool) -> Option<MaterialId> {
        self.flat
    }
}

fn library() -> TextureLibrary {
    let mut lib = TextureLibrary::new();
    lib.insert(MemoryTexture::solid(TextureId(1), "STARTAN", 4, 4, [120, 90, 60, 255]));
    lib.insert(MemoryTexture::solid(TextureId(2), "FLAT5", 2, 2, [40, 40, 40, 255]));
    lib
}

fn renderer(settings: RendererSettings) -> TestRenderer {
    let _ = env_logger::builder().is_test(true).try_init();
    Renderer::new(HeadlessDevice::new(), HeadlessSwapChain::new(), settings, 640, 480).unwrap()
}

fn wall(id: u32) -> VisiblePrimitive {
    VisiblePrimitive::new(PrimitiveId(id), PrimitiveKind::Wall).with_bounds(Vec3::new(128.0, 0.0, 0.0), 32.0)
}

fn render(renderer: &mut TestRenderer, world: &TestWorld) -> FrameOutcome {
    let lib = library();
    let viewpoint = Viewpoint::new(Vec3::ZERO, 0.0);
    renderer.render_frame(world, &lib, &viewpoint, &mut |_| {}).unwrap()
}

fn position(commands: &[RenderCommand], pred: impl Fn(&RenderCommand) -> bool) -> usize {
    commands.iter().position(pred).expect("command not recorded")
}

fn drawn(list: DrawListKind, id: u32) -> impl Fn(&RenderCommand) -> bool {
    move |c| matches!(c, RenderCommand::Draw { list: l, primitive, .. } if *l == list && primitive.0 == id)
}

/// State in effect at command index `at`.
fn state_at(commands: &[RenderCommand], at: usize) -> PipelineState {
    commands[..at]
        .iter()
        .rev()
        .find_map(|c| match c {
            RenderCommand::SetState(state) => Some((**state).clone()),
            _ => None,
        })
        .expect("no state applied")
}

fn line_portal(id: u32) -> VisiblePrimitive {
    wall(id).with_portal(PortalSurface::LineToLine {
        group: PortalGroupId(7),
        displacement: Vec3::new(0.0, 1024.0, 0.0),
    })
}

/// Mirror facing the viewer at x = 256.
fn mirror(id: u32) -> VisiblePrimitive {
    wall(id).with_portal(PortalSurface::Mirror {
        plane: Vec4::new(-1.0, 0.0, 0.0, 256.0),
    })
}

// ============================================================================
// Frame Lifecycle
// ============================================================================

#[test]
fn empty_frame_runs_the_full_lifecycle_and_presents() {
    let mut renderer = renderer(RendererSettings::default());
    let world = TestWorld::default();

    let lib = library();
    let mut overlay_calls = 0;
    let outcome = renderer
        .render_frame(&world, &lib, &Viewpoint::default(), &mut |_: &mut CommandRecorder| {
            overlay_calls += 1;
        })
        .unwrap();

    assert_eq!(outcome, FrameOutcome::Presented { image_index: 0, eyes: 1 });
    assert_eq!(overlay_calls, 1);
    assert_eq!(renderer.swap_chain().presented(), &[0]);

    let stats = renderer.scene_renderer().stats();
    assert_eq!(stats.views_rendered, 1);
    assert_eq!(stats.views_ended, 1);
    assert_eq!(renderer.scene_renderer().pool().outstanding(), 0);

    let commands = renderer.commands().commands();
    assert!(matches!(commands[0], RenderCommand::BindSceneFramebuffer { .. }));
    assert!(commands.iter().any(|c| matches!(c, RenderCommand::DrawScreenQuad { effect: "present", .. })));
    assert!(!commands.iter().any(|c| matches!(c, RenderCommand::Draw { .. })));
}

#[test]
fn consecutive_frames_cycle_presentation_images() {
    let mut renderer = renderer(RendererSettings::default());
    let world = TestWorld::with_primitives(vec![wall(1)]);
    for _ in 0..4 {
        assert!(render(&mut renderer, &world).is_presented());
    }
    assert_eq!(renderer.swap_chain().presented(), &[0, 1, 2, 0]);
    assert_eq!(renderer.frame_count(), 4);
    // The draw-info is recycled rather than reallocated.
    assert_eq!(renderer.scene_renderer().pool().allocated(), 1);
}

// ============================================================================
// Pass Ordering
// ============================================================================

#[test]
fn passes_run_plain_masked_portal_translucent() {
    let mut renderer = renderer(RendererSettings::default());
    let world = TestWorld::with_primitives(vec![
        wall(3).with_style(RenderStyle::Translucent { alpha: 0.5 }),
        wall(2).with_style(RenderStyle::Masked),
        wall(1),
        line_portal(10),
    ]);
    render(&mut renderer, &world);
    let commands = renderer.commands().commands();

    let plain = position(commands, drawn(DrawListKind::PlainWalls, 1));
    let masked = position(commands, drawn(DrawListKind::MaskedWalls, 2));
    let portal_begin = position(commands, |c| matches!(c, RenderCommand::PortalBegin { .. }));
    let portal_end = position(commands, |c| matches!(c, RenderCommand::PortalEnd { .. }));
    let outer_translucent = commands
        .iter()
        .rposition(drawn(DrawListKind::Translucent, 3))
        .unwrap();

    assert!(plain < masked);
    assert!(masked < portal_begin);
    assert!(portal_end < outer_translucent);

    // Masked geometry is alpha tested, opaque geometry is not.
    assert!(state_at(commands, plain).alpha_threshold.abs() < f32::EPSILON);
    assert!((state_at(commands, masked).alpha_threshold - 0.5).abs() < f32::EPSILON);
    // The translucent bulk does not write depth.
    assert!(!state_at(commands, outer_translucent).depth_write);
}

#[test]
fn additive_sprites_use_additive_blending() {
    let mut renderer = renderer(RendererSettings::default());
    let world = TestWorld::with_primitives(vec![
        wall(5).with_style(RenderStyle::Additive { alpha: 1.0 }),
    ]);
    render(&mut renderer, &world);
    let commands = renderer.commands().commands();
    let draw = position(commands, drawn(DrawListKind::Translucent, 5));
    assert_eq!(state_at(commands, draw).blend, BlendFunc::ADDITIVE);
}

#[test]
fn materials_resolve_to_bindings() {
    let mut renderer = renderer(RendererSettings::default());
    let material = renderer
        .materials_mut()
        .insert(Material::new("STARTAN", MaterialLayer::new(TextureId(1))));
    let world = TestWorld::with_primitives(vec![wall(1).with_material(material), wall(2).with_material(material)]);
    render(&mut renderer, &world);

    let bindings: Vec<_> = renderer
        .commands()
        .commands()
        .iter()
        .filter_map(|c| match c {
            RenderCommand::Draw { binding, .. } => Some(*binding),
            _ => None,
        })
        .collect();
    assert_eq!(bindings.len(), 2);
    assert!(bindings[0].is_some());
    assert_eq!(bindings[0], bindings[1]);
    assert_eq!(renderer.materials().get(material).unwrap().entries().len(), 1);
}

// ============================================================================
// Portals
// ============================================================================

#[test]
fn mirror_restores_outer_matrices_and_state() {
    let mut renderer = renderer(RendererSettings::default());
    let world = TestWorld::with_primitives(vec![wall(1), mirror(20)]);
    render(&mut renderer, &world);
    let commands = renderer.commands().commands();

    let outer_matrices = commands
        .iter()
        .find_map(|c| match c {
            RenderCommand::SetMatrices { projection, view } => Some((*projection, *view)),
            _ => None,
        })
        .unwrap();

    let begin = position(commands, |c| matches!(c, RenderCommand::PortalBegin { level: 1, .. }));
    let end = position(commands, |c| matches!(c, RenderCommand::PortalEnd { level: 1, .. }));

    // The marked region is reset to far depth before the nested view draws.
    let clear = begin + position(&commands[begin..], |c| *c == RenderCommand::ClearPortalDepth { level: 1 });
    let clear_state = state_at(commands, clear);
    assert_eq!(clear_state.stencil, StencilState::equal(1));
    assert_eq!(clear_state.depth_func, CompareOp::Always);
    assert!(clear_state.depth_write);
    assert!(!clear_state.color_write);

    // The nested view only draws where the stencil was marked.
    let nested_draw = begin + position(&commands[begin..], drawn(DrawListKind::PlainWalls, 1));
    assert!(clear < nested_draw);
    assert!(nested_draw < end);
    assert_eq!(state_at(commands, nested_draw).stencil, StencilState::equal(1));

    // First matrices after the portal are the outer view's, bit for bit.
    let restored = commands[end..]
        .iter()
        .find_map(|c| match c {
            RenderCommand::SetMatrices { projection, view } => Some((*projection, *view)),
            _ => None,
        })
        .unwrap();
    assert_eq!(restored, outer_matrices);

    // The unmark pass decrements back to level 0, then the outer state returns.
    let unmark = end + position(&commands[end..], |c| {
        matches!(c, RenderCommand::MarkPortalSurface { primitive, level: 0 } if primitive.0 == 20)
    });
    // Unmarking puts the mirror's own depth back without touching color.
    let unmark_state = state_at(commands, unmark);
    assert!(unmark_state.depth_write);
    assert!(!unmark_state.color_write);
    assert_eq!(unmark_state.stencil.reference, 1);
    let restored_state = commands[unmark..]
        .iter()
        .find_map(|c| match c {
            RenderCommand::SetState(state) => Some((**state).clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(restored_state.stencil, StencilState::scene_default());
    assert!(restored_state.color_write);
    assert!(restored_state.depth_write);

    assert_eq!(renderer.scene_renderer().stencil_level(), 0);
    assert_eq!(renderer.scene_renderer().stats().portals_rendered, 1);
    assert_eq!(renderer.scene_renderer().stats().views_ended, 2);
}

#[test]
fn recursion_limit_skips_portals() {
    let settings = RendererSettings {
        max_portal_recursion: 0,
        ..RendererSettings::default()
    };
    let mut renderer = renderer(settings);
    let world = TestWorld::with_primitives(vec![wall(1), line_portal(10)]);
    assert!(render(&mut renderer, &world).is_presented());

    let commands = renderer.commands().commands();
    assert!(!commands.iter().any(|c| matches!(c, RenderCommand::PortalBegin { .. })));
    assert_eq!(renderer.scene_renderer().stats().portals_skipped, 1);
}

#[test]
fn mirror_view_clips_to_the_viewer_side() {
    let mut renderer = renderer(RendererSettings::default());
    let world = TestWorld::with_primitives(vec![wall(1), mirror(20)]);
    render(&mut renderer, &world);

    let commands = renderer.commands().commands();
    let begin = position(commands, |c| matches!(c, RenderCommand::PortalBegin { .. }));
    let clip = commands[begin..]
        .iter()
        .find_map(|c| match c {
            RenderCommand::SetClipPlane(plane) => Some(*plane),
            _ => None,
        })
        .unwrap();
    assert!(clip.is_some());
}

// ============================================================================
// Missing Textures
// ============================================================================

#[test]
fn missing_texture_flood_replaces_without_depth_writes() {
    let mut renderer = renderer(RendererSettings::default());
    let flat = renderer
        .materials_mut()
        .insert(Material::new("FLAT5", MaterialLayer::new(TextureId(2))));
    let mut world = TestWorld::with_primitives(vec![wall(4).with_missing(MissingTexture::UPPER, SectorId(3))]);
    world.flat = Some(flat);
    render(&mut renderer, &world);

    let commands = renderer.commands().commands();
    let fill = position(commands, |c| matches!(c, RenderCommand::FillMissingTexture { .. }));
    let RenderCommand::FillMissingTexture { flat, upper, .. } = &commands[fill] else {
        unreachable!();
    };
    assert!(flat.is_some());
    assert!(*upper);

    let state = state_at(commands, fill);
    assert_eq!(state.blend, BlendFunc::REPLACE);
    assert!(!state.depth_write);
    assert_eq!(state.polygon_offset, PolygonOffset::PUSH);
    assert!(state.fog);
}

#[test]
fn hacked_primitives_get_their_missing_textures_filled() {
    let mut renderer = renderer(RendererSettings::default());
    let flat = renderer
        .materials_mut()
        .insert(Material::new("FLAT5", MaterialLayer::new(TextureId(2))));
    let mut hacked = wall(6).with_missing(MissingTexture::UPPER, SectorId(3));
    hacked.hack_partition = Some(PartitionId(1));
    let mut world = TestWorld::with_primitives(vec![wall(1), hacked]);
    world.flat = Some(flat);
    render(&mut renderer, &world);

    let commands = renderer.commands().commands();
    position(commands, drawn(DrawListKind::PlainWalls, 6));
    let fill = position(commands, |c| {
        matches!(c, RenderCommand::FillMissingTexture { primitive, upper: true, .. } if primitive.0 == 6)
    });
    let RenderCommand::FillMissingTexture { flat, .. } = &commands[fill] else {
        unreachable!();
    };
    assert!(flat.is_some());
}

// ============================================================================
// Texture Lifetimes
// ============================================================================

#[test]
fn textures_in_use_survive_eviction() {
    let mut renderer = renderer(RendererSettings {
        texture_max_age: 2,
        ..RendererSettings::default()
    });
    let material = renderer
        .materials_mut()
        .insert(Material::new("STARTAN", MaterialLayer::new(TextureId(1))));
    let world = TestWorld::with_primitives(vec![wall(1).with_material(material)]);

    for frame in 0..6 {
        render(&mut renderer, &world);
        let binding = renderer
            .commands()
            .commands()
            .iter()
            .find_map(|c| match c {
                RenderCommand::Draw { binding, .. } => *binding,
                _ => None,
            })
            .unwrap();
        let device = renderer.device();
        let (image, _) = device.binding_range(binding).unwrap()[0];
        assert!(device.image_desc(image).is_some(), "frame {frame} drew a destroyed image");
    }
    assert_eq!(renderer.textures().len(), 1);
}

#[test]
fn evicted_textures_are_rebound_on_the_next_draw() {
    let mut renderer = renderer(RendererSettings {
        texture_max_age: 1,
        ..RendererSettings::default()
    });
    let material = renderer
        .materials_mut()
        .insert(Material::new("STARTAN", MaterialLayer::new(TextureId(1))));
    let with_wall = TestWorld::with_primitives(vec![wall(1).with_material(material)]);

    render(&mut renderer, &with_wall);
    for _ in 0..3 {
        render(&mut renderer, &TestWorld::default());
    }
    assert!(renderer.textures().is_empty());

    render(&mut renderer, &with_wall);
    let binding = renderer
        .commands()
        .commands()
        .iter()
        .find_map(|c| match c {
            RenderCommand::Draw { binding, .. } => *binding,
            _ => None,
        })
        .unwrap();
    let device = renderer.device();
    let (image, _) = device.binding_range(binding).unwrap()[0];
    assert!(device.image_desc(image).is_some());
    assert_eq!(renderer.materials().get(material).unwrap().entries().len(), 1);
}

// ============================================================================
// SSAO and Lights
// ============================================================================

fn ambient_occlusion_passes(renderer: &TestRenderer) -> usize {
    renderer
        .commands()
        .commands()
        .iter()
        .filter(|c| matches!(c, RenderCommand::AmbientOcclusion { .. }))
        .count()
}

#[test]
fn ssao_portal_budget_limits_nested_views() {
    let world = TestWorld::with_primitives(vec![wall(1), line_portal(10)]);

    let mut main_only = renderer(RendererSettings {
        ssao: true,
        ssao_portals: 0,
        ..RendererSettings::default()
    });
    render(&mut main_only, &world);
    assert_eq!(ambient_occlusion_passes(&main_only), 1);

    let mut with_portal = renderer(RendererSettings {
        ssao: true,
        ssao_portals: 1,
        ..RendererSettings::default()
    });
    render(&mut with_portal, &world);
    assert_eq!(ambient_occlusion_passes(&with_portal), 2);
}

#[test]
fn deferred_lights_run_before_opaque_geometry() {
    let settings = RendererSettings {
        light_method: LightMethod::Deferred,
        ..RendererSettings::default()
    };
    let mut renderer = renderer(settings);
    let floor = VisiblePrimitive::new(PrimitiveId(8), PrimitiveKind::Flat { ceiling: false })
        .with_bounds(Vec3::new(64.0, 0.0, -32.0), 64.0);
    let mut world = TestWorld::with_primitives(vec![floor, wall(1)]);
    world.lights.push(DynamicLight::point(Vec3::new(64.0, 0.0, 0.0), 128.0, Vec3::ONE));
    render(&mut renderer, &world);

    let commands = renderer.commands().commands();
    let prepass = position(commands, |c| {
        matches!(c, RenderCommand::BeginList { list: DrawListKind::PlainFlats, pass: DrawPass::LightsOnly })
    });
    let upload = position(commands, |c| matches!(c, RenderCommand::UploadLights { primitive, .. } if primitive.0 == 8));
    let opaque = position(commands, drawn(DrawListKind::PlainWalls, 1));
    assert!(prepass < upload);
    assert!(upload < opaque);
    assert!(!renderer.scene_renderer().light_buffer().samples().is_empty());
}

// ============================================================================
// Stereo
// ============================================================================

#[test]
fn side_by_side_renders_and_blits_both_eyes() {
    let settings = RendererSettings {
        stereo_mode: Stereo3DMode::SideBySide,
        ..RendererSettings::default()
    };
    let mut renderer = renderer(settings);
    let outcome = render(&mut renderer, &TestWorld::with_primitives(vec![wall(1)]));
    assert_eq!(outcome, FrameOutcome::Presented { image_index: 0, eyes: 2 });

    let commands = renderer.commands().commands();
    let blits: Vec<usize> = commands
        .iter()
        .filter_map(|c| match c {
            RenderCommand::BlitToEyeTexture { eye } => Some(*eye),
            _ => None,
        })
        .collect();
    assert_eq!(blits, vec![0, 1]);

    let projections: Vec<_> = commands
        .iter()
        .filter_map(|c| match c {
            RenderCommand::SetMatrices { projection, .. } => Some(*projection),
            _ => None,
        })
        .collect();
    // Each eye's frustum is skewed in the opposite direction.
    let skews: Vec<f32> = projections.iter().map(|p| p.z_axis.x).filter(|s| s.abs() > 1e-6).collect();
    assert!(skews.iter().any(|s| *s > 0.0));
    assert!(skews.iter().any(|s| *s < 0.0));
}

// ============================================================================
// Presentation Recovery
// ============================================================================

#[test]
fn single_acquire_failure_is_retried_after_rebuild() {
    let mut renderer = renderer(RendererSettings::default());
    render(&mut renderer, &TestWorld::default());
    renderer.swap_chain_mut().fail_next_acquire(SurfaceFault::Outdated);

    let outcome = render(&mut renderer, &TestWorld::default());
    assert!(outcome.is_presented());
    assert_eq!(renderer.swap_chain().configure_count(), 2);
}

#[test]
fn repeated_acquire_failure_skips_the_frame() {
    let mut renderer = renderer(RendererSettings::default());
    renderer.swap_chain_mut().fail_next_acquire(SurfaceFault::Lost);
    renderer.swap_chain_mut().fail_next_acquire(SurfaceFault::Lost);

    let outcome = render(&mut renderer, &TestWorld::default());
    assert!(matches!(outcome, FrameOutcome::Skipped { .. }));
    assert!(renderer.swap_chain().presented().is_empty());
    assert!(renderer.framebuffer().needs_rebuild());

    assert!(render(&mut renderer, &TestWorld::default()).is_presented());
}

#[test]
fn present_failure_schedules_rebuild() {
    let mut renderer = renderer(RendererSettings::default());
    renderer.swap_chain_mut().fail_next_present(SurfaceFault::Outdated);

    let outcome = render(&mut renderer, &TestWorld::default());
    assert!(matches!(outcome, FrameOutcome::Skipped { .. }));
    assert!(renderer.framebuffer().needs_rebuild());

    assert!(render(&mut renderer, &TestWorld::default()).is_presented());
    assert_eq!(renderer.swap_chain().configure_count(), 2);
}

#[test]
fn resize_reconfigures_before_the_next_frame() {
    let mut renderer = renderer(RendererSettings::default());
    render(&mut renderer, &TestWorld::default());
    renderer.resize(800, 600);
    render(&mut renderer, &TestWorld::default());

    let config = renderer.swap_chain().config().unwrap();
    assert_eq!((config.width, config.height), (800, 600));
    assert_eq!(renderer.size(), (800, 600));
}
