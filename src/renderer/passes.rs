//! Scene Renderer (pass sequencer)
//!
//! # Design
//!
//! [`SceneRenderer`] turns a built [`DrawInfo`] into the recorded command
//! stream of one view. All pipeline state goes through a
//! [`RenderStateTracker`], so every draw is preceded by exactly the state
//! changes it needs and no redundant ones.
//!
//! # Pass order of one view
//!
//! | Step | Pass                  | Key state                                         |
//! |------|-----------------------|---------------------------------------------------|
//! | 0    | first sky portal      | unless `no_sky_clear`                             |
//! | 1    | lights-only prepass   | deferred light method only                        |
//! | 2    | opaque                | depth `Less`, alpha test off: walls, flats, models|
//! | 3    | masked                | alpha test at `mask_threshold`                    |
//! | 3b   | masked with offset    | polygon offset pull, skipped when empty           |
//! | 4    | decals                | depth `LessEqual`, no depth write, offset pull    |
//! | 5    | missing-texture flood | blend `(One, Zero)`, no depth write, offset push  |
//! | 6    | ambient occlusion     | G-buffer views with SSAO budget                   |
//! | 7    | portals               | nested views, state restored on return            |
//! | 8    | translucent           | border list, then sorted bulk without depth write |
//!
//! The main view additionally runs `end_draw_scene` (HUD models) and the
//! post-process chain with the 2D overlay.
//!
//! # Portal recursion
//!
//! Before a nested view the outer matrices, pipeline state and stencil level
//! are pushed as a [`ViewSnapshot`]. The portal surfaces are marked in the
//! stencil buffer and the marked pixels are reset to far depth. The nested
//! view renders only where the stencil matches. Afterwards the surfaces are
//! unmarked while their depth is redrawn, and the snapshot is restored
//! verbatim.

use crate::errors::Result;
use crate::renderer::commands::{CommandRecorder, DrawPass, RenderCommand};
use crate::renderer::core::{BindlessIndex, CompareOp, RenderDevice};
use crate::renderer::lights::{LightBuffer, LightCollection};
use crate::renderer::material::{BindingContext, MaterialCache, MaterialId};
use crate::renderer::postprocess::PostProcessState;
use crate::renderer::samplers::{ClampMode, SamplerManager};
use crate::renderer::scene::{
    DrawInfo, DrawInfoPool, DrawListKind, DrawMode, HudSprite, PendingPortal, PortalStack,
    PortalSurface, RenderStyle, SceneContext, ViewConfig, ViewSnapshot, ViewUniforms, VisitMarks,
    WorldView,
};
use crate::renderer::settings::{LightMethod, RendererSettings};
use crate::renderer::state::{
    BlendFunc, PassType, PolygonOffset, Rect, RenderStateTracker, StencilOp, StencilState,
    TextureMode,
};
use crate::renderer::texture::{TextureCache, TextureProvider, Translation};

/// Shared caches and collaborators for one frame.
pub struct FrameResources<'a, D: RenderDevice> {
    pub device: &'a mut D,
    pub textures: &'a mut TextureCache,
    pub samplers: &'a SamplerManager,
    pub materials: &'a mut MaterialCache,
    pub provider: &'a dyn TextureProvider,
    pub world: &'a dyn WorldView,
    pub settings: &'a RendererSettings,
}

impl<D: RenderDevice> FrameResources<'_, D> {
    /// Bindless range of a material, resolved on demand.
    pub fn material_binding(
        &mut self,
        material: MaterialId,
        clamp_mode: ClampMode,
        translation: Translation,
    ) -> Option<BindlessIndex> {
        let mut ctx = BindingContext {
            device: &mut *self.device,
            textures: &mut *self.textures,
            samplers: self.samplers,
            provider: self.provider,
        };
        self.materials.descriptor(material, clamp_mode, translation, &mut ctx)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub views_rendered: u32,
    pub views_ended: u32,
    pub portals_rendered: u32,
    pub portals_skipped: u32,
}

pub struct SceneRenderer {
    recorder: CommandRecorder,
    state: RenderStateTracker,
    portals: PortalStack,
    lights: LightCollection,
    light_buffer: LightBuffer,
    pool: DrawInfoPool,
    marks: VisitMarks,
    post: PostProcessState,
    uniforms: ViewUniforms,
    ssao_portals_available: u32,
    stencil_level: u32,
    screen: Rect,
    stats: PassStats,
}

impl SceneRenderer {
    #[must_use]
    pub fn new(settings: &RendererSettings, screen: Rect) -> Self {
        Self {
            recorder: CommandRecorder::new(),
            state: RenderStateTracker::new(),
            portals: PortalStack::new(settings.max_portal_recursion),
            lights: LightCollection::new(),
            light_buffer: LightBuffer::default(),
            pool: DrawInfoPool::new(),
            marks: VisitMarks::new(),
            post: PostProcessState::new(),
            uniforms: ViewUniforms::default(),
            ssao_portals_available: 0,
            stencil_level: 0,
            screen,
            stats: PassStats::default(),
        }
    }

    // --- Accessors ---

    #[inline]
    #[must_use]
    pub fn recorder(&self) -> &CommandRecorder {
        &self.recorder
    }

    #[inline]
    pub fn recorder_mut(&mut self) -> &mut CommandRecorder {
        &mut self.recorder
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> &RenderStateTracker {
        &self.state
    }

    /// Matrices most recently sent to the backend.
    #[inline]
    #[must_use]
    pub fn uniforms(&self) -> &ViewUniforms {
        &self.uniforms
    }

    #[inline]
    #[must_use]
    pub fn stencil_level(&self) -> u32 {
        self.stencil_level
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> PassStats {
        self.stats
    }

    #[inline]
    #[must_use]
    pub fn light_buffer(&self) -> &LightBuffer {
        &self.light_buffer
    }

    #[inline]
    #[must_use]
    pub fn pool(&self) -> &DrawInfoPool {
        &self.pool
    }

    #[inline]
    #[must_use]
    pub fn ssao_portals_available(&self) -> u32 {
        self.ssao_portals_available
    }

    pub fn set_screen(&mut self, screen: Rect) {
        self.screen = screen;
    }

    /// Resets per-frame state and the command stream.
    pub fn begin_frame(&mut self, settings: &RendererSettings) {
        self.recorder.clear();
        self.state.reset();
        self.light_buffer.clear();
        self.lights.begin_frame();
        self.portals.set_max_depth(settings.max_portal_recursion);
        self.stencil_level = 0;
        self.stats = PassStats::default();
    }

    fn apply_matrices(&mut self, uniforms: &ViewUniforms) {
        self.recorder.push(RenderCommand::SetMatrices {
            projection: uniforms.projection,
            view: uniforms.view,
        });
        self.recorder.push(RenderCommand::SetClipPlane(uniforms.clip_plane));
        self.uniforms = *uniforms;
    }

    // ========================================================================
    // Viewport
    // ========================================================================

    /// Binds and clears the scene framebuffer for a 3D view.
    pub fn set_3d_viewport(&mut self, settings: &RendererSettings, bounds: Rect, main_view: bool) {
        let pass_type = if settings.ssao && main_view {
            PassType::GBuffer
        } else {
            PassType::Normal
        };
        self.recorder.push(RenderCommand::BindSceneFramebuffer { pass_type });
        self.state.set_pass_type(pass_type);
        self.state.set_draw_buffers(pass_type.draw_buffer_count());

        let [r, g, b] = settings.scene_clear_color;
        self.recorder.push(RenderCommand::Clear {
            color: Some([r, g, b, 1.0]),
            depth: Some(1.0),
            stencil: Some(0),
        });
        self.recorder.push(RenderCommand::SetViewport(bounds));
        self.state.set_scissor(Some(bounds));
        self.state.enable_multisample(true);
        self.state.set_depth_test(true);
        self.state.set_stencil(StencilState::scene_default());
        self.state.apply(&mut self.recorder);
        self.stencil_level = 0;
    }

    // ========================================================================
    // View Lifecycle
    // ========================================================================

    /// Builds and renders one view from `Created` to `Ended`. The main view
    /// also draws HUD models and runs post-processing, with `overlay`
    /// recording the caller's 2D content.
    pub fn process_view<D: RenderDevice>(
        &mut self,
        res: &mut FrameResources<'_, D>,
        config: ViewConfig,
        overlay: &mut dyn FnMut(&mut CommandRecorder),
    ) -> Result<()> {
        let mut info = self.pool.acquire();
        let result = self.run_view(&mut info, res, config, overlay);
        if result.is_err() {
            info.abandon();
        } else {
            self.stats.views_ended += 1;
        }
        self.pool.release(info);
        result
    }

    fn run_view<D: RenderDevice>(
        &mut self,
        info: &mut DrawInfo,
        res: &mut FrameResources<'_, D>,
        config: ViewConfig,
        overlay: &mut dyn FnMut(&mut CommandRecorder),
    ) -> Result<()> {
        info.configure(config)?;
        {
            let mut ctx = SceneContext {
                world: res.world,
                bindings: BindingContext {
                    device: &mut *res.device,
                    textures: &mut *res.textures,
                    samplers: res.samplers,
                    provider: res.provider,
                },
                materials: &mut *res.materials,
                lights: &mut self.lights,
                light_buffer: &mut self.light_buffer,
                marks: &mut self.marks,
                settings: res.settings,
            };
            info.create_scene(&mut ctx)?;
        }
        info.begin_rendering()?;
        self.stats.views_rendered += 1;

        self.draw_scene(info, res)?;

        if info.config().mode == DrawMode::MainView {
            self.end_draw_scene(info, res);
            self.post_process(info, res, overlay);
        }
        info.end()
    }

    /// Passes of one view, portals included.
    pub fn draw_scene<D: RenderDevice>(
        &mut self,
        info: &DrawInfo,
        res: &mut FrameResources<'_, D>,
    ) -> Result<()> {
        let settings = res.settings;
        let budget_allows = match info.config().mode {
            DrawMode::MainView => {
                self.ssao_portals_available = settings.ssao_portals;
                true
            }
            DrawMode::Offscreen => {
                self.ssao_portals_available = 0;
                false
            }
            DrawMode::Portal => {
                let available = self.ssao_portals_available > 0;
                if available {
                    self.ssao_portals_available -= 1;
                }
                available
            }
        };
        let apply_ssao = settings.ssao && budget_allows;

        self.apply_matrices(info.uniforms());
        self.render_scene(info, res);

        if apply_ssao && self.state.current().pass_type == PassType::GBuffer {
            self.ambient_occlusion(info);
        }

        self.render_portals(info, res)?;
        self.render_translucent(info, settings);
        Ok(())
    }

    // ========================================================================
    // Opaque, Masked, Decals, Flood
    // ========================================================================

    fn first_sky_index(info: &DrawInfo, settings: &RendererSettings) -> Option<usize> {
        if settings.no_sky_clear {
            return None;
        }
        info.portals().iter().position(PendingPortal::is_sky)
    }

    /// Opaque, masked, decal and missing-texture passes.
    pub fn render_scene<D: RenderDevice>(&mut self, info: &DrawInfo, res: &mut FrameResources<'_, D>) {
        let settings = res.settings;
        let lists = info.lists();

        self.state.set_depth_write(true);
        if let Some(index) = Self::first_sky_index(info, settings) {
            self.draw_sky(&info.portals()[index], res);
        }

        self.state.enable_fog(true);
        self.state.set_blend(BlendFunc::REPLACE);

        if settings.light_method == LightMethod::Deferred {
            for kind in [
                DrawListKind::PlainFlats,
                DrawListKind::MaskedFlats,
                DrawListKind::TranslucentBorder,
                DrawListKind::Translucent,
            ] {
                self.draw_list(info, kind, DrawPass::LightsOnly);
            }
        }

        // Opaque
        self.state.set_depth_func(CompareOp::Less);
        self.state.set_alpha_threshold(0.0);
        self.state.set_polygon_offset(PolygonOffset::NONE);
        self.state.enable_texture(settings.texture_enabled);
        self.state.enable_brightmaps(true);
        self.draw_list(info, DrawListKind::PlainWalls, DrawPass::All);
        self.draw_list(info, DrawListKind::PlainFlats, DrawPass::All);
        self.draw_list(info, DrawListKind::Models, DrawPass::All);

        // Masked
        if !settings.texture_enabled {
            self.state.enable_texture(true);
            self.state.set_texture_mode(TextureMode::Mask);
        }
        self.state.set_alpha_threshold(settings.mask_threshold);
        self.draw_list(info, DrawListKind::MaskedWalls, DrawPass::All);
        self.draw_list(info, DrawListKind::MaskedFlats, DrawPass::All);
        if !lists.get(DrawListKind::MaskedWallsOffset).is_empty() {
            self.state.set_polygon_offset(PolygonOffset::PULL);
            self.draw_list(info, DrawListKind::MaskedWallsOffset, DrawPass::All);
            self.state.set_polygon_offset(PolygonOffset::NONE);
        }

        self.state.set_blend(BlendFunc::ALPHA);

        // Decals
        if !lists.decals().is_empty() {
            self.state.set_depth_func(CompareOp::LessEqual);
            self.state.set_polygon_offset(PolygonOffset::PULL);
            self.state.set_depth_write(false);
            self.state.apply(&mut self.recorder);
            for decal in lists.decals() {
                self.recorder.push(RenderCommand::DrawDecal {
                    primitive: decal.primitive,
                    binding: decal.binding,
                });
            }
            self.state.set_polygon_offset(PolygonOffset::NONE);
            self.state.set_depth_func(CompareOp::Less);
        }
        self.state.set_texture_mode(TextureMode::Modulate);
        self.state.set_depth_write(true);

        self.draw_missing_textures(info);
    }

    /// Floods gaps left by missing wall textures with the back sector's flat.
    fn draw_missing_textures(&mut self, info: &DrawInfo) {
        let fills = info.missing_fills();
        if fills.is_empty() {
            return;
        }
        self.state.set_polygon_offset(PolygonOffset::PUSH);
        self.state.set_depth_write(false);
        self.state.enable_fog(true);
        self.state.set_alpha_threshold(0.0);
        self.state.set_blend(BlendFunc::REPLACE);
        self.state.apply(&mut self.recorder);
        for fill in fills {
            self.recorder.push(RenderCommand::FillMissingTexture {
                primitive: fill.primitive,
                flat: fill.flat,
                upper: fill.upper,
            });
        }
        self.state.set_depth_write(true);
        self.state.set_polygon_offset(PolygonOffset::NONE);
    }

    fn draw_list(&mut self, info: &DrawInfo, kind: DrawListKind, pass: DrawPass) {
        let items = info.lists().get(kind);
        if items.is_empty() {
            return;
        }
        self.recorder.push(RenderCommand::BeginList { list: kind, pass });

        if pass == DrawPass::LightsOnly {
            for item in items {
                if let Some(lights) = item.lights {
                    self.recorder.push(RenderCommand::UploadLights {
                        primitive: item.primitive,
                        lights,
                    });
                }
            }
            return;
        }

        for item in items {
            if pass == DrawPass::Translucent {
                self.state.set_blend(match item.style {
                    RenderStyle::Additive { .. } => BlendFunc::ADDITIVE,
                    _ => BlendFunc::ALPHA,
                });
            }
            self.state.set_soft_light_level(item.fullbright.then_some(255));
            self.state.apply(&mut self.recorder);
            self.recorder.push(RenderCommand::Draw {
                list: kind,
                primitive: item.primitive,
                binding: item.binding,
                lights: item.lights,
            });
        }
        self.state.set_soft_light_level(None);
    }

    fn draw_sky<D: RenderDevice>(&mut self, portal: &PendingPortal, res: &mut FrameResources<'_, D>) {
        let PortalSurface::Sky { texture } = portal.surface else {
            return;
        };
        let binding = res.material_binding(texture, ClampMode::Normal, Translation::None);
        self.state.apply(&mut self.recorder);
        self.recorder.push(RenderCommand::DrawSky { binding });
    }

    // ========================================================================
    // Ambient Occlusion
    // ========================================================================

    fn ambient_occlusion(&mut self, info: &DrawInfo) {
        self.state.set_draw_buffers(1);
        self.state.apply(&mut self.recorder);
        self.recorder.push(RenderCommand::AmbientOcclusion {
            focal_length: info.uniforms().projection.y_axis.y,
        });
        self.recorder.push(RenderCommand::BindSceneFramebuffer {
            pass_type: PassType::GBuffer,
        });
        self.state.set_draw_buffers(PassType::GBuffer.draw_buffer_count());
        self.state.apply(&mut self.recorder);
        self.apply_matrices(info.uniforms());
    }

    // ========================================================================
    // Portals
    // ========================================================================

    fn render_portals<D: RenderDevice>(&mut self, info: &DrawInfo, res: &mut FrameResources<'_, D>) -> Result<()> {
        let first_sky = Self::first_sky_index(info, res.settings);

        for (index, portal) in info.portals().iter().enumerate() {
            if Some(index) == first_sky {
                continue;
            }
            if portal.is_sky() {
                self.draw_sky(portal, res);
                continue;
            }
            if info.config().current_portal == Some(portal.key) {
                continue;
            }
            if !self.portals.can_enter() {
                log::debug!(
                    "Portal {:?} skipped: recursion limit {} reached",
                    portal.key,
                    self.portals.max_depth()
                );
                self.stats.portals_skipped += 1;
                continue;
            }
            let Some(view) = portal.nested_view(info.config()) else {
                continue;
            };
            self.render_portal(portal, view, info, res)?;
        }
        Ok(())
    }

    fn render_portal<D: RenderDevice>(
        &mut self,
        portal: &PendingPortal,
        view: ViewConfig,
        info: &DrawInfo,
        res: &mut FrameResources<'_, D>,
    ) -> Result<()> {
        let outer_level = self.stencil_level;
        let level = outer_level + 1;
        self.portals.push(ViewSnapshot {
            uniforms: *info.uniforms(),
            state: self.state.snapshot(),
            stencil_level: outer_level,
        });

        self.recorder.push(RenderCommand::PortalBegin {
            portal: portal.key,
            level,
        });
        self.mark_portal_surfaces(portal, outer_level, StencilOp::Increment, level, false);

        // The nested view starts from far depth inside the marked region.
        self.stencil_level = level;
        self.state.set_stencil(StencilState::equal(level));
        self.state.set_depth_func(CompareOp::Always);
        self.state.set_depth_write(true);
        self.state.apply(&mut self.recorder);
        self.recorder.push(RenderCommand::ClearPortalDepth { level });

        self.state.set_depth_func(CompareOp::Less);
        self.state.set_color_write(true);
        self.stats.portals_rendered += 1;

        let result = self.process_view(res, view, &mut |_| {});

        self.recorder.push(RenderCommand::PortalEnd {
            portal: portal.key,
            level,
        });
        // Unmarking writes the portal surfaces' own depth back.
        self.mark_portal_surfaces(portal, level, StencilOp::Decrement, outer_level, true);

        if let Some(snapshot) = self.portals.pop() {
            self.state.restore(snapshot.state);
            self.stencil_level = snapshot.stencil_level;
            self.apply_matrices(&snapshot.uniforms);
            self.state.apply(&mut self.recorder);
        }
        result
    }

    /// Draws the portal's surfaces into the stencil buffer, and into the
    /// depth buffer when `write_depth` is set. Color is never written.
    fn mark_portal_surfaces(
        &mut self,
        portal: &PendingPortal,
        reference: u32,
        op: StencilOp,
        level: u32,
        write_depth: bool,
    ) {
        self.state.set_stencil(StencilState {
            enabled: true,
            compare: CompareOp::Equal,
            reference,
            pass_op: op,
            ..StencilState::default()
        });
        self.state.set_color_write(false);
        self.state.set_depth_write(write_depth);
        // The nested view left its own depth in the region.
        self.state
            .set_depth_func(if write_depth { CompareOp::Always } else { CompareOp::Less });
        self.state.apply(&mut self.recorder);
        for &primitive in &portal.primitives {
            self.recorder.push(RenderCommand::MarkPortalSurface { primitive, level });
        }
    }

    // ========================================================================
    // Translucent
    // ========================================================================

    /// Border list with depth writes, then the sorted bulk without.
    pub fn render_translucent(&mut self, info: &DrawInfo, settings: &RendererSettings) {
        self.state.set_alpha_threshold(settings.mask_sprite_threshold);
        self.state.set_blend(BlendFunc::ALPHA);
        self.state.enable_brightmaps(true);
        self.draw_list(info, DrawListKind::TranslucentBorder, DrawPass::Translucent);

        self.state.set_depth_write(false);
        self.draw_list(info, DrawListKind::Translucent, DrawPass::Translucent);

        self.state.enable_brightmaps(false);
        self.state.set_blend(BlendFunc::ALPHA);
        self.state.set_alpha_threshold(0.5);
        self.state.set_depth_write(true);
    }

    // ========================================================================
    // End Of Scene
    // ========================================================================

    /// HUD models and the state reset that precedes 2D drawing.
    pub fn end_draw_scene<D: RenderDevice>(&mut self, info: &DrawInfo, res: &mut FrameResources<'_, D>) {
        self.state.enable_fog(false);

        let models: Vec<&HudSprite> = info.hud_sprites().iter().filter(|s| s.model).collect();
        if !models.is_empty() {
            self.state.set_depth_test(true);
            self.state.set_depth_write(true);
            self.state.apply(&mut self.recorder);
            self.recorder.push(RenderCommand::ClearDepth);
            for sprite in models {
                let binding = Self::hud_binding(sprite, res);
                self.recorder.push(RenderCommand::DrawHudSprite {
                    owner: sprite.owner,
                    binding,
                    model: true,
                    light_level: sprite.light_level,
                });
            }
        }

        self.state.set_stencil(StencilState::default());
        self.recorder.push(RenderCommand::SetViewport(self.screen));
        self.state.set_blend(BlendFunc::ALPHA);
        self.state.enable_texture(true);
        self.state.set_scissor(None);
        self.state.apply(&mut self.recorder);
    }

    fn hud_binding<D: RenderDevice>(sprite: &HudSprite, res: &mut FrameResources<'_, D>) -> Option<BindlessIndex> {
        sprite
            .material
            .and_then(|m| res.material_binding(m, ClampMode::ClampXYNoMip, sprite.translation))
    }

    fn post_process<D: RenderDevice>(
        &mut self,
        info: &DrawInfo,
        res: &mut FrameResources<'_, D>,
        overlay: &mut dyn FnMut(&mut CommandRecorder),
    ) {
        let sprites: Vec<(&HudSprite, Option<BindlessIndex>)> = info
            .hud_sprites()
            .iter()
            .filter(|s| !s.model)
            .map(|s| (s, Self::hud_binding(s, res)))
            .collect();
        let screen = self.screen;
        let state = &mut self.state;
        let mut uniforms = self.uniforms;

        self.post.post_process_scene(
            &mut self.recorder,
            res.settings,
            info.config().fullbright,
            |recorder| {
                uniforms = Self::draw_end_scene_2d(state, recorder, &sprites, screen);
                overlay(recorder);
            },
        );
        self.uniforms = uniforms;
    }

    /// Orthographic overlay: 2D weapon sprites and the standard 2D state.
    fn draw_end_scene_2d(
        state: &mut RenderStateTracker,
        recorder: &mut CommandRecorder,
        sprites: &[(&HudSprite, Option<BindlessIndex>)],
        screen: Rect,
    ) -> ViewUniforms {
        let mut uniforms = ViewUniforms::default();
        uniforms.set_ortho(screen.width as f32, screen.height as f32);
        recorder.push(RenderCommand::SetMatrices {
            projection: uniforms.projection,
            view: uniforms.view,
        });
        recorder.push(RenderCommand::SetClipPlane(None));

        state.set_depth_test(false);
        state.enable_multisample(false);
        for (sprite, binding) in sprites {
            state.set_blend(match sprite.style {
                RenderStyle::Additive { .. } => BlendFunc::ADDITIVE,
                _ => BlendFunc::ALPHA,
            });
            state.apply(recorder);
            recorder.push(RenderCommand::DrawHudSprite {
                owner: sprite.owner,
                binding: *binding,
                model: false,
                light_level: sprite.light_level,
            });
        }

        state.set_soft_light_level(None);
        state.set_blend(BlendFunc::ALPHA);
        state.enable_texture(true);
        state.set_scissor(None);
        state.apply(recorder);
        uniforms
    }
}
