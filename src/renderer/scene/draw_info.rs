//! Draw Info (per-view scene builder)
//!
//! A [`DrawInfo`] holds everything one view needs: its camera and matrices,
//! the draw-lists built from the world, the portals found while building
//! them, and the missing-texture fills and HUD sprites to draw afterwards.
//! One instance exists per view (main view, each portal level, each stereo
//! eye). Instances are recycled through [`DrawInfoPool`].
//!
//! # Lifecycle
//!
//! ```text
//! Created ─configure─▶ ViewConfigured ─create_scene─▶ SceneBuilt
//!                                                         │
//!    ▲                                             begin_rendering
//!    │ pool release                                       ▼
//!  Ended ◀──────────────────end─────────────────────── Rendering
//! ```
//!
//! Transitions are checked; driving an instance out of order returns
//! [`StrataError::InvalidTransition`]. [`DrawInfo::abandon`] jumps to
//! `Ended` from any state and discards partial results.
//!
//! # Data flow
//!
//! `create_scene` walks the partitions reported by the [`WorldView`]. A
//! per-frame [`VisitMarks`] (passed in, never global) ensures each
//! partition is processed once per build. After the walk, the deferred
//! passes run in a fixed order:
//!
//! 1. sprites attached to the portal currently being rendered
//! 2. open-sector hack flats, kept only if their partition was visited
//! 3. missing upper/lower textures, flooded with the back sector's flat
//! 4. stacked sectors, merged into one portal per group in ascending order

use std::collections::BTreeMap;

use glam::{Mat4, Vec4};
use rustc_hash::FxHashMap;

use crate::errors::{Result, StrataError};
use crate::renderer::core::{BindlessIndex, RenderDevice};
use crate::renderer::lights::{LightBuffer, LightCollection};
use crate::renderer::material::{BindingContext, MaterialCache};
use crate::renderer::samplers::ClampMode;
use crate::renderer::settings::RendererSettings;
use crate::renderer::texture::Translation;

use super::draw_list::{classify, DrawItem, DrawLists};
use super::hud::{prepare_player_sprites, HudSprite};
use super::portal::{PendingPortal, PortalKey};
use super::viewpoint::{perspective, to_render_space, Frustum, ViewUniforms, Viewpoint};
use super::world::{
    ActorRenderFlags, MissingTexture, PartitionId, PortalGroupId, PortalSurface, PrimitiveId,
    SectorId, VisiblePrimitive, WorldView,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DrawInfoState {
    Created,
    ViewConfigured,
    SceneBuilt,
    Rendering,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawMode {
    MainView,
    /// Camera textures and other views that are not presented directly.
    Offscreen,
    Portal,
}

/// Caller-supplied description of one view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewConfig {
    pub viewpoint: Viewpoint,
    pub projection: Mat4,
    pub mode: DrawMode,
    pub mirror: bool,
    pub plane_mirror: bool,
    /// Ignore sector lighting and dynamic lights.
    pub fullbright: bool,
    pub clip_plane: Option<Vec4>,
    pub current_portal: Option<PortalKey>,
    pub recursion: u32,
}

impl ViewConfig {
    /// Main view with a 4:3 projection.
    #[must_use]
    pub fn new(viewpoint: Viewpoint) -> Self {
        Self {
            viewpoint,
            projection: perspective(viewpoint.fov, 4.0 / 3.0, 4.0 / 3.0, 5.0, 65536.0, 0.0),
            mode: DrawMode::MainView,
            mirror: false,
            plane_mirror: false,
            fullbright: false,
            clip_plane: None,
            current_portal: None,
            recursion: 0,
        }
    }

    #[must_use]
    pub fn with_projection(mut self, projection: Mat4) -> Self {
        self.projection = projection;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: DrawMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A missing wall texture to be flooded with a sector flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingFill {
    pub primitive: PrimitiveId,
    pub back_sector: SectorId,
    pub upper: bool,
    pub flat: Option<BindlessIndex>,
}

/// Counters of one scene build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneStats {
    pub partitions: u32,
    pub primitives: u32,
    pub culled: u32,
    pub hidden: u32,
    pub portals: u32,
}

// ============================================================================
// Visit Marks
// ============================================================================

/// Per-frame "already processed" markers.
///
/// Each build takes a fresh stamp; a partition is marked by writing the
/// current stamp, so starting a new build never has to clear the map.
#[derive(Debug, Default)]
pub struct VisitMarks {
    stamp: u32,
    partitions: FxHashMap<PartitionId, u32>,
    groups: FxHashMap<PortalGroupId, u32>,
}

impl VisitMarks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new build. Marks of earlier builds become stale.
    pub fn next_build(&mut self) {
        self.stamp = self.stamp.wrapping_add(1);
        if self.stamp == 0 {
            self.partitions.clear();
            self.groups.clear();
            self.stamp = 1;
        }
    }

    /// Marks `partition`. Returns `false` if it was already marked in this build.
    pub fn mark_partition(&mut self, partition: PartitionId) -> bool {
        self.partitions.insert(partition, self.stamp) != Some(self.stamp)
    }

    #[must_use]
    pub fn is_partition_marked(&self, partition: PartitionId) -> bool {
        self.partitions.get(&partition) == Some(&self.stamp)
    }

    /// Claims a portal group for this build. Returns `false` if another
    /// surface already owns it.
    pub fn claim_group(&mut self, group: PortalGroupId) -> bool {
        self.groups.insert(group, self.stamp) != Some(self.stamp)
    }
}

/// Everything a scene build reads or fills besides the draw info itself.
pub struct SceneContext<'a, D: RenderDevice> {
    pub world: &'a dyn WorldView,
    pub bindings: BindingContext<'a, D>,
    pub materials: &'a mut MaterialCache,
    pub lights: &'a mut LightCollection,
    pub light_buffer: &'a mut LightBuffer,
    pub marks: &'a mut VisitMarks,
    pub settings: &'a RendererSettings,
}

// ============================================================================
// Draw Info
// ============================================================================

#[derive(Debug)]
pub struct DrawInfo {
    state: DrawInfoState,
    config: ViewConfig,
    uniforms: ViewUniforms,
    frustum: Frustum,
    lists: DrawLists,
    portals: Vec<PendingPortal>,
    missing_walls: Vec<(PrimitiveId, SectorId, MissingTexture)>,
    missing: Vec<MissingFill>,
    hud_sprites: Vec<HudSprite>,
    stats: SceneStats,
}

impl Default for DrawInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawInfo {
    #[must_use]
    pub fn new() -> Self {
        let config = ViewConfig::new(Viewpoint::default());
        Self {
            state: DrawInfoState::Created,
            frustum: Frustum::from_matrix(config.projection),
            config,
            uniforms: ViewUniforms::default(),
            lists: DrawLists::new(),
            portals: Vec::new(),
            missing_walls: Vec::new(),
            missing: Vec::new(),
            hud_sprites: Vec::new(),
            stats: SceneStats::default(),
        }
    }

    fn transition(&mut self, from: DrawInfoState, to: DrawInfoState) -> Result<()> {
        if self.state != from {
            return Err(StrataError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Sets matrices and view flags.
    pub fn configure(&mut self, config: ViewConfig) -> Result<()> {
        self.transition(DrawInfoState::Created, DrawInfoState::ViewConfigured)?;
        let vp = &config.viewpoint;
        self.uniforms.set_view_matrix(
            vp.hw_angles(),
            vp.position,
            vp.pixel_stretch,
            config.mirror,
            config.plane_mirror,
        );
        self.uniforms.projection = config.projection;
        self.uniforms.clip_plane = config.clip_plane;
        self.frustum = Frustum::from_matrix(self.uniforms.view_projection());
        self.config = config;
        Ok(())
    }

    /// Walks the world and fills the draw-lists.
    pub fn create_scene<D: RenderDevice>(&mut self, ctx: &mut SceneContext<'_, D>) -> Result<()> {
        self.transition(DrawInfoState::ViewConfigured, DrawInfoState::SceneBuilt)?;
        ctx.marks.next_build();

        let world = ctx.world;
        let viewpoint = self.config.viewpoint;
        let cull = world.frustum_angle(&viewpoint) < 180.0;
        let mut hacked: Vec<&VisiblePrimitive> = Vec::new();
        let mut stacks: BTreeMap<PortalGroupId, PendingPortal> = BTreeMap::new();

        for partition in world.visible_partitions(&viewpoint) {
            if !ctx.marks.mark_partition(partition.id) {
                continue;
            }
            self.stats.partitions += 1;
            for primitive in &partition.primitives {
                if primitive.hack_partition.is_some() {
                    hacked.push(primitive);
                } else {
                    self.process_primitive(primitive, cull, ctx, &mut stacks);
                }
            }
        }

        // Sprites standing in the portal we are looking through.
        if let Some(PortalKey::LineToLine(group) | PortalKey::SectorStack(group)) = self.config.current_portal {
            for primitive in world.portal_attached(group) {
                self.process_primitive(primitive, cull, ctx, &mut stacks);
            }
        }

        for primitive in hacked {
            let visited = primitive
                .hack_partition
                .is_some_and(|p| ctx.marks.is_partition_marked(p));
            if visited {
                self.process_primitive(primitive, cull, ctx, &mut stacks);
            }
        }

        // After the hacked primitives, whose gaps need filling too.
        self.resolve_missing_textures(ctx);

        for (group, portal) in stacks {
            if ctx.marks.claim_group(group) {
                self.portals.push(portal);
            }
        }
        self.stats.portals = self.portals.len() as u32;

        if ctx.settings.sort_textures {
            self.lists.sort_by_texture();
        }
        self.lists.sort_translucent();

        if self.config.mode == DrawMode::MainView {
            self.hud_sprites = prepare_player_sprites(world.hud_sprites(), self.config.fullbright);
        }

        log::trace!(
            "Scene built: {} partitions, {} primitives, {} culled, {} portals",
            self.stats.partitions,
            self.stats.primitives,
            self.stats.culled,
            self.stats.portals
        );
        Ok(())
    }

    fn process_primitive<D: RenderDevice>(
        &mut self,
        primitive: &VisiblePrimitive,
        cull: bool,
        ctx: &mut SceneContext<'_, D>,
        stacks: &mut BTreeMap<PortalGroupId, PendingPortal>,
    ) {
        let world = ctx.world;
        let mut fullbright = self.config.fullbright;
        let mut no_lights = false;
        if let Some(actor) = primitive.actor {
            let flags = world.actor_flags(actor);
            let hidden = flags.contains(ActorRenderFlags::INVISIBLE)
                || (self.config.mirror && flags.contains(ActorRenderFlags::NO_MIRROR))
                || (!self.config.mirror && flags.contains(ActorRenderFlags::MIRROR_ONLY));
            if hidden {
                self.stats.hidden += 1;
                return;
            }
            fullbright |= flags.contains(ActorRenderFlags::FULLBRIGHT);
            no_lights = flags.contains(ActorRenderFlags::NO_DYNAMIC_LIGHTS);
        }

        if cull && !self.frustum.intersects_bounds(&primitive.bounds) {
            self.stats.culled += 1;
            return;
        }
        if let Some(plane) = self.config.clip_plane {
            let center = to_render_space(primitive.bounds.center);
            if plane.truncate().dot(center) + plane.w < -primitive.bounds.radius {
                self.stats.culled += 1;
                return;
            }
        }

        if let Some(surface) = primitive.portal {
            self.add_portal(surface, primitive.id, stacks);
            return;
        }

        if !primitive.missing.is_empty()
            && let Some(back) = primitive.back_sector
        {
            self.missing_walls.push((primitive.id, back, primitive.missing));
        }

        let binding = primitive.material.and_then(|m| {
            ctx.materials
                .descriptor(m, primitive.clamp_mode, primitive.translation, &mut ctx.bindings)
        });

        let world_lights = world.dynamic_lights();
        let lights = if fullbright || no_lights || world_lights.is_empty() {
            None
        } else {
            ctx.lights.begin();
            ctx.lights.gather(world_lights, &primitive.bounds);
            ctx.lights.finish();
            ctx.light_buffer.upload(ctx.lights)
        };

        let depth = primitive
            .sort_depth
            .unwrap_or_else(|| primitive.bounds.center.distance(self.config.viewpoint.position));

        self.lists.push(
            classify(primitive),
            DrawItem {
                primitive: primitive.id,
                kind: primitive.kind,
                material: primitive.material,
                binding,
                lights,
                depth,
                style: primitive.style,
                bounds: primitive.bounds,
                fullbright,
            },
        );
        self.stats.primitives += 1;
    }

    fn add_portal(
        &mut self,
        surface: PortalSurface,
        primitive: PrimitiveId,
        stacks: &mut BTreeMap<PortalGroupId, PendingPortal>,
    ) {
        let key = surface.key(primitive);
        if self.config.current_portal == Some(key) {
            return;
        }
        if let PortalSurface::SectorStack { group, .. } = surface {
            stacks
                .entry(group)
                .or_insert_with(|| PendingPortal {
                    key,
                    surface,
                    primitives: Vec::new(),
                })
                .primitives
                .push(primitive);
            return;
        }
        match self.portals.iter_mut().find(|p| p.key == key) {
            Some(portal) => portal.primitives.push(primitive),
            None => self.portals.push(PendingPortal::new(key, surface, primitive)),
        }
    }

    fn resolve_missing_textures<D: RenderDevice>(&mut self, ctx: &mut SceneContext<'_, D>) {
        for (primitive, back_sector, missing) in self.missing_walls.drain(..) {
            for (part, upper) in [(MissingTexture::UPPER, true), (MissingTexture::LOWER, false)] {
                if !missing.contains(part) {
                    continue;
                }
                let flat = ctx.world.sector_flat(back_sector, upper).and_then(|m| {
                    ctx.materials
                        .descriptor(m, ClampMode::Normal, Translation::None, &mut ctx.bindings)
                });
                self.missing.push(MissingFill {
                    primitive,
                    back_sector,
                    upper,
                    flat,
                });
            }
        }
    }

    pub fn begin_rendering(&mut self) -> Result<()> {
        self.transition(DrawInfoState::SceneBuilt, DrawInfoState::Rendering)
    }

    pub fn end(&mut self) -> Result<()> {
        self.transition(DrawInfoState::Rendering, DrawInfoState::Ended)
    }

    /// Drops partial results and ends the instance, whatever its state.
    pub fn abandon(&mut self) {
        if self.state != DrawInfoState::Ended {
            log::debug!("Draw info abandoned in state {:?}", self.state);
        }
        self.clear_scene();
        self.state = DrawInfoState::Ended;
    }

    fn clear_scene(&mut self) {
        self.lists.clear();
        self.portals.clear();
        self.missing_walls.clear();
        self.missing.clear();
        self.hud_sprites.clear();
        self.stats = SceneStats::default();
    }

    /// Returns an ended instance to `Created`, keeping list storage.
    fn recycle(&mut self) {
        self.clear_scene();
        self.uniforms = ViewUniforms::default();
        self.state = DrawInfoState::Created;
    }

    // --- Accessors ---

    #[inline]
    #[must_use]
    pub fn state(&self) -> DrawInfoState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn uniforms(&self) -> &ViewUniforms {
        &self.uniforms
    }

    #[inline]
    #[must_use]
    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    #[inline]
    #[must_use]
    pub fn lists(&self) -> &DrawLists {
        &self.lists
    }

    #[inline]
    #[must_use]
    pub fn portals(&self) -> &[PendingPortal] {
        &self.portals
    }

    #[inline]
    #[must_use]
    pub fn missing_fills(&self) -> &[MissingFill] {
        &self.missing
    }

    #[inline]
    #[must_use]
    pub fn hud_sprites(&self) -> &[HudSprite] {
        &self.hud_sprites
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> SceneStats {
        self.stats
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Recycles ended draw infos so their list storage is reused.
#[derive(Debug, Default)]
pub struct DrawInfoPool {
    free: Vec<DrawInfo>,
    outstanding: usize,
    allocated: usize,
}

impl DrawInfoPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A draw info in the `Created` state.
    pub fn acquire(&mut self) -> DrawInfo {
        self.outstanding += 1;
        self.free.pop().unwrap_or_else(|| {
            self.allocated += 1;
            DrawInfo::new()
        })
    }

    /// Takes back an instance. Unfinished instances are abandoned first.
    pub fn release(&mut self, mut info: DrawInfo) {
        if info.state != DrawInfoState::Ended {
            info.abandon();
        }
        info.recycle();
        self.outstanding = self.outstanding.saturating_sub(1);
        self.free.push(info);
    }

    /// Instances handed out and not yet released.
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Instances ever created by this pool.
    #[inline]
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated
    }
}
