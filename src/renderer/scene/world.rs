//! World Collaborator Interface
//!
//! The renderer does not own the world. Visibility (BSP traversal, clipping
//! of occluded partitions) and game state live upstream and are reached
//! through [`WorldView`]. Per view, the world reports which spatial
//! partitions are potentially visible and the primitives inside them. The
//! scene builder classifies those primitives into draw-lists.
//!
//! Everything here is read-only from the renderer's side.

use bitflags::bitflags;
use glam::{Vec3, Vec4};

use crate::renderer::lights::DynamicLight;
use crate::renderer::material::MaterialId;
use crate::renderer::samplers::ClampMode;
use crate::renderer::texture::Translation;

use super::hud::HudSprite;
use super::viewpoint::Viewpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PartitionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimitiveId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectorId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortalGroupId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u32);

/// Bounding sphere in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub center: Vec3,
    pub radius: f32,
}

impl Bounds {
    #[must_use]
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::new(Vec3::ZERO, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Wall,
    Flat { ceiling: bool },
    Sprite,
    Model,
    /// Decal stuck onto a wall.
    Decal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderStyle {
    Opaque,
    /// Alpha-tested against the mask threshold.
    Masked,
    Translucent { alpha: f32 },
    Additive { alpha: f32 },
}

impl RenderStyle {
    #[inline]
    #[must_use]
    pub fn is_translucent(self) -> bool {
        matches!(self, Self::Translucent { .. } | Self::Additive { .. })
    }
}

bitflags! {
    /// Per-actor render flags owned by game state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ActorRenderFlags: u32 {
        const INVISIBLE         = 1 << 0;
        const FULLBRIGHT        = 1 << 1;
        const NO_DYNAMIC_LIGHTS = 1 << 2;
        /// Only visible through mirrors.
        const MIRROR_ONLY       = 1 << 3;
        /// Hidden in mirrors.
        const NO_MIRROR         = 1 << 4;
    }
}

bitflags! {
    /// Wall parts whose texture is missing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MissingTexture: u8 {
        const UPPER = 1 << 0;
        const LOWER = 1 << 1;
    }
}

/// A surface through which another view is visible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PortalSurface {
    /// Mirror on a wall. `plane` is `(normal, d)` with `normal · p + d = 0`.
    Mirror { plane: Vec4 },
    /// Reflective floor or ceiling at `height`.
    PlaneMirror { height: f32, ceiling: bool },
    /// Skybox viewpoint actor.
    Skybox { viewpoint: ActorId, origin: Vec3 },
    Sky { texture: MaterialId },
    /// Linked line portal.
    LineToLine { group: PortalGroupId, displacement: Vec3 },
    /// Stacked sector seen through a floor or ceiling.
    SectorStack { group: PortalGroupId, displacement: Vec3 },
}

/// One primitive reported visible by the world.
#[derive(Debug, Clone, PartialEq)]
pub struct VisiblePrimitive {
    pub id: PrimitiveId,
    pub kind: PrimitiveKind,
    pub material: Option<MaterialId>,
    pub clamp_mode: ClampMode,
    pub translation: Translation,
    pub style: RenderStyle,
    pub bounds: Bounds,
    /// Caller-supplied distance key for translucent sorting. Falls back to
    /// the distance from the viewer.
    pub sort_depth: Option<f32>,
    pub actor: Option<ActorId>,
    pub front_sector: Option<SectorId>,
    pub back_sector: Option<SectorId>,
    pub missing: MissingTexture,
    pub portal: Option<PortalSurface>,
    /// Masked wall drawn with a depth bias.
    pub polygon_offset: bool,
    pub translucent_border: bool,
    /// Flat belonging to an open-sector hack. Drawn only if this partition
    /// was visited in the same build.
    pub hack_partition: Option<PartitionId>,
}

impl VisiblePrimitive {
    #[must_use]
    pub fn new(id: PrimitiveId, kind: PrimitiveKind) -> Self {
        Self {
            id,
            kind,
            material: None,
            clamp_mode: ClampMode::Normal,
            translation: Translation::None,
            style: RenderStyle::Opaque,
            bounds: Bounds::default(),
            sort_depth: None,
            actor: None,
            front_sector: None,
            back_sector: None,
            missing: MissingTexture::empty(),
            portal: None,
            polygon_offset: false,
            translucent_border: false,
            hack_partition: None,
        }
    }

    #[must_use]
    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.material = Some(material);
        self
    }

    #[must_use]
    pub fn with_style(mut self, style: RenderStyle) -> Self {
        self.style = style;
        self
    }

    #[must_use]
    pub fn with_bounds(mut self, center: Vec3, radius: f32) -> Self {
        self.bounds = Bounds::new(center, radius);
        self
    }

    #[must_use]
    pub fn with_portal(mut self, portal: PortalSurface) -> Self {
        self.portal = Some(portal);
        self
    }

    #[must_use]
    pub fn with_sort_depth(mut self, depth: f32) -> Self {
        self.sort_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }

    #[must_use]
    pub fn with_missing(mut self, missing: MissingTexture, back_sector: SectorId) -> Self {
        self.missing = missing;
        self.back_sector = Some(back_sector);
        self
    }
}

/// A spatial partition and its primitives.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisiblePartition {
    pub id: PartitionId,
    pub portal_group: Option<PortalGroupId>,
    pub primitives: Vec<VisiblePrimitive>,
}

/// Read-only access to world state for one frame.
pub trait WorldView {
    /// Partitions potentially visible from `view`, in traversal order. A
    /// partition may be reported more than once; it is processed once.
    fn visible_partitions<'a>(
        &'a self,
        view: &Viewpoint,
    ) -> Box<dyn Iterator<Item = &'a VisiblePartition> + 'a>;

    /// Half-angle in degrees of the horizontal range worth traversing.
    /// 180 or more disables frustum culling.
    fn frustum_angle(&self, view: &Viewpoint) -> f32 {
        view.fov * 0.5
    }

    fn dynamic_lights(&self) -> &[DynamicLight] {
        &[]
    }

    /// Floor or ceiling material of a sector.
    fn sector_flat(&self, _sector: SectorId, _ceiling: bool) -> Option<MaterialId> {
        None
    }

    /// Sprites behind a portal that overlap its surface.
    fn portal_attached(&self, _group: PortalGroupId) -> &[VisiblePrimitive] {
        &[]
    }

    fn actor_flags(&self, _actor: ActorId) -> ActorRenderFlags {
        ActorRenderFlags::empty()
    }

    /// Weapon sprites of the viewing player.
    fn hud_sprites(&self) -> Vec<HudSprite> {
        Vec::new()
    }
}
