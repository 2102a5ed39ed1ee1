//! Per-view scene building
//!
//! - [`world`]: the read-only world interface and the primitives it reports
//! - [`viewpoint`]: camera, view/projection matrices and frustum
//! - [`draw_list`]: classification into the fixed set of draw-lists
//! - [`portal`]: portal keys, nested views and the recursion stack
//! - [`hud`]: player weapon sprites
//! - [`draw_info`]: the per-view state machine and scene builder

pub mod draw_info;
pub mod draw_list;
pub mod hud;
pub mod portal;
pub mod viewpoint;
pub mod world;

pub use draw_info::{
    DrawInfo, DrawInfoPool, DrawInfoState, DrawMode, MissingFill, SceneContext, SceneStats,
    ViewConfig, VisitMarks,
};
pub use draw_list::{classify, Bucket, DrawItem, DrawListKind, DrawLists};
pub use hud::{prepare_player_sprites, HudSprite};
pub use portal::{PendingPortal, PortalKey, PortalStack, ViewSnapshot};
pub use viewpoint::{Frustum, Rotator, ViewUniforms, Viewpoint};
pub use world::{
    ActorId, ActorRenderFlags, Bounds, MissingTexture, PartitionId, PortalGroupId, PortalSurface,
    PrimitiveId, PrimitiveKind, RenderStyle, SectorId, VisiblePartition, VisiblePrimitive,
    WorldView,
};
