//! Portals
//!
//! # Design
//!
//! A portal is a surface through which a second view is rendered: mirrors,
//! reflective planes, skyboxes, linked lines and stacked sectors. The scene
//! builder collects the portal surfaces it meets into [`PendingPortal`]s,
//! one per [`PortalKey`], so several wall segments of the same mirror share
//! one nested view.
//!
//! The renderer resolves portals after the opaque passes. For each one it
//! pushes a [`ViewSnapshot`] of the outer view onto the [`PortalStack`],
//! marks the portal's surfaces in the stencil buffer, renders the nested
//! view clipped to that stencil level, and pops the snapshot. The pop
//! restores matrices, pipeline state and stencil level verbatim, so the
//! outer view continues as if nothing happened.

use glam::{Vec3, Vec4};

use crate::renderer::material::MaterialId;
use crate::renderer::state::PipelineState;

use super::draw_info::{DrawMode, ViewConfig};
use super::viewpoint::{to_render_space, ViewUniforms};
use super::world::{ActorId, PortalGroupId, PortalSurface, PrimitiveId};

/// Identity of a portal. Surfaces with equal keys share a nested view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortalKey {
    Mirror(PrimitiveId),
    PlaneMirror { ceiling: bool, height_bits: u32 },
    Skybox(ActorId),
    Sky(MaterialId),
    LineToLine(PortalGroupId),
    SectorStack(PortalGroupId),
}

impl PortalSurface {
    /// Key of this surface when it belongs to `primitive`.
    #[must_use]
    pub fn key(&self, primitive: PrimitiveId) -> PortalKey {
        match *self {
            Self::Mirror { .. } => PortalKey::Mirror(primitive),
            Self::PlaneMirror { height, ceiling } => PortalKey::PlaneMirror {
                ceiling,
                height_bits: height.to_bits(),
            },
            Self::Skybox { viewpoint, .. } => PortalKey::Skybox(viewpoint),
            Self::Sky { texture } => PortalKey::Sky(texture),
            Self::LineToLine { group, .. } => PortalKey::LineToLine(group),
            Self::SectorStack { group, .. } => PortalKey::SectorStack(group),
        }
    }
}

/// A portal discovered during scene building.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPortal {
    pub key: PortalKey,
    pub surface: PortalSurface,
    /// Surfaces that are stencil-marked before the nested view is drawn.
    pub primitives: Vec<PrimitiveId>,
}

impl PendingPortal {
    #[must_use]
    pub fn new(key: PortalKey, surface: PortalSurface, primitive: PrimitiveId) -> Self {
        Self {
            key,
            surface,
            primitives: vec![primitive],
        }
    }

    #[inline]
    #[must_use]
    pub fn is_sky(&self) -> bool {
        matches!(self.key, PortalKey::Sky(_))
    }

    /// View configuration seen through this portal, or `None` for portals
    /// drawn without a nested scene (plain skies).
    #[must_use]
    pub fn nested_view(&self, outer: &ViewConfig) -> Option<ViewConfig> {
        let mut view = outer.clone();
        view.mode = DrawMode::Portal;
        view.current_portal = Some(self.key);
        view.recursion = outer.recursion + 1;

        let eye = outer.viewpoint.position;
        match self.surface {
            PortalSurface::Sky { .. } => return None,
            PortalSurface::Mirror { plane } => {
                let normal = plane.truncate();
                let side = normal.dot(eye) + plane.w;
                view.viewpoint.position = eye - 2.0 * side * normal;

                let forward = outer.viewpoint.forward();
                let reflected = forward - 2.0 * normal.dot(forward) * normal;
                view.viewpoint.angles.yaw = reflected.y.atan2(reflected.x).to_degrees();
                view.viewpoint.angles.roll = -outer.viewpoint.angles.roll;

                view.mirror = !outer.mirror;
                // Keep the viewer's side of the mirror.
                let sign = if side < 0.0 { -1.0 } else { 1.0 };
                view.clip_plane = Some(render_plane(normal * sign, plane.w * sign));
            }
            PortalSurface::PlaneMirror { height, ceiling } => {
                view.viewpoint.position.z = 2.0 * height - eye.z;
                view.viewpoint.angles.pitch = -outer.viewpoint.angles.pitch;
                view.plane_mirror = !outer.plane_mirror;
                view.clip_plane = Some(if ceiling {
                    render_plane(Vec3::NEG_Z, height)
                } else {
                    render_plane(Vec3::Z, -height)
                });
            }
            PortalSurface::Skybox { origin, .. } => {
                view.viewpoint.position = origin;
                view.clip_plane = None;
            }
            PortalSurface::LineToLine { displacement, .. }
            | PortalSurface::SectorStack { displacement, .. } => {
                view.viewpoint.position = eye + displacement;
                view.clip_plane = None;
            }
        }
        Some(view)
    }
}

/// World-space plane `(normal, d)` expressed in render space.
fn render_plane(normal: Vec3, d: f32) -> Vec4 {
    to_render_space(normal).extend(d)
}

// ============================================================================
// Recursion Stack
// ============================================================================

/// Outer-view state saved across one nested portal render.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub uniforms: ViewUniforms,
    pub state: PipelineState,
    pub stencil_level: u32,
}

#[derive(Debug)]
pub struct PortalStack {
    stack: Vec<ViewSnapshot>,
    max_depth: u32,
}

impl PortalStack {
    #[must_use]
    pub fn new(max_depth: u32) -> Self {
        Self {
            stack: Vec::with_capacity(max_depth as usize),
            max_depth,
        }
    }

    #[inline]
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.stack.len() as u32
    }

    #[inline]
    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn set_max_depth(&mut self, max_depth: u32) {
        self.max_depth = max_depth;
    }

    /// `true` when another level may be entered.
    #[inline]
    #[must_use]
    pub fn can_enter(&self) -> bool {
        self.depth() < self.max_depth
    }

    pub fn push(&mut self, snapshot: ViewSnapshot) {
        self.stack.push(snapshot);
    }

    pub fn pop(&mut self) -> Option<ViewSnapshot> {
        self.stack.pop()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}
