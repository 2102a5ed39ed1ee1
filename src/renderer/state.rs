//! Render State Tracking
//!
//! Passes mutate a pending [`PipelineState`] through setters and call
//! [`RenderStateTracker::apply`] before each draw. A `SetState` command is
//! recorded only when the pending state differs from the last applied one,
//! so long runs of draws with identical state cost a single state change.
//!
//! Portal recursion snapshots the pending state before entering a nested
//! view and restores it exactly afterwards.

use crate::renderer::commands::{CommandRecorder, RenderCommand};
use crate::renderer::core::CompareOp;

// ============================================================================
// State Pieces
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    ReverseSubtract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendFunc {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub op: BlendOp,
}

impl BlendFunc {
    /// `(One, Zero)`: the source replaces the destination.
    pub const REPLACE: Self = Self::new(BlendFactor::One, BlendFactor::Zero);
    pub const ALPHA: Self = Self::new(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
    pub const ADDITIVE: Self = Self::new(BlendFactor::SrcAlpha, BlendFactor::One);

    #[must_use]
    pub const fn new(src: BlendFactor, dst: BlendFactor) -> Self {
        Self {
            src,
            dst,
            op: BlendOp::Add,
        }
    }
}

/// Depth bias in the glPolygonOffset convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolygonOffset {
    pub factor: f32,
    pub units: f32,
}

impl PolygonOffset {
    pub const NONE: Self = Self {
        factor: 0.0,
        units: 0.0,
    };
    /// Pulls decals and offset masked walls towards the viewer.
    pub const PULL: Self = Self {
        factor: -1.0,
        units: -128.0,
    };
    /// Pushes missing-texture floods behind overlapping mid textures.
    pub const PUSH: Self = Self {
        factor: 1.0,
        units: 128.0,
    };

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        *self != Self::NONE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Replace,
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub enabled: bool,
    pub compare: CompareOp,
    pub reference: u32,
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            enabled: false,
            compare: CompareOp::Always,
            reference: 0,
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
        }
    }
}

impl StencilState {
    /// Scene default: always pass, replace on pass.
    #[must_use]
    pub fn scene_default() -> Self {
        Self {
            enabled: true,
            pass_op: StencilOp::Replace,
            ..Self::default()
        }
    }

    /// Only draw where the stencil equals `level`.
    #[must_use]
    pub fn equal(level: u32) -> Self {
        Self {
            enabled: true,
            compare: CompareOp::Equal,
            reference: level,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureMode {
    #[default]
    Modulate,
    /// Texture alpha only, color comes from the vertex.
    Mask,
    /// Ignore texture alpha.
    Opaque,
}

/// Which render target layout the scene pass writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PassType {
    #[default]
    Normal,
    /// Color plus normal/fog targets for ambient occlusion.
    GBuffer,
}

impl PassType {
    #[must_use]
    pub const fn draw_buffer_count(self) -> u32 {
        match self {
            Self::Normal => 1,
            Self::GBuffer => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

// ============================================================================
// Pipeline State
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub depth_test: bool,
    pub depth_func: CompareOp,
    pub depth_write: bool,
    /// Fragments with alpha below this are discarded. 0 disables the test.
    pub alpha_threshold: f32,
    pub blend: BlendFunc,
    pub polygon_offset: PolygonOffset,
    pub stencil: StencilState,
    pub color_write: bool,
    pub fog: bool,
    pub texture: bool,
    pub texture_mode: TextureMode,
    pub brightmaps: bool,
    pub draw_buffers: u32,
    pub pass_type: PassType,
    pub scissor: Option<Rect>,
    pub multisample: bool,
    pub soft_light_level: Option<u8>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_func: CompareOp::Less,
            depth_write: true,
            alpha_threshold: 0.0,
            blend: BlendFunc::ALPHA,
            polygon_offset: PolygonOffset::NONE,
            stencil: StencilState::default(),
            color_write: true,
            fog: false,
            texture: true,
            texture_mode: TextureMode::Modulate,
            brightmaps: false,
            draw_buffers: 1,
            pass_type: PassType::Normal,
            scissor: None,
            multisample: false,
            soft_light_level: None,
        }
    }
}

impl PipelineState {
    /// Depth/stencil portion as a `wgpu` pipeline descriptor.
    #[must_use]
    pub fn to_depth_stencil_state(&self, format: wgpu::TextureFormat) -> wgpu::DepthStencilState {
        let face = wgpu::StencilFaceState {
            compare: self.stencil.compare.into(),
            fail_op: self.stencil.fail_op.into(),
            depth_fail_op: self.stencil.depth_fail_op.into(),
            pass_op: self.stencil.pass_op.into(),
        };
        let stencil = if self.stencil.enabled {
            wgpu::StencilState {
                front: face,
                back: face,
                read_mask: !0,
                write_mask: !0,
            }
        } else {
            wgpu::StencilState::default()
        };

        wgpu::DepthStencilState {
            format,
            depth_write_enabled: Some(self.depth_test && self.depth_write),
            depth_compare: Some(if self.depth_test {
                self.depth_func.into()
            } else {
                wgpu::CompareFunction::Always
            }),
            stencil,
            bias: wgpu::DepthBiasState {
                constant: self.polygon_offset.units as i32,
                slope_scale: self.polygon_offset.factor,
                clamp: 0.0,
            },
        }
    }

    /// Blend portion as a `wgpu` blend state. `None` when blending reduces to
    /// a plain replace.
    #[must_use]
    pub fn to_blend_state(&self) -> Option<wgpu::BlendState> {
        if self.blend == BlendFunc::REPLACE {
            return None;
        }
        let component = wgpu::BlendComponent {
            src_factor: self.blend.src.into(),
            dst_factor: self.blend.dst.into(),
            operation: self.blend.op.into(),
        };
        Some(wgpu::BlendState {
            color: component,
            alpha: component,
        })
    }
}

impl From<BlendFactor> for wgpu::BlendFactor {
    fn from(f: BlendFactor) -> Self {
        match f {
            BlendFactor::Zero => Self::Zero,
            BlendFactor::One => Self::One,
            BlendFactor::SrcAlpha => Self::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => Self::OneMinusSrcAlpha,
            BlendFactor::SrcColor => Self::Src,
            BlendFactor::OneMinusSrcColor => Self::OneMinusSrc,
            BlendFactor::DstColor => Self::Dst,
        }
    }
}

impl From<BlendOp> for wgpu::BlendOperation {
    fn from(op: BlendOp) -> Self {
        match op {
            BlendOp::Add => Self::Add,
            BlendOp::ReverseSubtract => Self::ReverseSubtract,
        }
    }
}

impl From<StencilOp> for wgpu::StencilOperation {
    fn from(op: StencilOp) -> Self {
        match op {
            StencilOp::Keep => Self::Keep,
            StencilOp::Replace => Self::Replace,
            StencilOp::Increment => Self::IncrementClamp,
            StencilOp::Decrement => Self::DecrementClamp,
        }
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Pending/applied state pair with redundant-change elimination.
#[derive(Debug, Default)]
pub struct RenderStateTracker {
    pending: PipelineState,
    applied: Option<PipelineState>,
    skipped: u64,
}

impl RenderStateTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn current(&self) -> &PipelineState {
        &self.pending
    }

    /// Number of `apply` calls that found nothing to change.
    #[inline]
    #[must_use]
    pub fn redundant_applies(&self) -> u64 {
        self.skipped
    }

    /// Flushes the pending state. Returns `true` if a command was recorded.
    pub fn apply(&mut self, recorder: &mut CommandRecorder) -> bool {
        if self.applied.as_ref() == Some(&self.pending) {
            self.skipped += 1;
            return false;
        }
        recorder.push(RenderCommand::SetState(Box::new(self.pending.clone())));
        self.applied = Some(self.pending.clone());
        true
    }

    #[must_use]
    pub fn snapshot(&self) -> PipelineState {
        self.pending.clone()
    }

    pub fn restore(&mut self, state: PipelineState) {
        self.pending = state;
    }

    /// Forgets the applied state, forcing the next `apply` to record.
    pub fn invalidate(&mut self) {
        self.applied = None;
    }

    pub fn reset(&mut self) {
        self.pending = PipelineState::default();
        self.applied = None;
    }

    // --- Setters ---

    pub fn set_depth_test(&mut self, on: bool) {
        self.pending.depth_test = on;
    }

    pub fn set_depth_func(&mut self, func: CompareOp) {
        self.pending.depth_func = func;
    }

    pub fn set_depth_write(&mut self, on: bool) {
        self.pending.depth_write = on;
    }

    pub fn set_alpha_threshold(&mut self, threshold: f32) {
        self.pending.alpha_threshold = threshold;
    }

    pub fn set_blend(&mut self, blend: BlendFunc) {
        self.pending.blend = blend;
    }

    pub fn set_polygon_offset(&mut self, offset: PolygonOffset) {
        self.pending.polygon_offset = offset;
    }

    pub fn set_stencil(&mut self, stencil: StencilState) {
        self.pending.stencil = stencil;
    }

    pub fn set_color_write(&mut self, on: bool) {
        self.pending.color_write = on;
    }

    pub fn enable_fog(&mut self, on: bool) {
        self.pending.fog = on;
    }

    pub fn enable_texture(&mut self, on: bool) {
        self.pending.texture = on;
    }

    pub fn set_texture_mode(&mut self, mode: TextureMode) {
        self.pending.texture_mode = mode;
    }

    pub fn enable_brightmaps(&mut self, on: bool) {
        self.pending.brightmaps = on;
    }

    pub fn set_draw_buffers(&mut self, count: u32) {
        self.pending.draw_buffers = count;
    }

    pub fn set_pass_type(&mut self, pass: PassType) {
        self.pending.pass_type = pass;
    }

    pub fn set_scissor(&mut self, scissor: Option<Rect>) {
        self.pending.scissor = scissor;
    }

    pub fn enable_multisample(&mut self, on: bool) {
        self.pending.multisample = on;
    }

    pub fn set_soft_light_level(&mut self, level: Option<u8>) {
        self.pending.soft_light_level = level;
    }
}
