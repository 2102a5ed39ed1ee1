//! Render Commands
//!
//! Passes do not talk to a graphics API directly. They record
//! [`RenderCommand`]s into a [`CommandRecorder`], which an immediate-mode or
//! command-buffer backend replays in order. The recorded stream is the
//! pass/state contract of the renderer: state changes, matrices, clears and
//! draws appear exactly in the order the pipeline requires.

use glam::{Mat4, Vec4};

use crate::renderer::core::BindlessIndex;
use crate::renderer::lights::LightSpan;
use crate::renderer::scene::{ActorId, DrawListKind, PortalKey, PrimitiveId};
use crate::renderer::state::{PassType, PipelineState, Rect};

/// What a draw-list traversal does with each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawPass {
    /// Regular textured draw.
    All,
    /// Gather lights only, no geometry is issued.
    LightsOnly,
    Translucent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    BindSceneFramebuffer {
        pass_type: PassType,
    },
    SetViewport(Rect),
    Clear {
        color: Option<[f32; 4]>,
        depth: Option<f32>,
        stencil: Option<u32>,
    },
    SetState(Box<PipelineState>),
    SetMatrices {
        projection: Mat4,
        view: Mat4,
    },
    SetClipPlane(Option<Vec4>),

    /// Marks the start of one draw-list traversal.
    BeginList {
        list: DrawListKind,
        pass: DrawPass,
    },
    Draw {
        list: DrawListKind,
        primitive: PrimitiveId,
        binding: Option<BindlessIndex>,
        lights: Option<LightSpan>,
    },
    /// Lights-only visit of a draw-list entry.
    UploadLights {
        primitive: PrimitiveId,
        lights: LightSpan,
    },
    DrawDecal {
        primitive: PrimitiveId,
        binding: Option<BindlessIndex>,
    },
    /// Floods a missing upper/lower texture with the back sector's flat.
    FillMissingTexture {
        primitive: PrimitiveId,
        flat: Option<BindlessIndex>,
        upper: bool,
    },
    AmbientOcclusion {
        /// `projection[1][1]`, the vertical focal length.
        focal_length: f32,
    },

    PortalBegin {
        portal: PortalKey,
        level: u32,
    },
    PortalEnd {
        portal: PortalKey,
        level: u32,
    },
    /// Draws a portal surface into the stencil buffer only.
    MarkPortalSurface {
        primitive: PrimitiveId,
        /// Stencil level the surface's pixels end up at.
        level: u32,
    },
    /// Full-screen quad at far depth, clipped to the pixels whose stencil
    /// equals `level`.
    ClearPortalDepth {
        level: u32,
    },
    DrawSky {
        binding: Option<BindlessIndex>,
    },

    ClearDepth,
    DrawHudSprite {
        owner: ActorId,
        binding: Option<BindlessIndex>,
        model: bool,
        light_level: u8,
    },

    PushGroup(String),
    PopGroup,
    DrawScreenQuad {
        effect: &'static str,
        stencil_test: bool,
    },
    BlitToEyeTexture {
        eye: usize,
    },
}

#[derive(Debug, Default)]
pub struct CommandRecorder {
    commands: Vec<RenderCommand>,
}

impl CommandRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }

    #[inline]
    #[must_use]
    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Clears the stream but keeps its allocation.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn take(&mut self) -> Vec<RenderCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Index of the first command matching `pred`.
    pub fn position(&self, pred: impl Fn(&RenderCommand) -> bool) -> Option<usize> {
        self.commands.iter().position(pred)
    }

    /// Primitives drawn from `list`, in draw order.
    #[must_use]
    pub fn drawn_from(&self, list: DrawListKind) -> Vec<PrimitiveId> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::Draw {
                    list: l,
                    primitive,
                    ..
                } if *l == list => Some(*primitive),
                _ => None,
            })
            .collect()
    }
}
