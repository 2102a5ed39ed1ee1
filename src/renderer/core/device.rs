//! Render Device Capability Interface
//!
//! [`RenderDevice`] is the narrow seam between the renderer and a graphics
//! backend: create/destroy samplers and images, upload pixel data, and
//! register bindless binding ranges. Everything above this trait is backend
//! neutral.
//!
//! Descriptors here are plain data so that caches can hash and compare them.

use bitflags::bitflags;
use slotmap::new_key_type;

use crate::errors::Result;

new_key_type! {
    /// Backend handle of a sampler.
    pub struct SamplerId;
    /// Backend handle of an image.
    pub struct ImageId;
}

// ============================================================================
// Sampler Description
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
}

/// Comparison function shared by depth/stencil state and comparison samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Texel reduction applied when sampling a footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerReduction {
    #[default]
    WeightedAverage,
    Min,
    Max,
}

/// Immutable sampling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub label: &'static str,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    /// `None` disables mipmapping (lod clamped to the base level).
    pub mip_filter: Option<FilterMode>,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    /// 1 means anisotropic filtering is off.
    pub anisotropy: u16,
    pub compare: Option<CompareOp>,
    pub reduction: SamplerReduction,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            label: "Sampler",
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mip_filter: Some(FilterMode::Linear),
            wrap_u: WrapMode::Repeat,
            wrap_v: WrapMode::Repeat,
            anisotropy: 1,
            compare: None,
            reduction: SamplerReduction::WeightedAverage,
        }
    }
}

// ============================================================================
// Image Description
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Rgba8,
    Bgra8,
    /// Single channel, used for palette indices.
    R8,
    Rgba16Float,
    Depth24Stencil8,
}

impl ImageFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::Rgba8 | Self::Bgra8 | Self::Depth24Stencil8 => 4,
            Self::Rgba16Float => 8,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth24Stencil8)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const SAMPLED       = 1 << 0;
        const COPY_DST      = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: ImageFormat,
    pub usage: ImageUsage,
}

impl ImageDesc {
    /// Byte size of one mip level.
    #[must_use]
    pub fn level_size(&self, level: u32) -> usize {
        let (w, h) = mip_extent(self.width, self.height, level);
        (w * h * self.format.bytes_per_pixel()) as usize
    }
}

/// Number of mip levels for a full chain: `floor(log2(max(w, h))) + 1`.
#[inline]
#[must_use]
pub fn mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Dimensions of mip `level`, never smaller than 1×1.
#[inline]
#[must_use]
pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

// ============================================================================
// Device
// ============================================================================

/// Index of the first slot of a registered bindless range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindlessIndex(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    pub max_image_dimension: u32,
    pub max_anisotropy: u16,
    /// Min/max reduction samplers are available.
    pub sampler_reduction: bool,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            max_image_dimension: 8192,
            max_anisotropy: 16,
            sampler_reduction: false,
        }
    }
}

/// Capability interface implemented once per graphics backend.
pub trait RenderDevice {
    fn caps(&self) -> DeviceCaps;

    fn create_sampler(&mut self, desc: &SamplerDesc) -> SamplerId;

    fn destroy_sampler(&mut self, sampler: SamplerId);

    /// Fails when the backend rejects the format or dimensions.
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId>;

    /// Writes one full mip level. `data` must be tightly packed.
    fn upload_image(&mut self, image: ImageId, mip_level: u32, data: &[u8]) -> Result<()>;

    fn destroy_image(&mut self, image: ImageId);

    /// Registers a contiguous range of image/sampler pairs and returns the
    /// index of its first slot.
    fn register_bindings(&mut self, layers: &[(ImageId, SamplerId)]) -> BindlessIndex;

    fn release_bindings(&mut self, first: BindlessIndex, count: u32);
}
