//! Sampler Manager
//!
//! Owns every sampler the renderer binds:
//!
//! | Group            | Lookup                               | Lifetime                        |
//! |------------------|--------------------------------------|---------------------------------|
//! | Material samplers| [`ClampMode`] slot                   | rebuilt by `reset_hw_samplers`  |
//! | Layer overrides  | [`MaterialLayerSampling`] + slot     | rebuilt by `reset_hw_samplers`  |
//! | Post-process     | `(PpFilter, PpWrap)`, created lazily | device lifetime                 |
//! | Special          | shadow map, light map, z min/max     | device lifetime                 |
//!
//! Lookups are referentially stable: the same arguments return the same
//! [`SamplerId`] until the next reset. Invalidating material bindings after a
//! reset is the caller's job; [`SamplerManager::generation`] changes on
//! every reset so callers can detect it.

use rustc_hash::FxHashMap;

use crate::renderer::core::{
    FilterMode, RenderDevice, SamplerDesc, SamplerId, SamplerReduction, WrapMode,
};
use crate::renderer::settings::TextureFilter;

/// Material sampler slot: wrap and filter overrides a texture layer can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ClampMode {
    #[default]
    Normal = 0,
    ClampX,
    ClampY,
    ClampXY,
    /// Clamped and never mipmapped (HUD graphics, skies).
    ClampXYNoMip,
    NoFilter,
    NoFilterClampX,
    NoFilterClampY,
    NoFilterClampXY,
    /// Camera textures: clamped, linear, no mipmaps.
    CamTex,
}

pub const NUM_SAMPLERS: usize = 10;

impl ClampMode {
    pub const ALL: [Self; NUM_SAMPLERS] = [
        Self::Normal,
        Self::ClampX,
        Self::ClampY,
        Self::ClampXY,
        Self::ClampXYNoMip,
        Self::NoFilter,
        Self::NoFilterClampX,
        Self::NoFilterClampY,
        Self::NoFilterClampXY,
        Self::CamTex,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    fn wrap(self) -> (WrapMode, WrapMode) {
        use WrapMode::{ClampToEdge as C, Repeat as R};
        match self {
            Self::Normal | Self::NoFilter => (R, R),
            Self::ClampX | Self::NoFilterClampX => (C, R),
            Self::ClampY | Self::NoFilterClampY => (R, C),
            Self::ClampXY | Self::ClampXYNoMip | Self::NoFilterClampXY | Self::CamTex => (C, C),
        }
    }

    fn is_unfiltered(self) -> bool {
        matches!(
            self,
            Self::NoFilter | Self::NoFilterClampX | Self::NoFilterClampY | Self::NoFilterClampXY
        )
    }
}

/// Per-layer override of the global filter policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaterialLayerSampling {
    #[default]
    Default,
    NearestMipLinear,
    LinearMipLinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PpFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PpWrap {
    Clamp,
    Repeat,
}

/// Inputs of the global filtering policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerPolicy {
    pub filter: TextureFilter,
    pub anisotropy: u16,
}

impl SamplerPolicy {
    fn filters(self) -> (FilterMode, FilterMode, Option<FilterMode>) {
        use FilterMode::{Linear, Nearest};
        match self.filter {
            TextureFilter::Nearest => (Nearest, Nearest, None),
            TextureFilter::NearestMipmapped => (Nearest, Nearest, Some(Nearest)),
            TextureFilter::Bilinear => (Linear, Linear, Some(Nearest)),
            TextureFilter::Trilinear => (Linear, Linear, Some(Linear)),
        }
    }
}

pub struct SamplerManager {
    hw: Vec<SamplerId>,
    overrides: [SamplerId; 2],
    pp: FxHashMap<(PpFilter, PpWrap), SamplerId>,
    shadowmap: SamplerId,
    lightmap: SamplerId,
    zminmax: Option<SamplerId>,
    policy: SamplerPolicy,
    generation: u64,
}

impl SamplerManager {
    pub fn new<D: RenderDevice>(device: &mut D, policy: SamplerPolicy) -> Self {
        let (hw, overrides) = Self::create_hw_samplers(device, policy);

        let shadowmap = device.create_sampler(&SamplerDesc {
            label: "Shadowmap Sampler",
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mip_filter: None,
            wrap_u: WrapMode::ClampToEdge,
            wrap_v: WrapMode::ClampToEdge,
            ..SamplerDesc::default()
        });
        let lightmap = device.create_sampler(&SamplerDesc {
            label: "Lightmap Sampler",
            mip_filter: None,
            wrap_u: WrapMode::ClampToEdge,
            wrap_v: WrapMode::ClampToEdge,
            ..SamplerDesc::default()
        });
        let zminmax = device.caps().sampler_reduction.then(|| {
            device.create_sampler(&SamplerDesc {
                label: "ZMinMax Sampler",
                mag_filter: FilterMode::Nearest,
                min_filter: FilterMode::Nearest,
                mip_filter: Some(FilterMode::Nearest),
                wrap_u: WrapMode::ClampToEdge,
                wrap_v: WrapMode::ClampToEdge,
                reduction: SamplerReduction::Min,
                ..SamplerDesc::default()
            })
        });

        Self {
            hw,
            overrides,
            pp: FxHashMap::default(),
            shadowmap,
            lightmap,
            zminmax,
            policy,
            generation: 0,
        }
    }

    fn create_hw_samplers<D: RenderDevice>(
        device: &mut D,
        policy: SamplerPolicy,
    ) -> (Vec<SamplerId>, [SamplerId; 2]) {
        let caps = device.caps();
        let (mag, min, mip) = policy.filters();
        let anisotropy = policy.anisotropy.clamp(1, caps.max_anisotropy.max(1));

        let hw = ClampMode::ALL
            .iter()
            .map(|&mode| {
                let (wrap_u, wrap_v) = mode.wrap();
                let desc = if mode.is_unfiltered() {
                    SamplerDesc {
                        label: "Unfiltered Material Sampler",
                        mag_filter: FilterMode::Nearest,
                        min_filter: FilterMode::Nearest,
                        mip_filter: Some(FilterMode::Nearest),
                        wrap_u,
                        wrap_v,
                        ..SamplerDesc::default()
                    }
                } else if mode == ClampMode::CamTex {
                    SamplerDesc {
                        label: "Camera Texture Sampler",
                        mip_filter: None,
                        wrap_u,
                        wrap_v,
                        ..SamplerDesc::default()
                    }
                } else {
                    let mip_filter = if mode == ClampMode::ClampXYNoMip { None } else { mip };
                    SamplerDesc {
                        label: "Material Sampler",
                        mag_filter: mag,
                        min_filter: min,
                        mip_filter,
                        wrap_u,
                        wrap_v,
                        anisotropy: if mip_filter.is_some() { anisotropy } else { 1 },
                        ..SamplerDesc::default()
                    }
                };
                device.create_sampler(&desc)
            })
            .collect();

        let overrides = [
            device.create_sampler(&SamplerDesc {
                label: "Nearest Layer Sampler",
                mag_filter: FilterMode::Nearest,
                min_filter: FilterMode::Nearest,
                mip_filter: Some(FilterMode::Linear),
                ..SamplerDesc::default()
            }),
            device.create_sampler(&SamplerDesc {
                label: "Linear Layer Sampler",
                anisotropy,
                ..SamplerDesc::default()
            }),
        ];

        (hw, overrides)
    }

    /// Sampler of a material slot.
    #[inline]
    #[must_use]
    pub fn get(&self, mode: ClampMode) -> SamplerId {
        self.hw[mode.index()]
    }

    /// Sampler by numeric slot.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<SamplerId> {
        self.hw.get(index).copied()
    }

    /// Slot sampler, or the layer override when one is requested.
    #[must_use]
    pub fn get_for_layer(&self, sampling: MaterialLayerSampling, mode: ClampMode) -> SamplerId {
        match sampling {
            MaterialLayerSampling::Default => self.get(mode),
            MaterialLayerSampling::NearestMipLinear => self.overrides[0],
            MaterialLayerSampling::LinearMipLinear => self.overrides[1],
        }
    }

    /// Post-process sampler, created on first use.
    pub fn get_pp<D: RenderDevice>(&mut self, device: &mut D, filter: PpFilter, wrap: PpWrap) -> SamplerId {
        *self.pp.entry((filter, wrap)).or_insert_with(|| {
            let f = match filter {
                PpFilter::Nearest => FilterMode::Nearest,
                PpFilter::Linear => FilterMode::Linear,
            };
            let w = match wrap {
                PpWrap::Clamp => WrapMode::ClampToEdge,
                PpWrap::Repeat => WrapMode::Repeat,
            };
            device.create_sampler(&SamplerDesc {
                label: "Postprocess Sampler",
                mag_filter: f,
                min_filter: f,
                mip_filter: None,
                wrap_u: w,
                wrap_v: w,
                ..SamplerDesc::default()
            })
        })
    }

    #[inline]
    #[must_use]
    pub fn shadowmap(&self) -> SamplerId {
        self.shadowmap
    }

    #[inline]
    #[must_use]
    pub fn lightmap(&self) -> SamplerId {
        self.lightmap
    }

    /// Min-reduction sampler, `None` when the device cannot express it.
    #[inline]
    #[must_use]
    pub fn zminmax(&self) -> Option<SamplerId> {
        self.zminmax
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> SamplerPolicy {
        self.policy
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Destroys and recreates the material samplers under a new policy.
    /// Post-process and special samplers are kept.
    pub fn reset_hw_samplers<D: RenderDevice>(&mut self, device: &mut D, policy: SamplerPolicy) {
        for id in self.hw.drain(..).chain(self.overrides) {
            device.destroy_sampler(id);
        }
        let (hw, overrides) = Self::create_hw_samplers(device, policy);
        self.hw = hw;
        self.overrides = overrides;
        self.policy = policy;
        self.generation += 1;
        log::debug!("Material samplers rebuilt (generation {})", self.generation);
    }

    pub fn destroy<D: RenderDevice>(&mut self, device: &mut D) {
        let specials = [Some(self.shadowmap), Some(self.lightmap), self.zminmax];
        for id in self
            .hw
            .drain(..)
            .chain(self.overrides)
            .chain(self.pp.drain().map(|(_, id)| id))
            .chain(specials.into_iter().flatten())
        {
            device.destroy_sampler(id);
        }
        self.zminmax = None;
    }
}
