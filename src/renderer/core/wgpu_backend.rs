//! wgpu Backend
//!
//! [`WgpuDevice`] implements [`RenderDevice`] on top of a `wgpu::Device` /
//! `wgpu::Queue` pair. Images become `wgpu::Texture`s with a default view,
//! samplers map one-to-one, and the bindless table is a flat slot array that
//! shader-side binding arrays index into.
//!
//! [`WgpuOffscreenSwapChain`] presents into a ring of offscreen render
//! targets. It is used for capture, camera textures and headless GPU runs.

use std::time::Duration;

use slotmap::SlotMap;

use crate::errors::{Result, StrataError};

use super::device::{
    mip_extent, BindlessIndex, CompareOp, DeviceCaps, FilterMode, ImageDesc, ImageFormat,
    ImageId, ImageUsage, RenderDevice, SamplerDesc, SamplerId, WrapMode,
};
use super::swapchain::{SemaphoreId, SurfaceConfig, SwapChain};

// ============================================================================
// Conversions
// ============================================================================

impl From<CompareOp> for wgpu::CompareFunction {
    fn from(op: CompareOp) -> Self {
        match op {
            CompareOp::Never => Self::Never,
            CompareOp::Less => Self::Less,
            CompareOp::Equal => Self::Equal,
            CompareOp::LessEqual => Self::LessEqual,
            CompareOp::Greater => Self::Greater,
            CompareOp::NotEqual => Self::NotEqual,
            CompareOp::GreaterEqual => Self::GreaterEqual,
            CompareOp::Always => Self::Always,
        }
    }
}

impl From<FilterMode> for wgpu::FilterMode {
    fn from(mode: FilterMode) -> Self {
        match mode {
            FilterMode::Nearest => Self::Nearest,
            FilterMode::Linear => Self::Linear,
        }
    }
}

impl From<FilterMode> for wgpu::MipmapFilterMode {
    fn from(mode: FilterMode) -> Self {
        match mode {
            FilterMode::Nearest => Self::Nearest,
            FilterMode::Linear => Self::Linear,
        }
    }
}

impl From<WrapMode> for wgpu::AddressMode {
    fn from(mode: WrapMode) -> Self {
        match mode {
            WrapMode::Repeat => Self::Repeat,
            WrapMode::ClampToEdge => Self::ClampToEdge,
        }
    }
}

impl From<ImageFormat> for wgpu::TextureFormat {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Rgba8 => Self::Rgba8Unorm,
            ImageFormat::Bgra8 => Self::Bgra8Unorm,
            ImageFormat::R8 => Self::R8Unorm,
            ImageFormat::Rgba16Float => Self::Rgba16Float,
            ImageFormat::Depth24Stencil8 => Self::Depth24PlusStencil8,
        }
    }
}

fn texture_usages(usage: ImageUsage) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    if usage.contains(ImageUsage::SAMPLED) {
        out |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(ImageUsage::COPY_DST) {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.intersects(ImageUsage::RENDER_TARGET | ImageUsage::DEPTH_STENCIL) {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    out
}

// ============================================================================
// Device
// ============================================================================

struct WgpuImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: ImageDesc,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: DeviceCaps,
    samplers: SlotMap<SamplerId, wgpu::Sampler>,
    images: SlotMap<ImageId, WgpuImage>,
    /// Bindless slot table. `None` marks a free slot.
    binding_slots: Vec<Option<(ImageId, SamplerId)>>,
}

impl WgpuDevice {
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let limits = device.limits();
        let caps = DeviceCaps {
            max_image_dimension: limits.max_texture_dimension_2d,
            max_anisotropy: 16,
            sampler_reduction: false,
        };
        Self {
            device,
            queue,
            caps,
            samplers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            binding_slots: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    #[must_use]
    pub fn sampler(&self, sampler: SamplerId) -> Option<&wgpu::Sampler> {
        self.samplers.get(sampler)
    }

    #[must_use]
    pub fn texture(&self, image: ImageId) -> Option<&wgpu::Texture> {
        self.images.get(image).map(|i| &i.texture)
    }

    #[must_use]
    pub fn view(&self, image: ImageId) -> Option<&wgpu::TextureView> {
        self.images.get(image).map(|i| &i.view)
    }

    /// Resolves one bindless slot to the resources a binding array needs.
    #[must_use]
    pub fn binding(&self, slot: u32) -> Option<(&wgpu::TextureView, &wgpu::Sampler)> {
        let (image, sampler) = (*self.binding_slots.get(slot as usize)?)?;
        Some((self.view(image)?, self.sampler(sampler)?))
    }

    /// First index of `count` consecutive free slots, growing the table when
    /// no hole is large enough.
    fn find_free_range(&mut self, count: usize) -> usize {
        let mut run = 0;
        for (i, slot) in self.binding_slots.iter().enumerate() {
            if slot.is_none() {
                run += 1;
                if run == count {
                    return i + 1 - count;
                }
            } else {
                run = 0;
            }
        }
        let start = self.binding_slots.len() - run;
        self.binding_slots.resize(start + count, None);
        start
    }
}

impl RenderDevice for WgpuDevice {
    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> SamplerId {
        // wgpu only accepts anisotropy with an all-linear filter chain.
        let all_linear = desc.mag_filter == FilterMode::Linear
            && desc.min_filter == FilterMode::Linear
            && desc.mip_filter == Some(FilterMode::Linear);
        let anisotropy = if all_linear {
            desc.anisotropy.clamp(1, self.caps.max_anisotropy)
        } else {
            1
        };

        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(desc.label),
            address_mode_u: desc.wrap_u.into(),
            address_mode_v: desc.wrap_v.into(),
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: desc.mag_filter.into(),
            min_filter: desc.min_filter.into(),
            mipmap_filter: desc.mip_filter.unwrap_or(FilterMode::Nearest).into(),
            lod_min_clamp: 0.0,
            lod_max_clamp: if desc.mip_filter.is_some() { 32.0 } else { 0.0 },
            compare: desc.compare.map(Into::into),
            anisotropy_clamp: anisotropy,
            ..Default::default()
        });
        if desc.reduction != super::device::SamplerReduction::WeightedAverage {
            log::warn!(
                "Sampler '{}' requests a reduction mode wgpu cannot express; using weighted average",
                desc.label
            );
        }
        self.samplers.insert(sampler)
    }

    fn destroy_sampler(&mut self, sampler: SamplerId) {
        self.samplers.remove(sampler);
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId> {
        let max = self.caps.max_image_dimension;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(StrataError::ImageCreateFailed {
                label: desc.label.clone(),
                reason: format!("{}x{} outside 1..={max}", desc.width, desc.height),
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.into(),
            usage: texture_usages(desc.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(self.images.insert(WgpuImage {
            texture,
            view,
            desc: desc.clone(),
        }))
    }

    fn upload_image(&mut self, image: ImageId, mip_level: u32, data: &[u8]) -> Result<()> {
        let Some(entry) = self.images.get(image) else {
            return Err(StrataError::UploadFailed {
                label: format!("{image:?}"),
                reason: "image does not exist".into(),
            });
        };
        let desc = &entry.desc;
        if mip_level >= desc.mip_levels.max(1) || data.len() != desc.level_size(mip_level) {
            return Err(StrataError::UploadFailed {
                label: desc.label.clone(),
                reason: format!("bad payload for mip level {mip_level} ({} bytes)", data.len()),
            });
        }

        let (width, height) = mip_extent(desc.width, desc.height, mip_level);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * desc.format.bytes_per_pixel()),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn destroy_image(&mut self, image: ImageId) {
        if let Some(entry) = self.images.remove(image) {
            entry.texture.destroy();
        }
    }

    fn register_bindings(&mut self, layers: &[(ImageId, SamplerId)]) -> BindlessIndex {
        let count = layers.len().max(1);
        let start = self.find_free_range(count);
        for (slot, layer) in self.binding_slots[start..start + count]
            .iter_mut()
            .zip(layers.iter().copied().map(Some).chain(std::iter::repeat(None)))
        {
            *slot = layer;
        }
        // Reserve a single-slot range even for an empty layer list.
        if layers.is_empty() {
            log::warn!("Registering an empty binding range");
        }
        BindlessIndex(start as u32)
    }

    fn release_bindings(&mut self, first: BindlessIndex, count: u32) {
        let start = first.0 as usize;
        let end = (start + count as usize).min(self.binding_slots.len());
        for slot in &mut self.binding_slots[start.min(end)..end] {
            *slot = None;
        }
    }
}

// ============================================================================
// Offscreen Swap Chain
// ============================================================================

/// A ring of render-target textures standing in for a window surface.
pub struct WgpuOffscreenSwapChain {
    device: wgpu::Device,
    format: wgpu::TextureFormat,
    images: Vec<wgpu::Texture>,
    next_image: u32,
    semaphores: SlotMap<SemaphoreId, ()>,
    last_presented: Option<u32>,
}

impl WgpuOffscreenSwapChain {
    #[must_use]
    pub fn new(device: wgpu::Device, format: wgpu::TextureFormat) -> Self {
        Self {
            device,
            format,
            images: Vec::new(),
            next_image: 0,
            semaphores: SlotMap::with_key(),
            last_presented: None,
        }
    }

    /// Texture of the most recently presented image.
    #[must_use]
    pub fn presented_texture(&self) -> Option<&wgpu::Texture> {
        self.images.get(self.last_presented? as usize)
    }

    #[must_use]
    pub fn image(&self, index: u32) -> Option<&wgpu::Texture> {
        self.images.get(index as usize)
    }
}

impl SwapChain for WgpuOffscreenSwapChain {
    fn configure(&mut self, config: &SurfaceConfig) -> Result<()> {
        if config.width == 0 || config.height == 0 {
            return Err(StrataError::SurfaceOutdated);
        }
        for image in self.images.drain(..) {
            image.destroy();
        }
        let format = if config.hdr {
            wgpu::TextureFormat::Rgba16Float
        } else {
            self.format
        };
        self.images = (0..config.image_count.max(1))
            .map(|i| {
                self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("Offscreen Present Image {i}")),
                    size: wgpu::Extent3d {
                        width: config.width,
                        height: config.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::COPY_SRC
                        | wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                })
            })
            .collect();
        self.next_image = 0;
        self.last_presented = None;
        Ok(())
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn create_semaphore(&mut self) -> SemaphoreId {
        self.semaphores.insert(())
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreId) {
        self.semaphores.remove(semaphore);
    }

    fn acquire_next_image(&mut self, _timeout: Duration, signal: SemaphoreId) -> Result<u32> {
        if self.images.is_empty() || !self.semaphores.contains_key(signal) {
            return Err(StrataError::SurfaceOutdated);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count();
        Ok(index)
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreId) -> Result<()> {
        if image_index >= self.image_count() || !self.semaphores.contains_key(wait) {
            return Err(StrataError::SurfaceOutdated);
        }
        self.last_presented = Some(image_index);
        Ok(())
    }

    // wgpu tracks the lifetime of submitted resources itself; nothing to drain.
    fn wait_idle(&mut self) {}
}
