//! Headless Backend
//!
//! CPU-side implementations of [`RenderDevice`] and [`SwapChain`] that keep
//! every resource in memory and log each call as a [`DeviceEvent`]. Used for
//! tests, tooling and servers that build frames without a GPU.
//!
//! Both types support fault injection: images can be rejected by label and
//! acquisition failures can be queued, so recovery paths are reachable.

use std::collections::VecDeque;
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;

use crate::errors::{Result, StrataError};

use super::device::{
    BindlessIndex, DeviceCaps, ImageDesc, ImageId, RenderDevice, SamplerDesc, SamplerId,
};
use super::swapchain::{SemaphoreId, SurfaceConfig, SwapChain};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    SamplerCreated(SamplerId),
    SamplerDestroyed(SamplerId),
    ImageCreated { image: ImageId, label: String },
    ImageUploaded { image: ImageId, mip_level: u32, bytes: usize },
    ImageDestroyed(ImageId),
    BindingsRegistered { first: BindlessIndex, count: u32 },
    BindingsReleased { first: BindlessIndex, count: u32 },
}

struct HeadlessImage {
    desc: ImageDesc,
    levels: Vec<Option<Vec<u8>>>,
}

// ============================================================================
// Device
// ============================================================================

#[derive(Default)]
pub struct HeadlessDevice {
    caps: DeviceCaps,
    samplers: SlotMap<SamplerId, SamplerDesc>,
    images: SlotMap<ImageId, HeadlessImage>,
    bindings: FxHashMap<u32, Vec<(ImageId, SamplerId)>>,
    next_binding: u32,
    rejected_labels: FxHashSet<String>,
    events: Vec<DeviceEvent>,
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_caps(caps: DeviceCaps) -> Self {
        Self {
            caps,
            ..Self::default()
        }
    }

    /// Makes every future `create_image` with this label fail.
    pub fn reject_images_labelled(&mut self, label: impl Into<String>) {
        self.rejected_labels.insert(label.into());
    }

    #[must_use]
    pub fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    #[inline]
    #[must_use]
    pub fn live_samplers(&self) -> usize {
        self.samplers.len()
    }

    #[inline]
    #[must_use]
    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    /// Number of registered binding ranges.
    #[inline]
    #[must_use]
    pub fn live_binding_ranges(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn sampler_desc(&self, sampler: SamplerId) -> Option<&SamplerDesc> {
        self.samplers.get(sampler)
    }

    #[must_use]
    pub fn image_desc(&self, image: ImageId) -> Option<&ImageDesc> {
        self.images.get(image).map(|i| &i.desc)
    }

    /// Uploaded contents of one mip level.
    #[must_use]
    pub fn image_level(&self, image: ImageId, mip_level: u32) -> Option<&[u8]> {
        self.images
            .get(image)?
            .levels
            .get(mip_level as usize)?
            .as_deref()
    }

    #[must_use]
    pub fn binding_range(&self, first: BindlessIndex) -> Option<&[(ImageId, SamplerId)]> {
        self.bindings.get(&first.0).map(Vec::as_slice)
    }
}

impl RenderDevice for HeadlessDevice {
    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> SamplerId {
        let id = self.samplers.insert(desc.clone());
        self.events.push(DeviceEvent::SamplerCreated(id));
        id
    }

    fn destroy_sampler(&mut self, sampler: SamplerId) {
        if self.samplers.remove(sampler).is_some() {
            self.events.push(DeviceEvent::SamplerDestroyed(sampler));
        }
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId> {
        let reject = |reason: String| StrataError::ImageCreateFailed {
            label: desc.label.clone(),
            reason,
        };
        if self.rejected_labels.contains(&desc.label) {
            return Err(reject("rejected by device".into()));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(reject("zero-sized image".into()));
        }
        let max = self.caps.max_image_dimension;
        if desc.width > max || desc.height > max {
            return Err(reject(format!(
                "{}x{} exceeds the {max} texel limit",
                desc.width, desc.height
            )));
        }

        let id = self.images.insert(HeadlessImage {
            desc: desc.clone(),
            levels: vec![None; desc.mip_levels.max(1) as usize],
        });
        self.events.push(DeviceEvent::ImageCreated {
            image: id,
            label: desc.label.clone(),
        });
        Ok(id)
    }

    fn upload_image(&mut self, image: ImageId, mip_level: u32, data: &[u8]) -> Result<()> {
        let Some(entry) = self.images.get_mut(image) else {
            return Err(StrataError::UploadFailed {
                label: format!("{image:?}"),
                reason: "image does not exist".into(),
            });
        };
        let expected = entry.desc.level_size(mip_level);
        let Some(slot) = entry.levels.get_mut(mip_level as usize) else {
            return Err(StrataError::UploadFailed {
                label: entry.desc.label.clone(),
                reason: format!("mip level {mip_level} out of range"),
            });
        };
        if data.len() != expected {
            return Err(StrataError::UploadFailed {
                label: entry.desc.label.clone(),
                reason: format!("expected {expected} bytes, got {}", data.len()),
            });
        }
        *slot = Some(data.to_vec());
        self.events.push(DeviceEvent::ImageUploaded {
            image,
            mip_level,
            bytes: data.len(),
        });
        Ok(())
    }

    fn destroy_image(&mut self, image: ImageId) {
        if self.images.remove(image).is_some() {
            self.events.push(DeviceEvent::ImageDestroyed(image));
        }
    }

    fn register_bindings(&mut self, layers: &[(ImageId, SamplerId)]) -> BindlessIndex {
        let first = BindlessIndex(self.next_binding);
        let count = layers.len().max(1) as u32;
        self.next_binding += count;
        self.bindings.insert(first.0, layers.to_vec());
        self.events
            .push(DeviceEvent::BindingsRegistered { first, count });
        first
    }

    fn release_bindings(&mut self, first: BindlessIndex, count: u32) {
        if self.bindings.remove(&first.0).is_some() {
            self.events.push(DeviceEvent::BindingsReleased { first, count });
        }
    }
}

// ============================================================================
// Swap Chain
// ============================================================================

/// Failure to inject into the next `configure`, `acquire_next_image` or
/// `present`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceFault {
    Lost,
    Outdated,
    Timeout,
    DeviceLost,
}

impl SurfaceFault {
    fn into_error(self, timeout: Duration) -> StrataError {
        match self {
            Self::Lost => StrataError::SurfaceLost,
            Self::Outdated => StrataError::SurfaceOutdated,
            Self::Timeout => StrataError::AcquireTimeout(timeout),
            Self::DeviceLost => StrataError::DeviceLost("injected device loss".into()),
        }
    }
}

#[derive(Default)]
pub struct HeadlessSwapChain {
    config: Option<SurfaceConfig>,
    next_image: u32,
    semaphores: SlotMap<SemaphoreId, ()>,
    configure_faults: VecDeque<SurfaceFault>,
    acquire_faults: VecDeque<SurfaceFault>,
    present_faults: VecDeque<SurfaceFault>,
    presented: Vec<u32>,
    configure_count: u32,
    wait_idle_count: u32,
}

impl HeadlessSwapChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_configure(&mut self, fault: SurfaceFault) {
        self.configure_faults.push_back(fault);
    }

    pub fn fail_next_acquire(&mut self, fault: SurfaceFault) {
        self.acquire_faults.push_back(fault);
    }

    pub fn fail_next_present(&mut self, fault: SurfaceFault) {
        self.present_faults.push_back(fault);
    }

    /// Image indices in presentation order.
    #[must_use]
    pub fn presented(&self) -> &[u32] {
        &self.presented
    }

    #[must_use]
    pub fn config(&self) -> Option<&SurfaceConfig> {
        self.config.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn configure_count(&self) -> u32 {
        self.configure_count
    }

    #[inline]
    #[must_use]
    pub fn wait_idle_count(&self) -> u32 {
        self.wait_idle_count
    }

    #[inline]
    #[must_use]
    pub fn live_semaphores(&self) -> usize {
        self.semaphores.len()
    }
}

impl SwapChain for HeadlessSwapChain {
    fn configure(&mut self, config: &SurfaceConfig) -> Result<()> {
        if let Some(fault) = self.configure_faults.pop_front() {
            return Err(fault.into_error(Duration::ZERO));
        }
        if config.width == 0 || config.height == 0 {
            return Err(StrataError::SurfaceOutdated);
        }
        self.config = Some(*config);
        self.next_image = 0;
        self.configure_count += 1;
        Ok(())
    }

    fn image_count(&self) -> u32 {
        self.config.map_or(0, |c| c.image_count.max(1))
    }

    fn create_semaphore(&mut self) -> SemaphoreId {
        self.semaphores.insert(())
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreId) {
        self.semaphores.remove(semaphore);
    }

    fn acquire_next_image(&mut self, timeout: Duration, signal: SemaphoreId) -> Result<u32> {
        if let Some(fault) = self.acquire_faults.pop_front() {
            return Err(fault.into_error(timeout));
        }
        if self.config.is_none() || !self.semaphores.contains_key(signal) {
            return Err(StrataError::SurfaceOutdated);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count();
        Ok(index)
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreId) -> Result<()> {
        if let Some(fault) = self.present_faults.pop_front() {
            return Err(fault.into_error(Duration::ZERO));
        }
        if image_index >= self.image_count() || !self.semaphores.contains_key(wait) {
            return Err(StrataError::SurfaceOutdated);
        }
        self.presented.push(image_index);
        Ok(())
    }

    fn wait_idle(&mut self) {
        self.wait_idle_count += 1;
    }
}
