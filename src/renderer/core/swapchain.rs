//! Presentation Surface Interface
//!
//! [`SwapChain`] exposes the explicit-API presentation cycle: a set of
//! presentable images, semaphores that order acquisition and rendering, and
//! `acquire_next_image` / `present`. The [`FramebufferManager`] drives it.
//!
//! [`FramebufferManager`]: crate::renderer::framebuffer::FramebufferManager

use std::time::Duration;

use slotmap::new_key_type;

use crate::errors::Result;

new_key_type! {
    /// Backend handle of a binary semaphore.
    pub struct SemaphoreId;
}

/// Everything that forces a full rebuild of the presentation images when it
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub hdr: bool,
    pub exclusive_fullscreen: bool,
    pub image_count: u32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: true,
            hdr: false,
            exclusive_fullscreen: false,
            image_count: 3,
        }
    }
}

pub trait SwapChain {
    /// (Re)creates the presentation images. Callers must retire in-flight
    /// work with [`SwapChain::wait_idle`] first.
    fn configure(&mut self, config: &SurfaceConfig) -> Result<()>;

    fn image_count(&self) -> u32;

    fn create_semaphore(&mut self) -> SemaphoreId;

    fn destroy_semaphore(&mut self, semaphore: SemaphoreId);

    /// Blocks up to `timeout` for a free image and arranges for `signal` to be
    /// signalled once it is safe to render into it.
    fn acquire_next_image(&mut self, timeout: Duration, signal: SemaphoreId) -> Result<u32>;

    /// Queues `image_index` for display once `wait` is signalled.
    fn present(&mut self, image_index: u32, wait: SemaphoreId) -> Result<()>;

    /// Blocks until all submitted work has completed.
    fn wait_idle(&mut self);
}
