//! Backend Seams
//!
//! - [`RenderDevice`]: samplers, images, uploads and bindless ranges
//! - [`SwapChain`]: presentable images and their semaphores
//! - [`HeadlessDevice`] / [`HeadlessSwapChain`]: recording CPU backend
//! - [`WgpuDevice`] / [`WgpuOffscreenSwapChain`]: `wgpu` backend

pub mod device;
pub mod headless;
pub mod swapchain;
pub mod wgpu_backend;

pub use device::{
    mip_extent, mip_levels, BindlessIndex, CompareOp, DeviceCaps, FilterMode, ImageDesc,
    ImageFormat, ImageId, ImageUsage, RenderDevice, SamplerDesc, SamplerId, SamplerReduction,
    WrapMode,
};
pub use headless::{DeviceEvent, HeadlessDevice, HeadlessSwapChain, SurfaceFault};
pub use swapchain::{SemaphoreId, SurfaceConfig, SwapChain};
pub use wgpu_backend::{WgpuDevice, WgpuOffscreenSwapChain};
