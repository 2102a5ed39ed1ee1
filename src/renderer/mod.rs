//! Renderer System
//!
//! The renderer owns every per-frame subsystem and drives one displayed
//! frame through the fixed pipeline:
//!
//! - [`core`]: backend seams (`RenderDevice`, `SwapChain`) and implementations
//! - [`framebuffer`]: presentation image acquire/present and rebuilds
//! - [`samplers`], [`texture`], [`material`]: GPU resource caches
//! - [`lights`]: per-primitive dynamic light gathering
//! - [`scene`]: per-view scene building and draw-lists
//! - [`passes`]: the pass sequencer and portal recursion
//! - [`postprocess`], [`stereo`], [`software`]: frame hand-off paths
//!
//! # Frame lifecycle
//!
//! ```text
//! render_frame
//!   ├─ acquire image  (rebuild + one retry on a transient failure)
//!   ├─ for each eye
//!   │    ├─ set_3d_viewport
//!   │    └─ process_view: DrawScene → EndDrawScene → PostProcessScene
//!   ├─ queue_present
//!   └─ end-of-frame cache maintenance
//! ```

pub mod commands;
pub mod core;
pub mod framebuffer;
pub mod lights;
pub mod material;
pub mod passes;
pub mod postprocess;
pub mod samplers;
pub mod scene;
pub mod settings;
pub mod software;
pub mod state;
pub mod stereo;
pub mod texture;

use glam::Mat4;

use crate::errors::Result;
use crate::renderer::commands::{CommandRecorder, RenderCommand};
use crate::renderer::core::{RenderDevice, SurfaceConfig, SwapChain};
use crate::renderer::framebuffer::{AcquiredImage, FramebufferManager};
use crate::renderer::material::MaterialCache;
use crate::renderer::passes::{FrameResources, SceneRenderer};
use crate::renderer::samplers::{SamplerManager, SamplerPolicy};
use crate::renderer::scene::{DrawMode, ViewConfig, Viewpoint, WorldView};
use crate::renderer::settings::RendererSettings;
use crate::renderer::state::Rect;
use crate::renderer::texture::{TextureCache, TextureProvider};

/// Result of one `render_frame` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame reached the presentation queue.
    Presented { image_index: u32, eyes: usize },
    /// The frame was dropped after a transient backend failure. The next
    /// frame rebuilds the presentation images.
    Skipped { reason: String },
}

impl FrameOutcome {
    #[inline]
    #[must_use]
    pub fn is_presented(&self) -> bool {
        matches!(self, Self::Presented { .. })
    }
}

fn sampler_policy(settings: &RendererSettings) -> SamplerPolicy {
    SamplerPolicy {
        filter: settings.texture_filter,
        anisotropy: settings.anisotropy,
    }
}

fn surface_config(settings: &RendererSettings, width: u32, height: u32) -> SurfaceConfig {
    SurfaceConfig {
        width,
        height,
        vsync: settings.vsync,
        hdr: settings.hdr,
        exclusive_fullscreen: settings.exclusive_fullscreen,
        image_count: settings.swap_chain_images,
    }
}

pub struct Renderer<D: RenderDevice, S: SwapChain> {
    device: D,
    swap_chain: S,
    settings: RendererSettings,

    // Resource caches
    textures: TextureCache,
    samplers: SamplerManager,
    materials: MaterialCache,

    framebuffer: FramebufferManager,
    scene: SceneRenderer,

    width: u32,
    height: u32,
    frame_count: u64,
}

impl<D: RenderDevice, S: SwapChain> Renderer<D, S> {
    pub fn new(mut device: D, swap_chain: S, settings: RendererSettings, width: u32, height: u32) -> Result<Self> {
        let textures = TextureCache::new(&mut device)?;
        let samplers = SamplerManager::new(&mut device, sampler_policy(&settings));
        let framebuffer = FramebufferManager::new(surface_config(&settings, width, height), settings.acquire_timeout());
        let scene = SceneRenderer::new(&settings, Self::screen_rect(width, height));

        log::info!("Renderer created: {width}x{height}, stereo {:?}", settings.stereo_mode);

        Ok(Self {
            device,
            swap_chain,
            settings,
            textures,
            samplers,
            materials: MaterialCache::new(),
            framebuffer,
            scene,
            width,
            height,
            frame_count: 0,
        })
    }

    fn screen_rect(width: u32, height: u32) -> Rect {
        Rect { x: 0, y: 0, width, height }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[inline]
    #[must_use]
    pub fn swap_chain(&self) -> &S {
        &self.swap_chain
    }

    #[inline]
    pub fn swap_chain_mut(&mut self) -> &mut S {
        &mut self.swap_chain
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn materials(&self) -> &MaterialCache {
        &self.materials
    }

    #[inline]
    pub fn materials_mut(&mut self) -> &mut MaterialCache {
        &mut self.materials
    }

    #[inline]
    #[must_use]
    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    #[inline]
    #[must_use]
    pub fn samplers(&self) -> &SamplerManager {
        &self.samplers
    }

    #[inline]
    #[must_use]
    pub fn framebuffer(&self) -> &FramebufferManager {
        &self.framebuffer
    }

    #[inline]
    #[must_use]
    pub fn scene_renderer(&self) -> &SceneRenderer {
        &self.scene
    }

    /// Commands recorded by the latest frame.
    #[inline]
    #[must_use]
    pub fn commands(&self) -> &CommandRecorder {
        self.scene.recorder()
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Replaces the settings, rebuilding whatever depends on changed fields.
    pub fn apply_settings(&mut self, settings: RendererSettings) {
        if self.settings.sampler_policy_differs(&settings) {
            log::info!(
                "Texture filtering changed to {:?} x{}, rebuilding samplers",
                settings.texture_filter,
                settings.anisotropy
            );
            self.samplers.reset_hw_samplers(&mut self.device, sampler_policy(&settings));
            self.materials.invalidate_all(&mut self.device);
        }
        self.framebuffer.request_config(surface_config(&settings, self.width, self.height));
        self.framebuffer.set_acquire_timeout(settings.acquire_timeout());
        self.settings = settings;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        self.scene.set_screen(Self::screen_rect(width, height));
        self.framebuffer.request_config(surface_config(&self.settings, width, height));
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Renders and presents one frame seen from `viewpoint`. `overlay`
    /// records 2D content drawn over the post-processed scene.
    ///
    /// Transient presentation failures are absorbed: the frame is reported
    /// as [`FrameOutcome::Skipped`] and the next frame starts from rebuilt
    /// presentation images.
    pub fn render_frame(
        &mut self,
        world: &dyn WorldView,
        provider: &dyn TextureProvider,
        viewpoint: &Viewpoint,
        overlay: &mut dyn FnMut(&mut CommandRecorder),
    ) -> Result<FrameOutcome> {
        let image = match self.acquire() {
            Ok(image) => image,
            Err(err) if err.is_recoverable() => {
                log::warn!("Frame skipped: {err}");
                return Ok(FrameOutcome::Skipped { reason: err.to_string() });
            }
            Err(err) => return Err(err),
        };

        self.materials.begin_frame();
        self.textures.next_frame();
        self.frame_count += 1;

        let eyes = match self.draw_eyes(world, provider, viewpoint, overlay) {
            Ok(eyes) => eyes,
            Err(err) => {
                self.finish_frame();
                self.framebuffer.discard(image)?;
                return Err(err);
            }
        };

        let image_index = image.index();
        let presented = self.framebuffer.queue_present(&mut self.swap_chain, image);
        self.finish_frame();

        match presented {
            Ok(()) => Ok(FrameOutcome::Presented { image_index, eyes }),
            Err(err) if err.is_recoverable() => {
                log::warn!("Present failed, rebuilding before the next frame: {err}");
                Ok(FrameOutcome::Skipped { reason: err.to_string() })
            }
            Err(err) => Err(err),
        }
    }

    /// Acquires a presentation image, rebuilding and retrying once.
    fn acquire(&mut self) -> Result<AcquiredImage> {
        match self.framebuffer.acquire_image(&mut self.swap_chain) {
            Err(err) if err.is_recoverable() => {
                log::debug!("Acquire failed ({err}), rebuilding presentation images");
                self.framebuffer.rebuild(&mut self.swap_chain)?;
                self.framebuffer.acquire_image(&mut self.swap_chain)
            }
            other => other,
        }
    }

    fn draw_eyes(
        &mut self,
        world: &dyn WorldView,
        provider: &dyn TextureProvider,
        viewpoint: &Viewpoint,
        overlay: &mut dyn FnMut(&mut CommandRecorder),
    ) -> Result<usize> {
        let settings = &self.settings;
        let mode = settings.stereo_mode;
        let screen = Self::screen_rect(self.width, self.height);
        let aspect = self.width as f32 / self.height.max(1) as f32;
        let fov_ratio = aspect.min(4.0 / 3.0);
        let hw_yaw = viewpoint.hw_angles().yaw;

        self.scene.begin_frame(settings);
        let mut res = FrameResources {
            device: &mut self.device,
            textures: &mut self.textures,
            samplers: &self.samplers,
            materials: &mut self.materials,
            provider,
            world,
            settings,
        };

        let eyes = mode.eyes(settings.eye_separation);
        for eye in &eyes {
            self.scene.set_3d_viewport(settings, mode.eye_viewport(screen, eye.index), true);

            let projection = eye.projection(
                viewpoint.fov,
                aspect,
                fov_ratio,
                settings.near_plane,
                settings.far_plane,
            );
            let eye_view = viewpoint.shifted(eye.view_shift(hw_yaw, settings.units_per_meter));
            let config = ViewConfig::new(eye_view)
                .with_projection(projection)
                .with_mode(DrawMode::MainView);
            self.scene.process_view(&mut res, config, &mut *overlay)?;

            if mode.blits_eyes() {
                self.scene
                    .recorder_mut()
                    .push(RenderCommand::BlitToEyeTexture { eye: eye.index });
            }
        }
        Ok(eyes.len())
    }

    fn finish_frame(&mut self) {
        self.materials.end_frame(&mut self.device);
        let evicted = self
            .textures
            .evict_unused(&mut self.device, self.settings.texture_max_age);
        if evicted > 0 {
            log::debug!("Evicted {evicted} unused textures");
        }
    }

    /// Renders `viewpoint` into the scene buffer without presenting, for
    /// camera textures and saved pictures. No HUD and no post-processing.
    pub fn render_offscreen(
        &mut self,
        world: &dyn WorldView,
        provider: &dyn TextureProvider,
        viewpoint: &Viewpoint,
        bounds: Rect,
        projection: Mat4,
    ) -> Result<()> {
        self.materials.begin_frame();
        let settings = &self.settings;
        self.scene.begin_frame(settings);
        self.scene.set_3d_viewport(settings, bounds, false);

        let mut res = FrameResources {
            device: &mut self.device,
            textures: &mut self.textures,
            samplers: &self.samplers,
            materials: &mut self.materials,
            provider,
            world,
            settings,
        };
        let config = ViewConfig::new(*viewpoint)
            .with_projection(projection)
            .with_mode(DrawMode::Offscreen);
        let result = self.scene.process_view(&mut res, config, &mut |_| {});
        self.materials.end_frame(&mut self.device);
        result
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Waits for the GPU and releases every resource the renderer owns.
    pub fn shutdown(&mut self) {
        self.swap_chain.wait_idle();
        self.materials.destroy(&mut self.device);
        self.textures.destroy(&mut self.device);
        self.samplers.destroy(&mut self.device);
        self.framebuffer.destroy(&mut self.swap_chain);
        log::info!("Renderer shut down after {} frames", self.frame_count);
    }
}
