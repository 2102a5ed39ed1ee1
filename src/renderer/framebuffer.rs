//! Framebuffer Manager (presentation cycle)
//!
//! Drives a [`SwapChain`] through `Idle -> Acquired -> Idle`:
//!
//! | Call            | From       | To         | Failure                              |
//! |-----------------|------------|------------|--------------------------------------|
//! | `acquire_image` | `Idle`     | `Acquired` | `AlreadyAcquired` when still holding |
//! | `queue_present` | `Acquired` | `Idle`     | `NotAcquired`, `StaleImage`          |
//! | `discard`       | `Acquired` | `Idle`     | `NotAcquired`, `StaleImage`          |
//!
//! An acquired image is represented by an [`AcquiredImage`] token. The token
//! is not `Clone`, and presenting or discarding consumes it.
//!
//! Presentation images and their semaphores are rebuilt as a unit whenever
//! the surface configuration changes or the backend reports a transient
//! failure. A rebuild first waits for in-flight work, then bumps the
//! generation so tokens from the old images are rejected.

use std::time::Duration;

use crate::errors::{Result, StrataError};
use crate::renderer::core::{SemaphoreId, SurfaceConfig, SwapChain};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentState {
    Idle,
    Acquired(u32),
}

/// Proof of a successful acquire. Must be presented or discarded.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an acquired image must be presented or discarded"]
pub struct AcquiredImage {
    index: u32,
    generation: u64,
}

impl AcquiredImage {
    #[inline]
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug)]
pub struct FramebufferManager {
    config: SurfaceConfig,
    needs_rebuild: bool,
    state: PresentState,
    generation: u64,
    image_available: Option<SemaphoreId>,
    render_finished: Option<SemaphoreId>,
    acquire_timeout: Duration,
    rebuilds: u32,
}

impl FramebufferManager {
    /// The swap chain is configured lazily on the first acquire.
    #[must_use]
    pub fn new(config: SurfaceConfig, acquire_timeout: Duration) -> Self {
        Self {
            config,
            needs_rebuild: true,
            state: PresentState::Idle,
            generation: 0,
            image_available: None,
            render_finished: None,
            acquire_timeout,
            rebuilds: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> PresentState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Completed rebuilds, including the initial configuration.
    #[inline]
    #[must_use]
    pub fn rebuilds(&self) -> u32 {
        self.rebuilds
    }

    pub fn set_acquire_timeout(&mut self, timeout: Duration) {
        self.acquire_timeout = timeout;
    }

    /// Schedules a rebuild if `config` differs from the current one.
    pub fn request_config(&mut self, config: SurfaceConfig) {
        if config != self.config {
            log::debug!("Surface configuration changed: {config:?}");
            self.config = config;
            self.needs_rebuild = true;
        }
    }

    /// Forces a rebuild before the next acquire.
    pub fn mark_lost(&mut self) {
        self.needs_rebuild = true;
    }

    /// Tears down and recreates the presentation images and semaphores.
    pub fn rebuild<S: SwapChain>(&mut self, chain: &mut S) -> Result<()> {
        chain.wait_idle();
        self.destroy_semaphores(chain);
        self.state = PresentState::Idle;
        // Stays set until the chain is usable again.
        self.needs_rebuild = true;

        chain.configure(&self.config)?;
        self.image_available = Some(chain.create_semaphore());
        self.render_finished = Some(chain.create_semaphore());
        self.generation += 1;
        self.needs_rebuild = false;
        self.rebuilds += 1;
        log::info!(
            "Presentation images rebuilt: {}x{}, {} images (generation {})",
            self.config.width,
            self.config.height,
            chain.image_count(),
            self.generation
        );
        Ok(())
    }

    /// Waits for the next presentation image.
    pub fn acquire_image<S: SwapChain>(&mut self, chain: &mut S) -> Result<AcquiredImage> {
        if let PresentState::Acquired(index) = self.state {
            return Err(StrataError::AlreadyAcquired(index));
        }
        if self.needs_rebuild {
            self.rebuild(chain)?;
        }
        let Some(signal) = self.image_available else {
            return Err(StrataError::SurfaceOutdated);
        };

        match chain.acquire_next_image(self.acquire_timeout, signal) {
            Ok(index) => {
                self.state = PresentState::Acquired(index);
                Ok(AcquiredImage {
                    index,
                    generation: self.generation,
                })
            }
            Err(err) => {
                if err.is_recoverable() {
                    self.needs_rebuild = true;
                }
                Err(err)
            }
        }
    }

    fn release(&mut self, image: &AcquiredImage) -> Result<()> {
        if image.generation != self.generation {
            return Err(StrataError::StaleImage);
        }
        match self.state {
            PresentState::Acquired(index) if index == image.index => {
                self.state = PresentState::Idle;
                Ok(())
            }
            _ => Err(StrataError::NotAcquired),
        }
    }

    /// Queues the image for display. The manager is `Idle` afterwards even
    /// when the backend fails.
    pub fn queue_present<S: SwapChain>(&mut self, chain: &mut S, image: AcquiredImage) -> Result<()> {
        self.release(&image)?;
        let Some(wait) = self.render_finished else {
            return Err(StrataError::SurfaceOutdated);
        };
        chain.present(image.index, wait).inspect_err(|err| {
            if err.is_recoverable() {
                self.needs_rebuild = true;
            }
        })
    }

    /// Gives the image back without presenting it.
    pub fn discard(&mut self, image: AcquiredImage) -> Result<()> {
        self.release(&image)
    }

    fn destroy_semaphores<S: SwapChain>(&mut self, chain: &mut S) {
        for semaphore in [self.image_available.take(), self.render_finished.take()]
            .into_iter()
            .flatten()
        {
            chain.destroy_semaphore(semaphore);
        }
    }

    pub fn destroy<S: SwapChain>(&mut self, chain: &mut S) {
        chain.wait_idle();
        self.destroy_semaphores(chain);
        self.state = PresentState::Idle;
        self.needs_rebuild = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::{HeadlessSwapChain, SurfaceFault};

    fn manager() -> FramebufferManager {
        FramebufferManager::new(SurfaceConfig::default(), Duration::from_millis(10))
    }

    #[test]
    fn first_acquire_configures_the_chain() {
        let mut chain = HeadlessSwapChain::new();
        let mut fb = manager();
        let image = fb.acquire_image(&mut chain).unwrap();
        assert_eq!(chain.configure_count(), 1);
        assert_eq!(chain.live_semaphores(), 2);
        assert_eq!(fb.state(), PresentState::Acquired(image.index()));
        fb.queue_present(&mut chain, image).unwrap();
        assert_eq!(fb.state(), PresentState::Idle);
        assert_eq!(chain.presented(), &[0]);
    }

    #[test]
    fn rebuild_replaces_semaphores_and_invalidates_tokens() {
        let mut chain = HeadlessSwapChain::new();
        let mut fb = manager();
        let image = fb.acquire_image(&mut chain).unwrap();

        fb.request_config(SurfaceConfig {
            width: 640,
            height: 480,
            ..SurfaceConfig::default()
        });
        assert!(fb.needs_rebuild());
        fb.rebuild(&mut chain).unwrap();
        assert_eq!(chain.live_semaphores(), 2);
        assert_eq!(chain.wait_idle_count(), 2);

        assert!(matches!(fb.queue_present(&mut chain, image), Err(StrataError::StaleImage)));
    }

    #[test]
    fn failed_acquire_schedules_rebuild() {
        let mut chain = HeadlessSwapChain::new();
        let mut fb = manager();
        fb.rebuild(&mut chain).unwrap();
        chain.fail_next_acquire(SurfaceFault::Timeout);
        let err = fb.acquire_image(&mut chain).unwrap_err();
        assert!(matches!(err, StrataError::AcquireTimeout(_)));
        assert!(fb.needs_rebuild());
        assert_eq!(fb.state(), PresentState::Idle);

        let image = fb.acquire_image(&mut chain).unwrap();
        assert_eq!(chain.configure_count(), 2);
        fb.discard(image).unwrap();
    }

    #[test]
    fn failed_rebuild_is_retried_on_the_next_acquire() {
        let mut chain = HeadlessSwapChain::new();
        let mut fb = manager();
        let image = fb.acquire_image(&mut chain).unwrap();
        fb.queue_present(&mut chain, image).unwrap();
        assert!(!fb.needs_rebuild());

        chain.fail_next_configure(SurfaceFault::Lost);
        assert!(matches!(fb.rebuild(&mut chain), Err(StrataError::SurfaceLost)));
        assert!(fb.needs_rebuild());
        assert_eq!(chain.live_semaphores(), 0);

        let image = fb.acquire_image(&mut chain).unwrap();
        assert_eq!(chain.configure_count(), 2);
        assert_eq!(chain.live_semaphores(), 2);
        fb.discard(image).unwrap();
    }
}
