#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! # Strata
//!
//! A multi-pass hardware scene renderer for partitioned game worlds.
//!
//! Once per displayed frame the renderer acquires a presentation image,
//! builds draw-lists from the visible world, issues the fixed pass sequence
//! (opaque, masked, decals, portals, translucent, HUD) and presents. Portals,
//! mirrors and skyboxes re-enter the same pipeline as nested views.
//!
//! The GPU is reached through two small capability traits,
//! [`renderer::core::RenderDevice`] and [`renderer::core::SwapChain`], with a
//! `wgpu` implementation and a recording headless implementation.

pub mod errors;
pub mod renderer;

pub use errors::{Result, StrataError};
pub use renderer::core::{HeadlessDevice, HeadlessSwapChain, RenderDevice, SwapChain};
pub use renderer::scene::{Viewpoint, WorldView};
pub use renderer::settings::RendererSettings;
pub use renderer::{FrameOutcome, Renderer};
