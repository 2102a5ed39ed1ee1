//! Error Types
//!
//! This module defines the error type used throughout the renderer.
//!
//! # Overview
//!
//! [`StrataError`] groups failures by how far they are allowed to travel:
//! - Backend-transient failures (surface lost, acquire timeout, device loss)
//!   propagate to the frame driver, which rebuilds and retries once.
//! - Component-local failures (a single image) are absorbed by the owning
//!   cache, which substitutes a placeholder.
//! - Invariant violations (unbalanced acquire/present, out-of-order
//!   draw-info transitions) are reported as errors instead of panicking.
//!
//! All public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, StrataError>`.

use std::time::Duration;

use thiserror::Error;

use crate::renderer::scene::DrawInfoState;

/// The main error type for the renderer.
#[derive(Error, Debug)]
pub enum StrataError {
    // ========================================================================
    // Backend-Transient Errors
    // ========================================================================
    /// The presentation surface was lost and must be recreated.
    #[error("Presentation surface lost")]
    SurfaceLost,

    /// The presentation surface no longer matches the window.
    #[error("Presentation surface is outdated")]
    SurfaceOutdated,

    /// No presentation image became available in time.
    #[error("Timed out after {0:?} waiting for a presentation image")]
    AcquireTimeout(Duration),

    /// The GPU device was lost or reset.
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// The backend rejected an image description.
    #[error("Failed to create image '{label}': {reason}")]
    ImageCreateFailed {
        /// Debug label of the image
        label: String,
        /// Backend-specific reason
        reason: String,
    },

    /// Pixel data could not be written to an image.
    #[error("Failed to upload image '{label}': {reason}")]
    UploadFailed {
        /// Debug label of the image
        label: String,
        /// Backend-specific reason
        reason: String,
    },

    // ========================================================================
    // State Machine Violations
    // ========================================================================
    /// `acquire_image` was called while an image was still held.
    #[error("Presentation image {0} is already acquired")]
    AlreadyAcquired(u32),

    /// Present or discard without a matching acquire.
    #[error("No presentation image is acquired")]
    NotAcquired,

    /// An image token outlived the swap chain it was acquired from.
    #[error("Presentation image belongs to a swap chain that has been rebuilt")]
    StaleImage,

    /// A draw info was driven out of order.
    #[error("Invalid draw info transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the instance was in
        from: DrawInfoState,
        /// State that was requested
        to: DrawInfoState,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Settings could not be parsed.
    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StrataError {
    /// Returns `true` for failures that are cured by rebuilding presentation
    /// resources and trying again.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SurfaceLost | Self::SurfaceOutdated | Self::AcquireTimeout(_) | Self::DeviceLost(_)
        )
    }
}

/// Alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_recoverable() {
        assert!(StrataError::SurfaceLost.is_recoverable());
        assert!(StrataError::AcquireTimeout(Duration::from_millis(5)).is_recoverable());
        assert!(StrataError::DeviceLost("reset".into()).is_recoverable());
        assert!(!StrataError::NotAcquired.is_recoverable());
        assert!(!StrataError::AlreadyAcquired(1).is_recoverable());
    }
}
