//! Renderer Settings
//!
//! [`RendererSettings`] collects every user-facing knob of the frame
//! pipeline. It deserializes from JSON with missing fields falling back to
//! [`Default`], so a settings file only needs the values it changes.
//!
//! ```rust,ignore
//! use strata::RendererSettings;
//!
//! let settings = RendererSettings::from_json_str(r#"{ "ssao": true, "ssao_portals": 2 }"#)?;
//! renderer.apply_settings(settings);
//! ```
//!
//! Some fields only take effect through [`Renderer::apply_settings`]:
//!
//! | Field group                              | Effect of a change                          |
//! |------------------------------------------|---------------------------------------------|
//! | `texture_filter`, `anisotropy`           | samplers rebuilt, material bindings dropped |
//! | `vsync`, `hdr`, `exclusive_fullscreen`, `swap_chain_images` | swap chain rebuilt before the next acquire |
//! | everything else                          | read at the start of the next frame         |
//!
//! [`Renderer::apply_settings`]: crate::renderer::Renderer::apply_settings

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::renderer::stereo::Stereo3DMode;

/// Global texture filtering policy applied to every material sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFilter {
    /// Point sampling, no mipmaps.
    Nearest,
    /// Point sampling with nearest mip selection.
    NearestMipmapped,
    /// Linear sampling with nearest mip selection.
    Bilinear,
    /// Linear sampling with linear mip blending.
    #[default]
    Trilinear,
}

/// How dynamic lights reach the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LightMethod {
    /// Lights are gathered while the scene is built, into a persistently
    /// mapped buffer.
    #[default]
    Persistent,
    /// Flats and translucent geometry gather their lights in a lights-only
    /// prepass right before drawing.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Draw textures. When off, solid geometry is drawn untextured and masked
    /// geometry uses the texture only as an alpha mask.
    pub texture_enabled: bool,
    /// Skip drawing the first sky portal before the opaque passes.
    pub no_sky_clear: bool,
    /// Alpha-test threshold of masked walls and flats.
    pub mask_threshold: f32,
    /// Alpha-test threshold of translucent sprites.
    pub mask_sprite_threshold: f32,
    /// Sort plain and masked lists by material before drawing.
    pub sort_textures: bool,
    /// Render to a geometry buffer and apply screen-space ambient occlusion.
    pub ssao: bool,
    /// How many portal views per frame may also apply SSAO.
    pub ssao_portals: u32,
    pub light_method: LightMethod,
    /// Deepest nesting of portal views.
    pub max_portal_recursion: u32,
    pub texture_filter: TextureFilter,
    pub anisotropy: u16,
    pub stereo_mode: Stereo3DMode,
    /// Interpupillary distance in meters.
    pub eye_separation: f32,
    /// World units per meter, scales the eye separation.
    pub units_per_meter: f32,
    pub near_plane: f32,
    pub far_plane: f32,
    pub scene_clear_color: [f32; 3],
    pub bloom: bool,
    pub vsync: bool,
    pub hdr: bool,
    pub exclusive_fullscreen: bool,
    pub swap_chain_images: u32,
    pub acquire_timeout_ms: u64,
    /// Frames a cached texture may go unused before it is evicted.
    pub texture_max_age: u64,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            texture_enabled: true,
            no_sky_clear: false,
            mask_threshold: 0.5,
            mask_sprite_threshold: 0.5,
            sort_textures: false,
            ssao: false,
            ssao_portals: 0,
            light_method: LightMethod::Persistent,
            max_portal_recursion: 4,
            texture_filter: TextureFilter::Trilinear,
            anisotropy: 8,
            stereo_mode: Stereo3DMode::Mono,
            eye_separation: 0.062,
            units_per_meter: 41.0,
            near_plane: 5.0,
            far_plane: 65536.0,
            scene_clear_color: [0.0, 0.0, 0.0],
            bloom: false,
            vsync: true,
            hdr: false,
            exclusive_fullscreen: false,
            swap_chain_images: 3,
            acquire_timeout_ms: 1000,
            texture_max_age: 600,
        }
    }
}

impl RendererSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// `true` when switching from `self` to `other` changes global filtering.
    #[must_use]
    pub fn sampler_policy_differs(&self, other: &Self) -> bool {
        self.texture_filter != other.texture_filter || self.anisotropy != other.anisotropy
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let s = RendererSettings::from_json_str(r#"{ "ssao": true, "anisotropy": 4 }"#).unwrap();
        assert!(s.ssao);
        assert_eq!(s.anisotropy, 4);
        assert!((s.mask_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(s.max_portal_recursion, 4);
    }

    #[test]
    fn malformed_json_is_a_settings_error() {
        let err = RendererSettings::from_json_str("{ ssao: ").unwrap_err();
        assert!(matches!(err, crate::errors::StrataError::Settings(_)));
    }
}
