//! Player (HUD) sprites: weapon graphics drawn on top of the 3D view.

use glam::{Vec2, Vec3};

use crate::renderer::material::MaterialId;
use crate::renderer::texture::Translation;

use super::world::{ActorId, RenderStyle};

#[derive(Debug, Clone, PartialEq)]
pub struct HudSprite {
    pub owner: ActorId,
    pub material: Option<MaterialId>,
    /// Drawn as a 3D model after a depth clear instead of a 2D quad.
    pub model: bool,
    /// Screen position in virtual 320x200 units.
    pub position: Vec2,
    /// Degrees.
    pub rotation: f32,
    pub pivot: Vec2,
    pub translation: Translation,
    pub style: RenderStyle,
    pub alpha: f32,
    pub light_level: u8,
    pub dynamic_color: Vec3,
    /// Ignores sector lighting.
    pub fullbright: bool,
}

impl HudSprite {
    #[must_use]
    pub fn new(owner: ActorId) -> Self {
        Self {
            owner,
            material: None,
            model: false,
            position: Vec2::ZERO,
            rotation: 0.0,
            pivot: Vec2::ZERO,
            translation: Translation::None,
            style: RenderStyle::Masked,
            alpha: 1.0,
            light_level: 255,
            dynamic_color: Vec3::ZERO,
            fullbright: false,
        }
    }
}

/// Drops invisible sprites and applies fullbright. A fullbright view lights
/// every sprite at full level.
#[must_use]
pub fn prepare_player_sprites(sprites: Vec<HudSprite>, fullbright_view: bool) -> Vec<HudSprite> {
    sprites
        .into_iter()
        .filter(|s| s.alpha > 0.0)
        .map(|mut s| {
            if fullbright_view || s.fullbright {
                s.light_level = 255;
                s.dynamic_color = Vec3::ZERO;
            }
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fullbright_view_forces_full_light() {
        let mut dim = HudSprite::new(ActorId(1));
        dim.light_level = 64;
        let mut hidden = HudSprite::new(ActorId(1));
        hidden.alpha = 0.0;

        let out = prepare_player_sprites(vec![dim.clone(), hidden], true);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].light_level, 255);

        let out = prepare_player_sprites(vec![dim], false);
        assert_eq!(out[0].light_level, 64);
    }
}
