//! Stereo 3D
//!
//! Each stereo mode yields one [`EyePose`] per eye. An eye is a horizontal
//! offset from the centre of the head: the view moves sideways by the
//! offset (scaled to world units) and the projection frustum is skewed so
//! both eyes converge on the virtual screen plane.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::renderer::scene::viewpoint::perspective;
use crate::renderer::state::Rect;

/// Distance to the virtual screen plane, in meters.
pub const SCREEN_DISTANCE: f32 = 0.80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stereo3DMode {
    #[default]
    Mono,
    SideBySide,
    TopBottom,
}

impl Stereo3DMode {
    #[must_use]
    pub const fn eye_count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::SideBySide | Self::TopBottom => 2,
        }
    }

    /// Eyes to render, left first. `separation` is the interpupillary
    /// distance in meters.
    #[must_use]
    pub fn eyes(self, separation: f32) -> SmallVec<[EyePose; 2]> {
        let half = separation * 0.5;
        match self {
            Self::Mono => smallvec::smallvec![EyePose { index: 0, shift: 0.0 }],
            Self::SideBySide | Self::TopBottom => smallvec::smallvec![
                EyePose { index: 0, shift: -half },
                EyePose { index: 1, shift: half },
            ],
        }
    }

    /// Part of `screen` that eye `index` is shown in.
    #[must_use]
    pub fn eye_viewport(self, screen: Rect, index: usize) -> Rect {
        let i = index as u32;
        match self {
            Self::Mono => screen,
            Self::SideBySide => {
                let width = screen.width / 2;
                Rect {
                    x: screen.x + width as i32 * i as i32,
                    width,
                    ..screen
                }
            }
            Self::TopBottom => {
                let height = screen.height / 2;
                Rect {
                    y: screen.y + height as i32 * i as i32,
                    height,
                    ..screen
                }
            }
        }
    }

    /// Eyes are rendered to separate textures and composed afterwards.
    #[inline]
    #[must_use]
    pub fn blits_eyes(self) -> bool {
        self != Self::Mono
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyePose {
    pub index: usize,
    /// Horizontal offset in meters, negative for the left eye.
    pub shift: f32,
}

impl EyePose {
    /// Projection with the frustum skewed towards the screen centre.
    #[must_use]
    pub fn projection(&self, fov: f32, aspect: f32, fov_ratio: f32, near: f32, far: f32) -> Mat4 {
        let frustum_shift = near * self.shift / SCREEN_DISTANCE;
        perspective(fov, aspect, fov_ratio, near, far, frustum_shift)
    }

    /// World-space offset of this eye for a hardware yaw in degrees.
    #[must_use]
    pub fn view_shift(&self, hw_yaw: f32, units_per_meter: f32) -> Vec3 {
        let distance = self.shift * units_per_meter;
        let (sin, cos) = hw_yaw.to_radians().sin_cos();
        Vec3::new(-cos * distance, sin * distance, 0.0)
    }
}
