//! Viewpoint, View Uniforms and Frustum
//!
//! World coordinates are Z-up (`x`, `y` horizontal). Geometry is submitted
//! to the GPU in a Y-up render space where world `(x, y, z)` becomes
//! `(x, z, y)`; [`to_render_space`] performs the swizzle. The view matrix
//! undoes it with a negative X scale, and mirrors flip that scale once more.
//!
//! Projection matrices use the OpenGL depth range (`[-1, 1]`), matching the
//! plane extraction in [`Frustum::from_matrix`].

use glam::{Mat4, Vec3, Vec4};

use super::world::Bounds;

/// Euler angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rotator {
    pub yaw: f32,
    /// Positive looks down.
    pub pitch: f32,
    pub roll: f32,
}

/// Camera state supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewpoint {
    pub position: Vec3,
    pub angles: Rotator,
    /// Horizontal field of view in degrees.
    pub fov: f32,
    /// Vertical stretch of world units (non-square pixels).
    pub pixel_stretch: f32,
}

impl Default for Viewpoint {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            angles: Rotator::default(),
            fov: 90.0,
            pixel_stretch: 1.2,
        }
    }
}

impl Viewpoint {
    #[must_use]
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            angles: Rotator {
                yaw,
                ..Rotator::default()
            },
            ..Self::default()
        }
    }

    /// Angles in the hardware convention (yaw measured from render-space -Z).
    #[must_use]
    pub fn hw_angles(&self) -> Rotator {
        Rotator {
            yaw: 270.0 - self.angles.yaw,
            pitch: self.angles.pitch,
            roll: self.angles.roll,
        }
    }

    /// Unit view direction in world space.
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        let (sy, cy) = self.angles.yaw.to_radians().sin_cos();
        let (sp, cp) = self.angles.pitch.to_radians().sin_cos();
        Vec3::new(cy * cp, sy * cp, -sp)
    }

    /// Copy moved by `shift` world units.
    #[must_use]
    pub fn shifted(&self, shift: Vec3) -> Self {
        Self {
            position: self.position + shift,
            ..*self
        }
    }
}

#[inline]
#[must_use]
pub fn to_render_space(p: Vec3) -> Vec3 {
    Vec3::new(p.x, p.z, p.y)
}

/// OpenGL-style off-center perspective frustum.
#[must_use]
pub fn gl_frustum(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let (w, h, d) = (right - left, top - bottom, far - near);
    Mat4::from_cols(
        Vec4::new(2.0 * near / w, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * near / h, 0.0, 0.0),
        Vec4::new((right + left) / w, (top + bottom) / h, -(far + near) / d, -1.0),
        Vec4::new(0.0, 0.0, -2.0 * far * near / d, 0.0),
    )
}

/// Vertical field of view in degrees for a horizontal `fov` and FOV ratio.
#[inline]
#[must_use]
pub fn vertical_fov(fov: f32, fov_ratio: f32) -> f32 {
    2.0 * ((fov.to_radians() * 0.5).tan() / fov_ratio).atan().to_degrees()
}

// ============================================================================
// View Uniforms
// ============================================================================

/// Matrices and clip state of one view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewUniforms {
    pub projection: Mat4,
    pub view: Mat4,
    pub camera_position: Vec3,
    /// Render-space plane that discards geometry behind a mirror.
    pub clip_plane: Option<Vec4>,
}

impl Default for ViewUniforms {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            clip_plane: None,
        }
    }
}

impl ViewUniforms {
    /// Builds the view matrix from hardware angles and a world position.
    /// `mirror` flips handedness for wall mirrors, `plane_mirror` flips the
    /// vertical axis for floor and ceiling mirrors.
    pub fn set_view_matrix(
        &mut self,
        hw_angles: Rotator,
        position: Vec3,
        pixel_stretch: f32,
        mirror: bool,
        plane_mirror: bool,
    ) {
        let mult = if mirror { -1.0 } else { 1.0 };
        let plane_mult = if plane_mirror { -pixel_stretch } else { pixel_stretch };

        self.view = Mat4::from_rotation_z(hw_angles.roll.to_radians())
            * Mat4::from_rotation_x(hw_angles.pitch.to_radians())
            * Mat4::from_axis_angle(Vec3::new(0.0, mult, 0.0), hw_angles.yaw.to_radians())
            * Mat4::from_translation(Vec3::new(
                position.x * mult,
                -position.z * plane_mult,
                -position.y,
            ))
            * Mat4::from_scale(Vec3::new(-mult, plane_mult, 1.0));
        self.camera_position = position;
    }

    /// Symmetric perspective projection.
    pub fn set_perspective(&mut self, fov: f32, aspect: f32, fov_ratio: f32, near: f32, far: f32) {
        self.projection = perspective(fov, aspect, fov_ratio, near, far, 0.0);
    }

    /// Screen-space projection with the origin at the top left.
    pub fn set_ortho(&mut self, width: f32, height: f32) {
        self.view = Mat4::IDENTITY;
        self.projection = Mat4::orthographic_rh_gl(0.0, width, height, 0.0, -1.0, 1.0);
    }

    #[inline]
    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Perspective projection whose frustum is shifted horizontally by
/// `eye_shift` at the near plane (0 for a centered eye).
#[must_use]
pub fn perspective(fov: f32, aspect: f32, fov_ratio: f32, near: f32, far: f32, eye_shift: f32) -> Mat4 {
    let half_h = near * (vertical_fov(fov, fov_ratio).to_radians() * 0.5).tan();
    let half_w = half_h * aspect;
    gl_frustum(
        -half_w - eye_shift,
        half_w - eye_shift,
        -half_h,
        half_h,
        near,
        far,
    )
}

// ============================================================================
// Frustum
// ============================================================================

/// Six planes extracted from a view-projection matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6], // Left, Right, Bottom, Top, Near, Far
}

impl Frustum {
    /// Gribb-Hartmann plane extraction for an OpenGL depth range.
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];
        let mut planes = [
            rows[3] + rows[0],
            rows[3] - rows[0],
            rows[3] + rows[1],
            rows[3] - rows[1],
            rows[3] + rows[2],
            rows[3] - rows[2],
        ];
        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > f32::EPSILON {
                *plane /= length;
            }
        }
        Self { planes }
    }

    /// Sphere test in render space.
    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }

    /// Sphere test for world-space bounds.
    #[inline]
    #[must_use]
    pub fn intersects_bounds(&self, bounds: &Bounds) -> bool {
        self.intersects_sphere(to_render_space(bounds.center), bounds.radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_view(vp: &Viewpoint) -> ViewUniforms {
        let mut u = ViewUniforms::default();
        u.set_view_matrix(vp.hw_angles(), vp.position, vp.pixel_stretch, false, false);
        u.set_perspective(vp.fov, 4.0 / 3.0, 4.0 / 3.0, 5.0, 65536.0);
        u
    }

    #[test]
    fn camera_position_maps_to_eye_origin() {
        let vp = Viewpoint::new(Vec3::new(120.0, -40.0, 56.0), 33.0);
        let u = main_view(&vp);
        let eye = u.view.transform_point3(to_render_space(vp.position));
        assert!(eye.length() < 1e-3, "{eye:?}");
    }

    #[test]
    fn yaw_zero_looks_down_positive_x() {
        let vp = Viewpoint::default();
        let u = main_view(&vp);
        let ahead = u.view.transform_point3(to_render_space(Vec3::new(100.0, 0.0, 0.0)));
        assert!(ahead.z < -99.0 && ahead.x.abs() < 1e-3, "{ahead:?}");

        // +Y is to the left when facing +X
        let left = u.view.transform_point3(to_render_space(Vec3::new(100.0, 50.0, 0.0)));
        assert!(left.x < 0.0);
    }

    #[test]
    fn frustum_keeps_points_ahead_and_drops_points_behind() {
        let vp = Viewpoint::default();
        let frustum = Frustum::from_matrix(main_view(&vp).view_projection());
        assert!(frustum.intersects_bounds(&Bounds::new(Vec3::new(200.0, 0.0, 0.0), 8.0)));
        assert!(!frustum.intersects_bounds(&Bounds::new(Vec3::new(-200.0, 0.0, 0.0), 8.0)));
        assert!(!frustum.intersects_bounds(&Bounds::new(Vec3::new(200.0, 900.0, 0.0), 8.0)));
    }

    #[test]
    fn mirrored_view_still_maps_camera_to_origin() {
        let vp = Viewpoint::new(Vec3::new(400.0, 0.0, 0.0), 180.0);
        let mut u = ViewUniforms::default();
        u.set_view_matrix(vp.hw_angles(), vp.position, vp.pixel_stretch, true, false);
        let eye = u.view.transform_point3(to_render_space(vp.position));
        assert!(eye.length() < 1e-3);
        let ahead = u.view.transform_point3(to_render_space(Vec3::new(100.0, 0.0, 0.0)));
        assert!(ahead.z < 0.0);
    }

    #[test]
    fn symmetric_perspective_matches_glam() {
        let fovy = vertical_fov(90.0, 4.0 / 3.0);
        let ours = perspective(90.0, 4.0 / 3.0, 4.0 / 3.0, 5.0, 1000.0, 0.0);
        let glam = Mat4::perspective_rh_gl(fovy.to_radians(), 4.0 / 3.0, 5.0, 1000.0);
        assert!(ours.abs_diff_eq(glam, 1e-4));
    }
}
