//! Perspective camera and pointer-ray math.
//!
//! The scene camera is fixed-orientation (looking down -Z) like the host
//! canvas camera; rays and drag-plane projections are derived from
//! normalized device coordinates supplied by pointer events.

use glam::{Vec2, Vec3};

/// A world-space ray cast from the camera through a screen point
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
}

/// Fixed-orientation perspective camera
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub position: Vec3,
    /// Vertical field of view in degrees
    pub fov_y_deg: f32,
    /// Width / height
    pub aspect: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.0, 5.0),
            fov_y_deg: 50.0,
            aspect: 16.0 / 9.0,
        }
    }
}

impl Camera {
    /// Half-height of the view frustum at unit distance
    fn tan_half_fov(&self) -> f32 {
        (self.fov_y_deg.to_radians() * 0.5).tan()
    }

    /// Cast a ray through a screen point given in NDC (-1..1, +Y up)
    pub fn screen_ray(&self, ndc: Vec2) -> Ray {
        let t = self.tan_half_fov();
        let dir = Vec3::new(ndc.x * t * self.aspect, ndc.y * t, -1.0).normalize();
        Ray {
            origin: self.position,
            dir,
        }
    }

    /// Project a screen point onto the z=0 plane the avatars stand on.
    /// Used for dragging so the model follows the pointer without
    /// teleporting to it.
    pub fn drag_plane_point(&self, ndc: Vec2) -> Vec2 {
        let range = self.position.z * self.tan_half_fov();
        Vec2::new(ndc.x * self.aspect * range, ndc.y * range)
    }

    /// Re-apply the aspect ratio after a surface resize
    pub fn resize(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_ray_points_forward() {
        let camera = Camera::default();
        let ray = camera.screen_ray(Vec2::ZERO);
        assert_eq!(ray.origin, camera.position);
        assert!((ray.dir - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-6);
    }

    #[test]
    fn test_offcenter_ray_direction() {
        let camera = Camera::default();
        let right = camera.screen_ray(Vec2::new(1.0, 0.0));
        let up = camera.screen_ray(Vec2::new(0.0, 1.0));
        assert!(right.dir.x > 0.0);
        assert!(up.dir.y > 0.0);
        assert!(right.dir.z < 0.0 && up.dir.z < 0.0);
    }

    #[test]
    fn test_drag_plane_scales_with_distance() {
        let mut near = Camera::default();
        near.position.z = 1.0;
        let mut far = Camera::default();
        far.position.z = 10.0;

        let p_near = near.drag_plane_point(Vec2::new(1.0, 1.0));
        let p_far = far.drag_plane_point(Vec2::new(1.0, 1.0));
        assert!(p_far.x > p_near.x);
        assert!(p_far.y > p_near.y);
    }

    #[test]
    fn test_resize_updates_aspect() {
        let mut camera = Camera::default();
        camera.resize(800, 400);
        assert_eq!(camera.aspect, 2.0);
        camera.resize(800, 0);
        assert_eq!(camera.aspect, 2.0);
    }
}
