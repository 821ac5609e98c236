// Orbit camera
//
// Circles the origin at a fixed distance. Yaw/pitch are driven by mouse
// drags: a drag across the full window width (or height) turns by pi.

use glam::{Mat4, Vec3};
use std::f32::consts::{FRAC_PI_2, PI};

/// Keeps the eye off the poles where look_at degenerates
const PITCH_LIMIT: f32 = FRAC_PI_2 - 0.01;
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitCamera {
    pub yaw: f32,
    pub pitch: f32,
    pub radius: f32,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub target: Vec3,
}

impl OrbitCamera {
    pub fn new(radius: f32, fov_y_degrees: f32) -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            radius,
            fov_y: fov_y_degrees.to_radians(),
            target: Vec3::ZERO,
        }
    }

    /// Apply a cursor drag of (dx, dy) pixels in a window of the given size
    pub fn drag(&mut self, dx: f32, dy: f32, width: f32, height: f32) {
        if width > 0.0 {
            self.yaw -= dx / width * PI;
        }
        if height > 0.0 {
            self.pitch += dy / height * PI;
        }
        self.yaw = self.yaw.rem_euclid(2.0 * PI);
        self.pitch = self.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    pub fn eye(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target
            + self.radius * Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }

    /// Vulkan clip space: depth 0..1, y pointing down
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y, aspect, NEAR_PLANE, FAR_PLANE);
        proj.y_axis.y *= -1.0;
        proj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn starts_on_positive_z() {
        let camera = OrbitCamera::new(3.0, 45.0);
        let eye = camera.eye();
        assert_relative_eq!(eye.x, 0.0);
        assert_relative_eq!(eye.y, 0.0);
        assert_relative_eq!(eye.z, 3.0);
    }

    #[test]
    fn full_width_drag_turns_half_a_circle() {
        let mut camera = OrbitCamera::new(3.0, 45.0);
        camera.drag(-500.0, 0.0, 500.0, 500.0);
        assert_relative_eq!(camera.yaw, PI, epsilon = 1e-5);
        let eye = camera.eye();
        assert_relative_eq!(eye.z, -3.0, epsilon = 1e-5);
    }

    #[test]
    fn pitch_is_clamped_inside_the_poles() {
        let mut camera = OrbitCamera::new(3.0, 45.0);
        camera.drag(0.0, 2000.0, 500.0, 500.0);
        assert_relative_eq!(camera.pitch, PITCH_LIMIT);
        camera.drag(0.0, -5000.0, 500.0, 500.0);
        assert_relative_eq!(camera.pitch, -PITCH_LIMIT);
        assert!(camera.eye().y < 3.0);
    }

    #[test]
    fn zero_sized_window_ignores_drag() {
        let mut camera = OrbitCamera::new(3.0, 45.0);
        camera.drag(100.0, 100.0, 0.0, 0.0);
        assert_eq!(camera.yaw, 0.0);
        assert_eq!(camera.pitch, 0.0);
    }

    #[test]
    fn view_keeps_distance_to_target() {
        let mut camera = OrbitCamera::new(4.0, 60.0);
        camera.drag(123.0, -77.0, 500.0, 500.0);
        let eye_in_view = camera.view().transform_point3(camera.eye());
        assert_relative_eq!(eye_in_view.length(), 0.0, epsilon = 1e-4);
        let target_in_view = camera.view().transform_point3(Vec3::ZERO);
        assert_relative_eq!(target_in_view.z, -4.0, epsilon = 1e-4);
    }

    #[test]
    fn projection_flips_y() {
        let camera = OrbitCamera::new(3.0, 90.0);
        let proj = camera.projection(1.0);
        assert!(proj.y_axis.y < 0.0);
        assert!(proj.x_axis.x > 0.0);
        // A point on the near plane maps to depth 0
        let near = proj.project_point3(Vec3::new(0.0, 0.0, -NEAR_PLANE));
        assert_relative_eq!(near.z, 0.0, epsilon = 1e-5);
    }
}
