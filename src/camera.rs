use std::f32::consts::FRAC_PI_2;

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::input::Movement;
use crate::wire::CameraUniform;

/// Radians of yaw/pitch per unit of cursor motion.
pub const ROTATION_SPEED: f32 = 0.005;
/// Vertical displacement applied by the up/down symbols.
pub const VERTICAL_STEP: f32 = 0.1;
/// Scale stored in `direction.w`; multiplies every planar translation.
pub const MOVEMENT_SPEED: f32 = 1.0;
/// Distance kept from the poles so `cos(pitch)` stays positive and the yaw
/// recovered from the direction survives a trip straight up or down.
pub const PITCH_MARGIN: f32 = 1e-4;

pub const WORLD_UP: Vec3 = Vec3::Y;

/// Camera state kept in homogeneous form.
///
/// `direction.w` is not a homogeneous coordinate: it carries the movement
/// speed applied by [`Camera::translate`].  `position.w` is never modified.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec4,
    pub direction: Vec4,
}

impl Camera {
    /// Camera at the origin looking down -Z.
    pub const INITIAL: Camera = Camera {
        position: Vec4::new(0.0, 0.0, 0.0, 1.0),
        direction: Vec4::new(0.0, 0.0, -1.0, MOVEMENT_SPEED),
    };

    pub fn yaw(&self) -> f32 {
        self.direction.z.atan2(self.direction.x)
    }

    pub fn pitch(&self) -> f32 {
        let d = self.direction;
        d.y.atan2((d.x * d.x + d.z * d.z).sqrt())
    }

    /// Advances the camera by one frame of input.
    pub fn step(&mut self, movement: Movement, dx: f32, dy: f32) {
        self.orient(dx, dy);
        self.translate(movement);
    }

    /// Rebuilds the direction from yaw/pitch after applying cursor motion.
    ///
    /// Pitch is clamped just inside the poles; the reconstruction is unit
    /// length by construction and is not renormalized.
    pub fn orient(&mut self, dx: f32, dy: f32) {
        let limit = FRAC_PI_2 - PITCH_MARGIN;
        let yaw = self.yaw() + dx * ROTATION_SPEED;
        let pitch = (self.pitch() + dy * ROTATION_SPEED).clamp(-limit, limit);

        self.direction = Vec4::new(
            pitch.cos() * yaw.cos(),
            pitch.sin(),
            pitch.cos() * yaw.sin(),
            MOVEMENT_SPEED,
        );
    }

    pub fn translate(&mut self, movement: Movement) {
        let forward = self.direction.truncate() * self.direction.w;
        let strafe = self.strafe_axis() * self.direction.w;
        let offset = match movement {
            Movement::None => Vec3::ZERO,
            Movement::Forward => forward,
            Movement::Backward => -forward,
            Movement::StrafeRight => strafe,
            Movement::StrafeLeft => -strafe,
            Movement::Up => Vec3::new(0.0, VERTICAL_STEP, 0.0),
            Movement::Down => Vec3::new(0.0, -VERTICAL_STEP, 0.0),
        };
        self.position += offset.extend(0.0);
    }

    /// Displacement direction of a right strafe, `cross(direction, up)`.
    pub fn strafe_axis(&self) -> Vec3 {
        self.direction.truncate().cross(WORLD_UP)
    }

    pub fn to_uniform(&self) -> CameraUniform {
        CameraUniform {
            position: self.position.into(),
            direction: self.direction.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn forward_step_adds_direction_to_position() {
        let mut camera = Camera::INITIAL;
        camera.step(Movement::Forward, 0.0, 0.0);
        let expected = Vec4::new(0.0, 0.0, -MOVEMENT_SPEED, 1.0);
        assert!(camera.position.abs_diff_eq(expected, EPS), "{camera:?}");
        assert!(camera
            .direction
            .abs_diff_eq(Vec4::new(0.0, 0.0, -1.0, MOVEMENT_SPEED), EPS));
    }

    #[test]
    fn backward_and_strafe_are_opposites() {
        let mut camera = Camera::INITIAL;
        camera.step(Movement::Backward, 0.0, 0.0);
        assert!(camera.position.abs_diff_eq(Vec4::new(0.0, 0.0, 1.0, 1.0), EPS));

        let mut camera = Camera::INITIAL;
        camera.step(Movement::StrafeRight, 0.0, 0.0);
        assert!(camera.position.abs_diff_eq(Vec4::new(1.0, 0.0, 0.0, 1.0), EPS));
        camera.step(Movement::StrafeLeft, 0.0, 0.0);
        assert!(camera.position.abs_diff_eq(Camera::INITIAL.position, EPS));
    }

    #[test]
    fn vertical_steps_only_touch_y() {
        let mut camera = Camera::INITIAL;
        camera.step(Movement::Up, 0.0, 0.0);
        camera.step(Movement::Up, 0.0, 0.0);
        camera.step(Movement::Down, 0.0, 0.0);
        assert!(camera
            .position
            .abs_diff_eq(Vec4::new(0.0, VERTICAL_STEP, 0.0, 1.0), EPS));
    }

    #[test]
    fn pitch_is_clamped_at_the_poles() {
        for dy in [250.0, -250.0, 10_000.0, -10_000.0] {
            let mut camera = Camera::INITIAL;
            for _ in 0..50 {
                camera.step(Movement::None, 3.0, dy);
                assert!(camera.direction.y.abs() <= FRAC_PI_2.sin() + EPS);
                assert!(camera.pitch().abs() <= FRAC_PI_2 + EPS);
            }
        }
    }

    #[test]
    fn looking_past_a_pole_keeps_the_heading() {
        for dy in [1000.0, -1000.0] {
            let mut camera = Camera::INITIAL;
            let yaw = camera.yaw();
            camera.step(Movement::None, 0.0, dy);
            assert!(camera.pitch().abs() < FRAC_PI_2);
            camera.step(Movement::None, 0.0, -dy / 5.0);
            assert!((camera.yaw() - yaw).abs() < EPS, "yaw {} became {}", yaw, camera.yaw());

            camera.step(Movement::Forward, 0.0, 0.0);
            assert!(camera.position.z < 0.0, "{camera:?}");
        }
    }

    #[test]
    fn cursor_motion_turns_the_camera() {
        let mut camera = Camera::INITIAL;
        let before = camera.yaw();
        camera.step(Movement::None, 100.0, 0.0);
        assert!((camera.yaw() - (before + 100.0 * ROTATION_SPEED)).abs() < EPS);
        assert!((camera.direction.truncate().length() - 1.0).abs() < EPS);
    }

    #[test]
    fn strafe_axis_is_perpendicular_to_direction() {
        let mut camera = Camera::INITIAL;
        for i in 0..64 {
            let dx = (i as f32 * 37.0) % 500.0 - 250.0;
            let dy = (i as f32 * 53.0) % 300.0 - 150.0;
            camera.orient(dx, dy);
            let dot = camera.strafe_axis().dot(camera.direction.truncate());
            assert!(dot.abs() < EPS, "dot {dot} at step {i}");
        }
    }

    #[test]
    fn uniform_mirrors_camera_vectors() {
        let uniform = Camera::INITIAL.to_uniform();
        assert_eq!(uniform.position, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(uniform.direction, [0.0, 0.0, -1.0, MOVEMENT_SPEED]);
    }
}
