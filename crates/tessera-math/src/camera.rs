// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use glam::{Mat4, Vec3};

bitflags! {
    /// Directions a single key-down can push the camera in.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Movement: u8 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

/// Radians of rotation per pixel of mouse motion.
const LOOK_SENSITIVITY: f32 = 0.002;
const MAX_PITCH: f32 = 89.0_f32 * std::f32::consts::PI / 180.0;

/// First-person camera in a left-handed world (+z forward, +y up).
#[derive(Clone, Debug)]
pub struct Camera {
    position: Vec3,
    up: Vec3,
    yaw: f32,
    pitch: f32,
}

impl Camera {
    pub fn new(position: Vec3, look: Vec3, up: Vec3) -> Self {
        let look = look.normalize_or(Vec3::Z);
        Self {
            position,
            up: up.normalize_or(Vec3::Y),
            yaw: look.x.atan2(look.z),
            pitch: look.y.clamp(-1.0, 1.0).asin().clamp(-MAX_PITCH, MAX_PITCH),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn forward(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        Vec3::new(sy * cp, sp, cy * cp)
    }

    pub fn right(&self) -> Vec3 {
        self.up.cross(self.forward()).normalize_or(Vec3::X)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_to_lh(self.position, self.forward(), self.up)
    }

    pub fn move_by(&mut self, dirs: Movement, distance: f32) {
        let forward = self.forward();
        let right = self.right();
        let mut delta = Vec3::ZERO;
        if dirs.contains(Movement::FORWARD) {
            delta += forward;
        }
        if dirs.contains(Movement::BACKWARD) {
            delta -= forward;
        }
        if dirs.contains(Movement::RIGHT) {
            delta += right;
        }
        if dirs.contains(Movement::LEFT) {
            delta -= right;
        }
        self.position += delta * distance;
    }

    /// Applies a mouse delta in pixels. Positive `dy` looks down.
    pub fn look_by(&mut self, dx: f32, dy: f32) {
        self.yaw += dx * LOOK_SENSITIVITY;
        self.pitch = (self.pitch - dy * LOOK_SENSITIVITY).clamp(-MAX_PITCH, MAX_PITCH);
    }
}

/// Left-handed perspective projection with a [0, 1] depth range.
#[derive(Clone, Copy, Debug)]
pub struct Projection {
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Projection {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            fov_y: 45.0_f32.to_radians(),
            aspect: aspect(width, height),
            near: 0.1,
            far: 1000.0,
        }
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.aspect = aspect(width, height);
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_lh(self.fov_y, self.aspect, self.near, self.far)
    }
}

fn aspect(width: u32, height: u32) -> f32 {
    width.max(1) as f32 / height.max(1) as f32
}
