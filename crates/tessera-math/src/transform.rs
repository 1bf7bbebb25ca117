// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec3};

/// Rotation added to every object each tick, in radians about x, y and z.
///
/// The increment is per tick, not per second, so animation speed follows the
/// frame rate.
pub const SPIN_PER_TICK: Vec3 = Vec3::new(0.0001, 0.0002, 0.0003);

#[derive(Clone, Debug)]
pub struct ObjectTransform {
    position: Vec3,
    rotation: Mat4,
    world: Mat4,
}

impl ObjectTransform {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            rotation: Mat4::IDENTITY,
            world: Mat4::from_translation(position),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Mat4 {
        self.rotation
    }

    pub fn world(&self) -> Mat4 {
        self.world
    }

    /// Accumulates `step` (x, then y, then z) on top of the current rotation
    /// and rebuilds the world matrix.
    pub fn spin(&mut self, step: Vec3) {
        let delta = Mat4::from_rotation_z(step.z)
            * Mat4::from_rotation_y(step.y)
            * Mat4::from_rotation_x(step.x);
        self.rotation = delta * self.rotation;
        self.world = Mat4::from_translation(self.position) * self.rotation;
    }

    pub fn world_view_projection(&self, view: Mat4, projection: Mat4) -> Mat4 {
        projection * view * self.world
    }
}

/// Layout the shaders read: the transpose of `m`, stored column by column,
/// which is `m` in row-major order.
pub fn gpu_matrix(m: Mat4) -> [[f32; 4]; 4] {
    m.transpose().to_cols_array_2d()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Camera, Projection};
    use glam::Vec4;

    #[test]
    fn origin_projects_to_screen_centre() {
        let object = ObjectTransform::new(Vec3::ZERO);
        let camera = Camera::new(Vec3::new(0.0, 0.0, -3.0), Vec3::Z, Vec3::Y);
        let projection = Projection::new(800, 600);

        let wvp = object.world_view_projection(camera.view(), projection.matrix());
        let clip = wvp * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(clip.w > 0.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5, "x = {}", ndc.x);
        assert!(ndc.y.abs() < 1e-5, "y = {}", ndc.y);
        assert!(ndc.z > 0.0 && ndc.z < 1.0, "z = {}", ndc.z);
    }

    #[test]
    fn spin_keeps_translation_and_accumulates() {
        let mut object = ObjectTransform::new(Vec3::new(1.0, 2.0, 3.0));
        for _ in 0..1000 {
            object.spin(SPIN_PER_TICK);
        }
        let translation = object.world().w_axis.truncate();
        assert!((translation - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-5);
        assert!(!object.rotation().abs_diff_eq(Mat4::IDENTITY, 1e-3));

        // Still a rotation: columns stay unit length.
        let r = object.rotation();
        assert!((r.x_axis.truncate().length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn gpu_matrix_is_row_major() {
        let m = Mat4::from_translation(Vec3::new(4.0, 5.0, 6.0));
        let rows = gpu_matrix(m);
        assert_eq!(rows[0], [1.0, 0.0, 0.0, 4.0]);
        assert_eq!(rows[1], [0.0, 1.0, 0.0, 5.0]);
        assert_eq!(rows[2], [0.0, 0.0, 1.0, 6.0]);
        assert_eq!(rows[3], [0.0, 0.0, 0.0, 1.0]);
    }
}
