// SPDX-License-Identifier: CEPL-1.0
//! Camera and per-object transform math for the cube demo.
//!
//! Matrices follow glam's column-vector convention: a world matrix applies
//! rotation first and translation second (`T * R`), and the full transform is
//! `projection * view * world`. The GPU receives the transpose (see
//! [`gpu_matrix`]).

mod camera;
mod transform;

pub use camera::{Camera, Movement, Projection};
pub use glam::{Mat4, Vec3, Vec4};
pub use transform::{gpu_matrix, ObjectTransform, SPIN_PER_TICK};
