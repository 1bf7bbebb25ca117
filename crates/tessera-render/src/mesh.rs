// SPDX-License-Identifier: CEPL-1.0
use crate::pipeline::Vertex;

/// Indexed triangle list in CPU memory, ready for upload.
#[derive(Clone, Debug)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

// (position, uv) for four corners per face, then the face normal.
type Face = ([([f32; 3], [f32; 2]); 4], [f32; 3]);

const CUBE_FACES: [Face; 6] = [
    // front
    (
        [
            ([-0.5, 0.5, -0.5], [0.0, 0.0]),
            ([0.5, -0.5, -0.5], [1.0, 1.0]),
            ([-0.5, -0.5, -0.5], [0.0, 1.0]),
            ([0.5, 0.5, -0.5], [1.0, 0.0]),
        ],
        [0.0, 0.0, -1.0],
    ),
    // right
    (
        [
            ([0.5, -0.5, -0.5], [0.0, 1.0]),
            ([0.5, 0.5, 0.5], [1.0, 0.0]),
            ([0.5, -0.5, 0.5], [1.0, 1.0]),
            ([0.5, 0.5, -0.5], [0.0, 0.0]),
        ],
        [1.0, 0.0, 0.0],
    ),
    // left
    (
        [
            ([-0.5, 0.5, 0.5], [0.0, 0.0]),
            ([-0.5, -0.5, -0.5], [1.0, 1.0]),
            ([-0.5, -0.5, 0.5], [0.0, 1.0]),
            ([-0.5, 0.5, -0.5], [1.0, 0.0]),
        ],
        [-1.0, 0.0, 0.0],
    ),
    // back
    (
        [
            ([0.5, 0.5, 0.5], [0.0, 0.0]),
            ([-0.5, -0.5, 0.5], [1.0, 1.0]),
            ([0.5, -0.5, 0.5], [0.0, 1.0]),
            ([-0.5, 0.5, 0.5], [1.0, 0.0]),
        ],
        [0.0, 0.0, 1.0],
    ),
    // top
    (
        [
            ([-0.5, 0.5, -0.5], [0.0, 1.0]),
            ([0.5, 0.5, 0.5], [1.0, 0.0]),
            ([0.5, 0.5, -0.5], [1.0, 1.0]),
            ([-0.5, 0.5, 0.5], [0.0, 0.0]),
        ],
        [0.0, 1.0, 0.0],
    ),
    // bottom
    (
        [
            ([0.5, -0.5, 0.5], [0.0, 0.0]),
            ([-0.5, -0.5, -0.5], [1.0, 1.0]),
            ([0.5, -0.5, -0.5], [0.0, 1.0]),
            ([-0.5, -0.5, 0.5], [1.0, 0.0]),
        ],
        [0.0, -1.0, 0.0],
    ),
];

impl MeshData {
    /// Unit cube centred on the origin: 24 vertices, 36 indices, clockwise
    /// front faces.
    pub fn cube() -> Self {
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (corners, normal) in CUBE_FACES {
            let base = vertices.len() as u32;
            vertices.extend(corners.iter().map(|&(pos, uv)| Vertex { pos, normal, uv }));
            indices.extend([base, base + 1, base + 2, base, base + 3, base + 1]);
        }
        Self { vertices, indices }
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn cube_shape() {
        let m = MeshData::cube();
        assert_eq!(m.vertices.len(), 24);
        assert_eq!(m.indices.len(), 36);
        assert!(m.indices.iter().all(|&i| i < 24));
        assert_eq!(m.vertex_bytes().len(), 24 * 32);
        assert_eq!(m.index_bytes().len(), 36 * 4);
    }

    #[test]
    fn winding_agrees_with_face_normals() {
        let m = MeshData::cube();
        for tri in m.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| m.vertices[i as usize]);
            let (pa, pb, pc) = (Vec3::from(a.pos), Vec3::from(b.pos), Vec3::from(c.pos));
            let n = (pb - pa).cross(pc - pa).normalize();
            assert!(n.abs_diff_eq(Vec3::from(a.normal), 1e-6), "{tri:?}: {n}");
        }
    }

    #[test]
    fn corners_lie_on_their_face() {
        for v in MeshData::cube().vertices {
            let p = Vec3::from(v.pos);
            let n = Vec3::from(v.normal);
            assert!((p.dot(n) - 0.5).abs() < 1e-6);
            assert!(v.uv.iter().all(|c| (0.0..=1.0).contains(c)));
        }
    }
}
