// SPDX-License-Identifier: CEPL-1.0
//! Fixed descriptor budget. Everything is sized once at setup and never grows.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorLayout {
    pub buffer_count: usize,
    pub object_count: usize,
    pub texture_count: usize,
}

impl DescriptorLayout {
    pub fn new(buffer_count: usize, object_count: usize, texture_count: usize) -> Self {
        Self {
            buffer_count,
            object_count,
            texture_count,
        }
    }

    pub fn dsv_count(&self) -> usize {
        1
    }

    pub fn rtv_count(&self) -> usize {
        self.buffer_count
    }

    /// Shader-visible texture views, one per bound texture.
    pub fn srv_count(&self) -> usize {
        self.texture_count
    }

    /// Shader-visible constant views, one per (frame, object) pair.
    pub fn cbv_count(&self) -> usize {
        self.object_count * self.buffer_count
    }

    /// Offset of the constant view for `object` in frame slot `frame`.
    pub fn cbv_index(&self, frame: usize, object: usize) -> usize {
        assert!(
            frame < self.buffer_count,
            "frame slot {frame} out of range (buffer count {})",
            self.buffer_count
        );
        assert!(
            object < self.object_count,
            "object {object} out of range (object count {})",
            self.object_count
        );
        frame * self.object_count + object
    }
}
