// SPDX-License-Identifier: CEPL-1.0
//! The seam between the frame loop and a graphics API.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tessera_core::RenderError;

use crate::mesh::MeshData;
use crate::sync::TimelineFence;
use crate::texture::TextureData;
use crate::{frame_resources::UploadMemory, RenderSize};

/// Native window the swap chain presents to.
pub struct SurfaceTarget<'a> {
    pub window: &'a dyn HasWindowHandle,
    pub display: &'a dyn HasDisplayHandle,
    pub size: RenderSize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderSettings {
    /// Requested swap chain images; the surface may clamp it.
    pub buffer_count: u32,
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            vsync: true,
            vsync_mode: VsyncMode::default(),
        }
    }
}

/// Static content uploaded once before the first frame.
#[derive(Clone, Debug)]
pub struct SceneDesc {
    pub mesh: MeshData,
    /// Diffuse then normal map.
    pub textures: Vec<TextureData>,
    pub object_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawItem {
    pub object: usize,
    pub cbv_index: usize,
}

pub struct FrameCommands<'a> {
    pub clear_color: [f32; 4],
    pub draws: &'a [DrawItem],
}

pub trait FrameBackend {
    type Fence: TimelineFence;
    type Upload: UploadMemory;

    /// Index of the next presentable image. The frame loop uses it as the
    /// frame slot.
    fn acquire(&mut self) -> Result<usize, RenderError>;

    /// Resets and records the slot's command list.
    fn record(&mut self, slot: usize, commands: &FrameCommands<'_>) -> Result<(), RenderError>;

    /// Queues the slot's commands and signals `fence` to `signal` on completion.
    fn submit(&mut self, slot: usize, fence: &Self::Fence, signal: u64) -> Result<(), RenderError>;

    fn present(&mut self, slot: usize) -> Result<(), RenderError>;

    /// Recreates size-dependent surface resources. Callers drain first.
    fn rebuild_surface(&mut self, size: RenderSize) -> Result<(), RenderError>;

    fn surface_size(&self) -> RenderSize;
}
