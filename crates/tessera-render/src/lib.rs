// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic frame lifecycle: adapter choice, per-slot fences, descriptor
//! layout, constant upload pool, one-time uploads, pipeline description and the
//! frame loop that ties them together.

pub mod adapter;
pub mod backend;
pub mod descriptors;
pub mod frame_loop;
pub mod frame_resources;
pub mod mesh;
pub mod pipeline;
pub mod sync;
pub mod texture;
pub mod upload;

pub use adapter::{select_adapter, AdapterInfo, AdapterKind};
pub use backend::{
    DrawItem, FrameBackend, FrameCommands, RenderSettings, SceneDesc, SurfaceTarget, VsyncMode,
};
pub use descriptors::DescriptorLayout;
pub use frame_loop::{FrameLoop, FrameParts, LoopState};
pub use frame_resources::{aligned_size, FrameResourcePool, UploadMemory, CONSTANT_ALIGNMENT};
pub use mesh::MeshData;
pub use pipeline::{
    ObjectConstants, PipelineDesc, ShaderBytecode, ShaderCompiler, ShaderSource, ShaderStage,
    Vertex,
};
pub use sync::{FrameSync, RetiredSlot, SlotState, TimelineFence};
pub use tessera_core::{ApiLevel, RenderError, Stage};
pub use texture::{TextureData, TextureError, TextureFormat};
pub use upload::{UploadBatch, UploadTarget};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
