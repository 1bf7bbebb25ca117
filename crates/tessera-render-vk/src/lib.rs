// SPDX-License-Identifier: CEPL-1.0
//! Vulkan 1.3 backend for the tessera frame loop.
#![deny(unsafe_op_in_unsafe_fn)]

mod backend;
mod context;
mod descriptors;
mod memory;
mod pipeline;
mod shader;
mod store;
mod swapchain;
mod sync;

use ash::vk;
use tessera_render::{RenderError, Stage};

pub use backend::VkBackend;
pub use context::REQUIRED_API;
pub use shader::{cube_sources, ShadercCompiler, PROFILE};

/// Tags a raw Vulkan result with the stage that produced it.
pub(crate) trait VkResultExt<T> {
    fn at(self, stage: Stage) -> Result<T, RenderError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn at(self, stage: Stage) -> Result<T, RenderError> {
        self.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
            e => RenderError::creation(stage, format!("{e:?}")),
        })
    }
}
