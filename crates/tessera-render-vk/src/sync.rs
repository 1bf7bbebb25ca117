// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tessera_render::{RenderError, Stage, TimelineFence};

use crate::context::DeviceContext;
use crate::VkResultExt;

/// Timeline semaphore used as a frame slot fence.
pub struct VkTimeline {
    ctx: Arc<DeviceContext>,
    pub semaphore: vk::Semaphore,
}

impl VkTimeline {
    pub fn new(ctx: &Arc<DeviceContext>) -> Result<Self, RenderError> {
        let mut type_ci = vk::SemaphoreTypeCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_TYPE_CREATE_INFO,
            semaphore_type: vk::SemaphoreType::TIMELINE,
            initial_value: 0,
            ..Default::default()
        };
        let ci = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            p_next: (&mut type_ci) as *mut _ as *const _,
            ..Default::default()
        };
        let semaphore = unsafe { ctx.device.create_semaphore(&ci, None) }.at(Stage::Fence)?;
        Ok(Self {
            ctx: ctx.clone(),
            semaphore,
        })
    }
}

impl TimelineFence for VkTimeline {
    fn completed_value(&self) -> Result<u64, RenderError> {
        unsafe { self.ctx.device.get_semaphore_counter_value(self.semaphore) }.at(Stage::Fence)
    }

    fn wait_for(&self, value: u64) -> Result<(), RenderError> {
        let wait = vk::SemaphoreWaitInfo {
            s_type: vk::StructureType::SEMAPHORE_WAIT_INFO,
            semaphore_count: 1,
            p_semaphores: &self.semaphore,
            p_values: &value,
            ..Default::default()
        };
        unsafe { self.ctx.device.wait_semaphores(&wait, u64::MAX) }.at(Stage::Fence)
    }
}

impl Drop for VkTimeline {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_semaphore(self.semaphore, None) };
    }
}
