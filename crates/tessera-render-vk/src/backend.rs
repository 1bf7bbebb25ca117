// SPDX-License-Identifier: CEPL-1.0
//! Vulkan implementation of the frame backend: one command buffer per
//! swap chain image, dynamic rendering, sync2 submission.

use std::sync::Arc;

use ash::vk;
use tessera_render::{
    DescriptorLayout, FrameBackend, FrameCommands, FrameParts, FrameResourcePool, ObjectConstants,
    PipelineDesc, RenderError, RenderSettings, RenderSize, SceneDesc, ShaderCompiler, Stage,
    SurfaceTarget,
};
use tracing::{debug, info};

use crate::context::DeviceContext;
use crate::descriptors::DescriptorTables;
use crate::memory::{subresource, MappedBuffer};
use crate::pipeline::Pipeline;
use crate::shader::{cube_sources, ShadercCompiler};
use crate::store::{GpuMesh, SceneStore};
use crate::swapchain::{pick_depth_format, Swapchain, SwapchainConfig};
use crate::sync::VkTimeline;
use crate::VkResultExt;

fn recording(op: &str, e: vk::Result) -> RenderError {
    match e {
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        e => RenderError::CommandRecording {
            reason: format!("{op}: {e:?}"),
        },
    }
}

pub struct VkBackend {
    // STRICT TEARDOWN ORDER: field order is drop order. Everything holding an
    // Arc<DeviceContext> goes before `ctx`; Drop waits idle first.
    pipeline: Pipeline,
    descriptors: DescriptorTables,
    object_meshes: Vec<Arc<GpuMesh>>,
    store: SceneStore,
    swapchain: Swapchain,
    cmd_pool: vk::CommandPool,
    cmd_bufs: Vec<vk::CommandBuffer>,
    ctx: Arc<DeviceContext>,
}

impl VkBackend {
    /// Builds the device, swap chain, static assets and per-slot resources,
    /// handing back everything the frame loop owns.
    ///
    /// STRICT ORDER:
    /// 1) device + queue
    /// 2) swap chain (fixes the slot count)
    /// 3) command pool, static upload (waited before returning)
    /// 4) slot fences + constant buffers
    /// 5) descriptor tables, then the pipeline that references their layouts
    pub fn create(
        target: &SurfaceTarget<'_>,
        settings: RenderSettings,
        scene: &SceneDesc,
    ) -> Result<FrameParts<Self>, RenderError> {
        if scene.object_count == 0 {
            return Err(RenderError::creation(Stage::DescriptorHeap, "scene has no objects"));
        }
        let ctx = Arc::new(DeviceContext::new(target)?);

        let depth_format = pick_depth_format(&ctx);
        let swapchain = Swapchain::new(
            &ctx,
            SwapchainConfig {
                size: target.size,
                buffer_count: settings.buffer_count,
                vsync: settings.vsync,
                vsync_mode: settings.vsync_mode,
            },
            depth_format,
        )?;
        let slots = swapchain.image_count();

        let pool_ci = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: ctx.queue_family,
            ..Default::default()
        };
        let cmd_pool = unsafe { ctx.device.create_command_pool(&pool_ci, None) }.at(Stage::Device)?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: slots as u32,
            ..Default::default()
        };
        let cmd_bufs = match unsafe { ctx.device.allocate_command_buffers(&alloc_info) } {
            Ok(b) => b,
            Err(e) => {
                unsafe { ctx.device.destroy_command_pool(cmd_pool, None) };
                return Err(RenderError::creation(Stage::Device, format!("{e:?}")));
            }
        };

        let store = match SceneStore::upload(&ctx, cmd_pool, scene) {
            Ok(s) => s,
            Err(e) => {
                unsafe { ctx.device.destroy_command_pool(cmd_pool, None) };
                return Err(e);
            }
        };

        let fences = (0..slots)
            .map(|_| VkTimeline::new(&ctx))
            .collect::<Result<Vec<_>, _>>();
        let uploads = FrameResourcePool::create(
            slots,
            scene.object_count,
            std::mem::size_of::<ObjectConstants>(),
            |_, bytes| {
                MappedBuffer::new(
                    &ctx,
                    bytes as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                )
            },
        );
        let (fences, uploads) = match (fences, uploads) {
            (Ok(f), Ok(u)) => (f, u),
            (Err(e), _) | (_, Err(e)) => {
                unsafe { ctx.device.destroy_command_pool(cmd_pool, None) };
                return Err(e);
            }
        };

        let layout = DescriptorLayout::new(slots, scene.object_count, store.textures.len());
        let frame_buffers: Vec<vk::Buffer> =
            (0..slots).map(|s| uploads.buffer(s).handle()).collect();
        let textures: Vec<_> = store.textures.iter().collect();
        let built = DescriptorTables::new(
            &ctx,
            &layout,
            &frame_buffers,
            uploads.stride() as vk::DeviceSize,
            &textures,
        )
        .and_then(|descriptors| {
            let compiler = ShadercCompiler::new()?;
            let [vs, fs] = cube_sources();
            let desc = PipelineDesc::new(compiler.compile(&vs)?, compiler.compile(&fs)?);
            let pipeline = Pipeline::new(
                &ctx,
                &desc,
                swapchain.format,
                depth_format,
                &[descriptors.constant_layout, descriptors.texture_layout],
            )?;
            Ok((descriptors, pipeline))
        });
        let (descriptors, pipeline) = match built {
            Ok(pair) => pair,
            Err(e) => {
                unsafe { ctx.device.destroy_command_pool(cmd_pool, None) };
                return Err(e);
            }
        };

        let object_meshes = vec![store.mesh.clone(); scene.object_count];
        info!(
            slots,
            objects = scene.object_count,
            textures = store.textures.len(),
            "vulkan backend ready"
        );

        Ok(FrameParts {
            backend: Self {
                pipeline,
                descriptors,
                object_meshes,
                store,
                swapchain,
                cmd_pool,
                cmd_bufs,
                ctx,
            },
            fences,
            uploads,
            layout,
        })
    }

    pub fn texture_count(&self) -> usize {
        self.store.textures.len()
    }

    #[inline]
    unsafe fn transition_to_attachments(&self, cmd: vk::CommandBuffer, slot: usize) {
        let barriers = [
            vk::ImageMemoryBarrier2 {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
                src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                src_access_mask: vk::AccessFlags2::empty(),
                dst_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                dst_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags2::COLOR_ATTACHMENT_READ,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                image: self.swapchain.images[slot],
                subresource_range: subresource(vk::ImageAspectFlags::COLOR),
                ..Default::default()
            },
            vk::ImageMemoryBarrier2 {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
                src_stage_mask: vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                src_access_mask: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_stage_mask: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
                dst_access_mask: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
                image: self.swapchain.depth.handle,
                subresource_range: subresource(vk::ImageAspectFlags::DEPTH),
                ..Default::default()
            },
        ];
        let dep = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: barriers.len() as u32,
            p_image_memory_barriers: barriers.as_ptr(),
            ..Default::default()
        };
        unsafe { self.ctx.device.cmd_pipeline_barrier2(cmd, &dep) };
    }

    #[inline]
    unsafe fn begin_rendering(&self, cmd: vk::CommandBuffer, slot: usize, clear: [f32; 4]) {
        let color_att = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: self.swapchain.views[slot],
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            },
            ..Default::default()
        };
        let depth_att = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: self.swapchain.depth.view,
            image_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
            ..Default::default()
        };
        let rendering_info = vk::RenderingInfo {
            s_type: vk::StructureType::RENDERING_INFO,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.swapchain.extent,
            },
            layer_count: 1,
            color_attachment_count: 1,
            p_color_attachments: &color_att,
            p_depth_attachment: &depth_att,
            ..Default::default()
        };
        unsafe { self.ctx.device.cmd_begin_rendering(cmd, &rendering_info) };
    }

    #[inline]
    unsafe fn draw_objects(&self, cmd: vk::CommandBuffer, commands: &FrameCommands<'_>) {
        let d = &self.ctx.device;
        let extent = self.swapchain.extent;
        unsafe {
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle);

            // Negative height keeps clip-space y pointing up.
            let vp = vk::Viewport {
                x: 0.0,
                y: extent.height as f32,
                width: extent.width as f32,
                height: -(extent.height as f32),
                min_depth: 0.0,
                max_depth: 1.0,
            };
            d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
            let sc = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&sc));

            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                1,
                std::slice::from_ref(&self.descriptors.texture_set),
                &[],
            );

            for draw in commands.draws {
                let mesh = &self.object_meshes[draw.object];
                d.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertices.handle], &[0]);
                d.cmd_bind_index_buffer(cmd, mesh.indices.handle, 0, vk::IndexType::UINT32);
                d.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline.layout,
                    0,
                    std::slice::from_ref(&self.descriptors.constant_sets[draw.cbv_index]),
                    &[],
                );
                d.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
            }
        }
    }

    #[inline]
    unsafe fn transition_to_present(&self, cmd: vk::CommandBuffer, slot: usize) {
        let post_barrier = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            dst_stage_mask: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            dst_access_mask: vk::AccessFlags2::empty(),
            old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            image: self.swapchain.images[slot],
            subresource_range: subresource(vk::ImageAspectFlags::COLOR),
            ..Default::default()
        };
        let dep_post = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: 1,
            p_image_memory_barriers: &post_barrier,
            ..Default::default()
        };
        unsafe { self.ctx.device.cmd_pipeline_barrier2(cmd, &dep_post) };
    }
}

impl FrameBackend for VkBackend {
    type Fence = VkTimeline;
    type Upload = MappedBuffer;

    fn acquire(&mut self) -> Result<usize, RenderError> {
        self.swapchain.acquire()
    }

    fn record(&mut self, slot: usize, commands: &FrameCommands<'_>) -> Result<(), RenderError> {
        let d = &self.ctx.device;
        let cmd = self.cmd_bufs[slot];
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| recording("reset_command_buffer", e))?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)
                .map_err(|e| recording("begin_command_buffer", e))?;

            self.transition_to_attachments(cmd, slot);
            self.begin_rendering(cmd, slot, commands.clear_color);
            self.draw_objects(cmd, commands);
            d.cmd_end_rendering(cmd);
            self.transition_to_present(cmd, slot);

            d.end_command_buffer(cmd)
                .map_err(|e| recording("end_command_buffer", e))?;
        }
        Ok(())
    }

    // Waits on the image's acquire semaphore before color output, signals
    // render-finished for present and the slot fence for the frame loop.
    fn submit(&mut self, slot: usize, fence: &VkTimeline, signal: u64) -> Result<(), RenderError> {
        let cmd_info = vk::CommandBufferSubmitInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_SUBMIT_INFO,
            command_buffer: self.cmd_bufs[slot],
            ..Default::default()
        };
        let wait = vk::SemaphoreSubmitInfo {
            s_type: vk::StructureType::SEMAPHORE_SUBMIT_INFO,
            semaphore: self.swapchain.acquire_semaphore(slot),
            stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ..Default::default()
        };
        let signals = [
            vk::SemaphoreSubmitInfo {
                s_type: vk::StructureType::SEMAPHORE_SUBMIT_INFO,
                semaphore: self.swapchain.render_finished(slot),
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                ..Default::default()
            },
            vk::SemaphoreSubmitInfo {
                s_type: vk::StructureType::SEMAPHORE_SUBMIT_INFO,
                semaphore: fence.semaphore,
                value: signal,
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                ..Default::default()
            },
        ];
        let submit = vk::SubmitInfo2 {
            s_type: vk::StructureType::SUBMIT_INFO_2,
            wait_semaphore_info_count: 1,
            p_wait_semaphore_infos: &wait,
            command_buffer_info_count: 1,
            p_command_buffer_infos: &cmd_info,
            signal_semaphore_info_count: signals.len() as u32,
            p_signal_semaphore_infos: signals.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit2(self.ctx.queue, std::slice::from_ref(&submit), vk::Fence::null())
        }
        .at(Stage::Submit)
    }

    fn present(&mut self, slot: usize) -> Result<(), RenderError> {
        self.swapchain.present(slot)
    }

    fn rebuild_surface(&mut self, size: RenderSize) -> Result<(), RenderError> {
        debug!(width = size.width, height = size.height, "rebuilding surface");
        self.swapchain.recreate(size)
    }

    fn surface_size(&self) -> RenderSize {
        self.swapchain.size()
    }
}

impl Drop for VkBackend {
    fn drop(&mut self) {
        // STRICT TEARDOWN ORDER: idle, command buffers, pool; the fields then
        // drop pipeline, descriptors, meshes, swap chain, device.
        self.ctx.wait_idle();
        unsafe {
            self.ctx.device.free_command_buffers(self.cmd_pool, &self.cmd_bufs);
            self.ctx.device.destroy_command_pool(self.cmd_pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_loss_during_recording_is_reported_as_such() {
        assert!(matches!(
            recording("end_command_buffer", vk::Result::ERROR_DEVICE_LOST),
            RenderError::DeviceLost
        ));
        let err = recording("begin_command_buffer", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(matches!(err, RenderError::CommandRecording { .. }));
        assert!(err.to_string().contains("begin_command_buffer"));
    }
}
