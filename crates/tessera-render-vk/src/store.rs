// SPDX-License-Identifier: CEPL-1.0
//! Static geometry and textures, uploaded once through staging buffers.

use std::sync::Arc;

use ash::vk;
use tessera_render::{
    RenderError, SceneDesc, Stage, TextureData, TextureFormat, TimelineFence, UploadBatch,
    UploadTarget,
};
use tracing::{info, warn};

use crate::context::DeviceContext;
use crate::memory::{subresource, Buffer, Image};
use crate::sync::VkTimeline;
use crate::VkResultExt;

pub struct GpuMesh {
    pub vertices: Buffer,
    pub indices: Buffer,
    pub index_count: u32,
}

pub struct SceneStore {
    pub mesh: Arc<GpuMesh>,
    pub textures: Vec<Image>,
}

fn texture_format(f: TextureFormat) -> vk::Format {
    match f {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bc1 => vk::Format::BC1_RGBA_UNORM_BLOCK,
        TextureFormat::Bc2 => vk::Format::BC2_UNORM_BLOCK,
        TextureFormat::Bc3 => vk::Format::BC3_UNORM_BLOCK,
    }
}

unsafe fn record_buffer_copy(
    d: &ash::Device,
    cmd: vk::CommandBuffer,
    staging: &Buffer,
    dst: &Buffer,
    dst_stage: vk::PipelineStageFlags2,
    dst_access: vk::AccessFlags2,
) {
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: staging.size,
    };
    let barrier = vk::BufferMemoryBarrier2 {
        s_type: vk::StructureType::BUFFER_MEMORY_BARRIER_2,
        src_stage_mask: vk::PipelineStageFlags2::COPY,
        src_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
        dst_stage_mask: dst_stage,
        dst_access_mask: dst_access,
        buffer: dst.handle,
        offset: 0,
        size: vk::WHOLE_SIZE,
        ..Default::default()
    };
    let dep = vk::DependencyInfo {
        s_type: vk::StructureType::DEPENDENCY_INFO,
        buffer_memory_barrier_count: 1,
        p_buffer_memory_barriers: &barrier,
        ..Default::default()
    };
    unsafe {
        d.cmd_copy_buffer(cmd, staging.handle, dst.handle, std::slice::from_ref(&region));
        d.cmd_pipeline_barrier2(cmd, &dep);
    }
}

unsafe fn image_barrier(
    d: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    (src_stage, src_access, old_layout): (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
    (dst_stage, dst_access, new_layout): (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
) {
    let barrier = vk::ImageMemoryBarrier2 {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
        src_stage_mask: src_stage,
        src_access_mask: src_access,
        dst_stage_mask: dst_stage,
        dst_access_mask: dst_access,
        old_layout,
        new_layout,
        image,
        subresource_range: subresource(vk::ImageAspectFlags::COLOR),
        ..Default::default()
    };
    let dep = vk::DependencyInfo {
        s_type: vk::StructureType::DEPENDENCY_INFO,
        image_memory_barrier_count: 1,
        p_image_memory_barriers: &barrier,
        ..Default::default()
    };
    unsafe { d.cmd_pipeline_barrier2(cmd, &dep) };
}

unsafe fn record_image_copy(d: &ash::Device, cmd: vk::CommandBuffer, staging: &Buffer, dst: &Image) {
    unsafe {
        image_barrier(
            d,
            cmd,
            dst.handle,
            (
                vk::PipelineStageFlags2::TOP_OF_PIPE,
                vk::AccessFlags2::empty(),
                vk::ImageLayout::UNDEFINED,
            ),
            (
                vk::PipelineStageFlags2::COPY,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
        );
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: dst.extent.width,
                height: dst.extent.height,
                depth: 1,
            },
        };
        d.cmd_copy_buffer_to_image(
            cmd,
            staging.handle,
            dst.handle,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );
        image_barrier(
            d,
            cmd,
            dst.handle,
            (
                vk::PipelineStageFlags2::COPY,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_SAMPLED_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
        );
    }
}

/// Swaps in the generated stand-in for formats the device cannot sample.
fn usable_texture<'a>(ctx: &DeviceContext, tex: &'a TextureData, fallback: &'a TextureData) -> &'a TextureData {
    if tex.format.is_compressed() && !ctx.bc_textures {
        warn!(format = ?tex.format, "device lacks BC texture support; using checkerboard");
        fallback
    } else {
        tex
    }
}

impl SceneStore {
    /// Records every copy into one command buffer, submits it once and waits
    /// for it before returning. Staging memory is freed after that wait.
    pub fn upload(
        ctx: &Arc<DeviceContext>,
        pool: vk::CommandPool,
        scene: &SceneDesc,
    ) -> Result<Self, RenderError> {
        let d = &ctx.device;
        let vertex_bytes = scene.mesh.vertex_bytes();
        let index_bytes = scene.mesh.index_bytes();

        let vertices = Buffer::new(
            ctx,
            vertex_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let indices = Buffer::new(
            ctx,
            index_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let fallback = TextureData::checkerboard(64);
        let sources: Vec<&TextureData> = scene
            .textures
            .iter()
            .map(|t| usable_texture(ctx, t, &fallback))
            .collect();
        let textures = sources
            .iter()
            .map(|t| {
                Image::new(
                    ctx,
                    vk::Extent2D {
                        width: t.width,
                        height: t.height,
                    },
                    texture_format(t.format),
                    vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                    vk::ImageAspectFlags::COLOR,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fence = VkTimeline::new(ctx)?;
        let mut batch = UploadBatch::new();

        unsafe {
            let ai = vk::CommandBufferAllocateInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                command_pool: pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
                ..Default::default()
            };
            let cmd = d.allocate_command_buffers(&ai).at(Stage::Upload)?[0];
            let recorded = (|| -> Result<(), RenderError> {
                let bi = vk::CommandBufferBeginInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                    flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                    ..Default::default()
                };
                d.begin_command_buffer(cmd, &bi).at(Stage::Upload)?;

                let staging = Buffer::staging(ctx, vertex_bytes)?;
                record_buffer_copy(
                    d,
                    cmd,
                    &staging,
                    &vertices,
                    vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
                    vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
                );
                batch.stage("cube vertices", UploadTarget::VertexBuffer, vertex_bytes.len(), staging);

                let staging = Buffer::staging(ctx, index_bytes)?;
                record_buffer_copy(
                    d,
                    cmd,
                    &staging,
                    &indices,
                    vk::PipelineStageFlags2::INDEX_INPUT,
                    vk::AccessFlags2::INDEX_READ,
                );
                batch.stage("cube indices", UploadTarget::IndexBuffer, index_bytes.len(), staging);

                for (i, (src, dst)) in sources.iter().zip(&textures).enumerate() {
                    let staging = Buffer::staging(ctx, &src.bytes)?;
                    record_image_copy(d, cmd, &staging, dst);
                    batch.stage(format!("texture {i}"), UploadTarget::Texture, src.bytes.len(), staging);
                }

                d.end_command_buffer(cmd).at(Stage::Upload)?;

                let cmd_info = vk::CommandBufferSubmitInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_SUBMIT_INFO,
                    command_buffer: cmd,
                    ..Default::default()
                };
                let signal = vk::SemaphoreSubmitInfo {
                    s_type: vk::StructureType::SEMAPHORE_SUBMIT_INFO,
                    semaphore: fence.semaphore,
                    value: 1,
                    stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                    ..Default::default()
                };
                let submit = vk::SubmitInfo2 {
                    s_type: vk::StructureType::SUBMIT_INFO_2,
                    command_buffer_info_count: 1,
                    p_command_buffer_infos: &cmd_info,
                    signal_semaphore_info_count: 1,
                    p_signal_semaphore_infos: &signal,
                    ..Default::default()
                };
                d.queue_submit2(ctx.queue, std::slice::from_ref(&submit), vk::Fence::null())
                    .at(Stage::Upload)?;
                batch.mark_submitted(1);
                Ok(())
            })();

            let total = batch.total_bytes();
            let waited = recorded.and_then(|_| batch.wait_and_release(&fence));
            if fence.completed_value().unwrap_or(0) >= 1 || !batch.is_submitted() {
                d.free_command_buffers(pool, std::slice::from_ref(&cmd));
            }
            waited?;
            info!(bytes = total, textures = textures.len(), "static assets uploaded");
        }

        Ok(Self {
            mesh: Arc::new(GpuMesh {
                vertices,
                indices,
                index_count: scene.mesh.index_count(),
            }),
            textures,
        })
    }
}
