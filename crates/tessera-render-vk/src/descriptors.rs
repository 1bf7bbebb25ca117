// SPDX-License-Identifier: CEPL-1.0
//! Descriptor pool and sets. Set 0 holds one uniform buffer per (frame,
//! object); set 1 holds the sampled textures. Nothing is allocated after setup.

use std::sync::Arc;

use ash::vk;
use tessera_render::{DescriptorLayout, ObjectConstants, RenderError, Stage};
use tracing::debug;

use crate::context::DeviceContext;
use crate::memory::Image;
use crate::VkResultExt;

pub struct DescriptorTables {
    ctx: Arc<DeviceContext>,
    pool: vk::DescriptorPool,
    pub constant_layout: vk::DescriptorSetLayout,
    pub texture_layout: vk::DescriptorSetLayout,
    sampler: vk::Sampler,
    /// Indexed by [`DescriptorLayout::cbv_index`].
    pub constant_sets: Vec<vk::DescriptorSet>,
    pub texture_set: vk::DescriptorSet,
}

unsafe fn set_layout(
    device: &ash::Device,
    ty: vk::DescriptorType,
    count: u32,
    stage: vk::ShaderStageFlags,
) -> Result<vk::DescriptorSetLayout, RenderError> {
    let bindings: Vec<_> = (0..count)
        .map(|binding| vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_type: ty,
            descriptor_count: 1,
            stage_flags: stage,
            ..Default::default()
        })
        .collect();
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    unsafe { device.create_descriptor_set_layout(&ci, None) }.at(Stage::DescriptorHeap)
}

impl DescriptorTables {
    /// `frame_buffers[f]` is the constant upload buffer of frame slot `f`,
    /// holding one entry per object every `stride` bytes.
    pub fn new(
        ctx: &Arc<DeviceContext>,
        layout: &DescriptorLayout,
        frame_buffers: &[vk::Buffer],
        stride: vk::DeviceSize,
        textures: &[&Image],
    ) -> Result<Self, RenderError> {
        let d = &ctx.device;
        let cbvs = layout.cbv_count() as u32;
        let srvs = layout.srv_count() as u32;

        // Partially built tables clean up through Drop on early return.
        let mut tables = Self {
            ctx: ctx.clone(),
            pool: vk::DescriptorPool::null(),
            constant_layout: vk::DescriptorSetLayout::null(),
            texture_layout: vk::DescriptorSetLayout::null(),
            sampler: vk::Sampler::null(),
            constant_sets: Vec::new(),
            texture_set: vk::DescriptorSet::null(),
        };

        unsafe {
            tables.constant_layout = set_layout(
                d,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )?;
            tables.texture_layout = set_layout(
                d,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                srvs,
                vk::ShaderStageFlags::FRAGMENT,
            )?;

            let sampler_ci = vk::SamplerCreateInfo {
                s_type: vk::StructureType::SAMPLER_CREATE_INFO,
                mag_filter: vk::Filter::LINEAR,
                min_filter: vk::Filter::LINEAR,
                mipmap_mode: vk::SamplerMipmapMode::LINEAR,
                address_mode_u: vk::SamplerAddressMode::REPEAT,
                address_mode_v: vk::SamplerAddressMode::REPEAT,
                address_mode_w: vk::SamplerAddressMode::REPEAT,
                max_lod: vk::LOD_CLAMP_NONE,
                ..Default::default()
            };
            tables.sampler = d.create_sampler(&sampler_ci, None).at(Stage::DescriptorHeap)?;

            let pool_sizes = [
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    descriptor_count: cbvs,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: srvs.max(1),
                },
            ];
            let pool_ci = vk::DescriptorPoolCreateInfo {
                s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
                max_sets: cbvs + 1,
                pool_size_count: pool_sizes.len() as u32,
                p_pool_sizes: pool_sizes.as_ptr(),
                ..Default::default()
            };
            tables.pool = d.create_descriptor_pool(&pool_ci, None).at(Stage::DescriptorHeap)?;

            let mut layouts = vec![tables.constant_layout; cbvs as usize];
            layouts.push(tables.texture_layout);
            let alloc = vk::DescriptorSetAllocateInfo {
                s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
                descriptor_pool: tables.pool,
                descriptor_set_count: layouts.len() as u32,
                p_set_layouts: layouts.as_ptr(),
                ..Default::default()
            };
            let mut sets = d.allocate_descriptor_sets(&alloc).at(Stage::DescriptorHeap)?;
            tables.texture_set = sets.pop().unwrap_or_default();
            tables.constant_sets = sets;

            let range = std::mem::size_of::<ObjectConstants>() as vk::DeviceSize;
            let mut buffer_infos = Vec::with_capacity(cbvs as usize);
            for frame in 0..layout.buffer_count {
                for object in 0..layout.object_count {
                    buffer_infos.push((
                        layout.cbv_index(frame, object),
                        vk::DescriptorBufferInfo {
                            buffer: frame_buffers[frame],
                            offset: object as vk::DeviceSize * stride,
                            range,
                        },
                    ));
                }
            }
            let image_infos: Vec<_> = textures
                .iter()
                .map(|img| vk::DescriptorImageInfo {
                    sampler: tables.sampler,
                    image_view: img.view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                })
                .collect();

            let mut writes: Vec<vk::WriteDescriptorSet> = buffer_infos
                .iter()
                .map(|(index, info)| vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: tables.constant_sets[*index],
                    dst_binding: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: info,
                    ..Default::default()
                })
                .collect();
            writes.extend(image_infos.iter().enumerate().map(|(binding, info)| {
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: tables.texture_set,
                    dst_binding: binding as u32,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: info,
                    ..Default::default()
                }
            }));
            d.update_descriptor_sets(&writes, &[]);
        }

        debug!(
            constant_views = cbvs,
            texture_views = srvs,
            render_targets = layout.rtv_count(),
            depth_views = layout.dsv_count(),
            "descriptor tables written"
        );
        Ok(tables)
    }
}

impl Drop for DescriptorTables {
    fn drop(&mut self) {
        unsafe {
            let d = &self.ctx.device;
            if self.pool != vk::DescriptorPool::null() {
                d.destroy_descriptor_pool(self.pool, None);
            }
            if self.sampler != vk::Sampler::null() {
                d.destroy_sampler(self.sampler, None);
            }
            if self.texture_layout != vk::DescriptorSetLayout::null() {
                d.destroy_descriptor_set_layout(self.texture_layout, None);
            }
            if self.constant_layout != vk::DescriptorSetLayout::null() {
                d.destroy_descriptor_set_layout(self.constant_layout, None);
            }
        }
    }
}
