// SPDX-License-Identifier: CEPL-1.0
//! Buffers and images with their backing memory, freed on drop.

use std::sync::Arc;

use ash::vk;
use tessera_render::{RenderError, Stage, UploadMemory};

use crate::context::DeviceContext;
use crate::VkResultExt;

pub(crate) fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize].property_flags.contains(req)
        })
        .ok_or_else(|| {
            RenderError::creation(
                Stage::Memory,
                format!("no memory type with {req:?} in mask {type_bits:#b}"),
            )
        })
}

unsafe fn allocate(
    ctx: &DeviceContext,
    req: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory, RenderError> {
    let mem_type = find_memory_type(&ctx.memory_properties(), req.memory_type_bits, props)?;
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: mem_type,
        ..Default::default()
    };
    unsafe { ctx.device.allocate_memory(&mai, None) }.at(Stage::Memory)
}

pub struct Buffer {
    ctx: Arc<DeviceContext>,
    pub handle: vk::Buffer,
    memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl Buffer {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self, RenderError> {
        let d = &ctx.device;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        unsafe {
            let handle = d.create_buffer(&bci, None).at(Stage::Memory)?;
            let req = d.get_buffer_memory_requirements(handle);
            let memory = match allocate(ctx, req, props) {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_buffer(handle, None);
                    return Err(e);
                }
            };
            if let Err(e) = d.bind_buffer_memory(handle, memory, 0) {
                d.destroy_buffer(handle, None);
                d.free_memory(memory, None);
                return Err(RenderError::creation(Stage::Memory, format!("{e:?}")));
            }
            Ok(Self {
                ctx: ctx.clone(),
                handle,
                memory,
                size,
            })
        }
    }

    /// Host-visible staging buffer holding a copy of `bytes`.
    pub fn staging(ctx: &Arc<DeviceContext>, bytes: &[u8]) -> Result<Self, RenderError> {
        let mut mapped = MappedBuffer::new(
            ctx,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        mapped.bytes_mut()[..bytes.len()].copy_from_slice(bytes);
        Ok(mapped.into_buffer())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_buffer(self.handle, None);
            self.ctx.device.free_memory(self.memory, None);
        }
    }
}

/// Host-visible, host-coherent buffer mapped for its whole lifetime.
pub struct MappedBuffer {
    buffer: Buffer,
    ptr: *mut u8,
    len: usize,
}

impl MappedBuffer {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, RenderError> {
        let buffer = Buffer::new(
            ctx,
            size.max(1),
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let ptr = unsafe {
            ctx.device
                .map_memory(buffer.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        }
        .at(Stage::Memory)?;
        Ok(Self {
            buffer,
            ptr: ptr.cast(),
            len: size as usize,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle
    }

    fn into_buffer(self) -> Buffer {
        let this = std::mem::ManuallyDrop::new(self);
        unsafe {
            this.buffer.ctx.device.unmap_memory(this.buffer.memory);
            std::ptr::read(&this.buffer)
        }
    }
}

impl UploadMemory for MappedBuffer {
    fn bytes_mut(&mut self) -> &mut [u8] {
        // The mapping covers `len` bytes and lives as long as `self`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        unsafe { self.buffer.ctx.device.unmap_memory(self.buffer.memory) };
    }
}

pub struct Image {
    ctx: Arc<DeviceContext>,
    pub handle: vk::Image,
    pub view: vk::ImageView,
    memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Image {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self, RenderError> {
        let d = &ctx.device;
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        unsafe {
            let handle = d.create_image(&img_ci, None).at(Stage::Memory)?;
            let req = d.get_image_memory_requirements(handle);
            let memory = match allocate(ctx, req, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_image(handle, None);
                    return Err(e);
                }
            };
            let bound = d.bind_image_memory(handle, memory, 0);
            let view_ci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image: handle,
                view_type: vk::ImageViewType::TYPE_2D,
                format,
                subresource_range: subresource(aspect),
                ..Default::default()
            };
            let view = bound.and_then(|_| d.create_image_view(&view_ci, None));
            match view {
                Ok(view) => Ok(Self {
                    ctx: ctx.clone(),
                    handle,
                    view,
                    memory,
                    format,
                    extent,
                }),
                Err(e) => {
                    d.destroy_image(handle, None);
                    d.free_memory(memory, None);
                    Err(RenderError::creation(Stage::Memory, format!("{e:?}")))
                }
            }
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            let d = &self.ctx.device;
            d.destroy_image_view(self.view, None);
            d.destroy_image(self.handle, None);
            d.free_memory(self.memory, None);
        }
    }
}

pub(crate) fn subresource(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
