// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipeline creation and the on-disk pipeline cache.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use tessera_render::pipeline::{CompareOp, CullMode, FillMode, FrontFace, Topology, VertexFormat};
use tessera_render::{PipelineDesc, RenderError, ShaderBytecode, Stage};
use tracing::{debug, warn};

use crate::context::DeviceContext;
use crate::VkResultExt;

fn hex_bytes(b: &[u8]) -> String {
    use std::fmt::Write as _;
    b.iter().fold(String::with_capacity(b.len() * 2), |mut s, x| {
        let _ = write!(s, "{x:02x}");
        s
    })
}

/// Cache file next to the binary, keyed by vendor, device, driver and cache UUID.
pub(crate) fn pipeline_cache_path(props: &vk::PhysicalDeviceProperties) -> PathBuf {
    PathBuf::from(format!(
        "tessera_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id,
        props.device_id,
        props.driver_version,
        hex_bytes(&props.pipeline_cache_uuid)
    ))
}

fn vk_format(f: VertexFormat) -> vk::Format {
    match f {
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
    }
}

fn vk_compare(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
    }
}

pub struct Pipeline {
    ctx: Arc<DeviceContext>,
    cache: vk::PipelineCache,
    cache_path: PathBuf,
    pub layout: vk::PipelineLayout,
    pub handle: vk::Pipeline,
}

unsafe fn load_cache(device: &ash::Device, path: &Path) -> Result<vk::PipelineCache, RenderError> {
    let data = std::fs::read(path).ok();
    let (p_initial_data, initial_data_size) = match &data {
        Some(bytes) => (bytes.as_ptr().cast(), bytes.len()),
        None => (std::ptr::null(), 0),
    };
    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size,
        p_initial_data,
        ..Default::default()
    };
    if data.is_some() {
        debug!(path = %path.display(), "loading pipeline cache");
    }
    unsafe { device.create_pipeline_cache(&ci, None) }.at(Stage::Pipeline)
}

unsafe fn shader_module(device: &ash::Device, code: &ShaderBytecode) -> Result<vk::ShaderModule, RenderError> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.words.as_ptr(),
        code_size: code.byte_len(),
        ..Default::default()
    };
    unsafe { device.create_shader_module(&ci, None) }.at(Stage::Shader)
}

impl Pipeline {
    // STRICT: color_attachment_formats MUST match the swapchain image format.
    pub fn new(
        ctx: &Arc<DeviceContext>,
        desc: &PipelineDesc,
        color_format: vk::Format,
        depth_format: vk::Format,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Self, RenderError> {
        let d = &ctx.device;
        let cache_path = pipeline_cache_path(&ctx.props);
        let entry_vs = CString::new(desc.vertex.entry.as_str())
            .map_err(|e| RenderError::creation(Stage::Pipeline, e))?;
        let entry_fs = CString::new(desc.fragment.entry.as_str())
            .map_err(|e| RenderError::creation(Stage::Pipeline, e))?;

        unsafe {
            let cache = load_cache(d, &cache_path)?;
            let mut this = Self {
                ctx: ctx.clone(),
                cache,
                cache_path,
                layout: vk::PipelineLayout::null(),
                handle: vk::Pipeline::null(),
            };

            let layout_info = vk::PipelineLayoutCreateInfo {
                s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                set_layout_count: set_layouts.len() as u32,
                p_set_layouts: set_layouts.as_ptr(),
                ..Default::default()
            };
            this.layout = d.create_pipeline_layout(&layout_info, None).at(Stage::Pipeline)?;

            let vs = shader_module(d, &desc.vertex)?;
            let fs = match shader_module(d, &desc.fragment) {
                Ok(fs) => fs,
                Err(e) => {
                    d.destroy_shader_module(vs, None);
                    return Err(e);
                }
            };

            let stages = [
                vk::PipelineShaderStageCreateInfo {
                    s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                    stage: vk::ShaderStageFlags::VERTEX,
                    module: vs,
                    p_name: entry_vs.as_ptr(),
                    ..Default::default()
                },
                vk::PipelineShaderStageCreateInfo {
                    s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                    stage: vk::ShaderStageFlags::FRAGMENT,
                    module: fs,
                    p_name: entry_fs.as_ptr(),
                    ..Default::default()
                },
            ];

            let vb = vk::VertexInputBindingDescription {
                binding: 0,
                stride: desc.vertex_stride(),
                input_rate: vk::VertexInputRate::VERTEX,
            };
            let va: Vec<_> = desc
                .attributes()
                .iter()
                .map(|a| vk::VertexInputAttributeDescription {
                    location: a.location,
                    binding: 0,
                    format: vk_format(a.format),
                    offset: a.offset,
                })
                .collect();
            let vertex_input = vk::PipelineVertexInputStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
                vertex_binding_description_count: 1,
                p_vertex_binding_descriptions: &vb,
                vertex_attribute_description_count: va.len() as u32,
                p_vertex_attribute_descriptions: va.as_ptr(),
                ..Default::default()
            };
            let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
                topology: match desc.topology {
                    Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
                },
                ..Default::default()
            };
            let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
            let dynamic_state = vk::PipelineDynamicStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
                dynamic_state_count: dyn_states.len() as u32,
                p_dynamic_states: dyn_states.as_ptr(),
                ..Default::default()
            };
            let viewport_state = vk::PipelineViewportStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
                viewport_count: 1,
                scissor_count: 1,
                ..Default::default()
            };
            let raster = vk::PipelineRasterizationStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
                polygon_mode: match desc.raster.fill {
                    FillMode::Solid => vk::PolygonMode::FILL,
                },
                cull_mode: match desc.raster.cull {
                    CullMode::None => vk::CullModeFlags::NONE,
                    CullMode::Back => vk::CullModeFlags::BACK,
                },
                // Winding as seen on screen; the flipped viewport keeps y up.
                front_face: match desc.raster.front_face {
                    FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
                    FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
                },
                line_width: 1.0,
                ..Default::default()
            };
            let multisample = vk::PipelineMultisampleStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
                rasterization_samples: vk::SampleCountFlags::TYPE_1,
                ..Default::default()
            };
            let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
                depth_test_enable: desc.depth.test.into(),
                depth_write_enable: desc.depth.write.into(),
                depth_compare_op: vk_compare(desc.depth.compare),
                ..Default::default()
            };
            let color_blend_att = vk::PipelineColorBlendAttachmentState {
                color_write_mask: vk::ColorComponentFlags::RGBA,
                blend_enable: (!desc.opaque_blend).into(),
                ..Default::default()
            };
            let color_blend = vk::PipelineColorBlendStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
                attachment_count: 1,
                p_attachments: &color_blend_att,
                ..Default::default()
            };
            let rendering = vk::PipelineRenderingCreateInfo {
                s_type: vk::StructureType::PIPELINE_RENDERING_CREATE_INFO,
                color_attachment_count: 1,
                p_color_attachment_formats: &color_format,
                depth_attachment_format: depth_format,
                ..Default::default()
            };
            let pipeline_info = vk::GraphicsPipelineCreateInfo {
                s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
                p_next: (&rendering as *const vk::PipelineRenderingCreateInfo<'_>).cast(),
                stage_count: stages.len() as u32,
                p_stages: stages.as_ptr(),
                p_vertex_input_state: &vertex_input,
                p_input_assembly_state: &input_assembly,
                p_viewport_state: &viewport_state,
                p_rasterization_state: &raster,
                p_multisample_state: &multisample,
                p_depth_stencil_state: &depth_stencil,
                p_color_blend_state: &color_blend,
                p_dynamic_state: &dynamic_state,
                layout: this.layout,
                ..Default::default()
            };

            let created = d.create_graphics_pipelines(cache, std::slice::from_ref(&pipeline_info), None);
            d.destroy_shader_module(vs, None);
            d.destroy_shader_module(fs, None);
            match created {
                Ok(p) => this.handle = p[0],
                Err((_, err)) => {
                    return Err(RenderError::creation(
                        Stage::Pipeline,
                        format!("create_graphics_pipelines: {err:?}"),
                    ))
                }
            }
            Ok(this)
        }
    }

    fn save_cache(&self) {
        match unsafe { self.ctx.device.get_pipeline_cache_data(self.cache) } {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.cache_path, &bytes) {
                    warn!(path = %self.cache_path.display(), "pipeline cache not saved: {e}");
                }
            }
            // Some drivers refuse on an empty cache or a lost device.
            Err(e) => debug!("get_pipeline_cache_data: {e:?}"),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.save_cache();
        unsafe {
            let d = &self.ctx.device;
            if self.handle != vk::Pipeline::null() {
                d.destroy_pipeline(self.handle, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                d.destroy_pipeline_layout(self.layout, None);
            }
            d.destroy_pipeline_cache(self.cache, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_encodes_device_identity() {
        let props = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2684,
            driver_version: 0x0001_0002,
            pipeline_cache_uuid: [0xab; vk::UUID_SIZE],
            ..Default::default()
        };
        let name = pipeline_cache_path(&props);
        let name = name.to_string_lossy();
        assert!(name.starts_with("tessera_pipeline_cache_10de_2684_00010002_"));
        assert!(name.ends_with(&format!("{}.bin", "ab".repeat(16))));
    }

    #[test]
    fn vertex_formats_map_to_sfloat() {
        assert_eq!(vk_format(VertexFormat::Float32x3), vk::Format::R32G32B32_SFLOAT);
        assert_eq!(vk_compare(CompareOp::LessOrEqual), vk::CompareOp::LESS_OR_EQUAL);
    }
}
