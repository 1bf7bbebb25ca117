// SPDX-License-Identifier: CEPL-1.0
//! Swap chain images, their views, the depth buffer and the binary semaphores
//! that order acquire -> render -> present.

use std::sync::Arc;

use ash::vk;
use tessera_render::{RenderError, RenderSize, Stage, VsyncMode};
use tracing::{debug, info};

use crate::context::DeviceContext;
use crate::memory::{subresource, Image};
use crate::VkResultExt;

#[derive(Clone, Copy, Debug)]
pub struct SwapchainConfig {
    pub size: RenderSize,
    pub buffer_count: u32,
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
}

pub struct Swapchain {
    ctx: Arc<DeviceContext>,
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub depth: Image,
    cfg: SwapchainConfig,
    // Semaphore signalled by the latest acquire of each image. The next
    // acquire signals `spare`, which then trades places with the image's entry.
    acquired: Vec<vk::Semaphore>,
    spare: vk::Semaphore,
    render_finished: Vec<vk::Semaphore>,
}

pub(crate) fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

pub(crate) fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VsyncMode,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (vsync, mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        (true, VsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        (true, VsyncMode::Fifo) => &[vk::PresentModeKHR::FIFO],
    };
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Requested count clamped to the surface limits (`max == 0` means no limit).
pub(crate) fn image_count(caps: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let n = requested.max(caps.min_image_count);
    if caps.max_image_count == 0 {
        n
    } else {
        n.min(caps.max_image_count)
    }
}

pub(crate) fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    [vk::Format::R8G8B8A8_UNORM, vk::Format::B8G8R8A8_UNORM]
        .into_iter()
        .find_map(|want| {
            formats.iter().copied().find(|f| {
                f.format == want && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first().copied())
}

pub(crate) fn pick_depth_format(ctx: &DeviceContext) -> vk::Format {
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D16_UNORM,
    ];
    candidates
        .into_iter()
        .find(|&fmt| {
            let props = unsafe {
                ctx.instance
                    .get_physical_device_format_properties(ctx.phys, fmt)
            };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .unwrap_or(vk::Format::D32_SFLOAT)
}

unsafe fn create_semaphores(ctx: &DeviceContext, n: usize) -> Result<Vec<vk::Semaphore>, RenderError> {
    let ci = vk::SemaphoreCreateInfo::default();
    (0..n)
        .map(|_| unsafe { ctx.device.create_semaphore(&ci, None) }.at(Stage::Swapchain))
        .collect()
}

struct Bundle {
    handle: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

unsafe fn create_bundle(
    ctx: &DeviceContext,
    cfg: SwapchainConfig,
    old: vk::SwapchainKHR,
) -> Result<Bundle, RenderError> {
    let surf = &ctx.surface_loader;
    let (caps, formats, modes) = unsafe {
        (
            surf.get_physical_device_surface_capabilities(ctx.phys, ctx.surface)
                .at(Stage::Swapchain)?,
            surf.get_physical_device_surface_formats(ctx.phys, ctx.surface)
                .at(Stage::Swapchain)?,
            surf.get_physical_device_surface_present_modes(ctx.phys, ctx.surface)
                .at(Stage::Swapchain)?,
        )
    };
    let surf_format = pick_surface_format(&formats)
        .ok_or_else(|| RenderError::creation(Stage::Swapchain, "surface reports no formats"))?;
    let present_mode = choose_present_mode(&modes, cfg.vsync, cfg.vsync_mode);
    let extent = extent_from_caps(&caps, cfg.size);
    let min_count = image_count(&caps, cfg.buffer_count);

    let pre_transform = if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    };

    let swap_info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface: ctx.surface,
        min_image_count: min_count,
        image_format: surf_format.format,
        image_color_space: surf_format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: vk::SharingMode::EXCLUSIVE,
        pre_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode,
        clipped: vk::TRUE,
        old_swapchain: old,
        ..Default::default()
    };
    let sc = &ctx.swapchain_loader;
    let handle = unsafe { sc.create_swapchain(&swap_info, None) }.at(Stage::Swapchain)?;
    let images = match unsafe { sc.get_swapchain_images(handle) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { sc.destroy_swapchain(handle, None) };
            return Err(RenderError::creation(Stage::Swapchain, format!("{e:?}")));
        }
    };

    let mut views = Vec::with_capacity(images.len());
    for &image in &images {
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: surf_format.format,
            subresource_range: subresource(vk::ImageAspectFlags::COLOR),
            ..Default::default()
        };
        match unsafe { ctx.device.create_image_view(&iv_info, None) } {
            Ok(v) => views.push(v),
            Err(e) => {
                unsafe {
                    for v in views {
                        ctx.device.destroy_image_view(v, None);
                    }
                    sc.destroy_swapchain(handle, None);
                }
                return Err(RenderError::creation(Stage::Swapchain, format!("{e:?}")));
            }
        }
    }

    info!(
        format = ?surf_format.format,
        present_mode = pm_name(present_mode),
        width = extent.width,
        height = extent.height,
        images = images.len(),
        requested = cfg.buffer_count,
        "swapchain created"
    );
    Ok(Bundle {
        handle,
        format: surf_format.format,
        extent,
        images,
        views,
    })
}

fn present_error(op: &str, e: vk::Result) -> RenderError {
    match e {
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => {
            RenderError::PresentFailed {
                reason: format!("{op}: {e:?}"),
                recoverable: true,
            }
        }
        other => RenderError::PresentFailed {
            reason: format!("{op}: {other:?}"),
            recoverable: false,
        },
    }
}

impl Swapchain {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        cfg: SwapchainConfig,
        depth_format: vk::Format,
    ) -> Result<Self, RenderError> {
        unsafe {
            let b = create_bundle(ctx, cfg, vk::SwapchainKHR::null())?;
            let mut sc = Self {
                ctx: ctx.clone(),
                handle: b.handle,
                format: b.format,
                extent: b.extent,
                depth: Image::new(
                    ctx,
                    b.extent,
                    depth_format,
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                    vk::ImageAspectFlags::DEPTH,
                )?,
                images: b.images,
                views: b.views,
                cfg,
                acquired: Vec::new(),
                spare: vk::Semaphore::null(),
                render_finished: Vec::new(),
            };
            sc.reset_semaphores()?;
            Ok(sc)
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn size(&self) -> RenderSize {
        RenderSize {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    unsafe fn destroy_semaphores(&mut self) {
        let d = &self.ctx.device;
        for s in self.acquired.drain(..).chain(self.render_finished.drain(..)) {
            unsafe { d.destroy_semaphore(s, None) };
        }
        if self.spare != vk::Semaphore::null() {
            unsafe { d.destroy_semaphore(self.spare, None) };
            self.spare = vk::Semaphore::null();
        }
    }

    unsafe fn reset_semaphores(&mut self) -> Result<(), RenderError> {
        unsafe {
            self.destroy_semaphores();
            let n = self.images.len();
            self.acquired = create_semaphores(&self.ctx, n)?;
            self.render_finished = create_semaphores(&self.ctx, n)?;
            self.spare = create_semaphores(&self.ctx, 1)?[0];
        }
        Ok(())
    }

    pub fn acquire(&mut self) -> Result<usize, RenderError> {
        let r = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.handle,
                u64::MAX,
                self.spare,
                vk::Fence::null(),
            )
        };
        match r {
            Ok((index, _suboptimal)) => {
                let i = index as usize;
                std::mem::swap(&mut self.spare, &mut self.acquired[i]);
                Ok(i)
            }
            Err(e) => Err(present_error("acquire_next_image", e)),
        }
    }

    /// Semaphore the image's latest acquire signals.
    pub fn acquire_semaphore(&self, index: usize) -> vk::Semaphore {
        self.acquired[index]
    }

    pub fn render_finished(&self, index: usize) -> vk::Semaphore {
        self.render_finished[index]
    }

    pub fn present(&self, index: usize) -> Result<(), RenderError> {
        let image_index = index as u32;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.render_finished[index],
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.ctx.swapchain_loader.queue_present(self.ctx.queue, &present) } {
            Ok(false) => Ok(()),
            Ok(true) => Err(present_error("queue_present", vk::Result::SUBOPTIMAL_KHR)),
            Err(e) => Err(present_error("queue_present", e)),
        }
    }

    // STRICT ORDER (recreate):
    // 1) Device idle (caller drained every slot; present may still hold semaphores)
    // 2) NEW swapchain from the old handle, then destroy old views + swapchain
    // 3) Depth buffer at the new extent
    // 4) Fresh binary semaphores
    // The image count must not change: frame slots are sized by it.
    pub fn recreate(&mut self, size: RenderSize) -> Result<(), RenderError> {
        self.ctx.wait_idle();
        let cfg = SwapchainConfig { size, ..self.cfg };
        unsafe {
            let b = create_bundle(&self.ctx, cfg, self.handle)?;
            self.destroy_views_and_swapchain();
            let old_count = self.images.len();
            self.handle = b.handle;
            self.format = b.format;
            self.extent = b.extent;
            self.images = b.images;
            self.views = b.views;
            self.cfg = cfg;
            if self.images.len() != old_count {
                return Err(RenderError::creation(
                    Stage::Swapchain,
                    format!("image count changed from {old_count} to {}", self.images.len()),
                ));
            }
            self.depth = Image::new(
                &self.ctx,
                self.extent,
                self.depth.format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                vk::ImageAspectFlags::DEPTH,
            )?;
            self.reset_semaphores()?;
        }
        debug!(width = self.extent.width, height = self.extent.height, "swapchain rebuilt");
        Ok(())
    }

    unsafe fn destroy_views_and_swapchain(&mut self) {
        unsafe {
            for v in self.views.drain(..) {
                self.ctx.device.destroy_image_view(v, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.ctx.swapchain_loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
    }
}

// Views before swapchain; swapchain before the device (held by `ctx`).
impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.destroy_semaphores();
            self.destroy_views_and_swapchain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_respects_surface_limits() {
        assert_eq!(image_count(&caps(2, 8, (800, 600)), 3), 3);
        assert_eq!(image_count(&caps(2, 8, (800, 600)), 2), 2);
        assert_eq!(image_count(&caps(3, 0, (800, 600)), 2), 3);
        assert_eq!(image_count(&caps(1, 2, (800, 600)), 3), 2);
    }

    #[test]
    fn extent_follows_surface_unless_free() {
        let want = RenderSize {
            width: 800,
            height: 600,
        };
        let fixed = extent_from_caps(&caps(2, 3, (1024, 768)), want);
        assert_eq!((fixed.width, fixed.height), (1024, 768));
        let free = extent_from_caps(&caps(2, 3, (u32::MAX, u32::MAX)), want);
        assert_eq!((free.width, free.height), (800, 600));
    }

    #[test]
    fn present_mode_policy() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&all, true, VsyncMode::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&all, true, VsyncMode::Fifo),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&all, false, VsyncMode::Fifo),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&fifo_only, false, VsyncMode::Mailbox),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn unorm_surface_formats_preferred() {
        let f = |format| vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let list = [f(vk::Format::B8G8R8A8_SRGB), f(vk::Format::B8G8R8A8_UNORM)];
        assert_eq!(pick_surface_format(&list).unwrap().format, vk::Format::B8G8R8A8_UNORM);
        let odd = [f(vk::Format::A2B10G10R10_UNORM_PACK32)];
        assert_eq!(
            pick_surface_format(&odd).unwrap().format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );
        assert!(pick_surface_format(&[]).is_none());
    }

    #[test]
    fn present_errors_are_classified() {
        assert!(matches!(
            present_error("p", vk::Result::ERROR_DEVICE_LOST),
            RenderError::DeviceLost
        ));
        assert!(!present_error("p", vk::Result::ERROR_OUT_OF_DATE_KHR).is_fatal());
        assert!(!present_error("p", vk::Result::SUBOPTIMAL_KHR).is_fatal());
        assert!(present_error("p", vk::Result::ERROR_SURFACE_LOST_KHR).is_fatal());
    }
}
