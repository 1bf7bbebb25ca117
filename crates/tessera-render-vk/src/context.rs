// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, adapter and logical device.

use std::ffi::c_char;
#[cfg(debug_assertions)]
use std::ffi::CStr;

#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tessera_render::{
    select_adapter, AdapterInfo, AdapterKind, ApiLevel, RenderError, Stage, SurfaceTarget,
};
use tracing::{debug, info, warn};
#[cfg(debug_assertions)]
use tracing::{error, trace};

use crate::VkResultExt;

/// Dynamic rendering, synchronization2 and timeline semaphores are all core here.
pub const REQUIRED_API: ApiLevel = ApiLevel::new(1, 3);

#[cfg(debug_assertions)]
type DebugState = (ext_debug::Instance, vk::DebugUtilsMessengerEXT);
#[cfg(not(debug_assertions))]
type DebugState = ();

/// Destroys partially created objects, newest first, unless committed.
#[derive(Default)]
struct Unwind {
    steps: Vec<Box<dyn FnOnce()>>,
}

impl Unwind {
    fn push(&mut self, step: impl FnOnce() + 'static) {
        self.steps.push(Box::new(step));
    }

    /// Ownership has moved elsewhere; nothing is destroyed.
    fn commit(mut self) {
        self.steps.clear();
    }
}

impl Drop for Unwind {
    fn drop(&mut self) {
        if !self.steps.is_empty() {
            debug!(steps = self.steps.len(), "releasing partially created context");
        }
        while let Some(step) = self.steps.pop() {
            step();
        }
    }
}

/// Process-wide Vulkan objects. Shared through `Arc` by everything that
/// creates device resources; dropping the last reference destroys the device.
pub struct DeviceContext {
    // Kept alive for the loaders' function pointers.
    _entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub phys: vk::PhysicalDevice,
    pub props: vk::PhysicalDeviceProperties,
    pub device: ash::Device,
    pub swapchain_loader: swapchain::Device,
    pub queue_family: u32,
    pub queue: vk::Queue,
    pub bc_textures: bool,
    debug: DebugState,
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || unsafe { (*data).p_message.is_null() } {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Result<DebugState, RenderError> {
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }.at(Stage::Instance)?;
    Ok((loader, messenger))
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(_entry: &Entry, _instance: &Instance) -> Result<DebugState, RenderError> {
    Ok(())
}

unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle) -> Result<Instance, RenderError> {
    let app = c"Tessera";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let wsi = ash_window::enumerate_required_extensions(display_raw).at(Stage::Instance)?;
    #[allow(unused_mut)]
    let mut exts: Vec<*const c_char> = wsi.to_vec();

    #[cfg(debug_assertions)]
    let layers = {
        exts.push(ext_debug::NAME.as_ptr());
        let available = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        let validation = c"VK_LAYER_KHRONOS_validation";
        let has_validation = available
            .iter()
            .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == validation);
        if !has_validation {
            warn!("validation layer not installed; continuing without it");
        }
        if has_validation {
            vec![validation.as_ptr()]
        } else {
            Vec::new()
        }
    };
    #[cfg(not(debug_assertions))]
    let layers: Vec<*const c_char> = Vec::new();

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    unsafe { entry.create_instance(&create_info, None) }.at(Stage::Instance)
}

fn adapter_kind(t: vk::PhysicalDeviceType) -> AdapterKind {
    match t {
        vk::PhysicalDeviceType::DISCRETE_GPU => AdapterKind::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterKind::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => AdapterKind::Virtual,
        vk::PhysicalDeviceType::CPU => AdapterKind::Software,
        _ => AdapterKind::Other,
    }
}

unsafe fn describe_adapter(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> AdapterInfo {
    let props = unsafe { instance.get_physical_device_properties(phys) };
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".into());
    let queues = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    let present_queue = queues.iter().enumerate().find_map(|(i, q)| {
        let supports = q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && unsafe { surface_loader.get_physical_device_surface_support(phys, i as u32, surface) }
                .unwrap_or(false);
        supports.then_some(i as u32)
    });
    AdapterInfo {
        name,
        kind: adapter_kind(props.device_type),
        api: ApiLevel::new(
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
        ),
        present_queue,
    }
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue, bool), RenderError> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let supported = unsafe { instance.get_physical_device_features(phys) };
    let bc_textures = supported.texture_compression_bc == vk::TRUE;

    // STRICT ORDER (feature pNext chain): feats13 -> feats12 -> feats2.
    let mut feats13 = vk::PhysicalDeviceVulkan13Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
        synchronization2: vk::TRUE,
        dynamic_rendering: vk::TRUE,
        ..Default::default()
    };
    let mut feats12 = vk::PhysicalDeviceVulkan12Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES,
        timeline_semaphore: vk::TRUE,
        ..Default::default()
    };
    feats12.p_next = (&mut feats13) as *mut _ as *mut _;
    let mut feats2 = vk::PhysicalDeviceFeatures2 {
        s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
        features: vk::PhysicalDeviceFeatures {
            texture_compression_bc: supported.texture_compression_bc,
            sampler_anisotropy: supported.sampler_anisotropy,
            ..Default::default()
        },
        ..Default::default()
    };
    feats2.p_next = (&mut feats12) as *mut _ as *mut _;

    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        p_next: (&mut feats2) as *mut _ as *const _,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };
    let device = unsafe { instance.create_device(phys, &dinfo, None) }.at(Stage::Device)?;
    let queue = unsafe { device.get_device_queue(queue_family, 0) };
    Ok((device, queue, bc_textures))
}

impl DeviceContext {
    // STRICT ORDER:
    // 1) Instance (platform WSI + debug ext)
    // 2) Surface from THIS instance
    // 3) Adapter + queue chosen AGAINST this surface (present support)
    // 4) Device with the features the frame loop relies on
    pub fn new(target: &SurfaceTarget<'_>) -> Result<Self, RenderError> {
        let dh = target
            .display
            .display_handle()
            .map_err(|e| RenderError::creation(Stage::Surface, e))?
            .as_raw();
        let wh = target
            .window
            .window_handle()
            .map_err(|e| RenderError::creation(Stage::Surface, e))?
            .as_raw();

        unsafe {
            let entry = Entry::linked();
            let mut unwind = Unwind::default();
            let instance = create_instance(&entry, dh)?;
            let i = instance.clone();
            unwind.push(move || i.destroy_instance(None));

            let debug = create_debug_messenger(&entry, &instance)?;
            #[cfg(debug_assertions)]
            {
                let (loader, messenger) = (debug.0.clone(), debug.1);
                unwind.push(move || loader.destroy_debug_utils_messenger(messenger, None));
            }

            let surface_loader = surface::Instance::new(&entry, &instance);
            let surface =
                ash_window::create_surface(&entry, &instance, dh, wh, None).at(Stage::Surface)?;
            let loader = surface_loader.clone();
            unwind.push(move || loader.destroy_surface(surface, None));

            let physicals = instance.enumerate_physical_devices().at(Stage::Adapter)?;
            let infos: Vec<AdapterInfo> = physicals
                .iter()
                .map(|&p| describe_adapter(&instance, &surface_loader, surface, p))
                .collect();
            let chosen = select_adapter(&infos, REQUIRED_API)?;
            let phys = physicals[chosen];
            let queue_family = infos[chosen].present_queue.unwrap_or(0);
            let props = instance.get_physical_device_properties(phys);

            let (device, queue, bc_textures) = create_device(&instance, phys, queue_family)?;
            let swapchain_loader = swapchain::Device::new(&instance, &device);
            info!(
                adapter = %infos[chosen].name,
                queue_family,
                bc_textures,
                "vulkan device created"
            );
            unwind.commit();

            Ok(Self {
                _entry: entry,
                instance,
                surface_loader,
                surface,
                phys,
                props,
                device,
                swapchain_loader,
                queue_family,
                queue,
                bc_textures,
                debug,
            })
        }
    }

    pub fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        unsafe { self.instance.get_physical_device_memory_properties(self.phys) }
    }

    pub fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            warn!("device_wait_idle: {e:?}");
        }
    }
}

// STRICT TEARDOWN ORDER: device, then surface, then debug messenger, instance last.
impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.wait_idle();
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            #[cfg(debug_assertions)]
            {
                let (loader, messenger) = &self.debug;
                loader.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("vulkan context destroyed");
    }
}
