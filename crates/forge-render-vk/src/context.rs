// SPDX-License-Identifier: CEPL-1.0
//! Device context: instance, surface, adapter, logical device and queues.

use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use forge_core::EngineConfig;
use forge_render::RenderSettings;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, c_void, CStr, CString};
use tracing::{info, warn};

use crate::debug::{messenger_create_info, DebugMessenger, SeverityFilter};
use crate::error::{RenderError, VkResultExt};
use crate::negotiate::{
    instance_extensions, instance_layers, query_adapters, resolve_validation, select_adapter,
    validation_wanted, QueueFamilies, VALIDATION_LAYER,
};

/// Device extensions every adapter must offer.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

pub struct InstanceHandle {
    pub entry: Entry,
    pub raw: Instance,
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        unsafe { self.raw.destroy_instance(None) };
    }
}

pub struct SurfaceHandle {
    pub loader: surface::Instance,
    pub raw: vk::SurfaceKHR,
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.raw, None) };
    }
}

/// Logical device plus the command pool allocated from it.
pub struct LogicalDevice {
    pub raw: ash::Device,
    pub command_pool: vk::CommandPool,
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            self.raw.device_wait_idle().ok();
            self.raw.destroy_command_pool(self.command_pool, None);
            self.raw.destroy_device(None);
        }
    }
}

/// Everything created once per window and torn down with the module.
///
/// Fields drop in declaration order: device, surface, messenger, instance.
pub struct DeviceContext {
    device: LogicalDevice,
    surface: SurfaceHandle,
    debug: Option<DebugMessenger>,
    instance: InstanceHandle,

    phys: vk::PhysicalDevice,
    adapter_name: String,
    queues: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    validation_enabled: bool,
}

impl DeviceContext {
    /// Loads Vulkan, negotiates layers/extensions, binds the window and opens
    /// the first adapter able to render and present to it.
    pub fn negotiate<W>(
        engine: &EngineConfig,
        settings: &RenderSettings,
        window: &W,
    ) -> Result<Self, RenderError>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        // STRICT ORDER:
        // 1) Instance (WSI + optional debug utils, validation layer)
        // 2) Debug messenger
        // 3) Surface FROM THIS INSTANCE
        // 4) Adapters queried AGAINST THIS SURFACE
        // 5) Device + queues + command pool

        // --- Loader & platform handles ---
        let entry =
            unsafe { Entry::load() }.map_err(|e| RenderError::LoaderUnavailable(e.to_string()))?;
        let dh = window.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        // --- Layers & instance extensions ---
        let layers = if validation_wanted(settings.validation, engine.debug_mode) {
            instance_layers(&entry)
        } else {
            Vec::new()
        };
        let validation_enabled =
            resolve_validation(settings.validation, engine.debug_mode, &layers)?;

        let available = instance_extensions(&entry);
        info!(
            target: "forge::render",
            "{} instance extensions, {} layers enumerated",
            available.len(),
            layers.len()
        );

        let mut ext_ptrs: Vec<*const c_char> = ash_window::enumerate_required_extensions(dh)
            .vk("enumerate_required_extensions")?
            .to_vec();

        let debug_utils_name = ash::ext::debug_utils::NAME;
        let want_messenger = validation_enabled;
        let has_debug_utils = available
            .iter()
            .any(|e| e.as_bytes() == debug_utils_name.to_bytes());
        let use_messenger = if want_messenger && !has_debug_utils {
            warn!(
                target: "forge::render",
                "{}; validation messages will not be logged",
                RenderError::DebugUtilsUnavailable
            );
            false
        } else {
            want_messenger
        };
        if use_messenger {
            ext_ptrs.push(debug_utils_name.as_ptr());
        }

        // --- Instance ---
        let app_name = CString::new(engine.app.name.as_str()).unwrap_or_default();
        let engine_name = CString::new(engine.engine.name.as_str()).unwrap_or_default();
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app_name.as_ptr(),
            application_version: vk::make_api_version(
                0,
                engine.app.version.major,
                engine.app.version.minor,
                engine.app.version.patch,
            ),
            p_engine_name: engine_name.as_ptr(),
            engine_version: vk::make_api_version(
                0,
                engine.engine.version.major,
                engine.engine.version.minor,
                engine.engine.version.patch,
            ),
            api_version: vk::API_VERSION_1_1,
            ..Default::default()
        };

        let layer_name = CString::new(VALIDATION_LAYER).unwrap_or_default();
        let layer_ptrs: Vec<*const c_char> = if validation_enabled {
            vec![layer_name.as_ptr()]
        } else {
            Vec::new()
        };

        let filter = SeverityFilter::at_least(settings.validation_severity);
        // chained so instance creation/destruction is reported too
        let instance_dbg = messenger_create_info(filter);
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_next: if use_messenger {
                (&instance_dbg as *const vk::DebugUtilsMessengerCreateInfoEXT) as *const c_void
            } else {
                std::ptr::null()
            },
            p_application_info: &app_info,
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe { entry.create_instance(&create_info, None) }.vk("create_instance")?;
        let instance = InstanceHandle { entry, raw };

        // --- Debug messenger (degrades, never fails startup) ---
        let debug = if use_messenger {
            match DebugMessenger::install(&instance.entry, &instance.raw, filter) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(target: "forge::render", "debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        // --- Surface ---
        let surface_raw =
            unsafe { ash_window::create_surface(&instance.entry, &instance.raw, dh, wh, None) }
                .vk("create_surface")?;
        let surface = SurfaceHandle {
            loader: surface::Instance::new(&instance.entry, &instance.raw),
            raw: surface_raw,
        };

        // --- Adapter ---
        let queried = query_adapters(&instance.raw, &surface.loader, surface.raw)?;
        let required: Vec<String> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        let required: Vec<&str> = required.iter().map(String::as_str).collect();
        let caps: Vec<_> = queried.iter().map(|(_, c)| c.clone()).collect();
        let selection = select_adapter(&caps, &required)?;
        let (phys, chosen) = &queried[selection.index];
        let queues = selection.queues;
        info!(
            target: "forge::render",
            "using adapter {} ({:?}); graphics family {}, present family {}",
            chosen.name,
            chosen.kind,
            queues.graphics,
            queues.present
        );

        // --- Logical device ---
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = queues
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();
        let device_exts: Vec<*const c_char> =
            REQUIRED_DEVICE_EXTENSIONS.iter().map(|n| n.as_ptr()).collect();
        let device_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            ..Default::default()
        };
        let raw_device = unsafe { instance.raw.create_device(*phys, &device_info, None) }
            .map_err(RenderError::DeviceCreation)?;
        let mut device = LogicalDevice {
            raw: raw_device,
            command_pool: vk::CommandPool::null(),
        };

        let graphics_queue = unsafe { device.raw.get_device_queue(queues.graphics, 0) };
        let present_queue = unsafe { device.raw.get_device_queue(queues.present, 0) };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: queues.graphics,
            ..Default::default()
        };
        device.command_pool = unsafe { device.raw.create_command_pool(&pool_info, None) }
            .vk("create_command_pool")?;

        Ok(Self {
            adapter_name: chosen.name.clone(),
            phys: *phys,
            device,
            surface,
            debug,
            instance,
            queues,
            graphics_queue,
            present_queue,
            validation_enabled,
        })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance.raw
    }

    pub fn device(&self) -> &ash::Device {
        &self.device.raw
    }

    pub fn phys(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface.loader
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.raw
    }

    pub fn queues(&self) -> QueueFamilies {
        self.queues
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.device.command_pool
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation_enabled
    }

    pub fn has_debug_messenger(&self) -> bool {
        self.debug.is_some()
    }

    pub fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        unsafe {
            self.instance
                .raw
                .get_physical_device_memory_properties(self.phys)
        }
    }

    pub fn properties(&self) -> vk::PhysicalDeviceProperties {
        unsafe { self.instance.raw.get_physical_device_properties(self.phys) }
    }
}
