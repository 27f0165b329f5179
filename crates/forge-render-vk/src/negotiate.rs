// SPDX-License-Identifier: CEPL-1.0
//! Capability negotiation: which layers, extensions and adapter to use.
//!
//! Selection is split from enumeration. [`query_adapters`] turns what the
//! driver reports into plain [`AdapterCaps`] values, and [`select_adapter`]
//! decides over those values alone, so the policy runs without a GPU.

use ash::khr::surface;
use ash::{vk, Entry, Instance};
use forge_render::ValidationMode;
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};
use tracing::{debug, info, warn};

use crate::error::{RenderError, VkResultExt};

pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyCaps {
    pub graphics: bool,
    pub present: bool,
}

/// One enumerated adapter as seen by the selection policy.
#[derive(Clone, Debug, PartialEq)]
pub struct AdapterCaps {
    pub name: String,
    pub kind: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub queue_families: Vec<QueueFamilyCaps>,
    pub extensions: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

impl AdapterCaps {
    /// Graphics and present families. A single family doing both wins over a
    /// split pair.
    pub fn queue_families(&self) -> Option<QueueFamilies> {
        let index = |i: usize| i as u32;

        if let Some(i) = self
            .queue_families
            .iter()
            .position(|q| q.graphics && q.present)
        {
            return Some(QueueFamilies {
                graphics: index(i),
                present: index(i),
            });
        }

        let graphics = self.queue_families.iter().position(|q| q.graphics)?;
        let present = self.queue_families.iter().position(|q| q.present)?;
        Some(QueueFamilies {
            graphics: index(graphics),
            present: index(present),
        })
    }

    /// Required extensions this adapter does not advertise.
    pub fn missing_extensions<'a>(&self, required: &[&'a str]) -> BTreeSet<&'a str> {
        let mut missing: BTreeSet<&str> = required.iter().copied().collect();
        for ext in &self.extensions {
            missing.remove(ext.as_str());
        }
        missing
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
    pub queues: QueueFamilies,
}

/// First adapter with graphics, present and every required extension.
///
/// Adapters are not ranked: on a multi-GPU machine the enumeration order decides.
pub fn select_adapter(
    adapters: &[AdapterCaps],
    required: &[&str],
) -> Result<Selection, RenderError> {
    if adapters.is_empty() {
        return Err(RenderError::NoGpu);
    }

    for (index, adapter) in adapters.iter().enumerate() {
        let Some(queues) = adapter.queue_families() else {
            debug!(target: "forge::render", "skipping {}: no graphics+present queue families", adapter.name);
            continue;
        };
        let missing = adapter.missing_extensions(required);
        if !missing.is_empty() {
            debug!(target: "forge::render", "skipping {}: missing {:?}", adapter.name, missing);
            continue;
        }
        return Ok(Selection { index, queues });
    }

    Err(RenderError::NoSuitableDevice {
        checked: adapters.len(),
    })
}

/// Whether `mode` asks for validation at all. Layers are only enumerated
/// when it does.
pub fn validation_wanted(mode: ValidationMode, debug_mode: bool) -> bool {
    match mode {
        ValidationMode::Off => false,
        ValidationMode::Auto => debug_mode,
        ValidationMode::Required => true,
    }
}

/// Decides whether validation is on, given what the platform offers.
///
/// `Auto` follows `debug_mode` and only warns when the layer is absent;
/// `Required` turns the absence into an error.
pub fn resolve_validation(
    mode: ValidationMode,
    debug_mode: bool,
    available_layers: &[String],
) -> Result<bool, RenderError> {
    if !validation_wanted(mode, debug_mode) {
        return Ok(false);
    }

    if available_layers.iter().any(|l| l == VALIDATION_LAYER) {
        info!(target: "forge::render", "Vulkan validation layers enabled");
        return Ok(true);
    }

    match mode {
        ValidationMode::Required => Err(RenderError::UnsupportedValidationLayer(
            VALIDATION_LAYER.into(),
        )),
        _ => {
            warn!(
                target: "forge::render",
                "validation requested but {VALIDATION_LAYER} is not installed; continuing without validation"
            );
            Ok(false)
        }
    }
}

pub(crate) fn name_from_raw(raw: &[c_char]) -> String {
    // SAFETY: Vulkan fixed-size name arrays are NUL terminated.
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

pub fn instance_layers(entry: &Entry) -> Vec<String> {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    debug!(target: "forge::render", "available Vulkan layers ({}):", layers.len());
    layers
        .iter()
        .map(|l| {
            let name = name_from_raw(&l.layer_name);
            debug!(target: "forge::render", " | {} v.{}", name, l.implementation_version);
            name
        })
        .collect()
}

pub fn instance_extensions(entry: &Entry) -> Vec<String> {
    let exts = unsafe { entry.enumerate_instance_extension_properties(None) }.unwrap_or_default();
    debug!(target: "forge::render", "available Vulkan extensions ({}):", exts.len());
    exts.iter()
        .map(|e| {
            let name = name_from_raw(&e.extension_name);
            debug!(target: "forge::render", " | {} v.{}", name, e.spec_version);
            name
        })
        .collect()
}

/// Enumerates every adapter and what it can do against `surface`.
pub fn query_adapters(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<Vec<(vk::PhysicalDevice, AdapterCaps)>, RenderError> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .vk("enumerate_physical_devices")?;

    let mut out = Vec::with_capacity(devices.len());
    for phys in devices {
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let queue_families = families
            .iter()
            .enumerate()
            .map(|(i, q)| QueueFamilyCaps {
                graphics: q.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present: unsafe {
                    surface_loader.get_physical_device_surface_support(phys, i as u32, surface)
                }
                .unwrap_or(false),
            })
            .collect();
        let extensions = unsafe { instance.enumerate_device_extension_properties(phys) }
            .vk("enumerate_device_extension_properties")?
            .iter()
            .map(|e| name_from_raw(&e.extension_name))
            .collect::<Vec<_>>();

        let caps = AdapterCaps {
            name: name_from_raw(&props.device_name),
            kind: props.device_type,
            api_version: props.api_version,
            queue_families,
            extensions,
        };
        info!(
            target: "forge::render",
            "adapter {}: {:?}, API {}.{}.{}, {} queue families, {} extensions",
            caps.name,
            caps.kind,
            vk::api_version_major(caps.api_version),
            vk::api_version_minor(caps.api_version),
            vk::api_version_patch(caps.api_version),
            caps.queue_families.len(),
            caps.extensions.len()
        );
        debug!(target: "forge::render", " | extensions: {:?}", caps.extensions);
        out.push((phys, caps));
    }
    Ok(out)
}
