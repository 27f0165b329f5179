// SPDX-License-Identifier: CEPL-1.0
//! Driver diagnostics routed into `tracing` under the `forge::vulkan` target.

use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use bitflags::bitflags;
use forge_render::SeverityLevel;
use std::borrow::Cow;
use std::ffi::{c_void, CStr};
use tracing::{debug, error, info, trace, warn};

use crate::error::{RenderError, VkResultExt};

bitflags! {
    /// Which message severities reach the callback.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SeverityFilter: u8 {
        const VERBOSE = 1 << 0;
        const INFO = 1 << 1;
        const WARNING = 1 << 2;
        const ERROR = 1 << 3;
    }
}

impl SeverityFilter {
    /// `min` and everything more severe.
    pub fn at_least(min: SeverityLevel) -> Self {
        let mut f = Self::empty();
        for (level, flag) in [
            (SeverityLevel::Verbose, Self::VERBOSE),
            (SeverityLevel::Info, Self::INFO),
            (SeverityLevel::Warning, Self::WARNING),
            (SeverityLevel::Error, Self::ERROR),
        ] {
            if level >= min {
                f |= flag;
            }
        }
        f
    }

    pub fn to_vk(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        let mut out = vk::DebugUtilsMessageSeverityFlagsEXT::empty();
        if self.contains(Self::VERBOSE) {
            out |= vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
        }
        if self.contains(Self::INFO) {
            out |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO;
        }
        if self.contains(Self::WARNING) {
            out |= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING;
        }
        if self.contains(Self::ERROR) {
            out |= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
        }
        out
    }
}

/// Most severe bit wins; anything unrecognized is treated as an error.
pub fn classify(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> SeverityLevel {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        SeverityLevel::Error
    } else if severity.contains(S::WARNING) {
        SeverityLevel::Warning
    } else if severity.contains(S::INFO) {
        SeverityLevel::Info
    } else if severity.contains(S::VERBOSE) {
        SeverityLevel::Verbose
    } else {
        SeverityLevel::Error
    }
}

/// An object a message refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: vk::ObjectType,
    pub handle: u64,
    pub name: Option<String>,
}

pub fn describe_objects(objects: &[ObjectRef]) -> String {
    objects
        .iter()
        .map(|o| {
            format!(
                "{:?} {:#x} \"{}\"",
                o.kind,
                o.handle,
                o.name.as_deref().unwrap_or("Unnamed")
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn emit(
    level: SeverityLevel,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    id: &str,
    msg: &str,
    objects: &[ObjectRef],
) {
    match level {
        SeverityLevel::Verbose => trace!(target: "forge::vulkan", "[{kind:?}] {id}: {msg}"),
        SeverityLevel::Info => debug!(target: "forge::vulkan", "[{kind:?}] {id}: {msg}"),
        SeverityLevel::Warning | SeverityLevel::Error => {
            let objs = describe_objects(objects);
            if level == SeverityLevel::Warning {
                warn!(target: "forge::vulkan", "[{kind:?}] {id}: {msg} objects=[{objs}]");
            } else {
                error!(target: "forge::vulkan", "[{kind:?}] {id}: {msg} objects=[{objs}]");
            }
        }
    }
}

unsafe fn lossy<'a>(ptr: *const std::ffi::c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed("")
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy()
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let data = unsafe { &*data };
    let msg = unsafe { lossy(data.p_message) };
    let id = unsafe { lossy(data.p_message_id_name) };

    let objects = if data.p_objects.is_null() || data.object_count == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(data.p_objects, data.object_count as usize) }
            .iter()
            .map(|o| ObjectRef {
                kind: o.object_type,
                handle: o.object_handle,
                name: (!o.p_object_name.is_null())
                    .then(|| unsafe { lossy(o.p_object_name) }.into_owned()),
            })
            .collect()
    };

    emit(classify(severity), kind, &id, &msg, &objects);
    // never abort the triggering call
    vk::FALSE
}

/// Create info for the messenger. Also chained into instance creation so
/// `vkCreateInstance` / `vkDestroyInstance` are covered.
pub fn messenger_create_info(
    filter: SeverityFilter,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: filter.to_vk(),
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

/// Installed messenger; destroyed on drop, which must precede the instance.
pub struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub fn install(
        entry: &Entry,
        instance: &Instance,
        filter: SeverityFilter,
    ) -> Result<Self, RenderError> {
        let loader = debug_utils::Instance::new(entry, instance);
        let info = messenger_create_info(filter);
        let handle = unsafe { loader.create_debug_utils_messenger(&info, None) }
            .vk("create_debug_utils_messenger")?;
        info!(target: "forge::render", "debug messenger installed ({filter:?})");
        Ok(Self { loader, handle })
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.handle, None);
        }
    }
}
