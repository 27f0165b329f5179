// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// How the caller is expected to react to a [`RenderError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Initialization or the frame loop cannot continue.
    Fatal,
    /// Resolved by rebuilding the swapchain; never surfaced by the frame loop.
    Recoverable,
    /// A diagnostic feature is unavailable; rendering continues without it.
    Degraded,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Vulkan loader unavailable: {0}")]
    LoaderUnavailable(String),
    #[error("no GPUs with Vulkan support found")]
    NoGpu,
    #[error("no suitable GPU found (checked {checked} adapter(s))")]
    NoSuitableDevice { checked: usize },
    #[error("requested Vulkan validation layer \"{0}\" is not supported")]
    UnsupportedValidationLayer(String),
    #[error("debug utils extension unavailable")]
    DebugUtilsUnavailable,
    #[error("failed to create logical device: {0}")]
    DeviceCreation(vk::Result),
    #[error("frame slot {slot} fence not signaled within {timeout:?}; device presumed lost")]
    FenceTimeout { slot: usize, timeout: Duration },
    #[error("swapchain image not acquired within {0:?}")]
    AcquireTimeout(Duration),
    #[error("device lost")]
    DeviceLost,
    #[error("swapchain is out of date")]
    OutOfDate,
    #[error("surface reports no color formats")]
    NoSurfaceFormat,
    #[error("no memory type matches bits {type_bits:#x} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },
    #[error("failed to read shader: {0}")]
    ShaderRead(#[from] forge_core::FsError),
    #[error("invalid SPIR-V in {path}: {reason}")]
    InvalidShader { path: PathBuf, reason: String },
    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
    #[error("no swapchain is available")]
    NoSwapchain,
    #[error("mesh has no vertices or no indices")]
    EmptyMesh,
    #[error("{call} failed: {result}")]
    Vk {
        call: &'static str,
        result: vk::Result,
    },
}

impl RenderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RenderError::OutOfDate => ErrorClass::Recoverable,
            RenderError::DebugUtilsUnavailable => ErrorClass::Degraded,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Maps a raw Vulkan status, folding the statuses that have their own
    /// variants.
    pub fn from_vk(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::OutOfDate,
            result => RenderError::Vk { call, result },
        }
    }
}

/// Tags a Vulkan call result with the entry point that produced it.
pub trait VkResultExt<T> {
    fn vk(self, call: &'static str) -> Result<T, RenderError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn vk(self, call: &'static str) -> Result<T, RenderError> {
        self.map_err(|r| RenderError::from_vk(call, r))
    }
}
