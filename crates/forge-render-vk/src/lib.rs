// SPDX-License-Identifier: CEPL-1.0
//! Vulkan render module: device negotiation, swapchain lifecycle, pipeline
//! state and frame pacing for one window.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod context;
pub mod debug;
pub mod error;
pub mod frame;
pub mod memory;
pub mod module;
pub mod negotiate;
pub mod pipeline;
pub mod swapchain;
pub mod vk_backend;

pub use ash::vk;
pub use backend::{
    Acquired, ChainInfo, FenceStatus, FrameRecording, GpuBackend, Presented, SurfaceSupport,
};
pub use context::DeviceContext;
pub use error::{ErrorClass, RenderError, VkResultExt};
pub use frame::{FrameSynchronizer, SlotState};
pub use module::{RenderModule, VkRenderModule};
pub use negotiate::{select_adapter, AdapterCaps, QueueFamilies, QueueFamilyCaps, Selection};
pub use swapchain::{SwapchainDesc, SwapchainManager};
pub use vk_backend::{VkBackend, VkChain};
