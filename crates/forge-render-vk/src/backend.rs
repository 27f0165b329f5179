// SPDX-License-Identifier: CEPL-1.0
//! The small set of GPU capabilities [`RenderModule`](crate::RenderModule) drives.
//!
//! [`VkBackend`](crate::VkBackend) implements it over a real device. Everything
//! above this trait (swapchain policy, slot bookkeeping, rebuild ordering) is
//! backend-agnostic.

use ash::vk;
use forge_render::DrawSource;
use std::time::Duration;

use crate::error::RenderError;
use crate::swapchain::SwapchainDesc;

/// What the surface currently allows.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Read access to a built swapchain.
pub trait ChainInfo {
    fn format(&self) -> vk::SurfaceFormatKHR;
    fn extent(&self) -> vk::Extent2D;
    fn image_count(&self) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Optimal,
    /// Out of date or suboptimal: the frame made it, the swapchain did not.
    Stale,
}

/// Inputs for recording one image's command buffer.
pub struct FrameRecording<'a, P, T> {
    pub slot: usize,
    pub image_index: u32,
    pub pipeline: &'a P,
    pub targets: &'a T,
    pub clear_color: [f32; 4],
    pub scene: &'a dyn DrawSource,
}

pub trait GpuBackend {
    /// Swapchain handle plus its images and per-image views.
    type Chain: ChainInfo;
    /// Render pass, layouts and the graphics pipeline.
    type Pipeline;
    /// Extent-sized resources: depth attachment, framebuffers, command buffers.
    type Targets;

    /// Number of frame slots the backend created sync objects for.
    fn frame_slots(&self) -> usize;

    fn surface_support(&mut self) -> Result<SurfaceSupport, RenderError>;

    /// Builds a swapchain, handing `old` to the driver as the retirement hint.
    /// `old` stays alive; the caller destroys it once nothing references it.
    fn create_chain(
        &mut self,
        desc: &SwapchainDesc,
        old: Option<&Self::Chain>,
    ) -> Result<Self::Chain, RenderError>;
    fn destroy_chain(&mut self, chain: Self::Chain);

    fn build_pipeline(&mut self, format: vk::Format) -> Result<Self::Pipeline, RenderError>;
    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline);

    fn build_targets(
        &mut self,
        chain: &Self::Chain,
        pipeline: &Self::Pipeline,
    ) -> Result<Self::Targets, RenderError>;
    fn destroy_targets(&mut self, targets: Self::Targets);

    fn wait_slot(&mut self, slot: usize, timeout: Duration) -> Result<FenceStatus, RenderError>;
    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError>;

    /// Acquires the next image, signalling the slot's "image available" semaphore.
    fn acquire(
        &mut self,
        chain: &Self::Chain,
        slot: usize,
        timeout: Duration,
    ) -> Result<Acquired, RenderError>;

    fn record(
        &mut self,
        frame: &FrameRecording<'_, Self::Pipeline, Self::Targets>,
    ) -> Result<(), RenderError>;

    /// Submits the image's commands: waits "image available", signals
    /// "render finished" and the slot fence.
    fn submit(
        &mut self,
        slot: usize,
        image_index: u32,
        targets: &Self::Targets,
    ) -> Result<(), RenderError>;

    fn present(
        &mut self,
        chain: &Self::Chain,
        slot: usize,
        image_index: u32,
    ) -> Result<Presented, RenderError>;

    fn wait_idle(&mut self) -> Result<(), RenderError>;
}
