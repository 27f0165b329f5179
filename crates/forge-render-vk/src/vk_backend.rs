// SPDX-License-Identifier: CEPL-1.0
//! [`GpuBackend`] over a real Vulkan device.

use ash::khr::swapchain;
use ash::vk;
use forge_core::{EngineConfig, FileSource};
use forge_render::{MeshId, RenderSettings, Vertex};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{
    Acquired, ChainInfo, FenceStatus, FrameRecording, GpuBackend, Presented, SurfaceSupport,
};
use crate::context::DeviceContext;
use crate::error::{RenderError, VkResultExt};
use crate::frame::{create_frame_slots, destroy_frame_slots, FrameSlot};
use crate::memory::{create_buffer, GpuBuffer, MeshBuffers, TransferQueue};
use crate::pipeline::{
    build_pipeline, build_targets, create_camera_set_layout, load_pipeline_cache, load_shaders,
    pick_depth_format, save_pipeline_cache, CameraUniform, DrawPush, ShaderSet, VkPipeline,
    VkTargets,
};
use crate::swapchain::SwapchainDesc;

/// Swapchain handle with its images and per-image views.
#[derive(Debug)]
pub struct VkChain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl ChainInfo for VkChain {
    fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }
}

pub struct VkBackend {
    swapchain_loader: swapchain::Device,
    slots: Vec<FrameSlot>,

    // --- camera uniforms, one per frame slot ---
    set_layout: vk::DescriptorSetLayout,
    desc_pool: vk::DescriptorPool,
    desc_sets: Vec<vk::DescriptorSet>,
    camera: Vec<GpuBuffer>,

    cache: vk::PipelineCache,
    cache_path: Option<PathBuf>,
    shaders: ShaderSet,
    depth_format: vk::Format,
    mem_props: vk::PhysicalDeviceMemoryProperties,

    meshes: BTreeMap<MeshId, MeshBuffers>,
    next_mesh: u32,

    // Dropped after `Drop::drop` has released everything above.
    context: DeviceContext,
}

impl VkBackend {
    /// Reads shaders, negotiates the device and creates the per-slot
    /// resources. Every failure here is fatal.
    pub fn new<W>(
        engine: &EngineConfig,
        settings: &RenderSettings,
        window: &W,
        files: &dyn FileSource,
    ) -> Result<Self, RenderError>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let shaders = load_shaders(files, settings)?;
        let context = DeviceContext::negotiate(engine, settings, window)?;

        let swapchain_loader = swapchain::Device::new(context.instance(), context.device());
        let depth_format = unsafe { pick_depth_format(context.instance(), context.phys()) };
        let mem_props = context.memory_properties();

        // Handles start null so a failure below is cleaned up by Drop.
        let mut backend = Self {
            swapchain_loader,
            slots: Vec::new(),
            set_layout: vk::DescriptorSetLayout::null(),
            desc_pool: vk::DescriptorPool::null(),
            desc_sets: Vec::new(),
            camera: Vec::new(),
            cache: vk::PipelineCache::null(),
            cache_path: settings.pipeline_cache.clone(),
            shaders,
            depth_format,
            mem_props,
            meshes: BTreeMap::new(),
            next_mesh: 0,
            context,
        };

        let count = settings.slot_count();
        let device = backend.context.device();
        backend.slots = unsafe { create_frame_slots(device, count) }?;
        backend.set_layout = unsafe { create_camera_set_layout(device) }?;
        backend.cache = unsafe { load_pipeline_cache(device, backend.cache_path.as_deref()) }?;
        backend.create_camera_uniforms(count)?;

        info!(
            target: "forge::render",
            "{} frame slots, depth {:?}",
            count,
            depth_format
        );
        Ok(backend)
    }

    fn create_camera_uniforms(&mut self, count: usize) -> Result<(), RenderError> {
        let device = self.context.device();
        let ubo_size = std::mem::size_of::<CameraUniform>() as vk::DeviceSize;

        // 1) One UBO per slot
        for _ in 0..count {
            let buf = unsafe {
                create_buffer(
                    device,
                    &self.mem_props,
                    ubo_size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )
            }?;
            self.camera.push(buf);
        }

        // 2) Pool
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count as u32,
        }];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: count as u32,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        self.desc_pool =
            unsafe { device.create_descriptor_pool(&pool_ci, None) }.vk("create_descriptor_pool")?;

        // 3) Sets
        let layouts = vec![self.set_layout; count];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.desc_pool,
            descriptor_set_count: count as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        self.desc_sets =
            unsafe { device.allocate_descriptor_sets(&alloc) }.vk("allocate_descriptor_sets")?;

        // 4) Bind each set to its slot's buffer
        let infos: Vec<vk::DescriptorBufferInfo> = self
            .camera
            .iter()
            .map(|b| vk::DescriptorBufferInfo {
                buffer: b.buffer,
                offset: 0,
                range: ubo_size,
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = self
            .desc_sets
            .iter()
            .zip(&infos)
            .map(|(&set, info)| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            })
            .collect();
        unsafe { device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn validation_enabled(&self) -> bool {
        self.context.validation_enabled()
    }

    /// Copies geometry into device-local buffers; blocks until the transfer
    /// has finished.
    pub fn upload_mesh(
        &mut self,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<MeshId, RenderError> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RenderError::EmptyMesh);
        }
        let transfer = TransferQueue {
            queue: self.context.graphics_queue(),
            pool: self.context.command_pool(),
        };
        let mesh = unsafe {
            MeshBuffers::upload(
                self.context.device(),
                &self.mem_props,
                transfer,
                vertices,
                indices,
            )
        }?;

        let id = MeshId(self.next_mesh);
        self.next_mesh += 1;
        self.meshes.insert(id, mesh);
        debug!(
            target: "forge::render",
            "mesh {:?}: {} vertices, {} indices",
            id,
            vertices.len(),
            indices.len()
        );
        Ok(id)
    }
}

/// The per-image entry for `image_index`; an index past the current chain
/// means the targets were built for another swapchain.
fn per_image<T: Copy>(items: &[T], image_index: u32) -> Result<T, RenderError> {
    items
        .get(image_index as usize)
        .copied()
        .ok_or(RenderError::NoSwapchain)
}

impl GpuBackend for VkBackend {
    type Chain = VkChain;
    type Pipeline = VkPipeline;
    type Targets = VkTargets;

    fn frame_slots(&self) -> usize {
        self.slots.len()
    }

    fn surface_support(&mut self) -> Result<SurfaceSupport, RenderError> {
        let loader = self.context.surface_loader();
        let (phys, surface) = (self.context.phys(), self.context.surface());
        unsafe {
            Ok(SurfaceSupport {
                caps: loader
                    .get_physical_device_surface_capabilities(phys, surface)
                    .vk("get_physical_device_surface_capabilities")?,
                formats: loader
                    .get_physical_device_surface_formats(phys, surface)
                    .vk("get_physical_device_surface_formats")?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(phys, surface)
                    .vk("get_physical_device_surface_present_modes")?,
            })
        }
    }

    fn create_chain(
        &mut self,
        desc: &SwapchainDesc,
        old: Option<&VkChain>,
    ) -> Result<VkChain, RenderError> {
        let device = self.context.device();
        let queues = self.context.queues();
        let families = queues.unique();
        let (sharing_mode, family_count, p_families) = if queues.is_shared() {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        } else {
            (
                vk::SharingMode::CONCURRENT,
                families.len() as u32,
                families.as_ptr(),
            )
        };

        let ci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.context.surface(),
            min_image_count: desc.image_count,
            image_format: desc.format.format,
            image_color_space: desc.format.color_space,
            image_extent: desc.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: p_families,
            pre_transform: desc.transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: desc.present_mode,
            clipped: vk::TRUE,
            old_swapchain: old.map_or(vk::SwapchainKHR::null(), |c| c.handle),
            ..Default::default()
        };
        let handle = unsafe { self.swapchain_loader.create_swapchain(&ci, None) }
            .vk("create_swapchain")?;

        let mut chain = VkChain {
            handle,
            format: desc.format,
            extent: desc.extent,
            images: Vec::new(),
            views: Vec::new(),
        };
        let filled = (|| -> Result<(), RenderError> {
            chain.images = unsafe { self.swapchain_loader.get_swapchain_images(handle) }
                .vk("get_swapchain_images")?;
            for &image in &chain.images {
                let view_ci = vk::ImageViewCreateInfo {
                    s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                    image,
                    view_type: vk::ImageViewType::TYPE_2D,
                    format: desc.format.format,
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                };
                let view = unsafe { device.create_image_view(&view_ci, None) }
                    .vk("create_image_view")?;
                chain.views.push(view);
            }
            Ok(())
        })();

        match filled {
            Ok(()) => Ok(chain),
            Err(e) => {
                self.destroy_chain(chain);
                Err(e)
            }
        }
    }

    fn destroy_chain(&mut self, chain: VkChain) {
        let device = self.context.device();
        unsafe {
            // views BEFORE swapchain
            for &view in &chain.views {
                device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(chain.handle, None);
        }
    }

    fn build_pipeline(&mut self, format: vk::Format) -> Result<VkPipeline, RenderError> {
        unsafe {
            build_pipeline(
                self.context.device(),
                self.cache,
                &self.shaders,
                format,
                self.depth_format,
                self.set_layout,
            )
        }
    }

    fn destroy_pipeline(&mut self, pipeline: VkPipeline) {
        unsafe { pipeline.destroy(self.context.device()) };
    }

    fn build_targets(
        &mut self,
        chain: &VkChain,
        pipeline: &VkPipeline,
    ) -> Result<VkTargets, RenderError> {
        unsafe {
            build_targets(
                self.context.device(),
                &self.mem_props,
                self.context.command_pool(),
                pipeline,
                &chain.views,
                chain.extent,
            )
        }
    }

    fn destroy_targets(&mut self, targets: VkTargets) {
        unsafe { targets.destroy(self.context.device(), self.context.command_pool()) };
    }

    fn wait_slot(&mut self, slot: usize, timeout: Duration) -> Result<FenceStatus, RenderError> {
        let fence = self.slots[slot].in_flight;
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.context.device().wait_for_fences(&[fence], true, nanos) } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(e) => Err(RenderError::from_vk("wait_for_fences", e)),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        let fence = self.slots[slot].in_flight;
        unsafe { self.context.device().reset_fences(&[fence]) }.vk("reset_fences")
    }

    fn acquire(
        &mut self,
        chain: &VkChain,
        slot: usize,
        timeout: Duration,
    ) -> Result<Acquired, RenderError> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                chain.handle,
                nanos,
                self.slots[slot].image_available,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                Err(RenderError::AcquireTimeout(timeout))
            }
            Err(e) => Err(RenderError::from_vk("acquire_next_image", e)),
        }
    }

    fn record(
        &mut self,
        frame: &FrameRecording<'_, VkPipeline, VkTargets>,
    ) -> Result<(), RenderError> {
        let cmd = per_image(&frame.targets.command_buffers, frame.image_index)?;
        let framebuffer = per_image(&frame.targets.framebuffers, frame.image_index)?;
        let extent = frame.targets.extent;
        let device = self.context.device();

        let camera = CameraUniform {
            view_proj: frame.scene.view_projection().to_cols_array_2d(),
        };
        unsafe { self.camera[frame.slot].write(device, bytemuck::bytes_of(&camera)) }?;

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .vk("reset_command_buffer")?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device
                .begin_command_buffer(cmd, &begin)
                .vk("begin_command_buffer")?;

            let clears = [
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: frame.clear_color,
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ];
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: frame.pipeline.render_pass,
                framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, frame.pipeline.pipeline);

            // dynamic viewport/scissor follow the current extent
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                frame.pipeline.layout,
                0,
                &[self.desc_sets[frame.slot]],
                &[],
            );

            for draw in frame.scene.draw_commands() {
                let Some(mesh) = self.meshes.get(&draw.mesh) else {
                    warn!(target: "forge::render", "draw references unknown {:?}, skipped", draw.mesh);
                    continue;
                };
                let push = DrawPush {
                    model: draw.transform.to_cols_array_2d(),
                    tint: draw.material.tint,
                };
                device.cmd_push_constants(
                    cmd,
                    frame.pipeline.layout,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    0,
                    bytemuck::bytes_of(&push),
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertices.buffer], &[0]);
                device.cmd_bind_index_buffer(cmd, mesh.indices.buffer, 0, vk::IndexType::UINT32);
                device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
            }

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd).vk("end_command_buffer")?;
        }
        Ok(())
    }

    fn submit(
        &mut self,
        slot: usize,
        image_index: u32,
        targets: &VkTargets,
    ) -> Result<(), RenderError> {
        let cmd = per_image(&targets.command_buffers, image_index)?;
        let s = self.slots[slot];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

        // Submit (wait on acquire sem; signal render-finished; track with this slot's fence)
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_finished,
            ..Default::default()
        };
        unsafe {
            self.context.device().queue_submit(
                self.context.graphics_queue(),
                std::slice::from_ref(&submit),
                s.in_flight,
            )
        }
        .vk("queue_submit")
    }

    fn present(
        &mut self,
        chain: &VkChain,
        slot: usize,
        image_index: u32,
    ) -> Result<Presented, RenderError> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.slots[slot].render_finished,
            swapchain_count: 1,
            p_swapchains: &chain.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe {
            self.swapchain_loader
                .queue_present(self.context.present_queue(), &present)
        } {
            Ok(false) => Ok(Presented::Optimal),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::Stale),
            Err(e) => Err(RenderError::from_vk("queue_present", e)),
        }
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        unsafe { self.context.device().device_wait_idle() }.vk("device_wait_idle")
    }
}

// STRICT TEARDOWN ORDER:
// - device idle (no submission may reference anything below)
// - meshes, camera buffers, descriptor pool (frees sets), set layout
// - frame slot semaphores/fences
// - pipeline cache, saved first when a path is configured
// - DeviceContext fields: device, surface, messenger, instance last
impl Drop for VkBackend {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            device.device_wait_idle().ok();

            for mesh in self.meshes.values() {
                mesh.destroy(device);
            }
            for buf in &self.camera {
                buf.destroy(device);
            }
            device.destroy_descriptor_pool(self.desc_pool, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);

            destroy_frame_slots(device, &self.slots);

            if self.cache != vk::PipelineCache::null() {
                if let Some(path) = &self.cache_path {
                    save_pipeline_cache(device, self.cache, path);
                }
                device.destroy_pipeline_cache(self.cache, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_image_lookup_rejects_indices_past_the_chain() {
        let framebuffers = [vk::Framebuffer::null(); 3];
        assert!(per_image(&framebuffers, 2).is_ok());
        assert!(matches!(
            per_image(&framebuffers, 3),
            Err(RenderError::NoSwapchain)
        ));
        assert!(matches!(
            per_image::<vk::CommandBuffer>(&[], 0),
            Err(RenderError::NoSwapchain)
        ));
    }
}
