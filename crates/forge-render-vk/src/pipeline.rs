// SPDX-License-Identifier: CEPL-1.0
//! Pipeline state and the extent-sized targets rendered into.
//!
//! Pipeline state depends only on the color format: viewport and scissor are
//! dynamic, so a resize rebuilds [`VkTargets`] and keeps [`VkPipeline`].

use ash::vk;
use bytemuck::{Pod, Zeroable};
use forge_core::FileSource;
use forge_render::{RenderSettings, Vertex};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{RenderError, VkResultExt};
use crate::memory::find_memory_type;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Camera block at set 0, binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
}

/// Per-draw push constants, visible to both stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DrawPush {
    pub model: [[f32; 4]; 4],
    pub tint: [f32; 4],
}

pub const DRAW_PUSH_SIZE: u32 = std::mem::size_of::<DrawPush>() as u32;

/// Validated SPIR-V words for both stages.
#[derive(Clone, Debug)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

/// Checks `bytes` is SPIR-V (word aligned, magic number in either byte order).
pub fn parse_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>, RenderError> {
    let invalid = |reason: String| RenderError::InvalidShader {
        path: path.to_path_buf(),
        reason,
    };
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| invalid(e.to_string()))?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(invalid(format!("bad magic number {other:#010x}"))),
        None => Err(invalid("empty module".into())),
    }
}

/// Reads both shader stages through `files`. Any failure aborts startup.
pub fn load_shaders(
    files: &dyn FileSource,
    settings: &RenderSettings,
) -> Result<ShaderSet, RenderError> {
    let load = |path: &Path| -> Result<Vec<u32>, RenderError> {
        let bytes = files.read(path)?;
        let words = parse_spirv(path, &bytes)?;
        debug!(target: "forge::render", "shader {}: {} words", path.display(), words.len());
        Ok(words)
    };
    Ok(ShaderSet {
        vertex: load(&settings.vertex_shader)?,
        fragment: load(&settings.fragment_shader)?,
    })
}

/// Render pass, layouts and the graphics pipeline for one color format.
#[derive(Debug)]
pub struct VkPipeline {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
}

impl VkPipeline {
    /// # Safety
    /// No command buffer using the pipeline may be pending.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Best supported depth attachment format.
///
/// # Safety
/// `phys` must belong to `instance`.
pub unsafe fn pick_depth_format(instance: &ash::Instance, phys: vk::PhysicalDevice) -> vk::Format {
    // Prefer 32f → 24+S8 → 16
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D16_UNORM,
    ];
    for &fmt in &candidates {
        let props = unsafe { instance.get_physical_device_format_properties(phys, fmt) };
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return fmt;
        }
    }
    vk::Format::D32_SFLOAT
}

/// # Safety
/// `device` must be live.
pub unsafe fn create_camera_set_layout(
    device: &ash::Device,
) -> Result<vk::DescriptorSetLayout, RenderError> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    };
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    unsafe { device.create_descriptor_set_layout(&ci, None) }.vk("create_descriptor_set_layout")
}

unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass, RenderError> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    // Attachment writes wait for the acquire semaphore's stage.
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        dst_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&rp_info, None) }.vk("create_render_pass")
}

unsafe fn create_shader_module(
    device: &ash::Device,
    words: &[u32],
) -> Result<vk::ShaderModule, RenderError> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: words.as_ptr(),
        code_size: words.len() * 4,
        ..Default::default()
    };
    unsafe { device.create_shader_module(&ci, None) }.vk("create_shader_module")
}

/// Builds the pipeline for `color_format`.
///
/// # Safety
/// `device` must be live; `set_layout` and `cache` must belong to it.
pub unsafe fn build_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    shaders: &ShaderSet,
    color_format: vk::Format,
    depth_format: vk::Format,
    set_layout: vk::DescriptorSetLayout,
) -> Result<VkPipeline, RenderError> {
    // STRICT: the render pass color format MUST match the swapchain images.
    // On format change the pipeline is rebuilt before recording.
    let render_pass = unsafe { create_render_pass(device, color_format, depth_format) }?;

    let push_range = vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        offset: 0,
        size: DRAW_PUSH_SIZE,
    };
    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &set_layout,
        push_constant_range_count: 1,
        p_push_constant_ranges: &push_range,
        ..Default::default()
    };
    let layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
        Ok(l) => l,
        Err(e) => {
            unsafe { device.destroy_render_pass(render_pass, None) };
            return Err(RenderError::from_vk("create_pipeline_layout", e));
        }
    };

    let built = unsafe { create_graphics_pipeline(device, cache, shaders, render_pass, layout) };
    match built {
        Ok(pipeline) => {
            info!(
                target: "forge::render",
                "pipeline built for {:?} (depth {:?})", color_format, depth_format
            );
            Ok(VkPipeline {
                render_pass,
                layout,
                pipeline,
                color_format,
                depth_format,
            })
        }
        Err(e) => {
            unsafe {
                device.destroy_pipeline_layout(layout, None);
                device.destroy_render_pass(render_pass, None);
            }
            Err(e)
        }
    }
}

unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    shaders: &ShaderSet,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline, RenderError> {
    // --- Shader modules (destroyed before return) ---
    let vs = unsafe { create_shader_module(device, &shaders.vertex) }?;
    let fs = match unsafe { create_shader_module(device, &shaders.fragment) } {
        Ok(m) => m,
        Err(e) => {
            unsafe { device.destroy_shader_module(vs, None) };
            return Err(e);
        }
    };
    let entry = c"main";

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // --- Fixed-function state ---
    let vb = vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let va = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::size_of::<[f32; 3]>() as u32,
        },
    ];
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
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
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
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
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
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
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
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let created = unsafe {
        device.create_graphics_pipelines(cache, std::slice::from_ref(&pipeline_info), None)
    };
    unsafe {
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
    }
    match created {
        Ok(p) => Ok(p[0]),
        Err((_, e)) => Err(RenderError::from_vk("create_graphics_pipelines", e)),
    }
}

// --- Extent-sized targets ---

#[derive(Clone, Copy, Debug)]
pub struct DepthTarget {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

/// Depth attachment, one framebuffer and one command buffer per swapchain image.
#[derive(Debug)]
pub struct VkTargets {
    pub depth: DepthTarget,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub extent: vk::Extent2D,
}

impl VkTargets {
    /// # Safety
    /// No command buffer in `self` may be pending.
    pub unsafe fn destroy(&self, device: &ash::Device, pool: vk::CommandPool) {
        unsafe {
            if !self.command_buffers.is_empty() {
                device.free_command_buffers(pool, &self.command_buffers);
            }
            for &fb in &self.framebuffers {
                device.destroy_framebuffer(fb, None);
            }
            destroy_depth(device, &self.depth);
        }
    }
}

unsafe fn destroy_depth(device: &ash::Device, depth: &DepthTarget) {
    unsafe {
        device.destroy_image_view(depth.view, None);
        device.destroy_image(depth.image, None);
        device.free_memory(depth.memory, None);
    }
}

unsafe fn create_depth_target(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    extent: vk::Extent2D,
    depth_format: vk::Format,
) -> Result<DepthTarget, RenderError> {
    let img_ci = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        image_type: vk::ImageType::TYPE_2D,
        format: depth_format,
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: 1,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let image = unsafe { device.create_image(&img_ci, None) }.vk("create_image")?;

    let req = unsafe { device.get_image_memory_requirements(image) };
    let memory_type_index = match find_memory_type(
        mem_props,
        req.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ) {
        Ok(i) => i,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(e);
        }
    };
    let alloc = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index,
        ..Default::default()
    };
    let memory = match unsafe { device.allocate_memory(&alloc, None) } {
        Ok(m) => m,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(RenderError::from_vk("allocate_memory", e));
        }
    };

    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format: depth_format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::DEPTH,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    let view = unsafe {
        device
            .bind_image_memory(image, memory, 0)
            .and_then(|_| device.create_image_view(&view_ci, None))
    };
    match view {
        Ok(view) => Ok(DepthTarget {
            image,
            memory,
            view,
        }),
        Err(e) => {
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            Err(RenderError::from_vk("create_image_view", e))
        }
    }
}

/// Builds the extent-sized targets for the given swapchain image views.
///
/// # Safety
/// `views` and `render_pass` must belong to `device`.
pub unsafe fn build_targets(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    pool: vk::CommandPool,
    pipeline: &VkPipeline,
    views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<VkTargets, RenderError> {
    let depth = unsafe { create_depth_target(device, mem_props, extent, pipeline.depth_format) }?;
    let mut targets = VkTargets {
        depth,
        framebuffers: Vec::with_capacity(views.len()),
        command_buffers: Vec::new(),
        extent,
    };

    for &view in views {
        let attachments = [view, depth.view];
        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: pipeline.render_pass,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        match unsafe { device.create_framebuffer(&fb_info, None) } {
            Ok(fb) => targets.framebuffers.push(fb),
            Err(e) => {
                unsafe { targets.destroy(device, pool) };
                return Err(RenderError::from_vk("create_framebuffer", e));
            }
        }
    }

    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: views.len() as u32,
        ..Default::default()
    };
    match unsafe { device.allocate_command_buffers(&alloc_info) } {
        Ok(bufs) => targets.command_buffers = bufs,
        Err(e) => {
            unsafe { targets.destroy(device, pool) };
            return Err(RenderError::from_vk("allocate_command_buffers", e));
        }
    }

    debug!(
        target: "forge::render",
        "targets: {}x{}, {} framebuffers",
        extent.width,
        extent.height,
        targets.framebuffers.len()
    );
    Ok(targets)
}

// --- Pipeline cache ---

/// Opens a pipeline cache, seeded from `path` when the file exists.
///
/// # Safety
/// `device` must be live.
pub unsafe fn load_pipeline_cache(
    device: &ash::Device,
    path: Option<&Path>,
) -> Result<vk::PipelineCache, RenderError> {
    let seed = path.and_then(|p| match std::fs::read(p) {
        Ok(bytes) => {
            info!(target: "forge::fs", "pipeline cache: {} bytes from {}", bytes.len(), p.display());
            Some(bytes)
        }
        Err(e) => {
            debug!(target: "forge::fs", "no pipeline cache at {}: {e}", p.display());
            None
        }
    });

    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size: seed.as_ref().map_or(0, Vec::len),
        p_initial_data: seed
            .as_ref()
            .map_or(std::ptr::null(), |b| b.as_ptr() as *const std::ffi::c_void),
        ..Default::default()
    };
    match unsafe { device.create_pipeline_cache(&ci, None) } {
        Ok(cache) => Ok(cache),
        Err(e) if seed.is_some() => {
            // stale or foreign blob: start empty
            warn!(target: "forge::render", "pipeline cache rejected ({e}), starting empty");
            let empty = vk::PipelineCacheCreateInfo {
                s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
                ..Default::default()
            };
            unsafe { device.create_pipeline_cache(&empty, None) }.vk("create_pipeline_cache")
        }
        Err(e) => Err(RenderError::from_vk("create_pipeline_cache", e)),
    }
}

/// Writes the cache back to `path`. Failures are logged, never fatal.
///
/// # Safety
/// `cache` must belong to `device`.
pub unsafe fn save_pipeline_cache(device: &ash::Device, cache: vk::PipelineCache, path: &Path) {
    let bytes = match unsafe { device.get_pipeline_cache_data(cache) } {
        Ok(b) => b,
        Err(e) => {
            debug!(target: "forge::render", "pipeline cache not saved: {e}");
            return;
        }
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match std::fs::write(path, &bytes) {
        Ok(()) => debug!(target: "forge::fs", "pipeline cache: {} bytes to {}", bytes.len(), path.display()),
        Err(e) => warn!(target: "forge::fs", "failed to write pipeline cache {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::FsError;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct MemFiles(HashMap<PathBuf, Vec<u8>>);

    impl FileSource for MemFiles {
        fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
            self.0.get(path).cloned().ok_or_else(|| FsError::Open {
                path: path.to_path_buf(),
                source: std::io::ErrorKind::NotFound.into(),
            })
        }
    }

    fn module(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn files(vert: Vec<u8>, frag: Vec<u8>) -> MemFiles {
        let s = RenderSettings::default();
        MemFiles(HashMap::from([
            (s.vertex_shader.clone(), vert),
            (s.fragment_shader.clone(), frag),
        ]))
    }

    #[test]
    fn push_block_matches_shader_layout() {
        assert_eq!(DRAW_PUSH_SIZE, 80);
        assert_eq!(std::mem::size_of::<CameraUniform>(), 64);
    }

    #[test]
    fn loads_valid_modules() {
        let f = files(
            module(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]),
            module(&[SPIRV_MAGIC, 0x0001_0300, 0, 2, 0]),
        );
        let set = load_shaders(&f, &RenderSettings::default()).unwrap();
        assert_eq!(set.vertex.len(), 5);
        assert_eq!(set.fragment[1], 0x0001_0300);
    }

    #[test]
    fn byte_swapped_module_is_accepted() {
        let swapped: Vec<u8> = module(&[SPIRV_MAGIC, 7])
            .chunks(4)
            .flat_map(|c| c.iter().rev().copied())
            .collect();
        let words = parse_spirv(Path::new("s.spv"), &swapped).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 7]);
    }

    #[test]
    fn unaligned_module_is_rejected() {
        let mut bytes = module(&[SPIRV_MAGIC, 1]);
        bytes.push(0);
        let err = parse_spirv(Path::new("odd.spv"), &bytes).unwrap_err();
        assert!(matches!(err, RenderError::InvalidShader { ref path, .. } if path == Path::new("odd.spv")));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let err = parse_spirv(Path::new("x.spv"), &module(&[0xdead_beef, 1])).unwrap_err();
        assert!(err.to_string().contains("bad magic"), "{err}");
    }

    #[test]
    fn missing_shader_is_a_read_error() {
        let f = MemFiles(HashMap::new());
        let err = load_shaders(&f, &RenderSettings::default()).unwrap_err();
        assert!(matches!(err, RenderError::ShaderRead(_)));
        assert!(err.is_fatal());
    }
}
