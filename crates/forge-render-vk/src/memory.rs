// SPDX-License-Identifier: CEPL-1.0
//! Buffer allocation and staged uploads.

use ash::vk;
use forge_render::Vertex;

use crate::error::{RenderError, VkResultExt};

/// First memory type allowed by `type_bits` that has every `required` flag.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(RenderError::NoMemoryType {
            type_bits,
            flags: required,
        })
}

#[derive(Clone, Copy, Debug)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    /// # Safety
    /// The GPU must be done with the buffer.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }

    /// Copies `data` into host-visible memory.
    ///
    /// # Safety
    /// The buffer must be HOST_VISIBLE | HOST_COHERENT and at least `data.len()` bytes.
    pub unsafe fn write(&self, device: &ash::Device, data: &[u8]) -> Result<(), RenderError> {
        let size = data.len() as vk::DeviceSize;
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, size, vk::MemoryMapFlags::empty())
                .vk("map_memory")?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }
}

/// # Safety
/// `device` must be a live logical device created from the adapter `mem_props`
/// describes.
pub unsafe fn create_buffer(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    flags: vk::MemoryPropertyFlags,
) -> Result<GpuBuffer, RenderError> {
    let info = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buffer = unsafe { device.create_buffer(&info, None) }.vk("create_buffer")?;
    let req = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory_type_index = match find_memory_type(mem_props, req.memory_type_bits, flags) {
        Ok(i) => i,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
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
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(RenderError::from_vk("allocate_memory", e));
        }
    };
    if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        }
        return Err(RenderError::from_vk("bind_buffer_memory", e));
    }
    Ok(GpuBuffer {
        buffer,
        memory,
        size,
    })
}

/// Where one-shot transfer commands go.
#[derive(Clone, Copy, Debug)]
pub struct TransferQueue {
    pub queue: vk::Queue,
    pub pool: vk::CommandPool,
}

/// Uploads `data` into a new DEVICE_LOCAL buffer through a staging copy and
/// waits for the transfer to finish.
///
/// # Safety
/// `transfer` must belong to `device`.
pub unsafe fn upload_via_staging(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    transfer: TransferQueue,
    usage: vk::BufferUsageFlags,
    data: &[u8],
) -> Result<GpuBuffer, RenderError> {
    let size = data.len() as vk::DeviceSize;

    // 1) staging buffer (HOST_VISIBLE|COHERENT)
    let staging = unsafe {
        create_buffer(
            device,
            mem_props,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }?;
    let result = unsafe { staged_copy(device, mem_props, transfer, usage, &staging, data) };

    // 4) staging is dropped whether or not the copy made it
    unsafe { staging.destroy(device) };
    result
}

unsafe fn staged_copy(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    transfer: TransferQueue,
    usage: vk::BufferUsageFlags,
    staging: &GpuBuffer,
    data: &[u8],
) -> Result<GpuBuffer, RenderError> {
    unsafe {
        staging.write(device, data)?;

        let dst = create_buffer(
            device,
            mem_props,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        // 2) record one-time copy cmd
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: transfer.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = match device.allocate_command_buffers(&ai) {
            Ok(bufs) => bufs[0],
            Err(e) => {
                dst.destroy(device);
                return Err(RenderError::from_vk("allocate_command_buffers", e));
            }
        };

        let copied = (|| -> Result<(), RenderError> {
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device
                .begin_command_buffer(cmd, &bi)
                .vk("begin_command_buffer")?;
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: staging.size,
            };
            device.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
            device.end_command_buffer(cmd).vk("end_command_buffer")?;

            // 3) submit and wait
            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            device
                .queue_submit(transfer.queue, std::slice::from_ref(&si), vk::Fence::null())
                .vk("queue_submit")?;
            device.queue_wait_idle(transfer.queue).vk("queue_wait_idle")
        })();

        device.free_command_buffers(transfer.pool, std::slice::from_ref(&cmd));
        match copied {
            Ok(()) => Ok(dst),
            Err(e) => {
                dst.destroy(device);
                Err(e)
            }
        }
    }
}

/// Device-local geometry of one uploaded mesh.
#[derive(Clone, Copy, Debug)]
pub struct MeshBuffers {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
}

impl MeshBuffers {
    /// # Safety
    /// See [`upload_via_staging`].
    pub unsafe fn upload(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        transfer: TransferQueue,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<Self, RenderError> {
        let vertices = unsafe {
            upload_via_staging(
                device,
                mem_props,
                transfer,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                bytemuck::cast_slice(vertices),
            )
        }?;
        let index_buf = unsafe {
            upload_via_staging(
                device,
                mem_props,
                transfer,
                vk::BufferUsageFlags::INDEX_BUFFER,
                bytemuck::cast_slice(indices),
            )
        };
        match index_buf {
            Ok(index_buf) => Ok(Self {
                vertices,
                indices: index_buf,
                index_count: indices.len() as u32,
            }),
            Err(e) => {
                unsafe { vertices.destroy(device) };
                Err(e)
            }
        }
    }

    /// # Safety
    /// No submission may still reference the mesh.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            self.indices.destroy(device);
            self.vertices.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            p.memory_types[i].property_flags = flags;
        }
        p
    }

    #[test]
    fn picks_first_allowed_type_with_flags() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        assert_eq!(
            find_memory_type(&p, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
        // type 1 masked out
        assert_eq!(
            find_memory_type(&p, 0b101, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            2
        );
    }

    #[test]
    fn no_match_is_an_error() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(matches!(
            find_memory_type(&p, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Err(RenderError::NoMemoryType { type_bits: 1, .. })
        ));
    }
}
