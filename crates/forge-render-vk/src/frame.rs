// SPDX-License-Identifier: CEPL-1.0
//! Frame slots: bounded CPU/GPU overlap.
//!
//! Slot index and swapchain image index are independent. Slots rotate by
//! submission count; images come back from acquire in whatever order the
//! presentation engine likes. `images_in_flight` ties the two together so an
//! image is never recorded while an older slot still renders to it.

use ash::vk;
use std::time::Duration;
use tracing::error;

use crate::backend::{FenceStatus, GpuBackend};
use crate::error::{RenderError, VkResultExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Submitted { image_index: u32 },
    Signaled,
    TimedOut,
}

pub struct FrameSynchronizer {
    slots: Vec<SlotState>,
    /// swapchain image -> slot whose submission last used it
    images_in_flight: Vec<Option<usize>>,
    current: usize,
    timeout: Duration,
}

impl FrameSynchronizer {
    pub fn new(slot_count: usize, timeout: Duration) -> Self {
        Self {
            slots: vec![SlotState::Idle; slot_count.max(1)],
            images_in_flight: Vec::new(),
            current: 0,
            timeout,
        }
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    /// Slots whose fence has not been observed signaled yet.
    pub fn frames_in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, SlotState::Submitted { .. }))
            .count()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits for the current slot to come back from the GPU and returns it.
    pub fn begin<B: GpuBackend>(&mut self, backend: &mut B) -> Result<usize, RenderError> {
        let slot = self.current;
        self.settle(backend, slot)?;
        Ok(slot)
    }

    /// Records that `slot` is about to render into `image_index`, first waiting
    /// out any other slot still using that image.
    pub fn claim_image<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        slot: usize,
        image_index: u32,
    ) -> Result<(), RenderError> {
        let idx = image_index as usize;
        if idx >= self.images_in_flight.len() {
            self.images_in_flight.resize(idx + 1, None);
        }
        if let Some(holder) = self.images_in_flight[idx] {
            if holder != slot {
                self.settle(backend, holder)?;
            }
        }
        self.images_in_flight[idx] = Some(slot);
        Ok(())
    }

    pub fn mark_submitted(&mut self, slot: usize, image_index: u32) {
        self.slots[slot] = SlotState::Submitted { image_index };
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    /// Drains every in-flight slot.
    pub fn wait_all<B: GpuBackend>(&mut self, backend: &mut B) -> Result<(), RenderError> {
        for slot in 0..self.slots.len() {
            self.settle(backend, slot)?;
        }
        Ok(())
    }

    /// New swapchain images share no history with the old ones.
    pub fn on_swapchain_rebuilt(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
    }

    fn settle<B: GpuBackend>(&mut self, backend: &mut B, slot: usize) -> Result<(), RenderError> {
        match self.slots[slot] {
            SlotState::Submitted { .. } => match backend.wait_slot(slot, self.timeout)? {
                FenceStatus::Signaled => {
                    self.slots[slot] = SlotState::Signaled;
                    Ok(())
                }
                FenceStatus::TimedOut => {
                    self.slots[slot] = SlotState::TimedOut;
                    error!(
                        target: "forge::render",
                        "frame slot {slot} fence still unsignaled after {:?}", self.timeout
                    );
                    Err(RenderError::FenceTimeout {
                        slot,
                        timeout: self.timeout,
                    })
                }
            },
            SlotState::TimedOut => Err(RenderError::FenceTimeout {
                slot,
                timeout: self.timeout,
            }),
            SlotState::Idle | SlotState::Signaled => Ok(()),
        }
    }
}

// --- Vulkan sync objects ---

/// Per-slot sync objects. The fence starts signaled so the first wait on a
/// fresh slot returns at once.
#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// # Safety
/// `device` must be a live logical device.
pub unsafe fn create_frame_slots(
    device: &ash::Device,
    count: usize,
) -> Result<Vec<FrameSlot>, RenderError> {
    let sem_info = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    let fence_info = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };

    create_all(
        count,
        || unsafe { create_frame_slot(device, &sem_info, &fence_info) },
        |made| unsafe { destroy_frame_slots(device, made) },
    )
}

unsafe fn create_frame_slot(
    device: &ash::Device,
    sem_info: &vk::SemaphoreCreateInfo,
    fence_info: &vk::FenceCreateInfo,
) -> Result<FrameSlot, RenderError> {
    // destroy ignores null handles
    let mut slot = FrameSlot {
        image_available: vk::Semaphore::null(),
        render_finished: vk::Semaphore::null(),
        in_flight: vk::Fence::null(),
    };
    let built = (|| -> Result<(), RenderError> {
        slot.image_available =
            unsafe { device.create_semaphore(sem_info, None) }.vk("create_semaphore")?;
        slot.render_finished =
            unsafe { device.create_semaphore(sem_info, None) }.vk("create_semaphore")?;
        slot.in_flight = unsafe { device.create_fence(fence_info, None) }.vk("create_fence")?;
        Ok(())
    })();
    match built {
        Ok(()) => Ok(slot),
        Err(e) => {
            unsafe { destroy_frame_slots(device, std::slice::from_ref(&slot)) };
            Err(e)
        }
    }
}

/// Calls `create` `count` times. On the first failure everything made so far
/// goes to `release` before the error is returned.
fn create_all<T, E>(
    count: usize,
    mut create: impl FnMut() -> Result<T, E>,
    mut release: impl FnMut(&[T]),
) -> Result<Vec<T>, E> {
    let mut made = Vec::with_capacity(count);
    for _ in 0..count {
        match create() {
            Ok(item) => made.push(item),
            Err(e) => {
                release(&made);
                return Err(e);
            }
        }
    }
    Ok(made)
}

/// # Safety
/// No submission may still reference the slots.
pub unsafe fn destroy_frame_slots(device: &ash::Device, slots: &[FrameSlot]) {
    unsafe {
        for s in slots {
            device.destroy_fence(s.in_flight, None);
            device.destroy_semaphore(s.render_finished, None);
            device.destroy_semaphore(s.image_available, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn failed_creation_releases_what_was_made() {
        let mut next = 0;
        let mut released = Vec::new();
        let err = create_all(
            4,
            || {
                next += 1;
                if next == 3 {
                    Err("third")
                } else {
                    Ok(next)
                }
            },
            |made: &[i32]| released.extend_from_slice(made),
        )
        .unwrap_err();

        assert_eq!(err, "third");
        assert_eq!(released, vec![1, 2]);
    }

    #[test]
    fn full_creation_releases_nothing() {
        let mut released = 0;
        let made = create_all(3, || Ok::<_, ()>(7), |m: &[i32]| released += m.len()).unwrap();
        assert_eq!(made, vec![7, 7, 7]);
        assert_eq!(released, 0);
    }
}
