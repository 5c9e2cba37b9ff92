// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::sync::Arc;

use tracing::warn;

use crate::device::LogicalDevice;
use crate::error::{Result, VkContext, VkError};

/// Validates a frames-in-flight count and narrows it for Vulkan calls.
pub(crate) fn slot_count(count: usize) -> Result<u32> {
    match u32::try_from(count) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(VkError::InvalidFrameCount {
            count,
            max: u32::MAX,
        }),
    }
}

/// Per-frame-in-flight objects.
pub struct FrameSlot {
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait on each slot returns immediately.
    pub in_flight: vk::Fence,
    pub cmd: vk::CommandBuffer,
}

/// F frame slots plus the command pool their buffers come from.
pub struct FrameSlots {
    slots: Vec<FrameSlot>,
    pool: vk::CommandPool,
    device: Arc<LogicalDevice>,
}

impl FrameSlots {
    pub fn new(device: &Arc<LogicalDevice>, graphics_family: u32, count: usize) -> Result<Self> {
        let buffer_count = slot_count(count)?;
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: graphics_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .vk_context("vkCreateCommandPool(frames)")?;
        let mut this = Self {
            slots: Vec::with_capacity(count),
            pool,
            device: Arc::clone(device),
        };

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: buffer_count,
            ..Default::default()
        };
        let cmds = unsafe { device.allocate_command_buffers(&alloc_info) }
            .vk_context("vkAllocateCommandBuffers(frames)")?;

        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for (i, cmd) in cmds.into_iter().enumerate() {
            // Push a half-built slot first so Drop sees every created handle.
            this.slots.push(FrameSlot {
                image_acquired: vk::Semaphore::null(),
                render_finished: vk::Semaphore::null(),
                in_flight: vk::Fence::null(),
                cmd,
            });
            this.slots[i].in_flight = unsafe { device.create_fence(&fence_ci, None) }
                .vk_context("vkCreateFence")?;
            this.slots[i].image_acquired = create_semaphore(device)?;
            this.slots[i].render_finished = create_semaphore(device)?;
        }
        Ok(this)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    /// Swap every semaphore for a fresh one. Only valid once the device is
    /// idle: a consumed binary semaphore may still be pending otherwise.
    pub fn replace_semaphores(&mut self) -> Result<()> {
        for slot in &mut self.slots {
            let acquired = create_semaphore(&self.device)?;
            let finished = match create_semaphore(&self.device) {
                Ok(s) => s,
                Err(e) => {
                    unsafe { self.device.destroy_semaphore(acquired, None) };
                    return Err(e);
                }
            };
            unsafe {
                self.device.destroy_semaphore(slot.image_acquired, None);
                self.device.destroy_semaphore(slot.render_finished, None);
            }
            slot.image_acquired = acquired;
            slot.render_finished = finished;
        }
        Ok(())
    }
}

fn create_semaphore(device: &LogicalDevice) -> Result<vk::Semaphore> {
    let ci = vk::SemaphoreCreateInfo::default();
    unsafe { device.create_semaphore(&ci, None) }.vk_context("vkCreateSemaphore")
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("device wait before frame slot teardown failed: {e}");
            }
            for s in &self.slots {
                self.device.destroy_fence(s.in_flight, None);
                self.device.destroy_semaphore(s.image_acquired, None);
                self.device.destroy_semaphore(s.render_finished, None);
            }
            // Frees the command buffers with it.
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}
