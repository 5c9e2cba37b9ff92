// SPDX-License-Identifier: CEPL-1.0
//! The real [`FrameBackend`]: one graphics queue, dynamic rendering, sync2.

use ash::vk;
use lumen_render::RenderSize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::buffer::GpuBuffer;
use crate::device::LogicalDevice;
use crate::error::{Result, VkContext, VkError};
use crate::pipeline::GraphicsPipeline;
use crate::scheduler::{Acquire, FrameBackend, Present};
use crate::swapchain::{color_range, SwapchainConfig, SwapchainManager, SwapchainState};
use crate::sync::FrameSlots;
use crate::uniforms::{UniformRing, UniformSource};

/// Device-local geometry drawn every frame.
pub struct Geometry {
    pub vertices: GpuBuffer,
    pub vertex_count: u32,
    pub indices: Option<(GpuBuffer, u32)>,
}

/// Fields drop top to bottom: per-frame objects go before the chain and the
/// pipeline, and the device outlives all of them through its `Arc`.
pub struct VkFrameBackend {
    slots: FrameSlots,
    uniforms: UniformRing,
    source: Box<dyn UniformSource>,
    geometry: Geometry,
    pipeline: GraphicsPipeline,
    swapchain: SwapchainManager,
    swapchain_config: SwapchainConfig,
    queue: vk::Queue,
    clear: vk::ClearValue,
    device: Arc<LogicalDevice>,
}

pub struct BackendParts {
    pub slots: FrameSlots,
    pub uniforms: UniformRing,
    pub source: Box<dyn UniformSource>,
    pub geometry: Geometry,
    pub pipeline: GraphicsPipeline,
    pub swapchain: SwapchainManager,
    pub swapchain_config: SwapchainConfig,
    pub queue: vk::Queue,
    pub clear_color: [f32; 4],
}

impl VkFrameBackend {
    pub fn new(device: &Arc<LogicalDevice>, parts: BackendParts) -> Self {
        Self {
            slots: parts.slots,
            uniforms: parts.uniforms,
            source: parts.source,
            geometry: parts.geometry,
            pipeline: parts.pipeline,
            swapchain: parts.swapchain,
            swapchain_config: parts.swapchain_config,
            queue: parts.queue,
            clear: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: parts.clear_color,
                },
            },
            device: Arc::clone(device),
        }
    }

    fn chain(&self) -> Result<&SwapchainState> {
        self.swapchain.state().ok_or(VkError::NoSwapchain)
    }

    fn record_commands(&self, cmd: vk::CommandBuffer, slot: usize, image: u32) -> Result<()> {
        let d = self.device.raw();
        let chain = self.chain()?;
        let target = chain.images[image as usize];
        let view = chain.views[image as usize];
        let extent = chain.extent;

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { d.begin_command_buffer(cmd, &begin) }.vk_context("vkBeginCommandBuffer")?;

        // Contents are cleared anyway, so the old layout can be discarded.
        let to_attachment = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags2::NONE,
            dst_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            image: target,
            subresource_range: color_range(),
            ..Default::default()
        };
        image_barrier(d, cmd, &to_attachment);

        let attachment = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: view,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: self.clear,
            ..Default::default()
        };
        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let rendering = vk::RenderingInfo {
            s_type: vk::StructureType::RENDERING_INFO,
            render_area: area,
            layer_count: 1,
            color_attachment_count: 1,
            p_color_attachments: &attachment,
            ..Default::default()
        };

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let set = self.uniforms.set(slot);

        unsafe {
            d.cmd_begin_rendering(cmd, &rendering);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.raw());
            d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
            d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&area));
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout(),
                0,
                std::slice::from_ref(&set),
                &[],
            );
            d.cmd_bind_vertex_buffers(cmd, 0, &[self.geometry.vertices.raw()], &[0]);
            match &self.geometry.indices {
                Some((indices, count)) => {
                    d.cmd_bind_index_buffer(cmd, indices.raw(), 0, vk::IndexType::UINT32);
                    d.cmd_draw_indexed(cmd, *count, 1, 0, 0, 0);
                }
                None => d.cmd_draw(cmd, self.geometry.vertex_count, 1, 0, 0),
            }
            d.cmd_end_rendering(cmd);
        }

        let to_present = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            dst_stage_mask: vk::PipelineStageFlags2::NONE,
            dst_access_mask: vk::AccessFlags2::NONE,
            old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            image: target,
            subresource_range: color_range(),
            ..Default::default()
        };
        image_barrier(d, cmd, &to_present);

        unsafe { d.end_command_buffer(cmd) }.vk_context("vkEndCommandBuffer")
    }
}

fn image_barrier(d: &ash::Device, cmd: vk::CommandBuffer, barrier: &vk::ImageMemoryBarrier2<'_>) {
    let dep = vk::DependencyInfo {
        s_type: vk::StructureType::DEPENDENCY_INFO,
        image_memory_barrier_count: 1,
        p_image_memory_barriers: barrier,
        ..Default::default()
    };
    unsafe { d.cmd_pipeline_barrier2(cmd, &dep) };
}

impl FrameBackend for VkFrameBackend {
    fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    fn wait_for_slot(&mut self, slot: usize, timeout: Duration) -> Result<()> {
        let fence = self.slots.get(slot).in_flight;
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(&[fence], true, nanos) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(VkError::DeviceHang { slot, timeout }),
            Err(result) => Err(VkError::Vulkan {
                call: "vkWaitForFences",
                result,
            }),
        }
    }

    fn acquire(&mut self, slot: usize) -> Result<Acquire> {
        let handle = self.chain()?.handle;
        let semaphore = self.slots.get(slot).image_acquired;
        let acquired = unsafe {
            self.swapchain
                .loader()
                .acquire_next_image(handle, u64::MAX, semaphore, vk::Fence::null())
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(result) => Err(VkError::Vulkan {
                call: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let frame = self.slots.get(slot);
        unsafe { self.device.reset_fences(&[frame.in_flight]) }.vk_context("vkResetFences")?;
        unsafe {
            self.device
                .reset_command_buffer(frame.cmd, vk::CommandBufferResetFlags::empty())
        }
        .vk_context("vkResetCommandBuffer")
    }

    fn record(&mut self, slot: usize, image: u32) -> Result<()> {
        let extent = self.chain()?.extent;
        let size = RenderSize::new(extent.width, extent.height);
        let dst = self.uniforms.host(slot).ok_or(VkError::NotMapped)?;
        self.source.fill(slot, size, dst)?;

        let cmd = self.slots.get(slot).cmd;
        self.record_commands(cmd, slot, image)
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.slots.get(slot);
        let wait = vk::SemaphoreSubmitInfo {
            s_type: vk::StructureType::SEMAPHORE_SUBMIT_INFO,
            semaphore: frame.image_acquired,
            stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ..Default::default()
        };
        let signal = vk::SemaphoreSubmitInfo {
            s_type: vk::StructureType::SEMAPHORE_SUBMIT_INFO,
            semaphore: frame.render_finished,
            stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            ..Default::default()
        };
        let cmd = vk::CommandBufferSubmitInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_SUBMIT_INFO,
            command_buffer: frame.cmd,
            ..Default::default()
        };
        let submit = vk::SubmitInfo2 {
            s_type: vk::StructureType::SUBMIT_INFO_2,
            wait_semaphore_info_count: 1,
            p_wait_semaphore_infos: &wait,
            command_buffer_info_count: 1,
            p_command_buffer_infos: &cmd,
            signal_semaphore_info_count: 1,
            p_signal_semaphore_infos: &signal,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit2(self.queue, std::slice::from_ref(&submit), frame.in_flight)
        }
        .vk_context("vkQueueSubmit2")
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Present> {
        let handle = self.chain()?.handle;
        let wait = self.slots.get(slot).render_finished;
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &handle,
            p_image_indices: &image,
            ..Default::default()
        };
        match unsafe { self.swapchain.loader().queue_present(self.queue, &info) } {
            Ok(false) => Ok(Present::Done),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::Stale),
            Err(result) => Err(VkError::Vulkan {
                call: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn rebuild(&mut self, size: RenderSize) -> Result<()> {
        let extent = self.swapchain.recreate(&self.swapchain_config, size)?.extent;
        self.slots.replace_semaphores()?;
        debug!("frame loop resumed at {}x{}", extent.width, extent.height);
        Ok(())
    }
}

impl Drop for VkFrameBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("device wait before teardown failed: {e}");
        }
    }
}
