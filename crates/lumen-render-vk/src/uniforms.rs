// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use lumen_render::RenderSize;
use std::sync::Arc;

use crate::buffer::{GpuBuffer, HostAddress, ResourceUploader};
use crate::device::LogicalDevice;
use crate::error::{Result, VkContext};

/// Application hook that fills a frame slot's uniform buffer.
///
/// Called only after the slot's fence has been waited on, so the GPU is no
/// longer reading `dst`.
pub trait UniformSource {
    fn fill(&mut self, slot: usize, extent: RenderSize, dst: &mut HostAddress) -> Result<()>;
}

/// One persistently mapped uniform buffer and descriptor set per frame slot.
pub struct UniformRing {
    buffers: Vec<GpuBuffer>,
    sets: Vec<vk::DescriptorSet>,
    pool: vk::DescriptorPool,
    device: Arc<LogicalDevice>,
}

impl UniformRing {
    pub fn new(
        device: &Arc<LogicalDevice>,
        uploader: &ResourceUploader,
        set_layout: vk::DescriptorSetLayout,
        frames: usize,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        let buffers = (0..frames)
            .map(|_| uploader.create_persistent_mapped(size, vk::BufferUsageFlags::UNIFORM_BUFFER))
            .collect::<Result<Vec<_>>>()?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: frames as u32,
        }];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: frames as u32,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { device.create_descriptor_pool(&pool_ci, None) }
            .vk_context("vkCreateDescriptorPool")?;
        let mut this = Self {
            buffers,
            sets: Vec::new(),
            pool,
            device: Arc::clone(device),
        };

        let layouts = vec![set_layout; frames];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool,
            descriptor_set_count: frames as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        this.sets = unsafe { device.allocate_descriptor_sets(&alloc) }
            .vk_context("vkAllocateDescriptorSets")?;

        let infos: Vec<vk::DescriptorBufferInfo> = this
            .buffers
            .iter()
            .map(|b| vk::DescriptorBufferInfo {
                buffer: b.raw(),
                offset: 0,
                range: size,
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = this
            .sets
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
        Ok(this)
    }

    pub fn set(&self, slot: usize) -> vk::DescriptorSet {
        self.sets[slot]
    }

    pub fn host(&mut self, slot: usize) -> Option<&mut HostAddress> {
        self.buffers.get_mut(slot)?.host()
    }
}

impl Drop for UniformRing {
    fn drop(&mut self) {
        // Sets go with the pool; buffers drop afterwards on their own.
        unsafe { self.device.destroy_descriptor_pool(self.pool, None) };
    }
}
