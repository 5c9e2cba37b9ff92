// SPDX-License-Identifier: CEPL-1.0
//! Buffers and the one-shot staging uploader.

use ash::vk;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::debug;

use crate::device::{LogicalDevice, QueueSharing};
use crate::error::{Result, VkContext, VkError};
use crate::memory::find_memory_type;

const STAGING: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Host view of a persistently mapped allocation.
#[derive(Debug)]
pub struct HostAddress {
    ptr: NonNull<u8>,
    len: usize,
}

impl HostAddress {
    /// # Safety
    /// `ptr` must be valid for writes of `len` bytes for the lifetime of the
    /// returned value.
    pub(crate) unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset.checked_add(bytes.len());
        if end.map_or(true, |end| end > self.len) {
            return Err(VkError::MappedWriteOutOfBounds {
                offset,
                len: bytes.len(),
                size: self.len,
            });
        }
        // SAFETY: range checked above; the mapping is valid while we exist.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr().add(offset), bytes.len());
        }
        Ok(())
    }

    pub fn write_pod<T: bytemuck::Pod>(&mut self, value: &T) -> Result<()> {
        self.write(0, bytemuck::bytes_of(value))
    }
}

/// Buffer + dedicated allocation. Unmaps and frees itself on drop.
pub struct GpuBuffer {
    raw: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped: Option<HostAddress>,
    device: Arc<LogicalDevice>,
}

impl GpuBuffer {
    pub fn new(
        device: &Arc<LogicalDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        sharing: &QueueSharing,
    ) -> Result<Self> {
        let families = sharing.families();
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: sharing.mode(),
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe { device.create_buffer(&info, None) }.vk_context("vkCreateBuffer")?;

        // From here on Drop owns cleanup; a null memory handle is fine to free.
        let mut this = Self {
            raw,
            memory: vk::DeviceMemory::null(),
            size,
            mapped: None,
            device: Arc::clone(device),
        };

        let req = unsafe { device.get_buffer_memory_requirements(raw) };
        let type_index =
            find_memory_type(device.memory_properties(), req.memory_type_bits, properties)?;
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: type_index,
            ..Default::default()
        };
        this.memory =
            unsafe { device.allocate_memory(&alloc, None) }.vk_context("vkAllocateMemory")?;
        unsafe { device.bind_buffer_memory(raw, this.memory, 0) }
            .vk_context("vkBindBufferMemory")?;
        Ok(this)
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Present only on persistently mapped buffers.
    pub fn host(&mut self) -> Option<&mut HostAddress> {
        self.mapped.as_mut()
    }

    fn map(&mut self) -> Result<()> {
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
        }
        .vk_context("vkMapMemory")?;
        let ptr = NonNull::new(ptr as *mut u8).ok_or(VkError::Vulkan {
            call: "vkMapMemory",
            result: vk::Result::ERROR_MEMORY_MAP_FAILED,
        })?;
        // SAFETY: the mapping covers `size` bytes and lives until unmap in Drop.
        self.mapped = Some(unsafe { HostAddress::from_raw_parts(ptr, self.size as usize) });
        Ok(())
    }

    fn write_mapped(&mut self, bytes: &[u8]) -> Result<()> {
        self.mapped.as_mut().ok_or(VkError::NotMapped)?.write(0, bytes)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.raw, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Creates buffers and performs blocking staged uploads on a transfer queue.
///
/// Meant for initialisation only: every upload waits for the queue to drain.
pub struct ResourceUploader {
    pool: vk::CommandPool,
    queue: vk::Queue,
    family: u32,
    device: Arc<LogicalDevice>,
}

impl ResourceUploader {
    /// `queue_index` is the requirement index of a transfer-capable queue.
    pub fn new(device: &Arc<LogicalDevice>, queue_index: usize) -> Result<Self> {
        let family = device.family(queue_index)?;
        let queue = device.queue(queue_index)?;
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: family,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&info, None) }
            .vk_context("vkCreateCommandPool(upload)")?;
        Ok(Self {
            pool,
            queue,
            family,
            device: Arc::clone(device),
        })
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    /// Copy `bytes` into a new device-local buffer via a staging buffer.
    /// Blocks until the copy has finished.
    pub fn upload_static(
        &self,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
        sharing: &QueueSharing,
    ) -> Result<GpuBuffer> {
        if bytes.is_empty() {
            return Err(VkError::EmptyUpload);
        }
        let size = bytes.len() as vk::DeviceSize;

        let mut staging = GpuBuffer::new(
            &self.device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            STAGING,
            &QueueSharing::Exclusive,
        )?;
        staging.map()?;
        staging.write_mapped(bytes)?;

        let dst = GpuBuffer::new(
            &self.device,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            sharing,
        )?;

        self.copy(&staging, &dst, size)?;
        debug!("uploaded {size} bytes ({usage:?})");
        Ok(dst)
    }

    /// Host-visible, coherent buffer mapped for its whole lifetime.
    pub fn create_persistent_mapped(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<GpuBuffer> {
        let mut buf = GpuBuffer::new(&self.device, size, usage, STAGING, &QueueSharing::Exclusive)?;
        buf.map()?;
        Ok(buf)
    }

    /// Copy a device-local buffer back to the host. The source needs
    /// `TRANSFER_SRC` usage.
    pub fn read_back(&self, src: &GpuBuffer) -> Result<Vec<u8>> {
        let mut host = self.create_persistent_mapped(src.size(), vk::BufferUsageFlags::TRANSFER_DST)?;
        self.copy(src, &host, src.size())?;
        let mapped = host.host().ok_or(VkError::NotMapped)?;
        let mut out = vec![0u8; mapped.len()];
        // SAFETY: coherent memory, the copy completed before `copy` returned.
        unsafe {
            std::ptr::copy_nonoverlapping(mapped.ptr.as_ptr(), out.as_mut_ptr(), out.len());
        }
        Ok(out)
    }

    fn copy(&self, src: &GpuBuffer, dst: &GpuBuffer, size: vk::DeviceSize) -> Result<()> {
        self.one_shot(|device, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe { device.cmd_copy_buffer(cmd, src.raw(), dst.raw(), std::slice::from_ref(&region)) };
        })
    }

    fn one_shot(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
        let d = self.device.raw();
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = unsafe { d.allocate_command_buffers(&ai) }
            .vk_context("vkAllocateCommandBuffers(upload)")?[0];

        let result = (|| {
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            unsafe { d.begin_command_buffer(cmd, &bi) }.vk_context("vkBeginCommandBuffer")?;
            record(d, cmd);
            unsafe { d.end_command_buffer(cmd) }.vk_context("vkEndCommandBuffer")?;

            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            unsafe { d.queue_submit(self.queue, std::slice::from_ref(&si), vk::Fence::null()) }
                .vk_context("vkQueueSubmit(upload)")?;
            unsafe { d.queue_wait_idle(self.queue) }.vk_context("vkQueueWaitIdle(upload)")
        })();

        unsafe { d.free_command_buffers(self.pool, std::slice::from_ref(&cmd)) };
        result
    }
}

impl Drop for ResourceUploader {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_over(buf: &mut [u8]) -> HostAddress {
        let ptr = NonNull::new(buf.as_mut_ptr()).unwrap();
        unsafe { HostAddress::from_raw_parts(ptr, buf.len()) }
    }

    #[test]
    fn host_writes_land_at_offset() {
        let mut backing = vec![0u8; 8];
        let mut host = host_over(&mut backing);
        host.write(2, &[1, 2, 3]).unwrap();
        host.write_pod(&7u16).unwrap();
        assert_eq!(backing, [7, 0, 1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn host_writes_are_bounds_checked() {
        let mut backing = vec![0u8; 4];
        let mut host = host_over(&mut backing);
        assert!(host.write(0, &[0; 4]).is_ok());
        let err = host.write(2, &[0; 3]).unwrap_err();
        assert!(matches!(
            err,
            VkError::MappedWriteOutOfBounds {
                offset: 2,
                len: 3,
                size: 4
            }
        ));
        assert!(host.write(usize::MAX, &[0]).is_err());
    }
}
