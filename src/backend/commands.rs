// Command pool + single primary command buffer
//
// The renderer records everything into one buffer. Resetting the pool is
// how the buffer gets recycled, so recording always starts from a reset.

use anyhow::{Context, Result};
use ash::vk;

pub struct CommandContext {
    pub pool: vk::CommandPool,
    pub buffer: vk::CommandBuffer,
}

impl CommandContext {
    pub fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            // TRANSIENT: re-recorded every frame
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe {
            device.create_command_pool(&pool_info, None)
                .context("Failed to create command pool")?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(e).context("Failed to allocate command buffer");
            }
        };

        Ok(Self { pool, buffer })
    }

    /// Invalidate everything recorded from this pool.
    pub fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe {
            device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .context("Failed to reset command pool")
        }
    }

    pub fn begin_one_time(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device.begin_command_buffer(self.buffer, &begin_info)
                .context("Failed to begin command buffer")?;
        }
        Ok(self.buffer)
    }

    pub fn end(&self, device: &ash::Device) -> Result<()> {
        unsafe {
            device.end_command_buffer(self.buffer)
                .context("Failed to end command buffer")
        }
    }

    /// Submit with no semaphores and no fence.
    pub fn submit(&self, device: &ash::Device, queue: vk::Queue) -> Result<()> {
        let command_buffers = [self.buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            device.queue_submit(queue, &[submit_info.build()], vk::Fence::null())
                .context("Failed to submit command buffer")
        }
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        if self.pool == vk::CommandPool::null() {
            return;
        }
        // Destroying the pool frees its buffer.
        unsafe { device.destroy_command_pool(self.pool, None) };
        self.pool = vk::CommandPool::null();
        self.buffer = vk::CommandBuffer::null();
    }
}
