// GPU buffers - vertex, index, uniform and staging
//
// A Buffer is a handle plus its own dedicated memory allocation. Memory is
// bound once, right after creation. Buffers are never freed implicitly:
// the owner calls `destroy`, which leaves the struct in the null state.

use anyhow::{Context, Result};
use ash::vk;
use super::commands::CommandContext;
use super::memory::MemoryAllocator;

#[derive(Debug, Default)]
pub struct Buffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory at offset 0
    pub fn new(
        device: &ash::Device,
        allocator: &MemoryAllocator,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe {
            device.create_buffer(&buffer_info, None)
                .context("Failed to create buffer")?
        };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(handle) };

        let memory = match allocator.allocate(device, mem_requirements, memory_properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(handle, None) };
                return Err(e.context(format!("Failed to allocate memory for {:?} buffer", usage)));
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(handle, memory, 0) } {
            unsafe {
                device.free_memory(memory, None);
                device.destroy_buffer(handle, None);
            }
            return Err(e).context("Failed to bind buffer memory");
        }

        log::debug!("Created buffer: {} bytes, {:?}", size, usage);

        Ok(Self { handle, memory, size })
    }

    pub fn is_null(&self) -> bool {
        self.handle == vk::Buffer::null() && self.memory == vk::DeviceMemory::null()
    }

    /// Write `data` at `offset` through a temporary mapping.
    ///
    /// The buffer must have been created host-visible and host-coherent.
    pub fn upload(&self, device: &ash::Device, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        check_upload_range(offset, data.len() as vk::DeviceSize, self.size)?;

        unsafe {
            // Map the whole allocation so the flush range stays atom-aligned.
            let ptr = device
                .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")?;

            let mapped = std::slice::from_raw_parts_mut(
                (ptr as *mut u8).add(offset as usize),
                data.len(),
            );
            write_mapped(mapped, data);

            let range = vk::MappedMemoryRange::builder()
                .memory(self.memory)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            let flushed = device.flush_mapped_memory_ranges(&[range.build()]);
            device.unmap_memory(self.memory);
            flushed.context("Failed to flush buffer memory")?;
        }

        Ok(())
    }

    /// Fill a device-local buffer by way of a host-visible staging buffer.
    ///
    /// Blocks until the GPU copy finished, then resets the command pool.
    pub fn upload_via_staging(
        &self,
        device: &ash::Device,
        commands: &CommandContext,
        queue: vk::Queue,
        staging: &Buffer,
        data: &[u8],
    ) -> Result<()> {
        let size = data.len() as vk::DeviceSize;
        anyhow::ensure!(
            size <= staging.size && size <= self.size,
            "Staged upload of {} bytes exceeds staging ({}) or destination ({})",
            size,
            staging.size,
            self.size
        );

        staging.upload(device, 0, data)?;

        let cmd = commands.begin_one_time(device)?;
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
        unsafe {
            device.cmd_copy_buffer(cmd, staging.handle, self.handle, &[region]);
        }
        commands.end(device)?;

        commands.submit(device, queue)?;
        unsafe {
            device.queue_wait_idle(queue)
                .context("Failed waiting for staging copy")?;
        }
        commands.reset(device)?;

        log::debug!("Uploaded {} bytes via staging buffer", size);
        Ok(())
    }

    /// Hand out the handles and leave this buffer null.
    pub fn take(&mut self) -> (vk::Buffer, vk::DeviceMemory) {
        let handles = (self.handle, self.memory);
        *self = Self::default();
        handles
    }

    /// Free memory, then destroy the handle.
    pub fn destroy(&mut self, device: &ash::Device) {
        if self.is_null() {
            return;
        }
        let (handle, memory) = self.take();
        unsafe {
            device.free_memory(memory, None);
            device.destroy_buffer(handle, None);
        }
    }
}

/// `size` bytes at `offset` must end inside a buffer of `capacity` bytes
fn check_upload_range(
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    capacity: vk::DeviceSize,
) -> Result<()> {
    anyhow::ensure!(
        offset.checked_add(size).is_some_and(|end| end <= capacity),
        "Upload of {} bytes at offset {} overflows {}-byte buffer",
        size,
        offset,
        capacity
    );
    Ok(())
}

fn write_mapped(mapped: &mut [u8], data: &[u8]) {
    mapped.copy_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn mapped_write_reads_back_at_offset() {
        // Stand-in for a host-visible allocation.
        let mut memory = vec![0u8; 64];
        let payload: Vec<u8> = (1..=16).collect();
        let offset = 24;

        write_mapped(&mut memory[offset..offset + payload.len()], &payload);

        assert_eq!(&memory[offset..offset + payload.len()], payload.as_slice());
        assert!(memory[..offset].iter().all(|&b| b == 0));
        assert!(memory[offset + payload.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn upload_range_must_end_inside_buffer() {
        assert!(check_upload_range(0, 64, 64).is_ok());
        assert!(check_upload_range(48, 16, 64).is_ok());
        assert!(check_upload_range(64, 0, 64).is_ok());

        assert!(check_upload_range(49, 16, 64).is_err());
        assert!(check_upload_range(0, 65, 64).is_err());
        assert!(check_upload_range(65, 0, 64).is_err());
    }

    #[test]
    fn upload_range_end_overflow_is_rejected() {
        let err = check_upload_range(u64::MAX, 16, 64).unwrap_err();
        assert!(err.to_string().contains("overflows 64-byte buffer"));
        assert!(check_upload_range(8, u64::MAX, u64::MAX).is_err());
    }

    #[test]
    fn default_buffer_is_null() {
        assert!(Buffer::default().is_null());
    }

    #[test]
    fn take_leaves_null_handles() {
        let mut buffer = Buffer {
            handle: vk::Buffer::from_raw(7),
            memory: vk::DeviceMemory::from_raw(9),
            size: 128,
        };

        let (handle, memory) = buffer.take();

        assert_eq!(handle.as_raw(), 7);
        assert_eq!(memory.as_raw(), 9);
        assert_eq!(buffer.handle, vk::Buffer::null());
        assert_eq!(buffer.memory, vk::DeviceMemory::null());
        assert_eq!(buffer.size, 0);
        assert!(buffer.is_null());
    }
}
