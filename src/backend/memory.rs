// Device memory type selection
//
// Every buffer and image allocation picks its memory type here. The
// property table is captured once when the device is created and is
// read-only afterwards.

use anyhow::Result;
use ash::vk;

/// Snapshot of the physical device memory types, taken once after device creation.
#[derive(Clone, Copy)]
pub struct MemoryAllocator {
    properties: vk::PhysicalDeviceMemoryProperties,
}

impl MemoryAllocator {
    pub fn new(properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        log::debug!(
            "Captured {} memory types across {} heaps",
            properties.memory_type_count,
            properties.memory_heap_count
        );
        Self { properties }
    }

    /// Index of the first memory type allowed by `type_bits` that has all of `required`.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        find_memory_type(&self.properties, type_bits, required)
    }

    /// Allocate `requirements.size` bytes from a matching memory type.
    pub fn allocate(
        &self,
        device: &ash::Device,
        requirements: vk::MemoryRequirements,
        required: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let memory_type_index = self.find_memory_type(requirements.memory_type_bits, required)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.allocate_memory(&alloc_info, None)? };
        log::debug!(
            "Allocated {} bytes from memory type {} ({:?})",
            requirements.size,
            memory_type_index,
            required
        );
        Ok(memory)
    }
}

/// Find a suitable memory type index
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);

    for i in 0..count {
        let has_type = (type_bits & (1 << i)) != 0;
        let has_properties = properties.memory_types[i as usize]
            .property_flags
            .contains(required);

        if has_type && has_properties {
            return Ok(i);
        }
    }

    anyhow::bail!(
        "No memory type matches type bits {:#b} with properties {:?}",
        type_bits,
        required
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = flags.len() as u32;
        for (i, &f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = f;
        }
        props
    }

    fn typical() -> vk::PhysicalDeviceMemoryProperties {
        table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ])
    }

    #[test]
    fn picks_first_matching_type() {
        let props = typical();
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b1111, host).unwrap(), 1);
        assert_eq!(
            find_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn respects_type_bits() {
        let props = typical();
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b0100, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b1000, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            3
        );
    }

    #[test]
    fn fails_when_nothing_qualifies() {
        let props = typical();
        assert!(find_memory_type(&props, 0b0001, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
        assert!(find_memory_type(&props, 0, vk::MemoryPropertyFlags::empty()).is_err());
        assert!(find_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::PROTECTED).is_err());
    }

    #[test]
    fn ignores_bits_beyond_type_count() {
        let props = table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::empty()).is_err());
    }

    #[test]
    fn result_always_satisfies_mask_and_flags() {
        let props = typical();
        let candidates = [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ];

        for bits in 0u32..16 {
            for &flags in &candidates {
                match find_memory_type(&props, bits, flags) {
                    Ok(index) => {
                        assert_ne!(bits & (1 << index), 0);
                        assert!(props.memory_types[index as usize].property_flags.contains(flags));
                        // Nothing earlier was eligible.
                        for earlier in 0..index {
                            let eligible = bits & (1 << earlier) != 0
                                && props.memory_types[earlier as usize]
                                    .property_flags
                                    .contains(flags);
                            assert!(!eligible);
                        }
                    }
                    Err(_) => {
                        let any = (0..4).any(|i| {
                            bits & (1 << i) != 0
                                && props.memory_types[i as usize].property_flags.contains(flags)
                        });
                        assert!(!any);
                    }
                }
            }
        }
    }
}
