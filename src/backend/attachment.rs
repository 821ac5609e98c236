// Image attachments - render targets such as the depth buffer
//
// Same ownership rules as Buffer: memory bound once after creation,
// explicit destroy, null state afterwards.

use anyhow::{Context, Result};
use ash::vk;
use super::memory::MemoryAllocator;

#[derive(Debug, Default)]
pub struct Attachment {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Attachment {
    /// Create a 2D device-local image, bind its memory and create a full-range view
    pub fn new(
        device: &ash::Device,
        allocator: &MemoryAllocator,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe {
            device.create_image(&image_info, None)
                .context("Failed to create attachment image")?
        };

        let mem_requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = allocator
            .allocate(device, mem_requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .context("Failed to allocate attachment memory")?;

        unsafe {
            device.bind_image_memory(image, memory, 0)
                .context("Failed to bind attachment memory")?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });

        let view = unsafe {
            device.create_image_view(&view_info, None)
                .context("Failed to create attachment view")?
        };

        log::debug!(
            "Created {:?} attachment {}x{}",
            format,
            extent.width,
            extent.height
        );

        Ok(Self { image, memory, view, format, extent })
    }

    pub fn is_null(&self) -> bool {
        self.image == vk::Image::null()
            && self.memory == vk::DeviceMemory::null()
            && self.view == vk::ImageView::null()
    }

    /// Hand out the handles and leave this attachment null.
    pub fn take(&mut self) -> (vk::Image, vk::DeviceMemory, vk::ImageView) {
        let handles = (self.image, self.memory, self.view);
        *self = Self::default();
        handles
    }

    /// Free memory, then destroy the image and its view.
    pub fn destroy(&mut self, device: &ash::Device) {
        if self.is_null() {
            return;
        }
        let (image, memory, view) = self.take();
        unsafe {
            device.free_memory(memory, None);
            device.destroy_image_view(view, None);
            device.destroy_image(image, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn take_leaves_null_handles() {
        let mut depth = Attachment {
            image: vk::Image::from_raw(1),
            memory: vk::DeviceMemory::from_raw(2),
            view: vk::ImageView::from_raw(3),
            format: vk::Format::D32_SFLOAT,
            extent: vk::Extent2D { width: 500, height: 500 },
        };
        assert!(!depth.is_null());

        let (image, memory, view) = depth.take();

        assert_eq!((image.as_raw(), memory.as_raw(), view.as_raw()), (1, 2, 3));
        assert!(depth.is_null());
        assert_eq!(depth.format, vk::Format::UNDEFINED);
    }
}
