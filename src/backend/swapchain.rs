// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Built once at startup; the window is not resizable so it is never recreated.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use super::DeviceContext;

/// What the application asks for; the surface decides what it gets
#[derive(Debug, Clone, Copy)]
pub struct SwapchainRequest {
    pub image_count: u32,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

/// Preference order when picking how the surface blends with the desktop
const COMPOSITE_ALPHA_PREFERENCE: [vk::CompositeAlphaFlagsKHR; 4] = [
    vk::CompositeAlphaFlagsKHR::OPAQUE,
    vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::INHERIT,
];

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<DeviceContext>,
}

impl Swapchain {
    pub fn new(device: Arc<DeviceContext>, request: &SwapchainRequest) -> Result<Self> {
        log::info!(
            "Creating swapchain: {}x{}, {} images requested",
            request.extent.width,
            request.extent.height,
            request.image_count
        );

        let surface_loader = &device.surface_loader;
        let surface = device.surface;

        // Query surface capabilities
        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(device.physical_device, surface)
        }?;

        // Query supported formats
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }?;

        // Query supported present modes
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(device.physical_device, surface)
        }?;

        let image_count = select_image_count(&surface_caps, request.image_count)?;
        let surface_format = select_surface_format(&formats, request.format)?;
        let extent = select_extent(&surface_caps, request.extent);
        let present_mode = select_present_mode(&present_modes, request.present_mode);
        let composite_alpha = select_composite_alpha(surface_caps.supported_composite_alpha)?;
        let pre_transform = select_pre_transform(&surface_caps);

        log::info!("Swapchain format: {:?}", surface_format.format);
        log::info!("Present mode: {:?}", present_mode);

        let swapchain_loader = ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe {
            swapchain_loader.create_swapchain(&create_info, None)
        }
        .context("Failed to create swapchain")?;

        let destroy_swapchain = |views: &[vk::ImageView]| unsafe {
            for &view in views {
                device.device.destroy_image_view(view, None);
            }
            swapchain_loader.destroy_swapchain(swapchain, None);
        };

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                destroy_swapchain(&[][..]);
                return Err(e).context("Failed to get swapchain images");
            }
        };
        log::info!("Created swapchain with {} images", images.len());

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match create_color_view(&device.device, image, surface_format.format) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    destroy_swapchain(&image_views[..]);
                    return Err(e);
                }
            }
        }

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// Request the next image, signalling `fence` when it is ready.
    pub fn acquire_next_image(&self, fence: vk::Fence) -> Result<u32> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                vk::Semaphore::null(),
                fence,
            )
        }
        .context("Failed to acquire swapchain image")?;

        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(index)
    }

    /// Present with no wait semaphores; the caller has already idled the queue.
    pub fn present(&self, queue: vk::Queue, image_index: u32) -> Result<()> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe {
            self.swapchain_loader.queue_present(queue, &present_info)
        }
        .context("Failed to present swapchain image")?;

        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// The requested count must lie in the surface's [min, max] range (max 0 = unbounded)
pub fn select_image_count(caps: &vk::SurfaceCapabilitiesKHR, requested: u32) -> Result<u32> {
    anyhow::ensure!(requested > 0, "Swapchain image count must be at least 1");

    let within_max = caps.max_image_count == 0 || requested <= caps.max_image_count;
    anyhow::ensure!(
        requested >= caps.min_image_count && within_max,
        "Requested {} swapchain images, surface supports min {} max {}",
        requested,
        caps.min_image_count,
        caps.max_image_count
    );
    Ok(requested)
}

/// The requested format if the surface offers it, else the first one offered
pub fn select_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    requested: vk::Format,
) -> Result<vk::SurfaceFormatKHR> {
    if let Some(found) = formats.iter().find(|f| f.format == requested) {
        return Ok(*found);
    }

    let first = formats.first().context("Surface reports no formats")?;
    log::warn!(
        "Requested swapchain format {:?} not supported, using {:?}",
        requested,
        first.format
    );
    Ok(*first)
}

/// A fixed current extent wins; u32::MAX means the swapchain decides
pub fn select_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                caps.min_image_extent.width,
                caps.max_image_extent.width.max(caps.min_image_extent.width),
            ),
            height: requested.height.clamp(
                caps.min_image_extent.height,
                caps.max_image_extent.height.max(caps.min_image_extent.height),
            ),
        }
    }
}

pub fn select_present_mode(
    supported: &[vk::PresentModeKHR],
    requested: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if supported.contains(&requested) {
        requested
    } else {
        log::warn!("Present mode {:?} not supported, falling back to FIFO", requested);
        vk::PresentModeKHR::FIFO // FIFO is always supported
    }
}

pub fn select_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
) -> Result<vk::CompositeAlphaFlagsKHR> {
    let chosen = COMPOSITE_ALPHA_PREFERENCE
        .iter()
        .copied()
        .find(|&flag| supported.contains(flag))
        .context("Surface supports no known composite alpha mode")?;

    if chosen != vk::CompositeAlphaFlagsKHR::OPAQUE {
        log::warn!("Opaque composite alpha not supported, using {:?}", chosen);
    }
    Ok(chosen)
}

pub fn select_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps.supported_transforms.contains(vk::SurfaceTransformFlagsKHR::IDENTITY) {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        log::warn!(
            "Identity pre-transform not supported, using current transform {:?}",
            caps.current_transform
        );
        caps.current_transform
    }
}

fn create_color_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.context("Failed to create image view")
}
