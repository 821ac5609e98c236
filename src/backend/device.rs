// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with the requested extensions/layers
// - Presentation surface for the window
// - Physical device selection (fixed index from config)
// - Queue family selection per requested capability
// - Logical device + queue creation with the feature-toggle chain
// - Memory type table for the allocator

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use serde::Deserialize;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;
use super::features::{DeviceFeature, FeatureChain};
use super::memory::MemoryAllocator;

/// Fixed API version the renderer targets
pub const API_VERSION: u32 = vk::API_VERSION_1_3;

/// A queue capability the application asks the device for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueCapability {
    Graphics,
    Compute,
    Transfer,
}

impl QueueCapability {
    pub fn flags(self) -> vk::QueueFlags {
        match self {
            QueueCapability::Graphics => vk::QueueFlags::GRAPHICS,
            QueueCapability::Compute => vk::QueueFlags::COMPUTE,
            QueueCapability::Transfer => vk::QueueFlags::TRANSFER,
        }
    }
}

/// One retrieved queue and the family it came from
#[derive(Debug, Clone, Copy)]
pub struct QueueSlot {
    pub capability: QueueCapability,
    pub family_index: u32,
    pub queue: vk::Queue,
}

/// Everything device bootstrap needs from the caller
pub struct DeviceParams {
    pub app_name: String,
    pub display_handle: RawDisplayHandle,
    pub window_handle: RawWindowHandle,
    pub instance_extensions: Vec<&'static CStr>,
    pub instance_layers: Vec<CString>,
    pub device_extensions: Vec<&'static CStr>,
    pub device_features: Vec<DeviceFeature>,
    pub queue_capabilities: Vec<QueueCapability>,
    pub physical_device_index: usize,
    pub enable_validation: bool,
}

/// Vulkan device wrapper with automatic cleanup
pub struct DeviceContext {
    // Vulkan handles
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,
    pub instance: ash::Instance,
    _entry: Entry,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub queues: Vec<QueueSlot>,
    pub properties: vk::PhysicalDeviceProperties,
    pub allocator: MemoryAllocator,
}

impl DeviceContext {
    /// Run the bootstrap sequence up to (not including) the swapchain
    pub fn new(params: &DeviceParams) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", params.app_name);

        // Step 1: Load Vulkan library and create instance
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;
        let instance = Self::create_instance(&entry, params)?;

        let debug_utils = if params.enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 2: Create surface (platform-specific window connection)
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                params.display_handle,
                params.window_handle,
                None,
            )
        }
        .context("Failed to create window surface")?;

        // Step 3: Pick physical device
        let physical_device = Self::select_physical_device(&instance, params.physical_device_index)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!("Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy());
        log::info!("API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version));

        // Step 4: Queue families
        let families = unsafe {
            instance.get_physical_device_queue_family_properties(physical_device)
        };
        let family_indices = params
            .queue_capabilities
            .iter()
            .map(|&capability| {
                let index = select_queue_family(&families, capability, |family| unsafe {
                    surface_loader
                        .get_physical_device_surface_support(physical_device, family, surface)
                        .context("Failed to query surface support")
                })?;
                log::info!("{:?} queue family: {}", capability, index);
                Ok(index)
            })
            .collect::<Result<Vec<_>>>()?;

        // Step 5: Logical device
        let device = Self::create_logical_device(&instance, physical_device, &family_indices, params)?;

        // Step 6: Queues
        let queues = params
            .queue_capabilities
            .iter()
            .zip(&family_indices)
            .map(|(&capability, &family_index)| QueueSlot {
                capability,
                family_index,
                queue: unsafe { device.get_device_queue(family_index, 0) },
            })
            .collect();

        // Step 8: Memory type table, captured once
        let memory_properties = unsafe {
            instance.get_physical_device_memory_properties(physical_device)
        };
        let allocator = MemoryAllocator::new(memory_properties);

        Ok(Arc::new(Self {
            device,
            physical_device,
            surface,
            surface_loader,
            instance,
            _entry: entry,
            debug_utils,
            queues,
            properties,
            allocator,
        }))
    }

    fn create_instance(entry: &Entry, params: &DeviceParams) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(params.app_name.as_str())?;
        let engine_name = CString::new("orbit-viewer")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(API_VERSION);

        // Surface extensions for this platform plus whatever the caller asked for
        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(params.display_handle)
                .context("Failed to query required surface extensions")?
                .to_vec();
        for ext in &params.instance_extensions {
            if !extensions.iter().any(|&e| unsafe { CStr::from_ptr(e) } == *ext) {
                extensions.push(ext.as_ptr());
            }
        }
        if params.enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let mut layer_names: Vec<*const c_char> =
            params.instance_layers.iter().map(|l| l.as_ptr()).collect();
        if params.enable_validation {
            layer_names.push(c"VK_LAYER_KHRONOS_validation".as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
        }?;

        Ok((debug_utils, messenger))
    }

    /// No scoring: the index comes straight from config.
    fn select_physical_device(instance: &ash::Instance, index: usize) -> Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        log::info!("Physical devices: {}", devices.len());
        for (i, &device) in devices.iter().enumerate() {
            let props = unsafe { instance.get_physical_device_properties(device) };
            log::info!("  {}: {}", i,
                unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy());
        }

        let device = devices.get(index).copied().with_context(|| {
            format!("Physical device index {} out of range ({} available)", index, devices.len())
        })?;
        log::info!("Using physical device {}", index);
        Ok(device)
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        family_indices: &[u32],
        params: &DeviceParams,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];

        // One queue per distinct family
        let mut unique_families = family_indices.to_vec();
        unique_families.sort_unstable();
        unique_families.dedup();
        let queue_create_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let mut extensions: Vec<*const c_char> =
            params.device_extensions.iter().map(|e| e.as_ptr()).collect();
        for feature in &params.device_features {
            if let Some(ext) = feature.required_extension() {
                if !params.device_extensions.contains(&ext) {
                    extensions.push(ext.as_ptr());
                }
            }
        }

        // Must stay alive until create_device returns
        let mut feature_chain = FeatureChain::new(&params.device_features);

        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .build();
        create_info.p_next = feature_chain.link();

        let device = unsafe {
            instance.create_device(physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        log::info!(
            "Logical device created: {} extension(s), {} feature toggle(s)",
            extensions.len(),
            feature_chain.len()
        );

        Ok(device)
    }

    pub fn queue(&self, capability: QueueCapability) -> Result<&QueueSlot> {
        self.queues
            .iter()
            .find(|slot| slot.capability == capability)
            .with_context(|| format!("No {:?} queue was requested", capability))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Pick a queue family for `capability`.
///
/// Compute and transfer prefer a family without graphics (transfer also
/// without compute). Graphics additionally requires presentation support.
pub fn select_queue_family<F>(
    families: &[vk::QueueFamilyProperties],
    capability: QueueCapability,
    mut supports_present: F,
) -> Result<u32>
where
    F: FnMut(u32) -> Result<bool>,
{
    let wanted = capability.flags();
    let indexed = || families.iter().enumerate().map(|(i, f)| (i as u32, f.queue_flags));

    let dedicated = match capability {
        QueueCapability::Compute => indexed()
            .find(|(_, flags)| flags.contains(wanted) && !flags.contains(vk::QueueFlags::GRAPHICS)),
        QueueCapability::Transfer => indexed().find(|(_, flags)| {
            flags.contains(wanted)
                && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        }),
        QueueCapability::Graphics => None,
    };
    if let Some((index, _)) = dedicated {
        return Ok(index);
    }

    let needs_present = capability == QueueCapability::Graphics;
    for (index, flags) in indexed() {
        if !flags.contains(wanted) {
            continue;
        }
        if !needs_present || supports_present(index)? {
            return Ok(index);
        }
    }

    anyhow::bail!("Could not find a queue family for {:?}", capability)
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn desktop_families() -> Vec<vk::QueueFamilyProperties> {
        vec![
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ]
    }

    #[test]
    fn graphics_requires_present_support() {
        let families = vec![
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let index = select_queue_family(&families, QueueCapability::Graphics, |i| Ok(i == 1)).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn graphics_without_present_fails() {
        let families = desktop_families();
        assert!(select_queue_family(&families, QueueCapability::Graphics, |_| Ok(false)).is_err());
    }

    #[test]
    fn compute_prefers_dedicated_family() {
        let families = desktop_families();
        let index = select_queue_family(&families, QueueCapability::Compute, |_| Ok(true)).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn transfer_prefers_transfer_only_family() {
        let families = desktop_families();
        let index = select_queue_family(&families, QueueCapability::Transfer, |_| Ok(true)).unwrap();
        assert_eq!(index, 2);
    }

    #[test]
    fn falls_back_to_first_matching_family() {
        let families = vec![family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        for capability in [QueueCapability::Compute, QueueCapability::Transfer] {
            // Presentation is never consulted for non-graphics queues.
            let index = select_queue_family(&families, capability, |_| {
                panic!("present support queried for {:?}", capability)
            })
            .unwrap();
            assert_eq!(index, 0);
        }
    }

    #[test]
    fn no_match_is_an_error() {
        let families = vec![family(vk::QueueFlags::TRANSFER)];
        assert!(select_queue_family(&families, QueueCapability::Compute, |_| Ok(true)).is_err());
        assert!(select_queue_family(&[], QueueCapability::Graphics, |_| Ok(true)).is_err());
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = desktop_families();
        let result = select_queue_family(&families, QueueCapability::Graphics, |_| {
            anyhow::bail!("surface lost")
        });
        assert!(result.is_err());
    }
}
