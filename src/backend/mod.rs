// Vulkan backend
//
// Thin wrappers over ash. Startup builds a DeviceContext then a Swapchain;
// everything else borrows the logical device from the context.

pub mod attachment;
pub mod buffer;
pub mod commands;
pub mod descriptors;
pub mod device;
pub mod features;
pub mod frame;
pub mod memory;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::DeviceContext;
pub use swapchain::Swapchain;
