// Frame orchestration: acquire -> record -> submit -> present
//
// Strictly one frame in flight. The acquire fence is the only sync object;
// submit and present are each followed by a queue-idle wait, so the CPU
// never records frame N+1 while the GPU still works on frame N.

use anyhow::{Context, Result};
use ash::vk;
use super::commands::CommandContext;
use super::swapchain::Swapchain;
use super::sync::{FrameState, FrameSync};
use crate::overlay::Overlay;

/// Everything a frame's command buffer references, borrowed for one frame
pub struct DrawParams<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffers: &'a [vk::Framebuffer],
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_sets: &'a [vk::DescriptorSet],
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub clear_color: [f32; 4],
    pub overlay: Option<&'a dyn Overlay>,
}

pub struct FrameOrchestrator {
    pub sync: FrameSync,
    pub commands: CommandContext,
    queue: vk::Queue,
}

impl FrameOrchestrator {
    pub fn new(device: &ash::Device, queue: vk::Queue, queue_family: u32) -> Result<Self> {
        let sync = FrameSync::new(device)?;
        let commands = match CommandContext::new(device, queue_family) {
            Ok(commands) => commands,
            Err(e) => {
                let mut sync = sync;
                sync.destroy(device);
                return Err(e);
            }
        };
        Ok(Self { sync, commands, queue })
    }

    /// Run one full cycle, returning to Idle
    pub fn draw_frame(
        &mut self,
        device: &ash::Device,
        swapchain: &Swapchain,
        params: &DrawParams,
    ) -> Result<()> {
        self.acquire(device, swapchain)?;
        self.record(device, swapchain.extent, params)?;
        self.submit(device)?;
        self.present(device, swapchain)
    }

    /// Get the next image and block until the fence says it is ours
    pub fn acquire(&mut self, device: &ash::Device, swapchain: &Swapchain) -> Result<u32> {
        self.sync.state.advance(FrameState::Acquiring)?;
        let image_index = swapchain.acquire_next_image(self.sync.image_acquired)?;
        self.sync.wait_acquired(device)?;
        self.sync.image_index = image_index;
        Ok(image_index)
    }

    pub fn record(&mut self, device: &ash::Device, extent: vk::Extent2D, params: &DrawParams) -> Result<()> {
        self.sync.state.advance(FrameState::Recording)?;

        let framebuffer = params
            .framebuffers
            .get(self.sync.image_index as usize)
            .copied()
            .with_context(|| format!("No framebuffer for swapchain image {}", self.sync.image_index))?;

        self.commands.reset(device)?;
        let cmd = self.commands.begin_one_time(device)?;

        let clear_values = clear_values(params.clear_color);
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(params.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, params.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                params.pipeline_layout,
                0,
                params.descriptor_sets,
                &[],
            );

            device.cmd_bind_vertex_buffers(cmd, 0, &[params.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, params.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, params.index_count, 1, 0, 0, 0);
        }

        if let Some(overlay) = params.overlay {
            overlay.record(device, cmd, extent);
        }

        unsafe { device.cmd_end_render_pass(cmd) };
        self.commands.end(device)
    }

    /// No semaphores: the queue-idle wait is the synchronization
    pub fn submit(&mut self, device: &ash::Device) -> Result<()> {
        self.sync.state.advance(FrameState::Submitted)?;
        self.commands.submit(device, self.queue)?;
        unsafe {
            device.queue_wait_idle(self.queue)
                .context("Failed waiting for frame submission")
        }
    }

    pub fn present(&mut self, device: &ash::Device, swapchain: &Swapchain) -> Result<()> {
        self.sync.state.advance(FrameState::Presenting)?;
        swapchain.present(self.queue, self.sync.image_index)?;
        unsafe {
            device.queue_wait_idle(self.queue)
                .context("Failed waiting for present")?;
        }
        self.sync.state.advance(FrameState::Idle)
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        self.commands.destroy(device);
        self.sync.destroy(device);
    }
}

/// Attachment 0 color, attachment 1 depth = 1.0 / stencil = 0
fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_values_match_attachment_order() {
        let values = clear_values([0.22, 0.22, 0.22, 1.0]);
        unsafe {
            assert_eq!(values[0].color.float32, [0.22, 0.22, 0.22, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }
}
