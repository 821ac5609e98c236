// UI overlay collaborator
//
// An overlay receives the render pass and a descriptor pool of its own at
// startup and appends draw commands inside the frame's render pass instance,
// after the mesh draw.

use anyhow::Result;
use ash::vk;
use std::time::Duration;

/// Handed to an overlay once, after the render pass and pools exist
pub struct OverlayContext<'a> {
    pub device: &'a ash::Device,
    pub render_pass: vk::RenderPass,
    pub descriptor_pool: vk::DescriptorPool,
    pub extent: vk::Extent2D,
    pub image_count: usize,
}

pub trait Overlay {
    fn init(&mut self, context: &OverlayContext) -> Result<()>;

    /// CPU-side update before recording begins
    fn prepare(&mut self, frame_time: Duration);

    /// Called inside the render pass, subpass 0
    fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D);

    fn destroy(&mut self, device: &ash::Device);
}

/// Frame time that fills a quarter of the window width
pub const TARGET_FRAME_TIME: Duration = Duration::from_micros(16_600);
const BAR_HEIGHT: u32 = 6;
const BAR_COLOR_OK: [f32; 4] = [0.2, 0.8, 0.3, 1.0];
const BAR_COLOR_SLOW: [f32; 4] = [0.9, 0.25, 0.2, 1.0];

/// Horizontal bar along the top edge, width proportional to frame time
#[derive(Debug, Default)]
pub struct FrameTimeBar {
    frame_time: Duration,
    ready: bool,
}

impl FrameTimeBar {
    pub fn new() -> Self {
        Self::default()
    }

    fn color(&self) -> [f32; 4] {
        if self.frame_time > TARGET_FRAME_TIME {
            BAR_COLOR_SLOW
        } else {
            BAR_COLOR_OK
        }
    }
}

impl Overlay for FrameTimeBar {
    fn init(&mut self, context: &OverlayContext) -> Result<()> {
        // Clears need no pipeline or descriptors of their own
        log::debug!(
            "Frame time bar ready for {}x{} ({} images)",
            context.extent.width,
            context.extent.height,
            context.image_count
        );
        self.ready = true;
        Ok(())
    }

    fn prepare(&mut self, frame_time: Duration) {
        self.frame_time = frame_time;
    }

    fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        if !self.ready {
            return;
        }
        let Some(rect) = bar_rect(self.frame_time, extent) else {
            return;
        };

        let attachment = vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: self.color() },
            },
        };
        let clear_rect = vk::ClearRect {
            rect,
            base_array_layer: 0,
            layer_count: 1,
        };

        unsafe { device.cmd_clear_attachments(cmd, &[attachment], &[clear_rect]) };
    }

    fn destroy(&mut self, _device: &ash::Device) {
        self.ready = false;
    }
}

/// Bar geometry, `None` when it would be empty
pub fn bar_rect(frame_time: Duration, extent: vk::Extent2D) -> Option<vk::Rect2D> {
    let fraction = frame_time.as_secs_f64() / TARGET_FRAME_TIME.as_secs_f64() * 0.25;
    let width = ((extent.width as f64 * fraction) as u32).min(extent.width);
    let height = BAR_HEIGHT.min(extent.height);

    if width == 0 || height == 0 {
        return None;
    }

    Some(vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D { width, height },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: vk::Extent2D = vk::Extent2D { width: 500, height: 500 };

    #[test]
    fn target_frame_time_is_a_quarter() {
        let rect = bar_rect(TARGET_FRAME_TIME, WINDOW).unwrap();
        assert_eq!(rect.extent.width, 125);
        assert_eq!(rect.extent.height, BAR_HEIGHT);
        assert_eq!((rect.offset.x, rect.offset.y), (0, 0));
    }

    #[test]
    fn slow_frames_are_clamped_to_the_window() {
        let rect = bar_rect(Duration::from_millis(500), WINDOW).unwrap();
        assert_eq!(rect.extent.width, WINDOW.width);
    }

    #[test]
    fn empty_bar_is_skipped() {
        assert!(bar_rect(Duration::ZERO, WINDOW).is_none());
        let flat = vk::Extent2D { width: 500, height: 0 };
        assert!(bar_rect(TARGET_FRAME_TIME, flat).is_none());
    }

    #[test]
    fn color_flags_slow_frames() {
        let mut bar = FrameTimeBar::new();
        bar.prepare(Duration::from_millis(10));
        assert_eq!(bar.color(), BAR_COLOR_OK);
        bar.prepare(Duration::from_millis(40));
        assert_eq!(bar.color(), BAR_COLOR_SLOW);
    }
}
