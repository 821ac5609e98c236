// =============================================================================
// RENDERER - owns every GPU object of the viewer
// =============================================================================
//
// Creation order:
//   device -> swapchain -> descriptors -> render pass -> depth attachment
//   -> framebuffers -> pipeline -> frame orchestrator -> buffers -> overlay
//
// Teardown runs the exact reverse. Construction fills a null-initialized
// Renderer so a failure half-way still releases what was already created.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use std::time::Duration;
use winit::window::Window;

use crate::assets::mesh_file::MeshBufferData;
use crate::assets::{self, ObjectBufferData};
use crate::backend::attachment::Attachment;
use crate::backend::buffer::Buffer;
use crate::backend::descriptors::{self, DescriptorPoolKind, DescriptorSetKind, Descriptors};
use crate::backend::device::{DeviceParams, QueueCapability};
use crate::backend::frame::{DrawParams, FrameOrchestrator};
use crate::backend::pipeline::{self, GraphicsPipeline, DEPTH_FORMAT};
use crate::backend::swapchain::SwapchainRequest;
use crate::backend::{DeviceContext, Swapchain};
use crate::camera::OrbitCamera;
use crate::config::Config;
use crate::overlay::{FrameTimeBar, Overlay, OverlayContext};
use crate::registry::{slot_keys, Registry, SlotKey};

slot_keys! {
    pub enum BufferKind {
        Staging,
        ObjectVertex,
        ObjectIndex,
        FrameUniform,
        MaterialUniform,
        LightUniform,
    }
}

impl BufferKind {
    fn usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferKind::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferKind::ObjectVertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferKind::ObjectIndex => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferKind::FrameUniform | BufferKind::MaterialUniform | BufferKind::LightUniform => {
                vk::BufferUsageFlags::UNIFORM_BUFFER
            }
        }
    }

    fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferKind::ObjectVertex | BufferKind::ObjectIndex => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            _ => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        }
    }

    fn size(self, mesh: &ObjectBufferData, staging_size: vk::DeviceSize) -> vk::DeviceSize {
        let bytes = match self {
            BufferKind::Staging => return staging_size,
            BufferKind::ObjectVertex => std::mem::size_of_val(mesh.vertices.as_slice()),
            BufferKind::ObjectIndex => std::mem::size_of_val(mesh.indices.as_slice()),
            BufferKind::FrameUniform => std::mem::size_of::<FrameUniforms>(),
            BufferKind::MaterialUniform => std::mem::size_of::<MaterialUniforms>(),
            BufferKind::LightUniform => std::mem::size_of::<LightUniforms>(),
        };
        bytes as vk::DeviceSize
    }

    /// Descriptor set the buffer backs, if it is a uniform
    fn descriptor_set(self) -> Option<DescriptorSetKind> {
        match self {
            BufferKind::FrameUniform => Some(DescriptorSetKind::Frame),
            BufferKind::MaterialUniform => Some(DescriptorSetKind::Material),
            BufferKind::LightUniform => Some(DescriptorSetKind::Light),
            _ => None,
        }
    }
}

// std140 layouts: every member is a vec4 or mat4

/// Set 0, rewritten every frame
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub proj: Mat4,
    pub model: Mat4,
    pub camera_pos: Vec4,
}

impl FrameUniforms {
    pub fn from_camera(camera: &OrbitCamera, extent: vk::Extent2D) -> Self {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        Self {
            view: camera.view(),
            proj: camera.projection(aspect),
            model: Mat4::IDENTITY,
            camera_pos: camera.eye().extend(1.0),
        }
    }
}

/// Set 1
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialUniforms {
    pub color: Vec4,
    /// x = specular power, y = ambient
    pub params: Vec4,
}

/// Set 2
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightUniforms {
    pub position: Vec4,
    pub color: Vec4,
}

pub struct Renderer {
    overlay: Option<Box<dyn Overlay>>,
    buffers: Registry<BufferKind, Buffer>,
    index_count: u32,
    frame: Option<FrameOrchestrator>,
    pipeline: Option<GraphicsPipeline>,
    framebuffers: Vec<vk::Framebuffer>,
    depth: Attachment,
    render_pass: vk::RenderPass,
    descriptors: Option<Descriptors>,
    clear_color: [f32; 4],
    // Dropped after the explicit teardown, swapchain before device
    swapchain: Swapchain,
    device: Arc<DeviceContext>,
}

impl Renderer {
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        let size = window.inner_size();

        let params = DeviceParams {
            app_name: config.window.title.clone(),
            display_handle: window.raw_display_handle(),
            window_handle: window.raw_window_handle(),
            instance_extensions: Vec::new(),
            instance_layers: Vec::new(),
            device_extensions: vec![ash::extensions::khr::Swapchain::name()],
            device_features: config.graphics.device_features.clone(),
            queue_capabilities: queue_capabilities(&config.graphics.extra_queues),
            physical_device_index: config.graphics.physical_device_index,
            enable_validation: config.validation_enabled(),
        };
        let device = DeviceContext::new(&params)?;

        // Step 7 of the bootstrap
        let swapchain = Swapchain::new(
            device.clone(),
            &SwapchainRequest {
                image_count: config.graphics.swapchain_image_count,
                format: config.surface_format(),
                present_mode: config.present_mode(),
                extent: vk::Extent2D { width: size.width, height: size.height },
            },
        )?;

        let mut renderer = Self {
            overlay: None,
            buffers: Registry::try_build(|_| Ok(Buffer::default()))?,
            index_count: 0,
            frame: None,
            pipeline: None,
            framebuffers: Vec::new(),
            depth: Attachment::default(),
            render_pass: vk::RenderPass::null(),
            descriptors: None,
            clear_color: config.graphics.clear_color,
            swapchain,
            device,
        };
        renderer.build(config)?;

        log::info!("Renderer ready");
        Ok(renderer)
    }

    fn build(&mut self, config: &Config) -> Result<()> {
        let device = &self.device.device;
        let allocator = self.device.allocator;
        let extent = self.swapchain.extent;

        // Descriptor pools, layouts, sets
        descriptors::check_limits(&self.device.properties.limits)?;
        let descriptors = self.descriptors.insert(Descriptors::new(device)?);

        // Render pass, depth attachment, framebuffers
        self.render_pass = pipeline::create_render_pass(device, self.swapchain.format)?;
        self.depth = Attachment::new(
            device,
            &allocator,
            DEPTH_FORMAT,
            extent,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )
        .context("Failed to create depth attachment")?;
        self.framebuffers = pipeline::create_framebuffers(
            device,
            &self.swapchain.image_views,
            self.depth.view,
            self.render_pass,
            extent,
        )?;

        // Pipeline
        self.pipeline = Some(GraphicsPipeline::new(
            device,
            self.render_pass,
            extent,
            &descriptors.layout_list(),
            &config.scene.vertex_shader,
            &config.scene.fragment_shader,
        )?);

        // Command pool + acquire fence
        let graphics = *self.device.queue(QueueCapability::Graphics)?;
        let frame = self
            .frame
            .insert(FrameOrchestrator::new(device, graphics.queue, graphics.family_index)?);

        // Mesh
        let mesh = assets::load_mesh_asset(&config.scene.mesh)
            .with_context(|| format!("Failed to load mesh {:?}", config.scene.mesh))?;
        anyhow::ensure!(
            !mesh.vertices.is_empty() && !mesh.indices.is_empty(),
            "Mesh {:?} has no triangles",
            config.scene.mesh
        );
        if let Some(path) = &config.scene.export_mesh {
            MeshBufferData::from(&mesh)
                .save(path)
                .with_context(|| format!("Failed to export mesh to {:?}", path))?;
        }
        self.index_count = mesh.indices.len() as u32;

        for &kind in BufferKind::ALL {
            self.buffers[kind] = Buffer::new(
                device,
                &allocator,
                kind.size(&mesh, config.graphics.staging_buffer_size),
                kind.usage(),
                kind.memory_properties(),
            )
            .with_context(|| format!("Failed to create {:?} buffer", kind))?;
        }

        // Device-local geometry goes through the staging buffer
        let staging = &self.buffers[BufferKind::Staging];
        self.buffers[BufferKind::ObjectVertex].upload_via_staging(
            device,
            &frame.commands,
            graphics.queue,
            staging,
            bytemuck::cast_slice(&mesh.vertices),
        )?;
        self.buffers[BufferKind::ObjectIndex].upload_via_staging(
            device,
            &frame.commands,
            graphics.queue,
            staging,
            bytemuck::cast_slice(&mesh.indices),
        )?;
        drop(mesh);

        // Static uniforms, written once
        let scene = &config.scene;
        let material = MaterialUniforms {
            color: Vec4::from(scene.material_color),
            params: Vec4::new(scene.specular_power, scene.ambient, 0.0, 0.0),
        };
        let light = LightUniforms {
            position: Vec3::from(scene.light_position).extend(1.0),
            color: Vec4::from(scene.light_color),
        };
        self.buffers[BufferKind::MaterialUniform].upload(device, 0, bytemuck::bytes_of(&material))?;
        self.buffers[BufferKind::LightUniform].upload(device, 0, bytemuck::bytes_of(&light))?;

        for (kind, buffer) in self.buffers.iter() {
            if let Some(set) = kind.descriptor_set() {
                descriptors.write_uniform(device, set, buffer.handle);
            }
        }

        // Overlay gets its own pool and draws inside our render pass
        if config.debug.frame_time_bar {
            let mut overlay: Box<dyn Overlay> = Box::new(FrameTimeBar::new());
            overlay.init(&OverlayContext {
                device,
                render_pass: self.render_pass,
                descriptor_pool: descriptors.pools[DescriptorPoolKind::Overlay],
                extent,
                image_count: self.swapchain.image_count(),
            })?;
            self.overlay = Some(overlay);
        }

        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Update the frame uniforms from the camera and run one frame cycle
    pub fn render(&mut self, camera: &OrbitCamera, frame_time: Duration) -> Result<()> {
        let device = &self.device.device;

        let uniforms = FrameUniforms::from_camera(camera, self.swapchain.extent);
        self.buffers[BufferKind::FrameUniform].upload(device, 0, bytemuck::bytes_of(&uniforms))?;

        if let Some(overlay) = self.overlay.as_mut() {
            overlay.prepare(frame_time);
        }

        let (Some(frame), Some(pipeline), Some(descriptors)) =
            (self.frame.as_mut(), self.pipeline.as_ref(), self.descriptors.as_ref())
        else {
            anyhow::bail!("Renderer used before it was fully built");
        };

        let descriptor_sets = descriptors.set_list();
        let params = DrawParams {
            render_pass: self.render_pass,
            framebuffers: &self.framebuffers,
            pipeline: pipeline.pipeline,
            pipeline_layout: pipeline.layout,
            descriptor_sets: &descriptor_sets,
            vertex_buffer: self.buffers[BufferKind::ObjectVertex].handle,
            index_buffer: self.buffers[BufferKind::ObjectIndex].handle,
            index_count: self.index_count,
            clear_color: self.clear_color,
            overlay: self.overlay.as_deref(),
        };

        frame.draw_frame(device, &self.swapchain, &params)
    }

    /// Reverse of creation. Safe to call on a partially built renderer.
    fn destroy(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle before teardown failed: {:?}", e);
        }
        let device = &self.device.device;

        if let Some(mut overlay) = self.overlay.take() {
            overlay.destroy(device);
        }

        for (kind, buffer) in self.buffers.iter_rev_mut() {
            if !buffer.is_null() {
                log::debug!("Destroying {:?} buffer", kind);
            }
            buffer.destroy(device);
        }

        if let Some(mut frame) = self.frame.take() {
            frame.destroy(device);
        }

        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.destroy(device);
        }

        unsafe {
            for framebuffer in self.framebuffers.drain(..).rev() {
                device.destroy_framebuffer(framebuffer, None);
            }
        }

        self.depth.destroy(device);

        unsafe { device.destroy_render_pass(self.render_pass, None) };
        self.render_pass = vk::RenderPass::null();

        if let Some(mut descriptors) = self.descriptors.take() {
            descriptors.destroy(device);
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Tearing down renderer...");
        self.destroy();
        log::info!("Renderer resources released");
    }
}

/// Graphics first, then any extra capability once
fn queue_capabilities(extra: &[QueueCapability]) -> Vec<QueueCapability> {
    let mut capabilities = vec![QueueCapability::Graphics];
    for &capability in extra {
        if !capabilities.contains(&capability) {
            capabilities.push(capability);
        }
    }
    capabilities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Vertex;
    use approx::assert_relative_eq;

    #[test]
    fn uniform_blocks_are_std140_sized() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 3 * 64 + 16);
        assert_eq!(std::mem::size_of::<MaterialUniforms>(), 32);
        assert_eq!(std::mem::size_of::<LightUniforms>(), 32);
    }

    #[test]
    fn geometry_lives_in_device_local_memory() {
        for &kind in BufferKind::ALL {
            let device_local = kind.memory_properties() == vk::MemoryPropertyFlags::DEVICE_LOCAL;
            let geometry = matches!(kind, BufferKind::ObjectVertex | BufferKind::ObjectIndex);
            assert_eq!(device_local, geometry, "{:?}", kind);
            if geometry {
                assert!(kind.usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
            }
        }
    }

    #[test]
    fn buffer_sizes_follow_the_mesh() {
        let mesh = ObjectBufferData {
            vertices: vec![Vertex { position: [0.0; 3], uv: [0.0; 2], normal: [0.0; 3] }; 8],
            indices: vec![0; 36],
        };
        assert_eq!(BufferKind::ObjectVertex.size(&mesh, 1024), 8 * 32);
        assert_eq!(BufferKind::ObjectIndex.size(&mesh, 1024), 36 * 4);
        assert_eq!(BufferKind::Staging.size(&mesh, 1024), 1024);
    }

    #[test]
    fn every_uniform_buffer_backs_one_set() {
        let sets: Vec<_> = BufferKind::ALL.iter().filter_map(|k| k.descriptor_set()).collect();
        assert_eq!(sets, DescriptorSetKind::ALL.to_vec());
    }

    #[test]
    fn frame_uniforms_track_the_camera() {
        let camera = OrbitCamera::new(4.0, 45.0);
        let uniforms = FrameUniforms::from_camera(&camera, vk::Extent2D { width: 500, height: 500 });
        assert_relative_eq!(uniforms.camera_pos.z, 4.0);
        assert_relative_eq!(uniforms.camera_pos.w, 1.0);
        assert_eq!(uniforms.model, Mat4::IDENTITY);
        assert!(uniforms.proj.y_axis.y < 0.0);
    }

    #[test]
    fn graphics_queue_always_comes_first() {
        assert_eq!(queue_capabilities(&[]), vec![QueueCapability::Graphics]);
        assert_eq!(
            queue_capabilities(&[
                QueueCapability::Transfer,
                QueueCapability::Graphics,
                QueueCapability::Transfer,
            ]),
            vec![QueueCapability::Graphics, QueueCapability::Transfer]
        );
    }
}
