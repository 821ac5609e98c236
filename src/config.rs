// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a partial file is fine. A missing or broken
// file means defaults plus a warning.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use crate::backend::device::QueueCapability;
use crate::backend::features::DeviceFeature;

pub const CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub scene: SceneConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Orbit Viewer".to_string(),
            width: 500,
            height: 500,
        }
    }
}

/// Device and swapchain settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub surface_format: String,
    pub swapchain_image_count: u32,
    pub physical_device_index: usize,
    pub clear_color: [f32; 4],
    pub device_features: Vec<DeviceFeature>,
    /// Queues retrieved next to the graphics queue
    pub extra_queues: Vec<QueueCapability>,
    /// Bytes; caps the largest mesh that can be uploaded
    pub staging_buffer_size: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            surface_format: "r8g8b8a8_srgb".to_string(),
            swapchain_image_count: 2,
            physical_device_index: 0,
            clear_color: [0.22, 0.22, 0.22, 1.0],
            device_features: vec![DeviceFeature::Synchronization2, DeviceFeature::DescriptorIndexing],
            extra_queues: Vec::new(),
            staging_buffer_size: 50_000_000,
        }
    }
}

/// What gets drawn and how it is lit
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// `.obj` or `.mesh`
    pub mesh: PathBuf,
    /// Also write the loaded mesh here in the binary format
    pub export_mesh: Option<PathBuf>,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub camera_distance: f32,
    /// Degrees
    pub fov_y: f32,
    pub material_color: [f32; 4],
    pub specular_power: f32,
    pub light_color: [f32; 4],
    pub light_position: [f32; 3],
    pub ambient: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            mesh: PathBuf::from("assets/cube.obj"),
            export_mesh: None,
            vertex_shader: PathBuf::from("shaders/mesh.vert.spv"),
            fragment_shader: PathBuf::from("shaders/mesh.frag.spv"),
            camera_distance: 4.0,
            fov_y: 45.0,
            material_color: [0.8, 0.55, 0.3, 1.0],
            specular_power: 32.0,
            light_color: [1.0, 1.0, 1.0, 1.0],
            light_position: [3.0, 4.0, 5.0],
            ambient: 0.1,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// Log to this file instead of stderr
    pub log_file: Option<PathBuf>,
    pub show_fps: bool,
    pub frame_time_bar: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_file: None,
            show_fps: true,
            frame_time_bar: false,
        }
    }
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        parse_present_mode(&self.graphics.present_mode).unwrap_or_else(|| {
            log::warn!(
                "Unknown present mode '{}', defaulting to FIFO",
                self.graphics.present_mode
            );
            vk::PresentModeKHR::FIFO
        })
    }

    /// Requested swapchain format; the swapchain still falls back if unsupported
    pub fn surface_format(&self) -> vk::Format {
        parse_surface_format(&self.graphics.surface_format).unwrap_or_else(|| {
            log::warn!(
                "Unknown surface format '{}', defaulting to R8G8B8A8_SRGB",
                self.graphics.surface_format
            );
            vk::Format::R8G8B8A8_SRGB
        })
    }

    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

pub fn parse_present_mode(name: &str) -> Option<vk::PresentModeKHR> {
    match name.to_lowercase().as_str() {
        "immediate" => Some(vk::PresentModeKHR::IMMEDIATE),
        "mailbox" => Some(vk::PresentModeKHR::MAILBOX),
        "fifo" => Some(vk::PresentModeKHR::FIFO),
        "fifo_relaxed" => Some(vk::PresentModeKHR::FIFO_RELAXED),
        _ => None,
    }
}

pub fn parse_surface_format(name: &str) -> Option<vk::Format> {
    match name.to_lowercase().as_str() {
        "r8g8b8a8_srgb" => Some(vk::Format::R8G8B8A8_SRGB),
        "b8g8r8a8_srgb" => Some(vk::Format::B8G8R8A8_SRGB),
        "r8g8b8a8_unorm" => Some(vk::Format::R8G8B8A8_UNORM),
        "b8g8r8a8_unorm" => Some(vk::Format::B8G8R8A8_UNORM),
        _ => None,
    }
}
