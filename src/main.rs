// =============================================================================
// ORBIT VIEWER - a single shaded mesh on raw Vulkan
// =============================================================================
//
// One window, one mesh, one camera circling it under mouse control.
//
// FRAME FLOW (strictly one frame in flight):
// 1. Update the frame uniforms from the orbit camera
// 2. Acquire swapchain image, wait on the acquire fence
// 3. Record render pass: mesh draw, then overlay
// 4. Submit, wait for queue idle
// 5. Present, wait for queue idle
//
// Any error is fatal: it is logged, the event loop exits, main returns it.
//
// =============================================================================

mod assets;
mod backend;
mod camera;
mod config;
mod overlay;
mod registry;
mod renderer;

use anyhow::{Context, Result};
use camera::OrbitCamera;
use config::{Config, CONFIG_PATH};
use renderer::Renderer;
use std::fs::File;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalPosition,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Config first: it decides where logs go
    let (config, config_error) = match Config::load_from_path(CONFIG_PATH) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(&config)?;
    if let Some(e) = config_error {
        log::warn!("{:#}. Using defaults.", e);
    }

    log::info!("Starting orbit viewer");
    log::info!("Window: {}x{}", config.window.width, config.window.height);
    log::info!("Mesh: {:?}", config.scene.mesh);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `RUST_LOG` wins; otherwise info. Optionally redirect everything to a file.
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if let Some(path) = &config.debug.log_file {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file {:?}", path))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer (and its surface) must go
/// before the window it was created from.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<Window>,

    // Input
    camera: OrbitCamera,
    cursor: Option<PhysicalPosition<f64>>,
    dragging: bool,

    /// First fatal error, returned from main
    fatal: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let camera = OrbitCamera::new(config.scene.camera_distance, config.scene.fov_y);
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            camera,
            cursor: None,
            dragging: false,
            fatal: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal: {:?}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    fn render_frame(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time);
        self.last_frame_time = now;

        renderer.render(&self.camera, frame_time)?;
        self.update_fps(now, frame_time.as_secs_f32());
        Ok(())
    }

    fn update_fps(&mut self, now: Instant, frame_time: f32) {
        if !self.config.debug.show_fps {
            return;
        }

        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    // =========================================================================
    // CAMERA INPUT
    // =========================================================================

    fn cursor_moved(&mut self, position: PhysicalPosition<f64>) {
        if let (true, Some(last), Some(renderer)) = (self.dragging, self.cursor, &self.renderer) {
            let extent = renderer.extent();
            self.camera.drag(
                (position.x - last.x) as f32,
                (position.y - last.y) as f32,
                extent.width as f32,
                extent.height as f32,
            );
        }
        self.cursor = Some(position);
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Fixed size: the swapchain is never recreated
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_resizable(false)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e.context("Failed to initialize Vulkan"));
                return;
            }
        }

        self.last_frame_time = Instant::now();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    self.fail(event_loop, e.context("Frame failed"));
                }
            }

            WindowEvent::MouseInput { state, button: MouseButton::Left, .. } => {
                self.dragging = state == ElementState::Pressed;
            }

            WindowEvent::CursorMoved { position, .. } => {
                self.cursor_moved(position);
            }

            WindowEvent::CursorLeft { .. } => {
                self.cursor = None;
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Continuous redraws
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if event_loop.exiting() {
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    /// GPU objects go first, while the window still exists
    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer = None;
        log::info!("Cleanup complete");
    }
}
