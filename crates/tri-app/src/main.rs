// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tri_core::init_tracing;
use tri_platform::{framebuffer_size, window_attributes, WindowSpec};
use tri_render::{RenderSettings, RenderSize, Renderer, SyncMode};
use tri_render_vk::VkRenderer;

use tri_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (default: ./tri.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override render.sync_mode
    #[arg(long, value_enum)]
    sync: Option<SyncArg>,

    /// Close after this many presented frames
    #[arg(long)]
    frames: Option<u64>,

    /// Disable validation layers and the debug messenger
    #[arg(long)]
    no_validation: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SyncArg {
    SlotFences,
    QueueWaitIdle,
}

impl From<SyncArg> for SyncMode {
    fn from(a: SyncArg) -> Self {
        match a {
            SyncArg::SlotFences => SyncMode::SlotFences,
            SyncArg::QueueWaitIdle => SyncMode::QueueWaitIdle,
        }
    }
}

fn apply_args(mut settings: RenderSettings, args: &Args) -> RenderSettings {
    if let Some(sync) = args.sync {
        settings.sync_mode = sync.into();
    }
    if args.no_validation {
        settings.validation = false;
    }
    settings
}

struct App {
    settings: RenderSettings,
    window_spec: WindowSpec,
    frame_limit: Option<u64>,

    // Renderer before window: it must be gone before the surface's window.
    renderer: Option<VkRenderer>,
    window: Option<Window>,

    fatal: Option<anyhow::Error>,
    exiting: bool,
    presented: u64,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // Drop waits for the device to go idle.
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop.create_window(window_attributes(&self.window_spec))?;

        let size = framebuffer_size(&window);
        let mut settings = self.settings.clone();
        settings.size = RenderSize {
            width: size.width,
            height: size.height,
        };

        let renderer = VkRenderer::new(&window, &window, &settings)?;
        info!(
            "vk: {} via {:?}, {} images at {}x{}",
            renderer.device_name(),
            renderer.render_path(),
            renderer.image_count(),
            renderer.extent().0,
            renderer.extent().1
        );

        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e.context("startup"));
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested after {} frames", self.presented);
                self.shutdown(event_loop);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let Some(renderer) = &mut self.renderer else {
                    return;
                };

                match renderer.render() {
                    Ok(_) => {
                        self.presented += 1;
                        self.frames = self.frames.saturating_add(1);
                    }
                    Err(e) => {
                        self.fail(event_loop, e.context("frame"));
                        return;
                    }
                }

                if self.frame_limit.is_some_and(|n| self.presented >= n) {
                    info!("frame limit reached ({})", self.presented);
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let cfg = config::load_cfg(args.config.as_deref());
    let settings = apply_args(cfg.render_settings(), &args);
    info!(
        "sync {:?}, {} frames in flight, validation {}",
        settings.sync_mode, settings.frames_in_flight, settings.validation
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        settings,
        window_spec: cfg.window_spec(),
        frame_limit: args.frames,
        renderer: None,
        window: None,
        fatal: None,
        exiting: false,
        presented: 0,
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;

    // Non-zero exit when startup or any frame failed.
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
