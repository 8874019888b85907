// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};
use tri_render::shader::{ShaderPair, ShaderSource};
use tri_render::{FrameSynchronizer, FrameTicket, RenderSettings, Renderer};

mod backend;
mod context;
mod debug;
mod pipeline;
mod swapchain;

pub use context::RenderPath;

use backend::VkFrameBackend;
use context::DeviceContext;
use pipeline::FramePipeline;
use swapchain::Swapchain;

const BUILTIN_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.vert.spv"));
const BUILTIN_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.frag.spv"));

fn load_shaders(source: &ShaderSource) -> Result<ShaderPair> {
    match source {
        ShaderSource::Builtin => {
            ShaderPair::from_bytes(BUILTIN_VERT, BUILTIN_FRAG).context("built-in shaders")
        }
        ShaderSource::Dir(dir) => ShaderPair::from_dir(dir)
            .with_context(|| format!("loading shaders from {}", dir.display())),
    }
}

/// Fields drop top to bottom: sync objects are already gone (see Drop),
/// then pipeline, swapchain, device and finally the instance.
pub struct VkRenderer {
    sync: FrameSynchronizer<vk::Semaphore, vk::Fence>,
    pipeline: FramePipeline,
    swapchain: Swapchain,
    ctx: DeviceContext,
}

impl VkRenderer {
    pub fn device_name(&self) -> &str {
        &self.ctx.name
    }

    pub fn render_path(&self) -> RenderPath {
        self.ctx.path
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.swapchain.extent.width, self.swapchain.extent.height)
    }
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle() before any sync object dies (FrameSynchronizer::destroy)
// - Semaphores/fences BEFORE device
// - Pipeline, framebuffers, render pass, command pool BEFORE swapchain
// - Image views BEFORE swapchain, swapchain BEFORE device
// - Device, then debug messenger, surface, instance last.
// Everything after the first step is field drop order.
impl Drop for VkRenderer {
    fn drop(&mut self) {
        let mut backend = VkFrameBackend {
            device: &self.ctx.device,
            queue: self.ctx.queue,
            swapchain: &self.swapchain,
            commands: self.pipeline.command_buffers(),
        };
        if let Err(e) = self.sync.destroy(&mut backend) {
            warn!("shutdown: {e}");
        }
    }
}

impl Renderer for VkRenderer {
    // STRICT INIT ORDER:
    // 1) Shaders (fail before touching the GPU)
    // 2) Entry -> instance -> surface -> physical device -> device + queue
    // 3) Swapchain + views
    // 4) Pipeline + command buffers (needs swapchain format/extent/images)
    // 5) Frame slots
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let settings = settings.clone().normalized();
        let shaders = load_shaders(&settings.shaders)?;

        unsafe {
            let ctx = DeviceContext::new(window, display, &settings)?;
            let swapchain = Swapchain::new(&ctx, &settings)?;
            let pipeline = FramePipeline::new(&ctx, &swapchain, &shaders, settings.clear_color)?;

            let mut backend = VkFrameBackend {
                device: &ctx.device,
                queue: ctx.queue,
                swapchain: &swapchain,
                commands: pipeline.command_buffers(),
            };
            let sync = FrameSynchronizer::new(
                &mut backend,
                settings.sync_mode,
                settings.frames_in_flight,
                swapchain.image_count(),
                settings.acquire_timeout_ns,
            )
            .context("creating frame sync objects")?;

            info!(
                "vk renderer ready: {} frames in flight, {:?}",
                sync.frames_in_flight(),
                sync.mode()
            );
            Ok(VkRenderer {
                sync,
                pipeline,
                swapchain,
                ctx,
            })
        }
    }

    fn render(&mut self) -> Result<FrameTicket> {
        let mut backend = VkFrameBackend {
            device: &self.ctx.device,
            queue: self.ctx.queue,
            swapchain: &self.swapchain,
            commands: self.pipeline.command_buffers(),
        };
        Ok(self.sync.draw_frame(&mut backend)?)
    }
}
