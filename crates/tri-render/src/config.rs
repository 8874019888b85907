// SPDX-License-Identifier: CEPL-1.0
//! Compiled defaults and the settings a backend is built from.

use crate::shader::ShaderSource;
use crate::sync::SyncMode;
use crate::RenderSize;

pub const WINDOW_WIDTH: u32 = 800;
pub const WINDOW_HEIGHT: u32 = 600;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
pub const SWAPCHAIN_IMAGE_COUNT: u32 = 3;

/// One second, in nanoseconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_NS: u64 = 1_000_000_000;

pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PresentMode {
    /// Always available; waits for vblank.
    #[default]
    Fifo,
    /// Used when the surface supports it, FIFO otherwise.
    Mailbox,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub size: RenderSize,
    pub frames_in_flight: usize,
    pub swapchain_images: u32,
    pub sync_mode: SyncMode,
    pub present_mode: PresentMode,
    pub acquire_timeout_ns: u64,
    pub validation: bool,
    pub layers: Vec<String>,
    pub clear_color: [f32; 4],
    pub shaders: ShaderSource,
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings {
            size: RenderSize {
                width: WINDOW_WIDTH,
                height: WINDOW_HEIGHT,
            },
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            swapchain_images: SWAPCHAIN_IMAGE_COUNT,
            sync_mode: SyncMode::default(),
            present_mode: PresentMode::default(),
            acquire_timeout_ns: DEFAULT_ACQUIRE_TIMEOUT_NS,
            validation: cfg!(debug_assertions),
            layers: vec![VALIDATION_LAYER.to_owned()],
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shaders: ShaderSource::Builtin,
        }
    }
}

impl RenderSettings {
    /// Clamps counts that must be at least one.
    pub fn normalized(mut self) -> Self {
        self.frames_in_flight = self.frames_in_flight.max(1);
        self.swapchain_images = self.swapchain_images.max(1);
        self.size.width = self.size.width.max(1);
        self.size.height = self.size.height.max(1);
        self
    }
}
