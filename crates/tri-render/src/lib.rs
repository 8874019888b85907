// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod config;
pub mod error;
pub mod select;
pub mod shader;
pub mod sync;

pub use config::{PresentMode, RenderSettings};
pub use error::{FrameError, SelectionError, ShaderError};
pub use sync::{FrameBackend, FrameSynchronizer, FrameTicket, SlotState, SyncMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Drives exactly one acquire → submit → present cycle.
    fn render(&mut self) -> Result<FrameTicket>;
}
