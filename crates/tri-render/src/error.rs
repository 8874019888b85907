// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use thiserror::Error;

/// Per-frame failures. None of these are retried; the caller is expected to
/// log and shut down.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("timed out waiting for a presentable image")]
    AcquireTimeout,

    #[error("surface is out of date")]
    SurfaceOutOfDate,

    #[error("surface is suboptimal")]
    SurfaceSuboptimal,

    #[error("present failed: {0}")]
    Present(String),

    #[error("queue submit failed: {0}")]
    Submit(String),

    #[error("timed out waiting for a frame fence")]
    FenceTimeout,

    #[error("presentation engine returned image {index}, but only {count} images exist")]
    ImageIndexOutOfRange { index: u32, count: usize },

    #[error("frame synchronizer has no frame slots (already destroyed?)")]
    NoFrameSlots,

    #[error("{op} failed: {detail}")]
    Device { op: &'static str, detail: String },
}

impl FrameError {
    pub fn device(op: &'static str, detail: impl std::fmt::Debug) -> Self {
        FrameError::Device {
            op,
            detail: format!("{detail:?}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("failed to read shader {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader blob is empty")]
    Empty,

    #[error("shader blob length {0} is not a multiple of 4")]
    Misaligned(usize),

    #[error("shader blob of {0} bytes is shorter than a SPIR-V header")]
    Truncated(usize),

    #[error("bad SPIR-V magic 0x{0:08x}")]
    BadMagic(u32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no physical device with swapchain support and a graphics+present queue")]
    NoSuitableDevice,

    #[error("no queue family supports both graphics and present")]
    NoQueueFamily,
}
