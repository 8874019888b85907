// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};
use tri_platform::WindowSpec;
use tri_render::config::{
    DEFAULT_ACQUIRE_TIMEOUT_NS, MAX_FRAMES_IN_FLIGHT, SWAPCHAIN_IMAGE_COUNT, VALIDATION_LAYER,
    WINDOW_HEIGHT, WINDOW_WIDTH,
};
use tri_render::shader::ShaderSource;
use tri_render::{PresentMode, RenderSettings, RenderSize, SyncMode};

pub const DEFAULT_CONFIG_FILE: &str = "tri.toml";

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WindowCfg {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(default = "default_swapchain_images")]
    pub swapchain_images: u32,
    #[serde(default)]
    pub sync_mode: SyncModeCfg,
    #[serde(default)]
    pub present_mode: PresentModeCfg,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Unset means "on in debug builds".
    #[serde(default)]
    pub validation: Option<bool>,
    #[serde(default = "default_layers")]
    pub layers: Vec<String>,
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub shader_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncModeCfg {
    #[default]
    SlotFences,
    QueueWaitIdle,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Fifo,
    Mailbox,
}

impl From<SyncModeCfg> for SyncMode {
    fn from(m: SyncModeCfg) -> Self {
        match m {
            SyncModeCfg::SlotFences => SyncMode::SlotFences,
            SyncModeCfg::QueueWaitIdle => SyncMode::QueueWaitIdle,
        }
    }
}

impl From<PresentModeCfg> for PresentMode {
    fn from(m: PresentModeCfg) -> Self {
        match m {
            PresentModeCfg::Fifo => PresentMode::Fifo,
            PresentModeCfg::Mailbox => PresentMode::Mailbox,
        }
    }
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            frames_in_flight: default_frames_in_flight(),
            swapchain_images: default_swapchain_images(),
            sync_mode: SyncModeCfg::default(),
            present_mode: PresentModeCfg::default(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            validation: None,
            layers: default_layers(),
            clear_color: default_clear(),
            shader_dir: None,
        }
    }
}

fn default_width() -> u32 {
    WINDOW_WIDTH
}
fn default_height() -> u32 {
    WINDOW_HEIGHT
}
fn default_title() -> String {
    "tri".to_owned()
}
fn default_frames_in_flight() -> usize {
    MAX_FRAMES_IN_FLIGHT
}
fn default_swapchain_images() -> u32 {
    SWAPCHAIN_IMAGE_COUNT
}
fn default_acquire_timeout_ms() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_NS / 1_000_000
}
fn default_layers() -> Vec<String> {
    vec![VALIDATION_LAYER.to_owned()]
}
fn default_clear() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

impl AppCfg {
    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            width: self.window.width.max(1),
            height: self.window.height.max(1),
            title: self.window.title.clone(),
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        let r = &self.render;
        let defaults = RenderSettings::default();
        RenderSettings {
            size: RenderSize {
                width: self.window.width,
                height: self.window.height,
            },
            frames_in_flight: r.frames_in_flight,
            swapchain_images: r.swapchain_images,
            sync_mode: r.sync_mode.into(),
            present_mode: r.present_mode.into(),
            acquire_timeout_ns: r.acquire_timeout_ms.saturating_mul(1_000_000),
            validation: r.validation.unwrap_or(defaults.validation),
            layers: r.layers.clone(),
            clear_color: r.clear_color,
            shaders: match &r.shader_dir {
                Some(dir) => ShaderSource::Dir(dir.clone()),
                None => ShaderSource::Builtin,
            },
        }
        .normalized()
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(text)
}

/// An explicit `path` that cannot be read or parsed is reported and ignored;
/// a missing default file is silently ignored.
pub fn load_cfg(path: Option<&Path>) -> AppCfg {
    let (path, explicit) = match path {
        Some(p) => (p, true),
        None => (Path::new(DEFAULT_CONFIG_FILE), false),
    };
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            if explicit {
                warn!("config {}: {e}; using defaults", path.display());
            }
            return AppCfg::default();
        }
    };
    match parse_cfg(&text) {
        Ok(cfg) => {
            info!("config loaded from {}", path.display());
            cfg
        }
        Err(e) => {
            warn!("config {} is invalid: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_compiled_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        let s = cfg.render_settings();
        assert_eq!(s.frames_in_flight, 2);
        assert_eq!(s.swapchain_images, 3);
        assert_eq!(s.sync_mode, SyncMode::SlotFences);
        assert_eq!(s.acquire_timeout_ns, 1_000_000_000);
        assert_eq!(s.size, RenderSize { width: 800, height: 600 });
        assert_eq!(s.shaders, ShaderSource::Builtin);
    }

    #[test]
    fn full_file_is_honoured() {
        let cfg = parse_cfg(
            r#"
            [window]
            width = 1024
            height = 768
            title = "hello"

            [render]
            frames_in_flight = 3
            swapchain_images = 4
            sync_mode = "queue_wait_idle"
            present_mode = "mailbox"
            acquire_timeout_ms = 250
            validation = false
            layers = []
            clear_color = [0.1, 0.2, 0.3, 1.0]
            shader_dir = "shaders"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.window_spec().title, "hello");
        let s = cfg.render_settings();
        assert_eq!(s.size, RenderSize { width: 1024, height: 768 });
        assert_eq!(s.frames_in_flight, 3);
        assert_eq!(s.swapchain_images, 4);
        assert_eq!(s.sync_mode, SyncMode::QueueWaitIdle);
        assert_eq!(s.present_mode, PresentMode::Mailbox);
        assert_eq!(s.acquire_timeout_ns, 250_000_000);
        assert!(!s.validation);
        assert!(s.layers.is_empty());
        assert_eq!(s.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(s.shaders, ShaderSource::Dir(PathBuf::from("shaders")));
    }

    #[test]
    fn zero_counts_are_clamped() {
        let cfg = parse_cfg("[render]\nframes_in_flight = 0\nswapchain_images = 0\n").unwrap();
        let s = cfg.render_settings();
        assert_eq!(s.frames_in_flight, 1);
        assert_eq!(s.swapchain_images, 1);
    }

    #[test]
    fn bad_enum_value_is_an_error() {
        assert!(parse_cfg("[render]\nsync_mode = \"sometimes\"\n").is_err());
    }

    #[test]
    fn unreadable_explicit_path_falls_back() {
        let missing = std::env::temp_dir().join("tri-no-such-config.toml");
        assert_eq!(load_cfg(Some(&missing)), AppCfg::default());
    }

    #[test]
    fn invalid_file_falls_back() {
        let path = std::env::temp_dir().join(format!("tri-bad-{}.toml", std::process::id()));
        fs::write(&path, "[render\nframes_in_flight = ").unwrap();
        assert_eq!(load_cfg(Some(&path)), AppCfg::default());
        fs::remove_file(&path).ok();
    }
}
