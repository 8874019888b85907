// SPDX-License-Identifier: CEPL-1.0
//! Windowing shim. Re-exports `winit` so the app depends on one version,
//! and builds the fixed-size window the renderer expects.

pub use winit;

use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowAttributes};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSpec {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

/// Attributes for a non-resizable window of exactly `spec.width x spec.height`
/// physical pixels. The swapchain is never rebuilt, so the window must not
/// change size under it.
pub fn window_attributes(spec: &WindowSpec) -> WindowAttributes {
    Window::default_attributes()
        .with_title(spec.title.clone())
        .with_inner_size(PhysicalSize::new(spec.width.max(1), spec.height.max(1)))
        .with_resizable(false)
}

/// Current framebuffer size, never zero in either dimension.
pub fn framebuffer_size(window: &Window) -> PhysicalSize<u32> {
    let size = window.inner_size();
    PhysicalSize::new(size.width.max(1), size.height.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::Size;

    #[test]
    fn attributes_are_fixed_size() {
        let spec = WindowSpec {
            width: 800,
            height: 600,
            title: "tri".into(),
        };
        let attrs = window_attributes(&spec);
        assert!(!attrs.resizable);
        assert_eq!(attrs.title, "tri");
        assert_eq!(
            attrs.inner_size,
            Some(Size::Physical(PhysicalSize::new(800, 600)))
        );
    }

    #[test]
    fn zero_sizes_are_bumped_to_one() {
        let spec = WindowSpec {
            width: 0,
            height: 0,
            title: String::new(),
        };
        let attrs = window_attributes(&spec);
        assert_eq!(
            attrs.inner_size,
            Some(Size::Physical(PhysicalSize::new(1, 1)))
        );
    }
}
