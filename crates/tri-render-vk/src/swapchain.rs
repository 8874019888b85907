// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::prelude::VkResult;
use ash::vk;
use tracing::info;
use tri_render::{FrameError, PresentMode, RenderSettings, RenderSize};

use crate::context::DeviceContext;

/// Swapchain + one colour view per image. Created once; never recreated.
pub struct Swapchain {
    device: ash::Device,
    loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

// Info only
fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        _ => "OTHER",
    }
}
fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// `formats` must be non-empty (the surface query guarantees at least one).
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| {
            formats
                .iter()
                .copied()
                .find(|f| f.format == vk::Format::B8G8R8A8_SRGB)
        })
        .unwrap_or(formats[0])
}

pub(crate) fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    want: PresentMode,
) -> vk::PresentModeKHR {
    match want {
        PresentMode::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        // FIFO is the one mode every surface must support.
        _ => vk::PresentModeKHR::FIFO,
    }
}

pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// `max_image_count == 0` means no upper bound.
pub(crate) fn image_count(caps: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let n = requested.max(caps.min_image_count);
    if caps.max_image_count == 0 {
        n
    } else {
        n.min(caps.max_image_count)
    }
}

/// Suboptimal counts as failure: without recreation there is nothing
/// better to do with it.
pub(crate) fn map_acquire(result: VkResult<(u32, bool)>) -> Result<u32, FrameError> {
    match result {
        Ok((index, false)) => Ok(index),
        Ok((_, true)) => Err(FrameError::SurfaceSuboptimal),
        Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(FrameError::AcquireTimeout),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(FrameError::SurfaceOutOfDate),
        Err(e) => Err(FrameError::device("acquire_next_image", e)),
    }
}

pub(crate) fn map_present(result: VkResult<bool>) -> Result<(), FrameError> {
    match result {
        Ok(false) => Ok(()),
        Ok(true) => Err(FrameError::Present("SUBOPTIMAL_KHR".into())),
        Err(e) => Err(FrameError::Present(format!("{e:?}"))),
    }
}

impl Swapchain {
    pub(crate) unsafe fn new(ctx: &DeviceContext, settings: &RenderSettings) -> Result<Self> {
        let base = &ctx.base;
        let surf = &base.surface_loader;

        let caps = surf
            .get_physical_device_surface_capabilities(ctx.phys, base.surface)
            .context("get_physical_device_surface_capabilities")?;
        let formats = surf
            .get_physical_device_surface_formats(ctx.phys, base.surface)
            .context("get_physical_device_surface_formats")?;
        let modes = surf
            .get_physical_device_surface_present_modes(ctx.phys, base.surface)
            .context("get_physical_device_surface_present_modes")?;
        if formats.is_empty() {
            anyhow::bail!("surface reports no formats");
        }

        let surf_format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&modes, settings.present_mode);
        let extent = extent_from_caps(&caps, settings.size);
        let min_count = image_count(&caps, settings.swapchain_images);

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: base.surface,
            min_image_count: min_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            // single graphics+present family
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        let loader = swapchain::Device::new(&base.instance, &ctx.device);
        let handle = loader
            .create_swapchain(&swap_info, None)
            .context("create_swapchain")?;

        // Owns `handle` from here; Drop cleans up if a view fails.
        let mut sc = Swapchain {
            device: ctx.device.clone(),
            loader,
            handle,
            format: surf_format.format,
            color_space: surf_format.color_space,
            extent,
            images: Vec::new(),
            views: Vec::new(),
        };

        sc.images = sc
            .loader
            .get_swapchain_images(handle)
            .context("get_swapchain_images")?;
        sc.views.reserve(sc.images.len());
        for &img in &sc.images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image: img,
                view_type: vk::ImageViewType::TYPE_2D,
                format: sc.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = sc
                .device
                .create_image_view(&iv_info, None)
                .context("create_image_view")?;
            sc.views.push(view);
        }

        info!(
            "swapchain: {} {:?}, {}, {}x{}, {} images (requested {}, min {})",
            fmt_name(sc.format),
            sc.color_space,
            pm_name(present_mode),
            extent.width,
            extent.height,
            sc.images.len(),
            settings.swapchain_images,
            caps.min_image_count
        );
        Ok(sc)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub(crate) unsafe fn acquire_next(
        &self,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> Result<u32, FrameError> {
        map_acquire(
            self.loader
                .acquire_next_image(self.handle, timeout_ns, signal, vk::Fence::null()),
        )
    }

    pub(crate) unsafe fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<(), FrameError> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        map_present(self.loader.queue_present(queue, &present))
    }
}

// Views first, then the swapchain that owns the images.
impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &iv in &self.views {
                self.device.destroy_image_view(iv, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 512,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_bgra_unorm_srgb_nonlinear() {
        let srgb = vk::ColorSpaceKHR::SRGB_NONLINEAR;
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, srgb),
            fmt(vk::Format::B8G8R8A8_SRGB, srgb),
            fmt(vk::Format::B8G8R8A8_UNORM, srgb),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn format_falls_back_to_bgra_srgb_then_first() {
        let srgb = vk::ColorSpaceKHR::SRGB_NONLINEAR;
        let formats = [
            fmt(vk::Format::R16G16B16A16_SFLOAT, srgb),
            fmt(vk::Format::B8G8R8A8_SRGB, srgb),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );

        let only = [fmt(vk::Format::R8G8B8A8_UNORM, srgb)];
        assert_eq!(choose_surface_format(&only), only[0]);
    }

    #[test]
    fn mailbox_only_when_supported() {
        let fifo_only = [vk::PresentModeKHR::FIFO];
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&fifo_only, PresentMode::Mailbox),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&both, PresentMode::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&both, PresentMode::Fifo),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_current_or_clamps_window_size() {
        let want = RenderSize {
            width: 800,
            height: 600,
        };
        assert_eq!(
            extent_from_caps(&caps(2, 3, (640, 480)), want),
            vk::Extent2D {
                width: 640,
                height: 480
            }
        );
        assert_eq!(
            extent_from_caps(&caps(2, 3, (u32::MAX, u32::MAX)), want),
            vk::Extent2D {
                width: 800,
                height: 512
            }
        );
    }

    #[test]
    fn image_count_respects_surface_bounds() {
        assert_eq!(image_count(&caps(2, 8, (1, 1)), 3), 3);
        assert_eq!(image_count(&caps(4, 8, (1, 1)), 3), 4);
        assert_eq!(image_count(&caps(1, 2, (1, 1)), 3), 2);
        assert_eq!(image_count(&caps(2, 0, (1, 1)), 5), 5);
    }

    #[test]
    fn acquire_results_map_to_frame_errors() {
        assert_eq!(map_acquire(Ok((2, false))).unwrap(), 2);
        assert!(matches!(
            map_acquire(Ok((2, true))),
            Err(FrameError::SurfaceSuboptimal)
        ));
        for slow in [vk::Result::TIMEOUT, vk::Result::NOT_READY] {
            assert!(matches!(
                map_acquire(Err(slow)),
                Err(FrameError::AcquireTimeout)
            ));
        }
        assert!(matches!(
            map_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            Err(FrameError::SurfaceOutOfDate)
        ));
        match map_acquire(Err(vk::Result::ERROR_DEVICE_LOST)) {
            Err(FrameError::Device { op, detail }) => {
                assert_eq!(op, "acquire_next_image");
                assert_eq!(detail, "ERROR_DEVICE_LOST");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn every_present_failure_is_a_present_error() {
        assert!(map_present(Ok(false)).is_ok());
        match map_present(Ok(true)) {
            Err(FrameError::Present(why)) => assert_eq!(why, "SUBOPTIMAL_KHR"),
            other => panic!("unexpected {other:?}"),
        }
        for e in [
            vk::Result::ERROR_OUT_OF_DATE_KHR,
            vk::Result::ERROR_SURFACE_LOST_KHR,
            vk::Result::ERROR_DEVICE_LOST,
        ] {
            match map_present(Err(e)) {
                Err(FrameError::Present(why)) => assert_eq!(why, format!("{e:?}")),
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
