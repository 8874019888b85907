// SPDX-License-Identifier: CEPL-1.0
//! Device context: API binding, instance, surface, physical device choice,
//! logical device and the single graphics+present queue.

use std::ffi::{c_char, c_void, CStr, CString};

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, info, warn};
use tri_render::select::{self, DeviceCandidate, DeviceKind, QueueFamilyCaps};
use tri_render::RenderSettings;

use crate::debug::DebugMessenger;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderPath {
    /// Vulkan 1.3 core dynamic rendering.
    Dynamic,
    /// Classic render pass + framebuffers.
    RenderPass,
}

pub(crate) fn at_least_1_3(version: u32) -> bool {
    let (maj, min) = (vk::api_version_major(version), vk::api_version_minor(version));
    maj > 1 || (maj == 1 && min >= 3)
}

/// A failed capability query makes the device look less capable instead of
/// failing startup; another device may still qualify.
fn or_default_logged<T: Default>(result: VkResult<T>, device: &str, op: &str) -> T {
    result.unwrap_or_else(|e| {
        debug!("{device}: {op} failed: {e:?}");
        T::default()
    })
}

fn device_kind(t: vk::PhysicalDeviceType) -> DeviceKind {
    match t {
        vk::PhysicalDeviceType::DISCRETE_GPU => DeviceKind::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceKind::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceKind::Virtual,
        vk::PhysicalDeviceType::CPU => DeviceKind::Cpu,
        _ => DeviceKind::Other,
    }
}

/// Everything that lives at instance scope. Created first, destroyed last.
pub(crate) struct InstanceContext {
    // Owns the loaded library; must outlive `instance`.
    pub entry: Entry,
    pub instance: Instance,
    pub api_version: u32,
    debug: Option<DebugMessenger>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            // null surface is fine: creation may have failed
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(dbg) = self.debug.take() {
                dbg.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn has_name(names: &[[c_char; vk::MAX_EXTENSION_NAME_SIZE]], want: &CStr) -> bool {
    names.iter().any(|n| CStr::from_ptr(n.as_ptr()) == want)
}

/// Requested layers that the loader actually has; missing ones are skipped.
unsafe fn available_layers(entry: &Entry, wanted: &[String]) -> Result<Vec<CString>> {
    let props = entry
        .enumerate_instance_layer_properties()
        .context("enumerate_instance_layer_properties")?;
    let names: Vec<_> = props.iter().map(|p| p.layer_name).collect();

    let mut out = Vec::with_capacity(wanted.len());
    for w in wanted {
        let c = CString::new(w.as_str()).with_context(|| format!("layer name {w:?}"))?;
        if has_name(&names, &c) {
            out.push(c);
        } else {
            warn!("layer {w} not available; skipping");
        }
    }
    Ok(out)
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    settings: &RenderSettings,
) -> Result<(Instance, u32, bool)> {
    let loader_version = entry
        .try_enumerate_instance_version()
        .context("enumerate_instance_version")?
        .unwrap_or(vk::API_VERSION_1_0);
    let api_version = if at_least_1_3(loader_version) {
        vk::API_VERSION_1_3
    } else {
        loader_version
    };

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: c"tri".as_ptr(),
        application_version: 0,
        p_engine_name: c"tri".as_ptr(),
        engine_version: 0,
        api_version,
        ..Default::default()
    };

    let mut ext_vec: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();

    let inst_exts = entry
        .enumerate_instance_extension_properties(None)
        .context("enumerate_instance_extension_properties")?;
    let ext_names: Vec<_> = inst_exts.iter().map(|e| e.extension_name).collect();
    let has_debug_utils = has_name(&ext_names, debug_utils::NAME);

    let validation = settings.validation && has_debug_utils;
    if settings.validation && !has_debug_utils {
        warn!("VK_EXT_debug_utils missing; validation output disabled");
    }
    if validation {
        ext_vec.push(debug_utils::NAME.as_ptr());
    }

    let layers = if settings.validation {
        available_layers(entry, &settings.layers)?
    } else {
        Vec::new()
    };
    let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .context("create_instance")?;
    Ok((instance, api_version, validation))
}

impl InstanceContext {
    // STRICT ORDER:
    // 1) Load the API binding (libvulkan) explicitly; nothing global.
    // 2) Instance with WSI extensions (+ debug utils when validating)
    // 3) Surface from THIS instance; devices are later checked against it.
    pub(crate) unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw();

        let entry = Entry::load().map_err(|e| anyhow!("loading Vulkan library: {e}"))?;
        let (instance, api_version, validation) = create_instance(&entry, dh, settings)?;
        let surface_loader = surface::Instance::new(&entry, &instance);

        // From here on, Drop cleans up whatever got created.
        let mut ctx = InstanceContext {
            entry,
            instance,
            api_version,
            debug: None,
            surface_loader,
            surface: vk::SurfaceKHR::null(),
        };

        if validation {
            match DebugMessenger::new(&ctx.entry, &ctx.instance) {
                Ok(d) => ctx.debug = Some(d),
                Err(e) => warn!("debug messenger unavailable: {e:#}"),
            }
        }

        ctx.surface = ash_window::create_surface(&ctx.entry, &ctx.instance, dh, wh, None)
            .context("ash_window::create_surface")?;
        Ok(ctx)
    }

    unsafe fn candidates(&self) -> Result<Vec<DeviceCandidate<vk::PhysicalDevice>>> {
        let mut out = Vec::new();
        for phys in self
            .instance
            .enumerate_physical_devices()
            .context("enumerate_physical_devices")?
        {
            let props = self.instance.get_physical_device_properties(phys);
            let name = CStr::from_ptr(props.device_name.as_ptr())
                .to_string_lossy()
                .into_owned();

            let exts = or_default_logged(
                self.instance.enumerate_device_extension_properties(phys),
                &name,
                "enumerate_device_extension_properties",
            );
            let ext_names: Vec<_> = exts.iter().map(|e| e.extension_name).collect();
            let has_swapchain = has_name(&ext_names, swapchain::NAME);

            let queue_families = self
                .instance
                .get_physical_device_queue_family_properties(phys)
                .iter()
                .enumerate()
                .map(|(i, q)| QueueFamilyCaps {
                    graphics: q.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                    present: or_default_logged(
                        self.surface_loader.get_physical_device_surface_support(
                            phys,
                            i as u32,
                            self.surface,
                        ),
                        &name,
                        "get_physical_device_surface_support",
                    ),
                })
                .collect();

            let kind = device_kind(props.device_type);
            debug!("candidate {name} ({kind:?}), swapchain={has_swapchain}");
            out.push(DeviceCandidate {
                handle: phys,
                name,
                kind,
                has_swapchain,
                queue_families,
            });
        }
        Ok(out)
    }
}

pub struct DeviceContext {
    pub device: ash::Device,
    pub phys: vk::PhysicalDevice,
    pub queue_family: u32,
    pub queue: vk::Queue,
    pub path: RenderPath,
    pub name: String,
    // Declared last so it is dropped after the device.
    pub(crate) base: InstanceContext,
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}

impl DeviceContext {
    pub(crate) unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let base = InstanceContext::new(window, display, settings)?;

        let candidates = base.candidates()?;
        let chosen = select::select_device(&candidates)?;

        let props = base.instance.get_physical_device_properties(chosen.handle);
        let path = if at_least_1_3(base.api_version) && at_least_1_3(props.api_version) {
            RenderPath::Dynamic
        } else {
            RenderPath::RenderPass
        };

        let priorities = [1.0_f32];
        let qinfo = vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: chosen.queue_family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        };

        // Core 1.3 guarantees both; they still have to be enabled.
        let feats13 = vk::PhysicalDeviceVulkan13Features {
            s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
            dynamic_rendering: vk::TRUE,
            synchronization2: vk::TRUE,
            ..Default::default()
        };
        let p_next: *const c_void = match path {
            RenderPath::Dynamic => (&feats13 as *const vk::PhysicalDeviceVulkan13Features).cast(),
            RenderPath::RenderPass => std::ptr::null(),
        };

        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            p_next,
            queue_create_info_count: 1,
            p_queue_create_infos: &qinfo,
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            ..Default::default()
        };

        let device = base
            .instance
            .create_device(chosen.handle, &dinfo, None)
            .context("create_device")?;
        let queue = device.get_device_queue(chosen.queue_family, 0);

        info!(
            "device: {} ({:?}), queue family {}, path {:?}",
            chosen.name, chosen.kind, chosen.queue_family, path
        );

        Ok(DeviceContext {
            device,
            phys: chosen.handle,
            queue_family: chosen.queue_family,
            queue,
            path,
            name: chosen.name,
            base,
        })
    }
}
