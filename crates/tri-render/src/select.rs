// SPDX-License-Identifier: CEPL-1.0
//! Physical device and queue family selection policy, kept free of any
//! graphics API types so it can be tested without a driver.

use crate::error::SelectionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

impl DeviceKind {
    /// Higher is preferred.
    pub fn rank(self) -> u32 {
        match self {
            DeviceKind::Discrete => 4,
            DeviceKind::Integrated => 3,
            DeviceKind::Virtual => 2,
            DeviceKind::Cpu => 1,
            DeviceKind::Other => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyCaps {
    pub graphics: bool,
    pub present: bool,
}

/// First family that can both draw and present. `None` means "not found";
/// index 0 is a valid answer.
pub fn find_queue_family(families: &[QueueFamilyCaps]) -> Option<u32> {
    families
        .iter()
        .position(|f| f.graphics && f.present)
        .map(|i| i as u32)
}

#[derive(Clone, Debug)]
pub struct DeviceCandidate<H> {
    pub handle: H,
    pub name: String,
    pub kind: DeviceKind,
    pub has_swapchain: bool,
    pub queue_families: Vec<QueueFamilyCaps>,
}

impl<H> DeviceCandidate<H> {
    pub fn queue_family(&self) -> Result<u32, SelectionError> {
        find_queue_family(&self.queue_families).ok_or(SelectionError::NoQueueFamily)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedDevice<H> {
    pub handle: H,
    pub name: String,
    pub kind: DeviceKind,
    pub queue_family: u32,
}

/// Best-ranked usable candidate; ties keep enumeration order.
pub fn select_device<H: Clone>(
    candidates: &[DeviceCandidate<H>],
) -> Result<SelectedDevice<H>, SelectionError> {
    let mut best: Option<(&DeviceCandidate<H>, u32)> = None;
    for c in candidates.iter().filter(|c| c.has_swapchain) {
        let Ok(family) = c.queue_family() else {
            continue;
        };
        match best {
            Some((b, _)) if b.kind.rank() >= c.kind.rank() => {}
            _ => best = Some((c, family)),
        }
    }
    best.map(|(c, queue_family)| SelectedDevice {
        handle: c.handle.clone(),
        name: c.name.clone(),
        kind: c.kind,
        queue_family,
    })
    .ok_or(SelectionError::NoSuitableDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GFX_ONLY: QueueFamilyCaps = QueueFamilyCaps {
        graphics: true,
        present: false,
    };
    const PRESENT_ONLY: QueueFamilyCaps = QueueFamilyCaps {
        graphics: false,
        present: true,
    };
    const BOTH: QueueFamilyCaps = QueueFamilyCaps {
        graphics: true,
        present: true,
    };

    fn cand(handle: u32, kind: DeviceKind, families: Vec<QueueFamilyCaps>) -> DeviceCandidate<u32> {
        DeviceCandidate {
            handle,
            name: format!("gpu{handle}"),
            kind,
            has_swapchain: true,
            queue_families: families,
        }
    }

    #[test]
    fn family_zero_is_found_not_sentinel() {
        assert_eq!(find_queue_family(&[BOTH, GFX_ONLY]), Some(0));
    }

    #[test]
    fn split_capabilities_do_not_count() {
        assert_eq!(find_queue_family(&[GFX_ONLY, PRESENT_ONLY]), None);
        assert_eq!(find_queue_family(&[GFX_ONLY, PRESENT_ONLY, BOTH]), Some(2));
        assert_eq!(find_queue_family(&[]), None);
    }

    #[test]
    fn prefers_discrete_over_integrated() {
        let c = [
            cand(1, DeviceKind::Integrated, vec![BOTH]),
            cand(2, DeviceKind::Discrete, vec![GFX_ONLY, BOTH]),
        ];
        let sel = select_device(&c).unwrap();
        assert_eq!(sel.handle, 2);
        assert_eq!(sel.queue_family, 1);
        assert_eq!(sel.kind, DeviceKind::Discrete);
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let c = [
            cand(7, DeviceKind::Integrated, vec![BOTH]),
            cand(8, DeviceKind::Integrated, vec![BOTH]),
        ];
        assert_eq!(select_device(&c).unwrap().handle, 7);
    }

    #[test]
    fn skips_devices_without_swapchain_or_queue() {
        let mut no_swapchain = cand(1, DeviceKind::Discrete, vec![BOTH]);
        no_swapchain.has_swapchain = false;
        let no_queue = cand(2, DeviceKind::Discrete, vec![GFX_ONLY]);
        let cpu = cand(3, DeviceKind::Cpu, vec![BOTH]);

        let sel = select_device(&[no_swapchain, no_queue, cpu]).unwrap();
        assert_eq!(sel.handle, 3);
        assert_eq!(sel.name, "gpu3");
    }

    #[test]
    fn nothing_usable_is_an_error() {
        let c = [cand(1, DeviceKind::Discrete, vec![PRESENT_ONLY])];
        assert_eq!(select_device(&c), Err(SelectionError::NoSuitableDevice));
        assert_eq!(c[0].queue_family(), Err(SelectionError::NoQueueFamily));
    }
}
