// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tri_render::{FrameBackend, FrameError};

use crate::swapchain::Swapchain;

/// Borrowed view over the device, queue, swapchain and prerecorded command
/// buffers; built fresh for each synchronizer call.
pub(crate) struct VkFrameBackend<'a> {
    pub device: &'a ash::Device,
    pub queue: vk::Queue,
    pub swapchain: &'a Swapchain,
    pub commands: &'a [vk::CommandBuffer],
}

impl FrameBackend for VkFrameBackend<'_> {
    type Semaphore = vk::Semaphore;
    type Fence = vk::Fence;

    fn create_semaphore(&mut self) -> Result<vk::Semaphore, FrameError> {
        let info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        unsafe { self.device.create_semaphore(&info, None) }
            .map_err(|e| FrameError::device("create_semaphore", e))
    }

    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence, FrameError> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&info, None) }
            .map_err(|e| FrameError::device("create_fence", e))
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> Result<(), FrameError> {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(FrameError::FenceTimeout),
            Err(e) => Err(FrameError::device("wait_for_fences", e)),
        }
    }

    fn fence_signaled(&mut self, fence: vk::Fence) -> Result<bool, FrameError> {
        unsafe { self.device.get_fence_status(fence) }
            .map_err(|e| FrameError::device("get_fence_status", e))
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), FrameError> {
        unsafe { self.device.reset_fences(&[fence]) }
            .map_err(|e| FrameError::device("reset_fences", e))
    }

    fn acquire_next_image(
        &mut self,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> Result<u32, FrameError> {
        unsafe { self.swapchain.acquire_next(timeout_ns, signal) }
    }

    fn submit(
        &mut self,
        image_index: u32,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: Option<vk::Fence>,
    ) -> Result<(), FrameError> {
        let cmd = self
            .commands
            .get(image_index as usize)
            .copied()
            .ok_or(FrameError::ImageIndexOutOfRange {
                index: image_index,
                count: self.commands.len(),
            })?;

        // The image is only written at colour output; earlier stages may start.
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        unsafe {
            self.device.queue_submit(
                self.queue,
                std::slice::from_ref(&submit),
                fence.unwrap_or(vk::Fence::null()),
            )
        }
        .map_err(|e| FrameError::Submit(format!("{e:?}")))
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<(), FrameError> {
        unsafe { self.swapchain.present(self.queue, image_index, wait) }
    }

    fn queue_wait_idle(&mut self) -> Result<(), FrameError> {
        unsafe { self.device.queue_wait_idle(self.queue) }
            .map_err(|e| FrameError::device("queue_wait_idle", e))
    }

    fn device_wait_idle(&mut self) -> Result<(), FrameError> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| FrameError::device("device_wait_idle", e))
    }
}
