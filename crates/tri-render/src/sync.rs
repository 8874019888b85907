// SPDX-License-Identifier: CEPL-1.0
//! Frame synchronizer: owns the per-frame-in-flight semaphores and fences and
//! drives one acquire → submit → present cycle per call.
//!
//! The synchronizer never touches a graphics API directly. Everything goes
//! through [`FrameBackend`], so the same state machine runs against the
//! Vulkan backend and against mocks in tests.
//!
//! Per slot:
//!
//! ```text
//! Idle ─acquire─▶ Acquiring ─submit─▶ Submitted ─present─▶ Retiring ─fence/queue idle─▶ Idle
//! ```
//!
//! Invariants:
//! - at most `frames_in_flight` submissions are unretired at any time;
//! - a command buffer for image `i` is never resubmitted while an earlier
//!   submission of image `i` is still running (in-flight map);
//! - each slot's image-acquired semaphore is waited on by exactly one submit
//!   before the slot is used again.

use std::fmt::Debug;

use tracing::{debug, trace, warn};

use crate::error::FrameError;

/// The queue, swapchain and sync-object operations the synchronizer needs.
///
/// `submit` must submit the prerecorded command buffer belonging to
/// `image_index`; which buffer that is stays the backend's business.
pub trait FrameBackend {
    type Semaphore: Copy + Eq + Debug;
    type Fence: Copy + Eq + Debug;

    fn create_semaphore(&mut self) -> Result<Self::Semaphore, FrameError>;
    fn create_fence(&mut self, signaled: bool) -> Result<Self::Fence, FrameError>;
    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore);
    fn destroy_fence(&mut self, fence: Self::Fence);

    /// Blocks until `fence` is signaled or `timeout_ns` elapses.
    fn wait_fence(&mut self, fence: Self::Fence, timeout_ns: u64) -> Result<(), FrameError>;
    /// Non-blocking status query.
    fn fence_signaled(&mut self, fence: Self::Fence) -> Result<bool, FrameError>;
    fn reset_fence(&mut self, fence: Self::Fence) -> Result<(), FrameError>;

    fn acquire_next_image(
        &mut self,
        timeout_ns: u64,
        signal: Self::Semaphore,
    ) -> Result<u32, FrameError>;
    fn submit(
        &mut self,
        image_index: u32,
        wait: Self::Semaphore,
        signal: Self::Semaphore,
        fence: Option<Self::Fence>,
    ) -> Result<(), FrameError>;
    fn present(&mut self, image_index: u32, wait: Self::Semaphore) -> Result<(), FrameError>;

    fn queue_wait_idle(&mut self) -> Result<(), FrameError>;
    fn device_wait_idle(&mut self) -> Result<(), FrameError>;
}

/// How a slot's previous submission is known to have retired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// One fence per slot plus an image → fence map. CPU and GPU overlap by
    /// up to `frames_in_flight` frames.
    #[default]
    SlotFences,
    /// Full queue wait after every present. Correct but serializes CPU and
    /// GPU completely; kept for comparison only.
    QueueWaitIdle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Submitted,
    Retiring,
}

#[derive(Debug)]
pub struct FrameSlot<S, F> {
    image_acquired: S,
    /// Shared by every image this slot renders. The fence wait covers the
    /// submit that signals it, not the present that waits on it.
    render_finished: S,
    in_flight: Option<F>,
    /// False once the fence is reset and until a submit carrying it
    /// succeeds. An unarmed fence is never waited on.
    armed: bool,
    state: SlotState,
}

impl<S: Copy, F: Copy> FrameSlot<S, F> {
    pub fn image_acquired(&self) -> S {
        self.image_acquired
    }

    pub fn render_finished(&self) -> S {
        self.render_finished
    }

    pub fn in_flight(&self) -> Option<F> {
        self.in_flight
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Whether the slot's fence is signaled or will be by queued work.
    pub fn fence_armed(&self) -> bool {
        self.armed
    }
}

/// What one `draw_frame` call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTicket {
    /// Frame slot used for this cycle.
    pub frame: usize,
    pub image_index: u32,
}

#[derive(Debug)]
pub struct FrameSynchronizer<S, F> {
    mode: SyncMode,
    slots: Vec<FrameSlot<S, F>>,
    images_in_flight: Vec<Option<F>>,
    /// Acquire semaphores left signaled by an abandoned frame.
    stale: Vec<S>,
    current: usize,
    acquire_timeout_ns: u64,
    frames_drawn: u64,
}

impl<S, F> FrameSynchronizer<S, F>
where
    S: Copy + Eq + Debug,
    F: Copy + Eq + Debug,
{
    /// Creates `frames_in_flight` slots (at least one). On failure every
    /// object created so far is destroyed again before returning.
    pub fn new<B>(
        backend: &mut B,
        mode: SyncMode,
        frames_in_flight: usize,
        image_count: usize,
        acquire_timeout_ns: u64,
    ) -> Result<Self, FrameError>
    where
        B: FrameBackend<Semaphore = S, Fence = F>,
    {
        let frames_in_flight = frames_in_flight.max(1);
        let mut sync = FrameSynchronizer {
            mode,
            slots: Vec::with_capacity(frames_in_flight),
            images_in_flight: vec![None; image_count],
            stale: Vec::new(),
            current: 0,
            acquire_timeout_ns,
            frames_drawn: 0,
        };

        for _ in 0..frames_in_flight {
            match Self::create_slot(backend, mode) {
                Ok(slot) => sync.slots.push(slot),
                Err(e) => {
                    sync.release_slots(backend);
                    return Err(e);
                }
            }
        }

        debug!(
            "frame sync: {} slots, {} images, mode {:?}",
            frames_in_flight, image_count, mode
        );
        Ok(sync)
    }

    fn create_slot<B>(backend: &mut B, mode: SyncMode) -> Result<FrameSlot<S, F>, FrameError>
    where
        B: FrameBackend<Semaphore = S, Fence = F>,
    {
        let image_acquired = backend.create_semaphore()?;
        let render_finished = match backend.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                backend.destroy_semaphore(image_acquired);
                return Err(e);
            }
        };
        // Signaled, so the first wait on a fresh slot returns immediately.
        let in_flight = match mode {
            SyncMode::SlotFences => match backend.create_fence(true) {
                Ok(f) => Some(f),
                Err(e) => {
                    backend.destroy_semaphore(render_finished);
                    backend.destroy_semaphore(image_acquired);
                    return Err(e);
                }
            },
            SyncMode::QueueWaitIdle => None,
        };
        Ok(FrameSlot {
            image_acquired,
            render_finished,
            in_flight,
            armed: true,
            state: SlotState::Idle,
        })
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_frame(&self) -> usize {
        self.current
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn slot(&self, frame: usize) -> Option<&FrameSlot<S, F>> {
        self.slots.get(frame)
    }

    pub fn slot_state(&self, frame: usize) -> Option<SlotState> {
        self.slots.get(frame).map(|s| s.state)
    }

    /// Slots whose submission has not been observed to retire.
    pub fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Submitted | SlotState::Retiring))
            .count()
    }

    /// One full acquire → submit → present cycle on the current slot.
    pub fn draw_frame<B>(&mut self, backend: &mut B) -> Result<FrameTicket, FrameError>
    where
        B: FrameBackend<Semaphore = S, Fence = F>,
    {
        if self.slots.is_empty() {
            return Err(FrameError::NoFrameSlots);
        }
        let frame = self.current;

        // Retiring -> Idle: the slot's previous submission must be done
        // before its semaphores and fence are handed out again.
        self.retire_blocking(backend, frame)?;

        let image_acquired = self.slots[frame].image_acquired;
        let render_finished = self.slots[frame].render_finished;
        let fence = self.slots[frame].in_flight;

        // Idle -> Acquiring
        self.slots[frame].state = SlotState::Acquiring;
        let image_index = match backend.acquire_next_image(self.acquire_timeout_ns, image_acquired)
        {
            Ok(i) => i,
            Err(e) => {
                // Fence untouched, still signaled: nothing to wait for later.
                self.slots[frame].state = SlotState::Idle;
                return Err(e);
            }
        };
        let img = image_index as usize;
        if img >= self.images_in_flight.len() {
            self.abandon_frame(backend, frame);
            return Err(FrameError::ImageIndexOutOfRange {
                index: image_index,
                count: self.images_in_flight.len(),
            });
        }

        let prev_owner = self.images_in_flight[img];
        if let Some(fence) = fence {
            // An older slot may still be rendering into this image.
            if let Some(prev) = prev_owner {
                backend.wait_fence(prev, u64::MAX)?;
                self.mark_retired(prev);
            }
            // Reset only after both waits: the image's fence may be our own.
            backend.reset_fence(fence)?;
            self.slots[frame].armed = false;
            self.images_in_flight[img] = Some(fence);
        }

        // Acquiring -> Submitted
        if let Err(e) = backend.submit(image_index, image_acquired, render_finished, fence) {
            if let Some(fence) = fence {
                // Nothing will signal the reset fence; no image may point at it.
                self.images_in_flight[img] = prev_owner;
                self.images_in_flight
                    .iter_mut()
                    .filter(|f| **f == Some(fence))
                    .for_each(|f| *f = None);
            }
            self.abandon_frame(backend, frame);
            return Err(e);
        }
        self.slots[frame].armed = true;
        self.slots[frame].state = SlotState::Submitted;

        // Submitted -> Retiring
        backend.present(image_index, render_finished)?;
        self.slots[frame].state = SlotState::Retiring;

        match self.mode {
            SyncMode::SlotFences => self.poll_retired(backend)?,
            SyncMode::QueueWaitIdle => {
                backend.queue_wait_idle()?;
                self.slots
                    .iter_mut()
                    .for_each(|s| s.state = SlotState::Idle);
            }
        }

        self.current = (frame + 1) % self.slots.len();
        self.frames_drawn += 1;
        trace!(frame, image_index, "frame presented");
        Ok(FrameTicket { frame, image_index })
    }

    fn retire_blocking<B>(&mut self, backend: &mut B, frame: usize) -> Result<(), FrameError>
    where
        B: FrameBackend<Semaphore = S, Fence = F>,
    {
        let slot = &mut self.slots[frame];
        if let (Some(fence), true) = (slot.in_flight, slot.armed) {
            // Wait even when Idle-by-poll: cheap, and keeps the rule simple.
            backend.wait_fence(fence, u64::MAX)?;
        }
        slot.state = SlotState::Idle;
        Ok(())
    }

    /// Returns a slot whose acquire succeeded but whose submit never went
    /// out to Idle. Its image-acquired semaphore stays signaled with no
    /// waiter, so it is swapped for a fresh one and kept until `destroy`.
    fn abandon_frame<B>(&mut self, backend: &mut B, frame: usize)
    where
        B: FrameBackend<Semaphore = S, Fence = F>,
    {
        let slot = &mut self.slots[frame];
        slot.state = SlotState::Idle;
        match backend.create_semaphore() {
            Ok(fresh) => {
                let old = std::mem::replace(&mut slot.image_acquired, fresh);
                self.stale.push(old);
            }
            Err(e) => warn!(frame, "keeping signaled acquire semaphore: {e}"),
        }
    }

    fn poll_retired<B>(&mut self, backend: &mut B) -> Result<(), FrameError>
    where
        B: FrameBackend<Semaphore = S, Fence = F>,
    {
        for slot in self
            .slots
            .iter_mut()
            .filter(|s| s.state == SlotState::Retiring)
        {
            if let Some(fence) = slot.in_flight {
                if backend.fence_signaled(fence)? {
                    slot.state = SlotState::Idle;
                }
            }
        }
        Ok(())
    }

    fn mark_retired(&mut self, fence: F) {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.in_flight == Some(fence) && s.state == SlotState::Retiring)
        {
            slot.state = SlotState::Idle;
        }
    }

    /// Waits for the device to go idle, then destroys every slot's
    /// semaphores and fence. A second call does nothing.
    pub fn destroy<B>(&mut self, backend: &mut B) -> Result<(), FrameError>
    where
        B: FrameBackend<Semaphore = S, Fence = F>,
    {
        if self.slots.is_empty() {
            return Ok(());
        }
        // Destroy regardless; the objects are useless either way.
        let idle = backend.device_wait_idle();
        self.release_slots(backend);
        idle
    }

    fn release_slots<B>(&mut self, backend: &mut B)
    where
        B: FrameBackend<Semaphore = S, Fence = F>,
    {
        for sem in self.stale.drain(..) {
            backend.destroy_semaphore(sem);
        }
        for slot in self.slots.drain(..) {
            backend.destroy_semaphore(slot.image_acquired);
            backend.destroy_semaphore(slot.render_finished);
            if let Some(fence) = slot.in_flight {
                backend.destroy_fence(fence);
            }
        }
        self.images_in_flight.iter_mut().for_each(|f| *f = None);
        self.current = 0;
    }
}
