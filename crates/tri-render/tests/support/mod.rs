// SPDX-License-Identifier: CEPL-1.0
//! In-memory GPU + presentation engine. Tracks every sync object it hands
//! out and records protocol violations instead of panicking, so tests can
//! assert on them after the fact.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use tri_render::{FrameBackend, FrameError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Sem(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fence(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Work retires the moment it is submitted.
    Immediate,
    /// Work retires only when the CPU waits for it (fence or idle wait).
    OnWait,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Acquire {
        sem: Sem,
        image: u32,
        unsignaled_fences: Vec<Fence>,
    },
    Submit {
        image: u32,
        fence: Option<Fence>,
    },
    Present {
        image: u32,
    },
    WaitFence(Fence),
    QueueWaitIdle,
    DeviceWaitIdle,
}

#[derive(Debug)]
struct Submission {
    image: u32,
    fence: Option<Fence>,
}

#[derive(Debug)]
pub struct MockGpu {
    pub completion: Completion,
    pub image_count: u32,
    /// Fixed order of image indices to hand out; round-robin when `None`.
    pub image_sequence: Option<Vec<u32>>,
    pub refuse_acquire: bool,
    pub fail_submit: bool,
    pub fail_present: bool,

    pub created: usize,
    pub destroyed: usize,
    pub max_pending: usize,
    pub events: Vec<Event>,
    pub violations: Vec<String>,

    next_id: u32,
    acquires: usize,
    semaphores: HashMap<Sem, bool>,
    fences: HashMap<Fence, bool>,
    pending: VecDeque<Submission>,
}

impl MockGpu {
    pub fn new(completion: Completion, image_count: u32) -> Self {
        MockGpu {
            completion,
            image_count,
            image_sequence: None,
            refuse_acquire: false,
            fail_submit: false,
            fail_present: false,
            created: 0,
            destroyed: 0,
            max_pending: 0,
            events: Vec::new(),
            violations: Vec::new(),
            next_id: 0,
            acquires: 0,
            semaphores: HashMap::new(),
            fences: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn live_objects(&self) -> usize {
        self.semaphores.len() + self.fences.len()
    }

    pub fn fence_is_signaled(&self, fence: Fence) -> bool {
        self.fences.get(&fence).copied().unwrap_or(false)
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.created += 1;
        self.next_id
    }

    fn retire_front(&mut self) {
        if let Some(sub) = self.pending.pop_front() {
            if let Some(f) = sub.fence {
                self.fences.insert(f, true);
            }
        }
    }

    fn retire_all(&mut self) {
        while !self.pending.is_empty() {
            self.retire_front();
        }
    }

    /// The queue is in order: retiring a submission retires all before it.
    fn retire_through(&mut self, fence: Fence) -> bool {
        let Some(last) = self.pending.iter().rposition(|s| s.fence == Some(fence)) else {
            return false;
        };
        for _ in 0..=last {
            self.retire_front();
        }
        true
    }
}

impl FrameBackend for MockGpu {
    type Semaphore = Sem;
    type Fence = Fence;

    fn create_semaphore(&mut self) -> Result<Sem, FrameError> {
        let s = Sem(self.id());
        self.semaphores.insert(s, false);
        Ok(s)
    }

    fn create_fence(&mut self, signaled: bool) -> Result<Fence, FrameError> {
        let f = Fence(self.id());
        self.fences.insert(f, signaled);
        Ok(f)
    }

    fn destroy_semaphore(&mut self, semaphore: Sem) {
        if self.semaphores.remove(&semaphore).is_none() {
            self.violations.push(format!("double destroy of {semaphore:?}"));
        }
        self.destroyed += 1;
    }

    fn destroy_fence(&mut self, fence: Fence) {
        if self.pending.iter().any(|s| s.fence == Some(fence)) {
            self.violations.push(format!("destroyed in-use {fence:?}"));
        }
        if self.fences.remove(&fence).is_none() {
            self.violations.push(format!("double destroy of {fence:?}"));
        }
        self.destroyed += 1;
    }

    fn wait_fence(&mut self, fence: Fence, _timeout_ns: u64) -> Result<(), FrameError> {
        self.events.push(Event::WaitFence(fence));
        if self.fence_is_signaled(fence) || self.retire_through(fence) {
            return Ok(());
        }
        self.violations
            .push(format!("wait on {fence:?} which nothing will signal"));
        Err(FrameError::FenceTimeout)
    }

    fn fence_signaled(&mut self, fence: Fence) -> Result<bool, FrameError> {
        Ok(self.fence_is_signaled(fence))
    }

    fn reset_fence(&mut self, fence: Fence) -> Result<(), FrameError> {
        if self.pending.iter().any(|s| s.fence == Some(fence)) {
            self.violations.push(format!("reset of in-use {fence:?}"));
        }
        self.fences.insert(fence, false);
        Ok(())
    }

    fn acquire_next_image(&mut self, _timeout_ns: u64, signal: Sem) -> Result<u32, FrameError> {
        if self.refuse_acquire {
            return Err(FrameError::AcquireTimeout);
        }
        if self.semaphores.get(&signal) == Some(&true) {
            self.violations
                .push(format!("acquire signals {signal:?} which was never consumed"));
        }
        self.semaphores.insert(signal, true);

        let image = match &self.image_sequence {
            Some(seq) => seq[self.acquires % seq.len()],
            None => self.acquires as u32 % self.image_count,
        };
        self.acquires += 1;

        let mut unsignaled_fences: Vec<Fence> = self
            .fences
            .iter()
            .filter(|(_, &signaled)| !signaled)
            .map(|(&f, _)| f)
            .collect();
        unsignaled_fences.sort_by_key(|f| f.0);
        self.events.push(Event::Acquire {
            sem: signal,
            image,
            unsignaled_fences,
        });
        Ok(image)
    }

    fn submit(
        &mut self,
        image_index: u32,
        wait: Sem,
        signal: Sem,
        fence: Option<Fence>,
    ) -> Result<(), FrameError> {
        if self.fail_submit {
            return Err(FrameError::Submit("ERROR_DEVICE_LOST".into()));
        }
        if self.pending.iter().any(|s| s.image == image_index) {
            self.violations
                .push(format!("image {image_index} submitted while still in use"));
        }
        match self.semaphores.get(&wait) {
            Some(true) => {
                self.semaphores.insert(wait, false);
            }
            _ => self
                .violations
                .push(format!("submit waits on unsignaled {wait:?}")),
        }
        if self.semaphores.get(&signal) == Some(&true) {
            self.violations
                .push(format!("submit signals {signal:?} which was never consumed"));
        }
        self.semaphores.insert(signal, true);

        self.events.push(Event::Submit {
            image: image_index,
            fence,
        });
        self.pending.push_back(Submission {
            image: image_index,
            fence,
        });
        self.max_pending = self.max_pending.max(self.pending.len());
        if self.completion == Completion::Immediate {
            self.retire_all();
        }
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait: Sem) -> Result<(), FrameError> {
        if self.fail_present {
            return Err(FrameError::Present("ERROR_SURFACE_LOST_KHR".into()));
        }
        match self.semaphores.get(&wait) {
            Some(true) => {
                self.semaphores.insert(wait, false);
            }
            _ => self
                .violations
                .push(format!("present waits on unsignaled {wait:?}")),
        }
        self.events.push(Event::Present { image: image_index });
        Ok(())
    }

    fn queue_wait_idle(&mut self) -> Result<(), FrameError> {
        self.events.push(Event::QueueWaitIdle);
        self.retire_all();
        Ok(())
    }

    fn device_wait_idle(&mut self) -> Result<(), FrameError> {
        self.events.push(Event::DeviceWaitIdle);
        self.retire_all();
        Ok(())
    }
}
