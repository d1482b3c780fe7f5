//! Bounded FIFO channel.
//!
//! Two counting semaphores track free and filled slots: the producer waits on
//! `empty_slots` (backpressure), the consumer on `filled_slots`.

use super::semaphore::Semaphore;
use super::{ChannelCore, ChannelKind, DataChannel};
use crate::data::DataRef;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::Node;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct QueuedChannel {
    core: ChannelCore,
    frames: Mutex<VecDeque<DataRef>>,
    capacity: AtomicUsize,
    empty_slots: Semaphore,
    filled_slots: Semaphore,
}

impl QueuedChannel {
    pub fn new(producer: Option<Arc<Node>>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            core: ChannelCore::new(producer),
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: AtomicUsize::new(capacity),
            empty_slots: Semaphore::new(capacity),
            filled_slots: Semaphore::new(0),
        }
    }
}

impl DataChannel for QueuedChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Queued
    }

    fn add_frame(&self, frame: DataRef) -> PipelineResult<()> {
        if !self.empty_slots.acquire(self.core.token()) {
            return Err(self.core.cancelled());
        }
        self.frames.lock().push_back(frame);
        self.core.frame_added();
        self.filled_slots.release();
        Ok(())
    }

    fn next_frame(&self) -> PipelineResult<DataRef> {
        if !self.filled_slots.acquire(self.core.token()) {
            return Err(self.core.cancelled());
        }
        let frame = self.frames.lock().pop_front();
        self.empty_slots.release();
        frame.ok_or_else(|| {
            PipelineError::ResourceState("queued channel signalled a frame it did not hold".into())
        })
    }

    fn frame(&self) -> PipelineResult<DataRef> {
        if self.core.is_stopped() {
            return Err(self.core.cancelled());
        }
        self.frames
            .lock()
            .front()
            .cloned()
            .ok_or(PipelineError::NoFrame)
    }

    fn len(&self) -> usize {
        self.frames.lock().len()
    }

    fn stop(&self, reason: &str) {
        if !self.core.begin_stop(reason) {
            return;
        }
        tracing::debug!("Queued channel stopped: {}", reason);
        self.empty_slots.wake_all();
        self.filled_slots.wake_all();
    }

    fn is_stopped(&self) -> bool {
        self.core.is_stopped()
    }

    fn producer(&self) -> Option<Arc<Node>> {
        self.core.producer()
    }

    fn version(&self) -> u64 {
        self.core.frames_added()
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity.load(Ordering::Acquire))
    }

    fn set_capacity(&self, capacity: usize) -> PipelineResult<()> {
        if capacity == 0 {
            return Err(PipelineError::Configuration(
                "queue capacity must be at least 1".into(),
            ));
        }
        if self.core.frames_added() > 0 {
            return Err(PipelineError::Configuration(
                "queue capacity can only be changed before the first frame".into(),
            ));
        }
        self.capacity.store(capacity, Ordering::Release);
        self.empty_slots.reset(capacity);
        Ok(())
    }
}
