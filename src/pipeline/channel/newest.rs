//! Latest-only channel: a single slot the producer overwrites.

use super::{ChannelCore, ChannelKind, DataChannel};
use crate::data::DataRef;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::Node;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

pub struct NewestFrameChannel {
    core: ChannelCore,
    slot: Mutex<Option<DataRef>>,
    filled: Condvar,
}

impl NewestFrameChannel {
    pub fn new(producer: Option<Arc<Node>>) -> Self {
        Self {
            core: ChannelCore::new(producer),
            slot: Mutex::new(None),
            filled: Condvar::new(),
        }
    }
}

impl DataChannel for NewestFrameChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::NewestOnly
    }

    fn add_frame(&self, frame: DataRef) -> PipelineResult<()> {
        let mut slot = self.slot.lock();
        if self.core.is_stopped() {
            return Err(self.core.cancelled());
        }
        if slot.replace(frame).is_some() {
            tracing::trace!("Dropped unconsumed frame");
        }
        self.core.frame_added();
        self.filled.notify_one();
        Ok(())
    }

    fn next_frame(&self) -> PipelineResult<DataRef> {
        let mut slot = self.slot.lock();
        loop {
            if self.core.is_stopped() {
                return Err(self.core.cancelled());
            }
            if let Some(frame) = slot.take() {
                return Ok(frame);
            }
            self.filled.wait(&mut slot);
        }
    }

    fn frame(&self) -> PipelineResult<DataRef> {
        let slot = self.slot.lock();
        if self.core.is_stopped() {
            return Err(self.core.cancelled());
        }
        slot.clone().ok_or(PipelineError::NoFrame)
    }

    fn len(&self) -> usize {
        usize::from(self.slot.lock().is_some())
    }

    fn stop(&self, reason: &str) {
        if !self.core.begin_stop(reason) {
            return;
        }
        tracing::debug!("Latest-only channel stopped: {}", reason);
        let _slot = self.slot.lock();
        self.filled.notify_all();
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
}
