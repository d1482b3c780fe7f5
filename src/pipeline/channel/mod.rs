//! Data channels between one producer port and one consumer port.
//!
//! Three variants share the [`DataChannel`] contract:
//!
//! | Kind | Storage | `next_frame` | Producer side |
//! |------|---------|--------------|---------------|
//! | [`ChannelKind::Queued`] | FIFO of capacity N | takes oldest | blocks when full |
//! | [`ChannelKind::NewestOnly`] | single slot | takes, clears | overwrites |
//! | [`ChannelKind::Static`] | single slot | returns, keeps | overwrites |
//!
//! A channel is Open until `stop(reason)` is called, after which it is
//! Stopped for good: every blocked and every future blocking call returns
//! [`PipelineError::Cancelled`]. Each channel owns a `CancellationToken`
//! that is checked at every suspension point, with the waiter's mutex held,
//! so a stop can never be missed.

mod newest;
mod queued;
mod semaphore;
mod static_pull;

pub use newest::NewestFrameChannel;
pub use queued::QueuedChannel;
pub use static_pull::StaticChannel;

use crate::data::DataRef;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::Node;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Default capacity of bounded-queue channels.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Which channel variant an output port creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Bounded FIFO with backpressure.
    Queued,
    /// Only the most recent frame is kept.
    NewestOnly,
    /// Frame stays available until replaced.
    Static,
}

pub trait DataChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Push a frame. Bounded queues block while full.
    fn add_frame(&self, frame: DataRef) -> PipelineResult<()>;

    /// Blocking pull of the next frame.
    fn next_frame(&self) -> PipelineResult<DataRef>;

    /// Non-blocking peek. `NoFrame` if nothing is available.
    fn frame(&self) -> PipelineResult<DataRef>;

    /// Number of frames currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the channel and wake every waiter. Idempotent.
    fn stop(&self, reason: &str);

    fn is_stopped(&self) -> bool;

    /// The node feeding this channel, if any.
    fn producer(&self) -> Option<Arc<Node>>;

    /// Number of frames ever added. Consumers compare it to decide whether
    /// new data arrived since their last execution.
    fn version(&self) -> u64;

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn set_capacity(&self, _capacity: usize) -> PipelineResult<()> {
        Err(PipelineError::Configuration(format!(
            "{:?} channels have no capacity",
            self.kind()
        )))
    }
}

/// Create a channel of `kind` fed by `producer`.
pub fn create_channel(
    kind: ChannelKind,
    producer: Option<Arc<Node>>,
    queue_capacity: usize,
) -> Arc<dyn DataChannel> {
    match kind {
        ChannelKind::Queued => Arc::new(QueuedChannel::new(producer, queue_capacity)),
        ChannelKind::NewestOnly => Arc::new(NewestFrameChannel::new(producer)),
        ChannelKind::Static => Arc::new(StaticChannel::new(producer)),
    }
}

/// State shared by every channel variant.
pub(crate) struct ChannelCore {
    producer: Option<Arc<Node>>,
    token: CancellationToken,
    reason: Mutex<Option<String>>,
    frames_added: AtomicU64,
}

impl ChannelCore {
    pub(crate) fn new(producer: Option<Arc<Node>>) -> Self {
        Self {
            producer,
            token: CancellationToken::new(),
            reason: Mutex::new(None),
            frames_added: AtomicU64::new(0),
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Record the reason and cancel. Returns false if already stopped.
    pub(crate) fn begin_stop(&self, reason: &str) -> bool {
        let mut stored = self.reason.lock();
        if stored.is_some() {
            return false;
        }
        *stored = Some(reason.to_string());
        self.token.cancel();
        true
    }

    pub(crate) fn cancelled(&self) -> PipelineError {
        let reason = self
            .reason
            .lock()
            .clone()
            .unwrap_or_else(|| "channel stopped".to_string());
        PipelineError::cancelled(reason)
    }

    pub(crate) fn frame_added(&self) {
        self.frames_added.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn frames_added(&self) -> u64 {
        self.frames_added.load(Ordering::Acquire)
    }

    pub(crate) fn producer(&self) -> Option<Arc<Node>> {
        self.producer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;

    #[test]
    fn test_create_channel_kinds() {
        for kind in [ChannelKind::Queued, ChannelKind::NewestOnly, ChannelKind::Static] {
            let channel = create_channel(kind, None, 4);
            assert_eq!(channel.kind(), kind);
            assert!(channel.is_empty());
            assert!(channel.producer().is_none());
        }
    }

    #[test]
    fn test_only_queues_have_capacity() {
        assert_eq!(
            create_channel(ChannelKind::Queued, None, 4).capacity(),
            Some(4)
        );
        let channel = create_channel(ChannelKind::Static, None, 4);
        assert!(channel.capacity().is_none());
        assert!(channel.set_capacity(2).is_err());
    }

    #[test]
    fn test_peek_after_stop_is_cancelled() {
        for kind in [ChannelKind::Queued, ChannelKind::NewestOnly, ChannelKind::Static] {
            let channel = create_channel(kind, None, 4);
            assert_eq!(channel.frame().unwrap_err(), PipelineError::NoFrame);
            channel.add_frame(Value::create(1u8)).unwrap();
            channel.stop("shutdown");
            channel.stop("again");
            let err = channel.frame().unwrap_err();
            assert_eq!(err, PipelineError::cancelled("shutdown"));
            assert!(channel.next_frame().unwrap_err().is_cancelled());
            assert!(channel.add_frame(Value::create(2u8)).unwrap_err().is_cancelled());
        }
    }

    #[test]
    fn test_version_counts_added_frames() {
        let channel = create_channel(ChannelKind::NewestOnly, None, 4);
        for i in 0..3u8 {
            channel.add_frame(Value::create(i)).unwrap();
        }
        assert_eq!(channel.version(), 3);
        assert_eq!(channel.len(), 1);
    }
}
