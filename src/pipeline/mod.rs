//! Pull-based dataflow execution.
//!
//! Frames flow through process nodes connected by channels. A consumer pulls:
//! calling `update()` on a sink updates its producers first, then executes
//! the sink if anything changed.
//!
//! # Architecture
//!
//! ```text
//! [Streamer] ══queue══► [Transform] ──static──► [FrameRecorder]
//!     │ producer thread
//! [Streamer] ══latest══► [FramerateSynchronizer] ──latest──► ...
//! ```
//!
//! # Design
//!
//! - **Channels**: bounded queue, latest-only and static-pull variants behind
//!   one [`DataChannel`] trait; `stop(reason)` wakes every blocked caller with
//!   [`PipelineError::Cancelled`].
//! - **Lazy re-execution**: channels carry version counters; a node only
//!   executes when modified, always-rerun, fed by a streamer, or given new data.
//! - **Managed threads**: streamers and synchronizers run workers in a
//!   [`TaskGroup`] that is cancelled and joined on stop.

pub mod channel;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod nodes;
pub mod port;
pub mod runtime;
pub mod sync;
pub mod task;

pub use channel::{create_channel, ChannelKind, DataChannel, DEFAULT_QUEUE_CAPACITY};
pub use error::{PipelineError, PipelineResult};
pub use graph::{Edge, NodeSnapshot, Pipeline, TopologySnapshot};
pub use id::{EdgeId, NodeId};
pub use node::{ExecuteContext, Node, OutputPorts, ProcessObject, StreamSender};
pub use port::{PortDescriptor, PortDirection, ANY_DATA};
pub use runtime::RuntimeStats;
pub use sync::{FramerateSynchronizer, PipelineSynchronizer};
pub use task::TaskGroup;
