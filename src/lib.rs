//! # medflow: pull-based dataflow execution core
//!
//! An execution core for streaming image processing. Process nodes are wired
//! into a graph through typed ports; data objects travel along channels and
//! keep a representation per compute device.
//!
//! ## Architecture
//!
//! - **Data**: [`data::DataObject`] with per-device retain/release and
//!   scoped [`data::AccessGuard`]s
//! - **Devices**: the host plus registered accelerators, see [`device`]
//! - **Channels**: bounded queue, latest-only and static-pull variants
//! - **Execution**: [`pipeline::Node::update`] pulls data from the sinks back
//!   to the sources, running each node only when something changed
//! - **Streaming**: [`pipeline::nodes::Streamer`] produces frames from a
//!   background thread; [`pipeline::FramerateSynchronizer`] aligns streams
//!
//! ## Example
//!
//! ```ignore
//! use medflow::config::EngineConfig;
//! use medflow::pipeline::nodes::{FrameRecorder, Streamer, StreamerOptions, VecSource};
//! use medflow::pipeline::Pipeline;
//!
//! let mut pipeline = Pipeline::new(EngineConfig::default());
//! let source = pipeline.add_node(Streamer::new("Frames", VecSource::new(frames), StreamerOptions::default()));
//! let sink = pipeline.add_node(FrameRecorder::new());
//! pipeline.connect(source, 0, sink, 0)?;
//! let recorded = pipeline.run_until_last_frame(sink, 0, 1000)?;
//! ```

pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod pipeline;

// Re-export commonly used types
pub use config::EngineConfig;
pub use data::{AccessGuard, AccessMode, Buffer, DataObject, DataRef, Value};
pub use device::{ComputeDevice, DeviceId, DeviceManager};
pub use error::{MedflowError, Result};
pub use pipeline::{Node, Pipeline, PipelineError, PipelineResult, ProcessObject};
