//! Synchronizers: process objects that combine several input streams.

pub mod framerate;
pub mod pipeline;

pub use framerate::FramerateSynchronizer;
pub use pipeline::PipelineSynchronizer;
