//! Built-in process objects.

pub mod input_data;
pub mod recorder;
pub mod streamer;
pub mod transform;

pub use input_data::InputData;
pub use recorder::FrameRecorder;
pub use streamer::{FnSource, FrameSource, Streamer, StreamerOptions, StreamingMode, VecSource};
pub use transform::Transform;
