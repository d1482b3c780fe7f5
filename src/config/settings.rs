//! Engine settings sections
//!
//! Each section maps to one table of the engine configuration file:
//!
//! - [`ChannelSettings`] - Capacity of bounded-queue channels
//! - [`StreamingConfig`] - Defaults for streaming sources
//! - [`SynchronizerConfig`] - FramerateSynchronizer behavior
//! - [`LoggingConfig`] - Log filter used by the demo binary

use crate::pipeline::channel::DEFAULT_QUEUE_CAPACITY;
use crate::pipeline::nodes::StreamingMode;
use serde::{Deserialize, Serialize};

/// Channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Frames a bounded queue holds before the producer blocks
    pub queue_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Streaming source settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Whether consumers see every frame or only the newest one
    pub mode: StreamingMode,

    /// Minimum time between two frames in milliseconds (0 = as fast as possible)
    pub frame_interval_ms: u64,

    /// Restart from the first frame after the last one, forever
    pub loop_frames: bool,

    /// Number of extra passes over the frames when not looping
    pub replays: u32,
}

/// Synchronizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynchronizerConfig {
    /// Re-run on every update even without new input
    pub always_rerun: bool,

    /// Input port whose arrivals drive the output rate
    pub priority_port: Option<u32>,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            always_rerun: true,
            priority_port: None,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,medflow=debug".to_string(),
        }
    }
}
