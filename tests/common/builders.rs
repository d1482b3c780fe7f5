//! Test data builders for creating streams and chains

use medflow::data::{DataRef, Value};
use medflow::pipeline::nodes::{Streamer, StreamerOptions, StreamingMode, VecSource};
use std::time::Duration;

/// Builder for a sequence of `Value<u64>` frames
pub struct FrameSequenceBuilder {
    count: u64,
    start: u64,
}

impl FrameSequenceBuilder {
    pub fn new(count: u64) -> Self {
        Self { count, start: 0 }
    }

    pub fn start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    pub fn build(self) -> Vec<DataRef> {
        (self.start..self.start + self.count)
            .map(|i| Value::create(i) as DataRef)
            .collect()
    }
}

/// Builder for a streamer over a fixed frame sequence
pub struct StreamerBuilder {
    name: String,
    frames: Vec<DataRef>,
    options: StreamerOptions,
}

impl StreamerBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frames: FrameSequenceBuilder::new(10).build(),
            options: StreamerOptions::default(),
        }
    }

    pub fn frames(mut self, frames: Vec<DataRef>) -> Self {
        self.frames = frames;
        self
    }

    pub fn interval_ms(mut self, ms: u64) -> Self {
        self.options.frame_interval = Duration::from_millis(ms);
        self
    }

    pub fn mode(mut self, mode: StreamingMode) -> Self {
        self.options.mode = mode;
        self
    }

    pub fn build(self) -> Streamer<VecSource> {
        Streamer::new(self.name, VecSource::new(self.frames), self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sequence_builder() {
        let frames = FrameSequenceBuilder::new(3).start(5).build();
        assert_eq!(frames.len(), 3);
        assert_eq!(crate::common::value_of(&frames[0]), 5);
        assert_eq!(crate::common::value_of(&frames[2]), 7);
    }
}
