//! FrameRecorder node: records every frame it receives.
//!
//! Sink used at the end of a chain: each execution appends the input frame to
//! the recording and passes it through on output 0, so `run()` on the recorder
//! returns the frame as well.

use crate::data::{DataObject, DataRef};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::{ExecuteContext, ProcessObject};
use crate::pipeline::port::{PortDescriptor, ANY_DATA};
use parking_lot::Mutex;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input(0, "in", ANY_DATA),
    PortDescriptor::output(0, "out", ANY_DATA),
];

#[derive(Default)]
struct Recording {
    frames: Vec<DataRef>,
    finished: bool,
}

pub struct FrameRecorder {
    max_frames: usize,
    recording: Mutex<Recording>,
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self {
            max_frames: 0,
            recording: Mutex::new(Recording::default()),
        }
    }

    /// Keep at most `max_frames` frames (oldest dropped first). 0 = unbounded.
    pub fn with_max_frames(max_frames: usize) -> Self {
        Self {
            max_frames,
            ..Self::new()
        }
    }

    pub fn frame_count(&self) -> usize {
        self.recording.lock().frames.len()
    }

    pub fn frames(&self) -> Vec<DataRef> {
        self.recording.lock().frames.clone()
    }

    /// Whether the last frame of a stream has been recorded.
    pub fn is_finished(&self) -> bool {
        self.recording.lock().finished
    }

    pub fn take_frames(&self) -> Vec<DataRef> {
        let mut recording = self.recording.lock();
        recording.finished = false;
        std::mem::take(&mut recording.frames)
    }
}

impl Default for FrameRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessObject for FrameRecorder {
    fn name(&self) -> &str {
        "FrameRecorder"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> PipelineResult<()> {
        let frame = ctx.input_data(0)?;
        {
            let mut recording = self.recording.lock();
            recording.frames.push(frame.clone());
            if self.max_frames > 0 && recording.frames.len() > self.max_frames {
                recording.frames.remove(0);
            }
            if frame.is_last_frame() {
                recording.finished = true;
                tracing::info!("Recorded last frame ({} total)", recording.frames.len());
            }
        }
        ctx.add_output(0, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::pipeline::node::Node;

    #[test]
    fn test_records_and_passes_through() {
        let node = Node::new(FrameRecorder::new());
        let frame: DataRef = Value::create(1u8);
        node.set_input_data(0, frame.clone()).unwrap();
        let out = node.run().unwrap();
        assert!(std::sync::Arc::ptr_eq(&out, &frame));

        let recorder = node.process_object::<FrameRecorder>().unwrap();
        assert_eq!(recorder.frame_count(), 1);
        assert!(!recorder.is_finished());
    }

    #[test]
    fn test_max_frames() {
        let node = Node::new(FrameRecorder::with_max_frames(2));
        for i in 0..4u8 {
            let frame = Value::create(i);
            frame.set_last_frame(i == 3);
            node.set_input_data(0, frame).unwrap();
            node.update().unwrap();
        }
        let recorder = node.process_object::<FrameRecorder>().unwrap();
        assert_eq!(recorder.frame_count(), 2);
        assert!(recorder.is_finished());
        assert_eq!(recorder.take_frames().len(), 2);
        assert_eq!(recorder.frame_count(), 0);
    }
}
