//! Transform node: one input, one output, processing given by a closure.

use crate::data::{DataObject, DataRef};
use crate::device::ComputeDevice;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::{ExecuteContext, ProcessObject};
use crate::pipeline::port::{PortDescriptor, ANY_DATA};
use std::sync::Arc;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input(0, "in", ANY_DATA),
    PortDescriptor::output(0, "out", ANY_DATA),
];

type TransformFn = dyn Fn(&DataRef, &Arc<dyn ComputeDevice>) -> PipelineResult<DataRef> + Send + Sync;

/// Applies a function to every input frame.
///
/// The last-frame flag of the input is carried over to the output so sinks
/// downstream of a streamer still see the end of the stream.
pub struct Transform {
    name: String,
    func: Box<TransformFn>,
}

impl Transform {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&DataRef, &Arc<dyn ComputeDevice>) -> PipelineResult<DataRef> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    /// Pass frames through unchanged.
    pub fn identity() -> Self {
        Self::new("Identity", |frame, _| Ok(frame.clone()))
    }
}

impl ProcessObject for Transform {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> PipelineResult<()> {
        let input = ctx.input_data(0)?;
        let output = (self.func)(&input, ctx.device())?;
        if input.is_last_frame() {
            output.set_last_frame(true);
        }
        ctx.add_output(0, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{downcast_data, Value};
    use crate::pipeline::error::PipelineError;
    use crate::pipeline::node::Node;

    fn doubler() -> Transform {
        Transform::new("Double", |frame, _| {
            let v = downcast_data::<Value<i32>>(frame.clone())?.get()?;
            Ok(Value::create(v * 2) as DataRef)
        })
    }

    #[test]
    fn test_applies_function() {
        let node = Node::new(doubler());
        node.set_input_data(0, Value::create(21)).unwrap();
        assert_eq!(node.output_data::<Value<i32>>(0).unwrap_err(), PipelineError::NoFrame);
        node.update().unwrap();
        assert_eq!(node.output_data::<Value<i32>>(0).unwrap().get().unwrap(), 42);
        assert_eq!(node.name(), "Double");
    }

    #[test]
    fn test_carries_last_frame_flag() {
        let node = Node::new(doubler());
        let input = Value::create(1);
        input.set_last_frame(true);
        node.set_input_data(0, input).unwrap();
        assert!(node.run().unwrap().is_last_frame());
    }

    #[test]
    fn test_identity() {
        let node = Node::new(Transform::identity());
        let input: DataRef = Value::create(5u8);
        node.set_input_data(0, input.clone()).unwrap();
        assert!(Arc::ptr_eq(&node.run().unwrap(), &input));
    }
}
