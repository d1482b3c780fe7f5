//! InputData node: feeds a fixed data object into the graph.
//!
//! Created by `Node::set_input_data`. Executes once and publishes its data
//! on output 0; it only executes again when the node is modified.

use crate::data::DataRef;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::{ExecuteContext, ProcessObject};
use crate::pipeline::port::{PortDescriptor, ANY_DATA};
use parking_lot::Mutex;

static PORTS: &[PortDescriptor] = &[PortDescriptor::output(0, "data", ANY_DATA)];

pub struct InputData {
    data: Mutex<DataRef>,
}

impl InputData {
    pub fn new(data: DataRef) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    /// Replace the data. The owning node must be marked modified to publish it.
    pub fn set_data(&self, data: DataRef) {
        *self.data.lock() = data;
    }
}

impl ProcessObject for InputData {
    fn name(&self) -> &str {
        "InputData"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> PipelineResult<()> {
        let data = self.data.lock().clone();
        ctx.add_output(0, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::pipeline::node::Node;

    #[test]
    fn test_publishes_once() {
        let node = Node::new(InputData::new(Value::create(3u8)));
        let channel = node.output_port(0).unwrap();
        node.update().unwrap();
        node.update().unwrap();
        assert_eq!(channel.version(), 1);
        assert_eq!(node.output_data::<Value<u8>>(0).unwrap().get().unwrap(), 3);
    }

    #[test]
    fn test_set_data_after_modify() {
        let node = Node::new(InputData::new(Value::create(1u8)));
        node.update().unwrap();
        node.process_object::<InputData>()
            .unwrap()
            .set_data(Value::create(2u8));
        node.modify();
        node.update().unwrap();
        assert_eq!(node.output_data::<Value<u8>>(0).unwrap().get().unwrap(), 2);
        assert_eq!(node.version(), 2);
    }
}
