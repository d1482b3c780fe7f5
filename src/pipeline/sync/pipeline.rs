//! PipelineSynchronizer: emits the newest frame of every input together.
//!
//! Each execution drains whatever is waiting on the inputs without blocking
//! and keeps the newest frame per port. Nothing is emitted until every port
//! has delivered at least once.

use crate::data::DataRef;
use crate::pipeline::channel::ChannelKind;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{ExecuteContext, ProcessObject};
use crate::pipeline::port::{PortDescriptor, ANY_DATA};
use parking_lot::Mutex;
use std::collections::BTreeMap;

pub struct PipelineSynchronizer {
    input_count: u32,
    ports: Vec<PortDescriptor>,
    cache: Mutex<BTreeMap<u32, DataRef>>,
}

impl PipelineSynchronizer {
    pub fn new(input_count: u32) -> PipelineResult<Self> {
        if input_count < 2 {
            return Err(PipelineError::Configuration(format!(
                "PipelineSynchronizer needs at least 2 inputs, got {}",
                input_count
            )));
        }
        let ports = (0..input_count)
            .map(|i| PortDescriptor::input(i, "in", ANY_DATA))
            .chain((0..input_count).map(|i| PortDescriptor::output(i, "out", ANY_DATA)))
            .collect();
        Ok(Self {
            input_count,
            ports,
            cache: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn input_count(&self) -> u32 {
        self.input_count
    }

    /// Number of ports that have delivered at least one frame.
    pub fn populated(&self) -> usize {
        self.cache.lock().len()
    }
}

impl ProcessObject for PipelineSynchronizer {
    fn name(&self) -> &str {
        "PipelineSynchronizer"
    }

    fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> PipelineResult<()> {
        let mut cache = self.cache.lock();
        for port in 0..self.input_count {
            let channel = ctx.input_channel(port)?;
            if channel.is_stopped() {
                return Err(PipelineError::cancelled(format!(
                    "input {} of PipelineSynchronizer stopped",
                    port
                )));
            }
            match channel.kind() {
                ChannelKind::Static => match channel.frame() {
                    Ok(frame) => {
                        cache.insert(port, frame);
                    }
                    Err(PipelineError::NoFrame) => {}
                    Err(e) => return Err(e),
                },
                ChannelKind::Queued | ChannelKind::NewestOnly => {
                    while !channel.is_empty() {
                        cache.insert(port, channel.next_frame()?);
                    }
                }
            }
        }

        if cache.len() < self.input_count as usize {
            tracing::trace!(
                "PipelineSynchronizer waiting for {} more input(s)",
                self.input_count as usize - cache.len()
            );
            return Ok(());
        }
        for (port, frame) in cache.iter() {
            ctx.add_output(*port, frame.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{downcast_data, Value};
    use crate::pipeline::node::Node;

    #[test]
    fn test_needs_two_inputs() {
        assert!(matches!(
            PipelineSynchronizer::new(1),
            Err(PipelineError::Configuration(_))
        ));
        assert_eq!(PipelineSynchronizer::new(3).unwrap().ports().len(), 6);
    }

    #[test]
    fn test_emits_once_all_ports_populated() {
        let a = Node::new(crate::pipeline::nodes::InputData::new(Value::create(1u32)));
        let node = Node::new(PipelineSynchronizer::new(2).unwrap());
        node.connect(0, &a, 0).unwrap();

        let queue = crate::pipeline::channel::QueuedChannel::new(None, 4);
        let queue: std::sync::Arc<dyn crate::pipeline::channel::DataChannel> =
            std::sync::Arc::new(queue);
        node.set_input_connection(1, queue.clone()).unwrap();

        node.update().unwrap();
        assert!(matches!(node.output_frame(0), Err(PipelineError::NoFrame)));
        let sync = node.process_object::<PipelineSynchronizer>().unwrap();
        assert_eq!(sync.populated(), 1);

        queue.add_frame(Value::create(10u32)).unwrap();
        queue.add_frame(Value::create(11u32)).unwrap();
        node.update().unwrap();

        let first = downcast_data::<Value<u32>>(node.output_frame(0).unwrap()).unwrap();
        let second = downcast_data::<Value<u32>>(node.output_frame(1).unwrap()).unwrap();
        assert_eq!(first.get().unwrap(), 1);
        assert_eq!(second.get().unwrap(), 11);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stopped_input_cancels() {
        let node = Node::new(PipelineSynchronizer::new(2).unwrap());
        node.set_input_data(0, Value::create(1u8)).unwrap();
        node.set_input_data(1, Value::create(2u8)).unwrap();
        node.update().unwrap();
        node.input_channel(1).unwrap().stop("gone");
        node.modify();
        assert!(node.update().unwrap_err().is_cancelled());
    }
}
