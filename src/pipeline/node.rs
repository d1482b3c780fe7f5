//! Process nodes and the pull-based execution protocol.
//!
//! A [`ProcessObject`] is the algorithm; a [`Node`] is the shared handle that
//! wires it into the graph. Nodes own their input connections (one channel
//! per input port) and weak references to the channels their outputs feed.
//!
//! # Update protocol
//!
//! `update()` starts a new pull. Each node is visited once per pull (unless
//! it always reruns): it first updates every upstream producer, then executes
//! if it was modified, always reruns, or one of its inputs carries new data.
//! Outputs staged during `execute` are only published once it succeeded. A
//! failed execution publishes nothing and leaves the node modified, so the
//! next `update()` retries it.
//!
//! ```text
//! sink.update()
//!   └─ transform.update()
//!        └─ streamer.update()      (starts the producer thread once)
//!        transform.execute()       (blocks in next_frame on the queue)
//!   sink.execute()
//! ```

use crate::data::{downcast_data, AsAny, DataObject, DataRef};
use crate::device::{ComputeDevice, DeviceManager};
use crate::pipeline::channel::{create_channel, ChannelKind, DataChannel, DEFAULT_QUEUE_CAPACITY};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::NodeId;
use crate::pipeline::nodes::InputData;
use crate::pipeline::port::{find_port, PortDescriptor, PortDirection};
use crate::pipeline::runtime::RuntimeStats;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

static NEXT_PULL_ID: AtomicU64 = AtomicU64::new(1);

/// The algorithm behind a node.
///
/// Implementations use interior mutability for their state: `stop` may be
/// called from another thread while `execute` is blocked.
pub trait ProcessObject: AsAny {
    fn name(&self) -> &str;

    fn ports(&self) -> &[PortDescriptor];

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> PipelineResult<()>;

    /// Execute on every update, even without new input.
    fn always_rerun(&self) -> bool {
        false
    }

    /// Produces frames continuously from a background thread.
    fn is_streaming(&self) -> bool {
        false
    }

    /// Channel variant created for consumers of `port`.
    fn output_channel_kind(&self, _port: u32) -> ChannelKind {
        ChannelKind::Static
    }

    /// Stop background work. Called once the node's channels are stopped.
    fn stop(&self, _reason: &str) {}
}

// ==================== Output ports ====================

/// Consumer channels and most recent frame of every output port.
///
/// Shared with background producer threads through [`StreamSender`].
pub struct OutputPorts {
    node_name: String,
    consumers: Mutex<HashMap<u32, Vec<Weak<dyn DataChannel>>>>,
    last: Mutex<HashMap<u32, DataRef>>,
    published: AtomicU64,
}

impl OutputPorts {
    fn new(node_name: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            consumers: Mutex::new(HashMap::new()),
            last: Mutex::new(HashMap::new()),
            published: AtomicU64::new(0),
        }
    }

    fn attach(&self, port: u32, channel: &Arc<dyn DataChannel>) {
        self.consumers
            .lock()
            .entry(port)
            .or_default()
            .push(Arc::downgrade(channel));
    }

    /// Record `frame` as the latest output of `port` and push it to every
    /// live consumer.
    ///
    /// Fails with cancellation only when every consumer has been stopped.
    pub fn publish(&self, port: u32, frame: DataRef) -> PipelineResult<()> {
        self.last.lock().insert(port, frame.clone());
        self.published.fetch_add(1, Ordering::AcqRel);

        let live: Vec<Arc<dyn DataChannel>> = {
            let mut consumers = self.consumers.lock();
            match consumers.get_mut(&port) {
                None => Vec::new(),
                Some(list) => {
                    let before = list.len();
                    list.retain(|c| c.strong_count() > 0);
                    if list.len() < before {
                        tracing::warn!(
                            "{} port {}: pruned {} dropped consumer channel(s)",
                            self.node_name,
                            port,
                            before - list.len()
                        );
                    }
                    list.iter().filter_map(Weak::upgrade).collect()
                }
            }
        };

        let mut stopped = None;
        for channel in &live {
            match channel.add_frame(frame.clone()) {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => stopped = Some(e),
                Err(e) => return Err(e),
            }
        }
        match stopped {
            Some(e) if live.iter().all(|c| c.is_stopped()) => Err(e),
            _ => Ok(()),
        }
    }

    pub fn last(&self, port: u32) -> Option<DataRef> {
        self.last.lock().get(&port).cloned()
    }

    pub fn consumer_count(&self, port: u32) -> usize {
        self.consumers
            .lock()
            .get(&port)
            .map(|list| list.iter().filter(|c| c.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Stop every live consumer channel.
    pub fn stop_all(&self, reason: &str) {
        let channels: Vec<Arc<dyn DataChannel>> = self
            .consumers
            .lock()
            .values()
            .flatten()
            .filter_map(Weak::upgrade)
            .collect();
        for channel in channels {
            channel.stop(reason);
        }
    }

    /// Number of frames published so far.
    pub fn version(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}

/// Publishing handle for background producer threads.
///
/// Frames sent through it record the sending node as their streamer.
#[derive(Clone)]
pub struct StreamSender {
    node: Weak<Node>,
    outputs: Arc<OutputPorts>,
}

impl StreamSender {
    pub fn send(&self, port: u32, frame: DataRef) -> PipelineResult<()> {
        frame.core().set_streamer(self.node.clone());
        self.outputs.publish(port, frame)
    }

    pub fn stop(&self, reason: &str) {
        self.outputs.stop_all(reason);
    }

    pub fn consumer_count(&self, port: u32) -> usize {
        self.outputs.consumer_count(port)
    }
}

// ==================== Node ====================

struct InputConnection {
    channel: Arc<dyn DataChannel>,
    seen_version: u64,
}

struct NodeState {
    inputs: BTreeMap<u32, InputConnection>,
    modified: bool,
    last_pull: u64,
    /// Set once the object took over its input channels.
    inputs_detached: bool,
}

pub struct Node {
    id: NodeId,
    object: Box<dyn ProcessObject>,
    device: Arc<dyn ComputeDevice>,
    exec_lock: Mutex<()>,
    state: Mutex<NodeState>,
    outputs: Arc<OutputPorts>,
    stats: Mutex<RuntimeStats>,
    queue_capacity: AtomicUsize,
}

impl Node {
    /// Wrap `object` on the default device.
    pub fn new(object: impl ProcessObject) -> Arc<Self> {
        Self::with_device(object, DeviceManager::global().default_device())
    }

    pub fn with_device(object: impl ProcessObject, device: Arc<dyn ComputeDevice>) -> Arc<Self> {
        Self::from_boxed(Box::new(object), device)
    }

    pub fn from_boxed(object: Box<dyn ProcessObject>, device: Arc<dyn ComputeDevice>) -> Arc<Self> {
        let outputs = Arc::new(OutputPorts::new(object.name()));
        Arc::new(Self {
            id: NodeId::next(),
            object,
            device,
            exec_lock: Mutex::new(()),
            state: Mutex::new(NodeState {
                inputs: BTreeMap::new(),
                modified: true,
                last_pull: 0,
                inputs_detached: false,
            }),
            outputs,
            stats: Mutex::new(RuntimeStats::default()),
            queue_capacity: AtomicUsize::new(DEFAULT_QUEUE_CAPACITY),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.object.name()
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        self.object.ports()
    }

    pub fn object(&self) -> &dyn ProcessObject {
        &*self.object
    }

    /// The wrapped object as its concrete type.
    pub fn process_object<T: ProcessObject>(&self) -> Option<&T> {
        let object: &dyn ProcessObject = &*self.object;
        object.as_any().downcast_ref::<T>()
    }

    /// Main computation device of this node.
    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }

    pub fn is_streaming(&self) -> bool {
        self.object.is_streaming()
    }

    pub fn is_modified(&self) -> bool {
        self.state.lock().modified
    }

    /// Mark the node modified, e.g. after a parameter change.
    pub fn modify(&self) {
        self.state.lock().modified = true;
    }

    /// Number of frames this node has published.
    pub fn version(&self) -> u64 {
        self.outputs.version()
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats.lock().clone()
    }

    /// Capacity of bounded-queue channels created by `output_port`.
    pub fn set_queue_capacity(&self, capacity: usize) {
        self.queue_capacity.store(capacity.max(1), Ordering::Release);
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.load(Ordering::Acquire)
    }

    // ── Wiring ──

    /// Create a channel from output `port` to one new consumer.
    pub fn output_port(self: &Arc<Self>, port: u32) -> PipelineResult<Arc<dyn DataChannel>> {
        self.output_port_with(port, self.object.output_channel_kind(port))
    }

    pub fn output_port_with(
        self: &Arc<Self>,
        port: u32,
        kind: ChannelKind,
    ) -> PipelineResult<Arc<dyn DataChannel>> {
        self.port(PortDirection::Output, port)?;
        let channel = create_channel(kind, Some(self.clone()), self.queue_capacity());
        if kind == ChannelKind::Static {
            if let Some(last) = self.outputs.last(port) {
                channel.add_frame(last)?;
            }
        }
        self.outputs.attach(port, &channel);
        tracing::trace!("{} output {} -> new {:?} channel", self.name(), port, kind);
        Ok(channel)
    }

    /// Bind `channel` to input `port`, replacing any previous connection.
    pub fn set_input_connection(
        &self,
        port: u32,
        channel: Arc<dyn DataChannel>,
    ) -> PipelineResult<()> {
        self.port(PortDirection::Input, port)?;
        if let Some(producer) = channel.producer() {
            if producer.id == self.id {
                return Err(PipelineError::InvalidConnection(format!(
                    "{} cannot consume its own output",
                    self.name()
                )));
            }
            if producer.depends_on(self.id) {
                return Err(PipelineError::CycleDetected);
            }
        }

        let mut state = self.state.lock();
        state.inputs.insert(
            port,
            InputConnection {
                channel,
                seen_version: 0,
            },
        );
        state.inputs_detached = false;
        state.modified = true;
        Ok(())
    }

    /// Connect input `port` to output `producer_port` of `producer`.
    pub fn connect(
        &self,
        port: u32,
        producer: &Arc<Node>,
        producer_port: u32,
    ) -> PipelineResult<()> {
        let input = self.port(PortDirection::Input, port)?;
        let output = producer.port(PortDirection::Output, producer_port)?;
        if !input.accepts(output.data_type) {
            return Err(PipelineError::PortMismatch(format!(
                "{}.{} produces {}, {}.{} expects {}",
                producer.name(),
                output.name,
                output.data_type,
                self.name(),
                input.name,
                input.data_type
            )));
        }
        self.set_input_connection(port, producer.output_port(producer_port)?)
    }

    /// Feed a fixed data object into input `port`.
    pub fn set_input_data(&self, port: u32, data: DataRef) -> PipelineResult<()> {
        let source = Node::with_device(InputData::new(data), self.device.clone());
        self.set_input_connection(port, source.output_port(0)?)
    }

    pub fn input_channel(&self, port: u32) -> Option<Arc<dyn DataChannel>> {
        self.state
            .lock()
            .inputs
            .get(&port)
            .map(|c| c.channel.clone())
    }

    /// Nodes feeding this node, one entry per connected input.
    pub fn producers(&self) -> Vec<Arc<Node>> {
        self.state
            .lock()
            .inputs
            .values()
            .filter_map(|c| c.channel.producer())
            .collect()
    }

    fn depends_on(&self, target: NodeId) -> bool {
        let mut stack = self.producers();
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if node.id == target {
                return true;
            }
            if visited.insert(node.id) {
                stack.extend(node.producers());
            }
        }
        false
    }

    fn port(&self, direction: PortDirection, index: u32) -> PipelineResult<&PortDescriptor> {
        find_port(self.ports(), direction, index).ok_or_else(|| PipelineError::NoSuchPort {
            node: self.name().to_string(),
            direction: direction.as_str(),
            port: index,
        })
    }

    // ── Execution ──

    /// Pull new data through this node and everything upstream of it.
    pub fn update(self: &Arc<Self>) -> PipelineResult<()> {
        self.update_with(Self::next_pull())
    }

    /// Id of a new pull. Updating several nodes with the same id visits a
    /// shared upstream node only once.
    pub(crate) fn next_pull() -> u64 {
        NEXT_PULL_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// `update()` followed by the most recent frame of output port 0.
    pub fn run(self: &Arc<Self>) -> PipelineResult<DataRef> {
        self.update()?;
        self.output_frame(0)
    }

    pub(crate) fn update_with(self: &Arc<Self>, pull: u64) -> PipelineResult<()> {
        let _exec = self.exec_lock.lock();
        let always = self.object.always_rerun();

        let inputs: Vec<(u32, Arc<dyn DataChannel>)> = {
            let mut state = self.state.lock();
            if state.last_pull == pull && !always {
                return Ok(());
            }
            state.last_pull = pull;
            state
                .inputs
                .iter()
                .map(|(port, c)| (*port, c.channel.clone()))
                .collect()
        };

        for (_, channel) in &inputs {
            if let Some(producer) = channel.producer() {
                producer.update_with(pull)?;
            }
        }

        let versions: Vec<(u32, u64)> = inputs.iter().map(|(p, c)| (*p, c.version())).collect();
        let reason = {
            let state = self.state.lock();
            if state.modified {
                Some("modified")
            } else if always {
                Some("always rerun")
            } else if inputs.iter().any(|(_, c)| {
                c.producer().map(|p| p.is_streaming()).unwrap_or(false)
            }) {
                Some("streaming input")
            } else if versions.iter().any(|(port, version)| {
                state
                    .inputs
                    .get(port)
                    .map(|c| *version > c.seen_version)
                    .unwrap_or(false)
            }) {
                Some("new input")
            } else {
                None
            }
        };
        let Some(reason) = reason else {
            tracing::trace!("{} is up to date", self.name());
            return Ok(());
        };

        self.check_required_inputs(&inputs)?;
        tracing::debug!("Executing {} ({})", self.name(), reason);

        let mut ctx = ExecuteContext::new(self, inputs);
        let started = Instant::now();
        match self.object.execute(&mut ctx) {
            Ok(()) => {
                self.stats.lock().record(started.elapsed());
                {
                    let mut state = self.state.lock();
                    state.modified = false;
                    for (port, version) in versions {
                        if let Some(connection) = state.inputs.get_mut(&port) {
                            connection.seen_version = version;
                        }
                    }
                }
                // Every port gets its frame even if an earlier one fails, so
                // live consumers never see a partial set of outputs.
                let mut first_error = None;
                for (port, frame) in ctx.staged {
                    if let Err(e) = self.outputs.publish(port, frame) {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
            Err(e) => {
                self.stats.lock().record_failure();
                self.state.lock().modified = true;
                if e.is_cancelled() {
                    tracing::debug!("{} cancelled: {}", self.name(), e);
                } else {
                    tracing::warn!("{} failed: {}", self.name(), e);
                }
                Err(e)
            }
        }
    }

    fn check_required_inputs(&self, inputs: &[(u32, Arc<dyn DataChannel>)]) -> PipelineResult<()> {
        if self.state.lock().inputs_detached {
            return Ok(());
        }
        for port in self.ports() {
            if port.direction == PortDirection::Input
                && port.required
                && !inputs.iter().any(|(p, _)| *p == port.index)
            {
                return Err(PipelineError::MissingInput {
                    node: self.name().to_string(),
                    port: port.index,
                });
            }
        }
        Ok(())
    }

    // ── Output access ──

    /// Most recent frame published on `port`.
    pub fn output_frame(&self, port: u32) -> PipelineResult<DataRef> {
        self.port(PortDirection::Output, port)?;
        self.outputs.last(port).ok_or(PipelineError::NoFrame)
    }

    /// Most recent frame published on `port`, as a concrete kind.
    pub fn output_data<T: DataObject>(&self, port: u32) -> PipelineResult<Arc<T>> {
        downcast_data(self.output_frame(port)?)
    }

    pub fn stream_sender(self: &Arc<Self>) -> StreamSender {
        StreamSender {
            node: Arc::downgrade(self),
            outputs: self.outputs.clone(),
        }
    }

    /// Stop every channel attached to this node, then the object itself.
    pub fn stop(&self, reason: &str) {
        tracing::info!("Stopping {} ({})", self.name(), reason);
        let inputs: Vec<Arc<dyn DataChannel>> = self
            .state
            .lock()
            .inputs
            .values()
            .map(|c| c.channel.clone())
            .collect();
        for channel in inputs {
            channel.stop(reason);
        }
        self.outputs.stop_all(reason);
        self.object.stop(reason);
    }

    fn detach_inputs(&self) -> Vec<(u32, Arc<dyn DataChannel>)> {
        let mut state = self.state.lock();
        state.inputs_detached = true;
        std::mem::take(&mut state.inputs)
            .into_iter()
            .map(|(port, c)| (port, c.channel))
            .collect()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("device", &self.device.id())
            .finish()
    }
}

// ==================== Execute context ====================

/// Everything a process object may touch while executing.
pub struct ExecuteContext<'a> {
    node: &'a Arc<Node>,
    inputs: BTreeMap<u32, Arc<dyn DataChannel>>,
    fetched: HashMap<u32, DataRef>,
    staged: Vec<(u32, DataRef)>,
}

impl<'a> ExecuteContext<'a> {
    fn new(node: &'a Arc<Node>, inputs: Vec<(u32, Arc<dyn DataChannel>)>) -> Self {
        Self {
            node,
            inputs: inputs.into_iter().collect(),
            fetched: HashMap::new(),
            staged: Vec::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node.id
    }

    pub fn node_name(&self) -> &str {
        self.node.name()
    }

    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.node.device
    }

    pub fn has_input(&self, port: u32) -> bool {
        self.inputs.contains_key(&port)
    }

    pub fn input_ports(&self) -> Vec<u32> {
        self.inputs.keys().copied().collect()
    }

    pub fn input_channel(&self, port: u32) -> PipelineResult<Arc<dyn DataChannel>> {
        self.inputs
            .get(&port)
            .cloned()
            .ok_or_else(|| self.missing(port))
    }

    /// Next frame on input `port`. Blocks until the channel has one; repeated
    /// calls within one execution return the same frame.
    pub fn input_data(&mut self, port: u32) -> PipelineResult<DataRef> {
        if let Some(frame) = self.fetched.get(&port) {
            return Ok(frame.clone());
        }
        let frame = self.input_channel(port)?.next_frame()?;
        tracing::trace!("{} received frame on port {}", self.node.name(), port);
        self.fetched.insert(port, frame.clone());
        Ok(frame)
    }

    pub fn input<T: DataObject>(&mut self, port: u32) -> PipelineResult<Arc<T>> {
        downcast_data(self.input_data(port)?)
    }

    /// Take a frame from input `port` only if one is waiting.
    pub fn try_input(&mut self, port: u32) -> PipelineResult<Option<DataRef>> {
        if let Some(frame) = self.fetched.get(&port) {
            return Ok(Some(frame.clone()));
        }
        let Some(channel) = self.inputs.get(&port).cloned() else {
            return Ok(None);
        };
        if channel.is_stopped() {
            return Err(channel.frame().err().unwrap_or_else(|| {
                PipelineError::cancelled("input channel stopped")
            }));
        }
        if channel.is_empty() {
            return Ok(None);
        }
        let frame = channel.next_frame()?;
        self.fetched.insert(port, frame.clone());
        Ok(Some(frame))
    }

    /// Stage `data` for output `port`. Published once `execute` returns `Ok`.
    pub fn add_output(&mut self, port: u32, data: DataRef) -> PipelineResult<()> {
        self.node.port(PortDirection::Output, port)?;
        self.staged.retain(|(p, _)| *p != port);
        self.staged.push((port, data));
        Ok(())
    }

    /// Take ownership of every input channel. The node stops pulling its
    /// inputs itself; the caller becomes responsible for them.
    pub fn detach_inputs(&mut self) -> Vec<(u32, Arc<dyn DataChannel>)> {
        self.inputs.clear();
        self.node.detach_inputs()
    }

    pub fn stream_sender(&self) -> StreamSender {
        self.node.stream_sender()
    }

    /// An execution error attributed to this node.
    pub fn error(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::Execution {
            node_id: self.node.id,
            node: self.node.name().to_string(),
            message: message.into(),
        }
    }

    fn missing(&self, port: u32) -> PipelineError {
        match self.node.port(PortDirection::Input, port) {
            Ok(_) => PipelineError::MissingInput {
                node: self.node.name().to_string(),
                port,
            },
            Err(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::pipeline::port::ANY_DATA;
    use std::sync::atomic::AtomicBool;

    static ADD_PORTS: &[PortDescriptor] = &[
        PortDescriptor::input(0, "a", ANY_DATA),
        PortDescriptor::optional_input(1, "b", ANY_DATA),
        PortDescriptor::output(0, "sum", ANY_DATA),
    ];

    /// Adds its inputs; counts executions and can be told to fail.
    #[derive(Default)]
    struct Add {
        executions: AtomicUsize,
        fail: AtomicBool,
    }

    impl ProcessObject for Add {
        fn name(&self) -> &str {
            "Add"
        }

        fn ports(&self) -> &[PortDescriptor] {
            ADD_PORTS
        }

        fn execute(&self, ctx: &mut ExecuteContext<'_>) -> PipelineResult<()> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            let a = ctx.input::<Value<i64>>(0)?.get()?;
            let b = match ctx.try_input(1)? {
                Some(frame) => downcast_data::<Value<i64>>(frame)?.get()?,
                None => 0,
            };
            ctx.add_output(0, Value::create(a + b))?;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ctx.error("forced failure"));
            }
            Ok(())
        }
    }

    fn executions(node: &Node) -> usize {
        node.process_object::<Add>()
            .unwrap()
            .executions
            .load(Ordering::SeqCst)
    }

    static SPLIT_PORTS: &[PortDescriptor] = &[
        PortDescriptor::input(0, "in", ANY_DATA),
        PortDescriptor::output(0, "first", ANY_DATA),
        PortDescriptor::output(1, "second", ANY_DATA),
    ];

    /// Sends its input to both outputs.
    struct Split;

    impl ProcessObject for Split {
        fn name(&self) -> &str {
            "Split"
        }

        fn ports(&self) -> &[PortDescriptor] {
            SPLIT_PORTS
        }

        fn execute(&self, ctx: &mut ExecuteContext<'_>) -> PipelineResult<()> {
            let frame = ctx.input_data(0)?;
            ctx.add_output(0, frame.clone())?;
            ctx.add_output(1, frame)
        }
    }

    #[test]
    fn test_stopped_port_does_not_hold_back_other_outputs() {
        let node = Node::new(Split);
        node.set_input_data(0, Value::create(4i64)).unwrap();
        let first = node.output_port(0).unwrap();
        let second = node.output_port(1).unwrap();
        first.stop("consumer gone");

        assert!(node.update().unwrap_err().is_cancelled());
        let frame = second.next_frame().unwrap();
        assert_eq!(downcast_data::<Value<i64>>(frame).unwrap().get().unwrap(), 4);
        assert!(node.output_frame(0).is_ok());
        assert!(node.output_frame(1).is_ok());
    }

    #[test]
    fn test_shared_pull_visits_upstream_once() {
        let source = Node::new(Add::default());
        source.set_input_data(0, Value::create(1i64)).unwrap();
        let left = Node::new(Add::default());
        let right = Node::new(Add::default());
        left.connect(0, &source, 0).unwrap();
        right.connect(0, &source, 0).unwrap();

        let pull = Node::next_pull();
        left.update_with(pull).unwrap();
        source.modify();
        right.update_with(pull).unwrap();
        assert_eq!(executions(&source), 1);

        right.update().unwrap();
        assert_eq!(executions(&source), 2);
    }

    #[test]
    fn test_executes_once_until_modified() {
        let node = Node::new(Add::default());
        node.set_input_data(0, Value::create(2i64)).unwrap();
        node.set_input_data(1, Value::create(3i64)).unwrap();

        let out = node.run().unwrap();
        assert_eq!(downcast_data::<Value<i64>>(out).unwrap().get().unwrap(), 5);
        node.update().unwrap();
        node.update().unwrap();
        assert_eq!(executions(&node), 1);

        node.modify();
        node.update().unwrap();
        assert_eq!(executions(&node), 2);
        assert_eq!(node.stats().executions, 2);
    }

    #[test]
    fn test_upstream_change_triggers_downstream() {
        let first = Node::new(Add::default());
        first.set_input_data(0, Value::create(1i64)).unwrap();
        let second = Node::new(Add::default());
        second.connect(0, &first, 0).unwrap();

        second.update().unwrap();
        assert_eq!(second.output_data::<Value<i64>>(0).unwrap().get().unwrap(), 1);

        first.set_input_data(0, Value::create(10i64)).unwrap();
        second.update().unwrap();
        assert_eq!(second.output_data::<Value<i64>>(0).unwrap().get().unwrap(), 10);
        assert_eq!(executions(&second), 2);
    }

    #[test]
    fn test_missing_required_input() {
        let node = Node::new(Add::default());
        let err = node.update().unwrap_err();
        assert_eq!(
            err,
            PipelineError::MissingInput {
                node: "Add".into(),
                port: 0
            }
        );
        assert_eq!(executions(&node), 0);
    }

    #[test]
    fn test_no_such_port() {
        let node = Node::new(Add::default());
        assert!(matches!(
            node.set_input_data(5, Value::create(1i64)),
            Err(PipelineError::NoSuchPort { .. })
        ));
        assert!(node.output_port(3).is_err());
    }

    #[test]
    fn test_failure_publishes_nothing_and_retries() {
        let node = Node::new(Add::default());
        node.set_input_data(0, Value::create(4i64)).unwrap();
        node.process_object::<Add>().unwrap().fail.store(true, Ordering::SeqCst);

        let err = node.update().unwrap_err();
        assert!(matches!(err, PipelineError::Execution { .. }));
        assert_eq!(node.output_frame(0).unwrap_err(), PipelineError::NoFrame);
        assert!(node.is_modified());

        node.process_object::<Add>().unwrap().fail.store(false, Ordering::SeqCst);
        node.update().unwrap();
        assert_eq!(node.output_data::<Value<i64>>(0).unwrap().get().unwrap(), 4);
        assert_eq!(node.stats().failures, 1);
    }

    #[test]
    fn test_upstream_failure_propagates_verbatim() {
        let first = Node::new(Add::default());
        let second = Node::new(Add::default());
        second.connect(0, &first, 0).unwrap();
        let err = second.update().unwrap_err();
        assert_eq!(
            err,
            PipelineError::MissingInput {
                node: "Add".into(),
                port: 0
            }
        );
        assert_eq!(executions(&second), 0);
    }

    #[test]
    fn test_self_connection_rejected() {
        let node = Node::new(Add::default());
        let channel = node.output_port(0).unwrap();
        assert!(matches!(
            node.set_input_connection(0, channel),
            Err(PipelineError::InvalidConnection(_))
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let a = Node::new(Add::default());
        let b = Node::new(Add::default());
        b.connect(0, &a, 0).unwrap();
        assert_eq!(a.connect(0, &b, 0).unwrap_err(), PipelineError::CycleDetected);
    }

    #[test]
    fn test_type_mismatch_on_input() {
        let node = Node::new(Add::default());
        node.set_input_data(0, Value::create("text".to_string())).unwrap();
        let err = node.update().unwrap_err();
        assert!(matches!(err, PipelineError::TypeMismatch { .. }));
    }

    #[test]
    fn test_late_static_consumer_sees_last_output() {
        let node = Node::new(Add::default());
        node.set_input_data(0, Value::create(7i64)).unwrap();
        node.update().unwrap();
        let channel = node.output_port(0).unwrap();
        assert_eq!(channel.len(), 1);
        assert_eq!(node.version(), 1);
    }

    #[test]
    fn test_dropped_consumers_are_pruned() {
        let node = Node::new(Add::default());
        node.set_input_data(0, Value::create(1i64)).unwrap();
        let kept = node.output_port(0).unwrap();
        drop(node.output_port(0).unwrap());
        node.update().unwrap();
        assert_eq!(node.outputs.consumer_count(0), 1);
        assert_eq!(kept.version(), 1);
    }

    #[test]
    fn test_stop_stops_channels() {
        let node = Node::new(Add::default());
        node.set_input_data(0, Value::create(1i64)).unwrap();
        let out = node.output_port(0).unwrap();
        let input = node.input_channel(0).unwrap();
        node.stop("shutdown");
        assert!(out.is_stopped());
        assert!(input.is_stopped());
        assert!(node.update().unwrap_err().is_cancelled());
    }
}
