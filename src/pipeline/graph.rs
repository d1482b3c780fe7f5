//! Pipeline container: owns a graph of nodes and drives it.
//!
//! Nodes already pull their inputs on their own; the container adds the
//! bookkeeping around them:
//! 1. Validate connections (ports, data types, self-loops, cycles).
//! 2. Compute a topological execution order.
//! 3. Pull every sink on `update()`.
//! 4. Stop every node on `stop()` or drop.

use crate::config::EngineConfig;
use crate::data::{DataObject, DataRef};
use crate::device::ComputeDevice;
use crate::error::Result;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{EdgeId, NodeId};
use crate::pipeline::node::{Node, ProcessObject};
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::runtime::RuntimeStats;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A connection from an output port of one node to an input port of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from_node: NodeId,
    pub from_port: u32,
    pub to_node: NodeId,
    pub to_port: u32,
}

// ==================== Snapshots ====================

#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    pub ports: Vec<PortDescriptor>,
    pub streaming: bool,
    pub stats: RuntimeStats,
}

/// Serializable view of the graph, for logging and tooling.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<Edge>,
}

impl TopologySnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ==================== Pipeline ====================

pub struct Pipeline {
    config: EngineConfig,
    nodes: Vec<Arc<Node>>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    next_edge: u32,
    stopped: bool,
}

impl Pipeline {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            next_edge: 0,
            stopped: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Graph building ──

    /// Add a process object on the default device. Returns its NodeId.
    pub fn add_node(&mut self, object: impl ProcessObject) -> NodeId {
        self.insert(Node::new(object))
    }

    pub fn add_node_on(
        &mut self,
        object: impl ProcessObject,
        device: Arc<dyn ComputeDevice>,
    ) -> NodeId {
        self.insert(Node::with_device(object, device))
    }

    /// Adopt an already built node.
    pub fn insert(&mut self, node: Arc<Node>) -> NodeId {
        let id = node.id();
        if self.index.contains_key(&id) {
            return id;
        }
        node.set_queue_capacity(self.config.channels.queue_capacity);
        tracing::debug!("Added {} as {:?}", node.name(), id);
        self.index.insert(id, self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> PipelineResult<&Arc<Node>> {
        self.index
            .get(&id)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| PipelineError::Configuration(format!("unknown node {:?}", id)))
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Connect output `from_port` of `from` to input `to_port` of `to`.
    /// An existing connection into `to_port` is replaced.
    pub fn connect(
        &mut self,
        from: NodeId,
        from_port: u32,
        to: NodeId,
        to_port: u32,
    ) -> PipelineResult<EdgeId> {
        let producer = self.node(from)?.clone();
        let consumer = self.node(to)?.clone();
        if from == to {
            return Err(PipelineError::InvalidConnection(format!(
                "{} cannot consume its own output",
                consumer.name()
            )));
        }
        if self.would_create_cycle(from, to) {
            return Err(PipelineError::CycleDetected);
        }

        consumer.connect(to_port, &producer, from_port)?;

        self.edges
            .retain(|e| !(e.to_node == to && e.to_port == to_port));
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        self.edges.push(Edge {
            id,
            from_node: from,
            from_port,
            to_node: to,
            to_port,
        });
        tracing::debug!(
            "Connected {}.{} -> {}.{}",
            producer.name(),
            from_port,
            consumer.name(),
            to_port
        );
        Ok(id)
    }

    /// Check if adding an edge from `from` to `to` would create a cycle.
    fn would_create_cycle(&self, from: NodeId, to: NodeId) -> bool {
        // `to` reaching `from` through existing edges closes a loop.
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![to];

        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            let Some(&idx) = self.index.get(&current) else {
                continue;
            };
            if visited[idx] {
                continue;
            }
            visited[idx] = true;

            for edge in &self.edges {
                if edge.from_node == current {
                    stack.push(edge.to_node);
                }
            }
        }
        false
    }

    // ── Topological sort (Kahn's algorithm) ──

    pub fn execution_order(&self) -> Vec<NodeId> {
        let n = self.nodes.len();
        let mut in_degree = vec![0u32; n];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];

        for edge in &self.edges {
            if let (Some(&from), Some(&to)) =
                (self.index.get(&edge.from_node), self.index.get(&edge.to_node))
            {
                adj[from].push(to);
                in_degree[to] += 1;
            }
        }

        // Reverse so that pop() yields nodes in insertion order.
        let mut queue: Vec<usize> = (0..n).rev().filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop() {
            order.push(node);
            for &next in &adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push(next);
                }
            }
        }

        if order.len() != n {
            tracing::warn!(
                "Pipeline graph has a cycle! Only {} of {} nodes scheduled.",
                order.len(),
                n
            );
        }

        order.into_iter().map(|i| self.nodes[i].id()).collect()
    }

    /// Nodes whose outputs feed no other node of this pipeline.
    pub fn sinks(&self) -> Vec<NodeId> {
        self.execution_order()
            .into_iter()
            .filter(|id| !self.edges.iter().any(|e| e.from_node == *id))
            .collect()
    }

    // ── Execution ──

    /// Pull new data through every sink.
    ///
    /// All sinks share one pull, so a node feeding several of them executes
    /// once and every sink sees the same frame.
    pub fn update(&self) -> PipelineResult<()> {
        if self.stopped {
            return Err(PipelineError::cancelled("pipeline stopped"));
        }
        let pull = Node::next_pull();
        for id in self.sinks() {
            self.node(id)?.update_with(pull)?;
        }
        Ok(())
    }

    /// Update `sink` until output `port` carries the last frame of a stream.
    ///
    /// Returns every distinct frame seen on `port`, at most `max_iterations`
    /// updates.
    pub fn run_until_last_frame(
        &self,
        sink: NodeId,
        port: u32,
        max_iterations: usize,
    ) -> PipelineResult<Vec<DataRef>> {
        let node = self.node(sink)?.clone();
        let mut frames = Vec::new();
        let mut seen_version = node.version();

        for _ in 0..max_iterations {
            node.update()?;
            let version = node.version();
            if version == seen_version {
                continue;
            }
            seen_version = version;

            let frame = node.output_frame(port)?;
            let last = frame.is_last_frame();
            frames.push(frame);
            if last {
                tracing::info!("{} reached the last frame after {} frames", node.name(), frames.len());
                return Ok(frames);
            }
        }

        tracing::warn!(
            "{} did not reach the last frame within {} updates",
            node.name(),
            max_iterations
        );
        Ok(frames)
    }

    // ── Lifecycle ──

    /// Stop every node, sinks first. Further updates fail with cancellation.
    pub fn stop(&mut self, reason: &str) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        tracing::info!("Stopping pipeline ({} nodes): {}", self.nodes.len(), reason);
        for id in self.execution_order().into_iter().rev() {
            if let Ok(node) = self.node(id) {
                node.stop(reason);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn topology(&self) -> TopologySnapshot {
        TopologySnapshot {
            nodes: self
                .nodes
                .iter()
                .map(|node| NodeSnapshot {
                    id: node.id(),
                    name: node.name().to_string(),
                    ports: node.ports().to_vec(),
                    streaming: node.is_streaming(),
                    stats: node.stats(),
                })
                .collect(),
            edges: self.edges.clone(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop("pipeline dropped");
    }
}
