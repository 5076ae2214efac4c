//! Mutable operation graph with typed ports and explicit recurrent back-edges.

mod node;
mod topology;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::op::{OpError, Operation};
use crate::rt_info::{self, RtInfo};
use crate::tensor::TensorSpec;

pub use node::{Input, InputRef, Node, NodeId, Output, OutputRef};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node {node} does not exist")]
    UnknownNode { node: NodeId },
    #[error("output port {output} does not exist")]
    UnknownOutput { output: OutputRef },
    #[error("input port {input} does not exist")]
    UnknownInput { input: InputRef },
    #[error("replacement for port {port} has spec {actual}, expected {expected}")]
    ShapeMismatch {
        port: usize,
        expected: TensorSpec,
        actual: TensorSpec,
    },
    #[error("replacement exposes {actual} output ports, expected {expected}")]
    PortCountMismatch { expected: usize, actual: usize },
    #[error("node {node} still has consumers")]
    NodeInUse { node: NodeId },
    #[error("replacement for node {node} depends on the node itself")]
    CyclicReplacement { node: NodeId },
    #[error("node {node} predates the current rewrite and cannot be modified by it")]
    Frozen { node: NodeId },
    #[error("graph contains a cycle that is not marked as a back-edge ({remaining} nodes unordered)")]
    Cycle { remaining: usize },
    #[error(transparent)]
    Op(#[from] OpError),
}

/// Marks the node-id watermark of a graph; see [`Graph::rollback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(u32);

impl Checkpoint {
    /// Whether `node` was created after this checkpoint was taken.
    pub fn covers(self, node: NodeId) -> bool {
        node.0 >= self.0
    }
}

/// Directed operation graph. Owns its nodes exclusively; identifiers are never reused.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    results: Vec<OutputRef>,
    next_id: u32,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(&node)
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Number of consumer edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|node| node.inputs.len()).sum()
    }

    pub fn spec_of(&self, output: OutputRef) -> Option<&TensorSpec> {
        self.output(output).map(Output::spec)
    }

    pub fn output(&self, output: OutputRef) -> Option<&Output> {
        self.nodes.get(&output.node)?.outputs.get(output.port)
    }

    pub fn consumers(&self, output: OutputRef) -> &[InputRef] {
        self.output(output).map(Output::consumers).unwrap_or(&[])
    }

    pub fn source_of(&self, input: InputRef) -> Option<OutputRef> {
        Some(self.nodes.get(&input.node)?.inputs.get(input.port)?.source)
    }

    pub fn results(&self) -> &[OutputRef] {
        &self.results
    }

    pub fn is_result(&self, output: OutputRef) -> bool {
        self.results.contains(&output)
    }

    pub fn rt_info_mut(&mut self, node: NodeId) -> Option<&mut RtInfo> {
        self.nodes.get_mut(&node).map(|node| &mut node.rt_info)
    }

    pub fn output_rt_info_mut(&mut self, output: OutputRef) -> Option<&mut RtInfo> {
        let node = self.nodes.get_mut(&output.node)?;
        node.outputs.get_mut(output.port).map(|port| &mut port.rt_info)
    }

    pub fn set_name(&mut self, node: NodeId, name: impl Into<String>) -> Result<(), GraphError> {
        let entry = self
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::UnknownNode { node })?;
        entry.name = name.into();
        Ok(())
    }

    /// Adds a node computing `op` over `inputs`; output ports come from shape inference.
    pub fn add_node<O: Operation>(
        &mut self,
        op: O,
        inputs: &[OutputRef],
    ) -> Result<NodeId, GraphError> {
        self.add_shared_node(Arc::new(op), inputs)
    }

    pub fn add_shared_node(
        &mut self,
        op: Arc<dyn Operation>,
        inputs: &[OutputRef],
    ) -> Result<NodeId, GraphError> {
        let mut input_specs = Vec::with_capacity(inputs.len());
        for source in inputs {
            let spec = self
                .spec_of(*source)
                .ok_or(GraphError::UnknownOutput { output: *source })?;
            input_specs.push(spec.clone());
        }
        let output_specs = op.infer_outputs(&input_specs)?;

        let id = NodeId(self.next_id);
        self.next_id += 1;
        for (port, source) in inputs.iter().enumerate() {
            self.link(*source, id.input(port));
        }
        let node = Node {
            id,
            name: format!("{}_{}", op.kind(), id.0),
            op,
            inputs: inputs
                .iter()
                .map(|source| Input {
                    source: *source,
                    back_edge: false,
                })
                .collect(),
            outputs: output_specs
                .into_iter()
                .map(|spec| Output {
                    spec,
                    consumers: Default::default(),
                    rt_info: RtInfo::default(),
                })
                .collect(),
            rt_info: RtInfo::default(),
        };
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Marks `output` as a graph result, keeping it (and everything it reads) alive.
    pub fn add_result(&mut self, output: OutputRef) -> Result<(), GraphError> {
        if self.output(output).is_none() {
            return Err(GraphError::UnknownOutput { output });
        }
        self.results.push(output);
        Ok(())
    }

    /// Rewires `input` to read `source` through a back-edge.
    ///
    /// The source may sit later in topological order than the consumer; it must be
    /// spec-compatible with what the input currently reads.
    pub fn set_back_edge(&mut self, input: InputRef, source: OutputRef) -> Result<(), GraphError> {
        let current = self
            .source_of(input)
            .ok_or(GraphError::UnknownInput { input })?;
        let expected = self
            .spec_of(current)
            .ok_or(GraphError::UnknownOutput { output: current })?;
        let actual = self
            .spec_of(source)
            .ok_or(GraphError::UnknownOutput { output: source })?;
        if !expected.is_compatible_with(actual) {
            return Err(GraphError::ShapeMismatch {
                port: input.port,
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
        self.unlink(current, input);
        self.link(source, input);
        let slot = self.input_slot_mut(input);
        slot.source = source;
        slot.back_edge = true;
        Ok(())
    }

    /// Removes a node nobody reads from.
    pub fn remove_node(&mut self, node: NodeId) -> Result<Node, GraphError> {
        let entry = self.nodes.get(&node).ok_or(GraphError::UnknownNode { node })?;
        let externally_used = entry.outputs.iter().enumerate().any(|(port, output)| {
            self.is_result(node.output(port))
                || output.consumers.iter().any(|user| user.node != node)
        });
        if externally_used {
            return Err(GraphError::NodeInUse { node });
        }
        Ok(self.detach(node))
    }

    /// Retargets every consumer of every output port of `old` to the matching port of
    /// `replacement`, then detaches `old`.
    ///
    /// All checks run before the first edge moves, so on error the graph is untouched.
    /// RTInfo of `old` is not carried over.
    pub fn replace_node(&mut self, old: NodeId, replacement: &[OutputRef]) -> Result<(), GraphError> {
        let entry = self
            .nodes
            .get(&old)
            .ok_or(GraphError::UnknownNode { node: old })?;
        if entry.outputs.len() != replacement.len() {
            return Err(GraphError::PortCountMismatch {
                expected: entry.outputs.len(),
                actual: replacement.len(),
            });
        }
        for (port, (output, new_source)) in entry.outputs.iter().zip(replacement).enumerate() {
            let actual = self
                .spec_of(*new_source)
                .ok_or(GraphError::UnknownOutput { output: *new_source })?;
            if !output.spec.is_compatible_with(actual) {
                return Err(GraphError::ShapeMismatch {
                    port,
                    expected: output.spec.clone(),
                    actual: actual.clone(),
                });
            }
            if self.depends_on(new_source.node, old) {
                return Err(GraphError::CyclicReplacement { node: old });
            }
        }

        for (port, new_source) in replacement.iter().enumerate() {
            self.retarget(old.output(port), *new_source);
        }
        self.detach(old);
        log::trace!("replaced node {old} with {replacement:?}");
        Ok(())
    }

    /// Moves every consumer edge and result reference of `from` onto `to`.
    pub fn replace_output(&mut self, from: OutputRef, to: OutputRef) -> Result<(), GraphError> {
        let expected = self
            .spec_of(from)
            .ok_or(GraphError::UnknownOutput { output: from })?;
        let actual = self
            .spec_of(to)
            .ok_or(GraphError::UnknownOutput { output: to })?;
        if !expected.is_compatible_with(actual) {
            return Err(GraphError::ShapeMismatch {
                port: from.port,
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
        if self.depends_on(to.node, from.node) {
            return Err(GraphError::CyclicReplacement { node: from.node });
        }
        self.retarget(from, to);
        Ok(())
    }

    /// Destroys nodes whose outputs are read by no other node and no result, repeating until
    /// nothing changes. Side-effecting operations are kept. Returns the number removed.
    pub fn remove_dead_nodes(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let dead: Vec<NodeId> = self
                .nodes
                .values()
                .filter(|node| !node.op.has_side_effects())
                .filter(|node| {
                    node.outputs.iter().enumerate().all(|(port, output)| {
                        !self.is_result(node.id.output(port))
                            && output.consumers.iter().all(|user| user.node == node.id)
                    })
                })
                .map(|node| node.id)
                .collect();
            if dead.is_empty() {
                return removed;
            }
            for node in dead {
                self.detach(node);
                removed += 1;
            }
        }
    }

    /// Nodes reachable backwards from results and side-effecting nodes, back-edges included.
    pub fn live_nodes(&self) -> BTreeSet<NodeId> {
        let mut worklist: Vec<NodeId> = self.results.iter().map(|output| output.node).collect();
        worklist.extend(
            self.nodes
                .values()
                .filter(|node| node.op.has_side_effects())
                .map(|node| node.id),
        );
        let mut live = BTreeSet::new();
        while let Some(id) = worklist.pop() {
            if !live.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                worklist.extend(node.inputs.iter().map(|input| input.source.node));
            }
        }
        live
    }

    /// Removes every node outside [`Graph::live_nodes`], including dead recurrent cycles
    /// that [`Graph::remove_dead_nodes`] cannot see through.
    pub fn remove_unreachable(&mut self) -> usize {
        let live = self.live_nodes();
        let dead: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| !live.contains(id))
            .copied()
            .collect();
        for node in dead.iter().rev() {
            self.detach(*node);
        }
        dead.len()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.next_id)
    }

    /// Removes every node created after `checkpoint`, newest first.
    ///
    /// Only valid while no node that existed at the checkpoint reads from the new nodes.
    pub fn rollback(&mut self, checkpoint: Checkpoint) -> usize {
        let fresh: Vec<NodeId> = self
            .nodes
            .range(NodeId(checkpoint.0)..)
            .map(|(id, _)| *id)
            .collect();
        for node in fresh.iter().rev() {
            self.detach(*node);
        }
        self.results.retain(|output| output.node.0 < checkpoint.0);
        fresh.len()
    }

    /// Nodes created after `checkpoint` that still exist.
    pub fn created_since(&self, checkpoint: Checkpoint) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.range(NodeId(checkpoint.0)..).map(|(id, _)| *id)
    }

    /// Copies the copyable RTInfo of `from` onto `to` and records their names as fused names.
    pub fn copy_rt_info(&mut self, from: &[NodeId], to: NodeId) -> Result<(), GraphError> {
        let mut merged = RtInfo::default();
        let mut names = Vec::new();
        for source in from {
            let node = self
                .nodes
                .get(source)
                .ok_or(GraphError::UnknownNode { node: *source })?;
            merged.merge_copyable(&node.rt_info);
            names.push(node.name.clone());
            names.extend(rt_info::fused_names(&node.rt_info));
        }
        let target = self
            .nodes
            .get_mut(&to)
            .ok_or(GraphError::UnknownNode { node: to })?;
        target.rt_info.merge_copyable(&merged);
        rt_info::add_fused_names(&mut target.rt_info, names);
        Ok(())
    }

    /// Reports whether `node` reads, directly or transitively, from `target` through
    /// forward edges.
    pub fn depends_on(&self, node: NodeId, target: NodeId) -> bool {
        let mut stack = vec![node];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(entry) = self.nodes.get(&current) {
                stack.extend(
                    entry
                        .inputs
                        .iter()
                        .filter(|input| !input.back_edge)
                        .map(|input| input.source.node),
                );
            }
        }
        false
    }

    fn retarget(&mut self, from: OutputRef, to: OutputRef) {
        if from == to {
            return;
        }
        let consumers: Vec<InputRef> = self.consumers(from).to_vec();
        for user in consumers {
            self.input_slot_mut(user).source = to;
            self.link(to, user);
        }
        if let Some(output) = self
            .nodes
            .get_mut(&from.node)
            .and_then(|node| node.outputs.get_mut(from.port))
        {
            output.consumers.clear();
        }
        for result in &mut self.results {
            if *result == from {
                *result = to;
            }
        }
    }

    /// Unlinks the node from its producers and drops it, without any usage checks.
    fn detach(&mut self, node: NodeId) -> Node {
        let entry = self
            .nodes
            .remove(&node)
            .expect("detached node must exist");
        for (port, input) in entry.inputs.iter().enumerate() {
            self.unlink(input.source, node.input(port));
        }
        entry
    }

    fn link(&mut self, source: OutputRef, user: InputRef) {
        if let Some(output) = self
            .nodes
            .get_mut(&source.node)
            .and_then(|node| node.outputs.get_mut(source.port))
        {
            output.consumers.push(user);
        }
    }

    fn unlink(&mut self, source: OutputRef, user: InputRef) {
        if let Some(output) = self
            .nodes
            .get_mut(&source.node)
            .and_then(|node| node.outputs.get_mut(source.port))
        {
            output.consumers.retain(|existing| *existing != user);
        }
    }

    fn input_slot_mut(&mut self, input: InputRef) -> &mut Input {
        self.nodes
            .get_mut(&input.node)
            .and_then(|node| node.inputs.get_mut(input.port))
            .expect("input port must exist")
    }
}
