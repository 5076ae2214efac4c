use std::sync::Arc;

use crate::graph::{Checkpoint, Graph, GraphError, NodeId, OutputRef};
use crate::op::Operation;
use crate::ops::Constant;
use crate::rt_info::{self, RtInfo};
use crate::tensor::Tensor;

/// Mutation session handed to a rule callback.
///
/// Existing nodes are read-only; the callback may only create nodes and edit the RTInfo of
/// nodes it created, so the engine can always roll the session back.
pub struct GraphRewriter<'g> {
    graph: &'g mut Graph,
    checkpoint: Checkpoint,
}

impl<'g> GraphRewriter<'g> {
    pub fn new(graph: &'g mut Graph) -> Self {
        let checkpoint = graph.checkpoint();
        Self { graph, checkpoint }
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    pub fn add_node<O: Operation>(
        &mut self,
        op: O,
        inputs: &[OutputRef],
    ) -> Result<NodeId, GraphError> {
        self.graph.add_node(op, inputs)
    }

    pub fn add_shared_node(
        &mut self,
        op: Arc<dyn Operation>,
        inputs: &[OutputRef],
    ) -> Result<NodeId, GraphError> {
        self.graph.add_shared_node(op, inputs)
    }

    pub fn add_constant(&mut self, value: Tensor) -> Result<NodeId, GraphError> {
        self.graph.add_node(Constant::new(value), &[])
    }

    pub fn set_name(&mut self, node: NodeId, name: impl Into<String>) -> Result<(), GraphError> {
        self.owned(node)?;
        self.graph.set_name(node, name)
    }

    pub fn rt_info_mut(&mut self, node: NodeId) -> Result<&mut RtInfo, GraphError> {
        self.owned(node)?;
        self.graph
            .rt_info_mut(node)
            .ok_or(GraphError::UnknownNode { node })
    }

    /// Copies copyable RTInfo and fused names of `from` onto the new node `to`.
    pub fn copy_rt_info(&mut self, from: &[NodeId], to: NodeId) -> Result<(), GraphError> {
        self.owned(to)?;
        self.graph.copy_rt_info(from, to)
    }

    /// Marks a new node as not foldable. The marker is not copyable, so rules replacing a
    /// vetoed node call this on the replacement to keep the veto alive.
    pub fn disable_constant_folding(&mut self, node: NodeId) -> Result<(), GraphError> {
        rt_info::disable_constant_folding(self.rt_info_mut(node)?);
        Ok(())
    }

    fn owned(&self, node: NodeId) -> Result<(), GraphError> {
        if !self.graph.contains(node) {
            return Err(GraphError::UnknownNode { node });
        }
        if !self.checkpoint.covers(node) {
            return Err(GraphError::Frozen { node });
        }
        Ok(())
    }
}
