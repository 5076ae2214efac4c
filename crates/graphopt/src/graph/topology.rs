use std::collections::{BTreeMap, BTreeSet};

use super::{Graph, GraphError, NodeId};

impl Graph {
    /// Orders nodes so every producer precedes its consumers, ignoring back-edges.
    ///
    /// Ties are broken by creation order, so the result is deterministic.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut pending: BTreeMap<NodeId, usize> = BTreeMap::new();
        for node in self.nodes() {
            let forward = node
                .inputs()
                .iter()
                .filter(|input| !input.is_back_edge())
                .count();
            pending.insert(node.id(), forward);
        }

        let mut ready: BTreeSet<NodeId> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            let Some(node) = self.node(id) else {
                continue;
            };
            for output in node.outputs() {
                for user in output.consumers() {
                    let back_edge = self
                        .node(user.node)
                        .and_then(|consumer| consumer.input(user.port))
                        .map_or(true, |input| input.is_back_edge());
                    if back_edge {
                        continue;
                    }
                    if let Some(count) = pending.get_mut(&user.node) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(user.node);
                        }
                    }
                }
            }
        }

        if order.len() != self.len() {
            return Err(GraphError::Cycle {
                remaining: self.len() - order.len(),
            });
        }
        Ok(order)
    }

    /// Checks that forward edges are acyclic and that every edge, back-edges included, is
    /// still type/shape compatible with what its consumer was built for.
    pub fn topologically_valid(&self) -> bool {
        if self.topological_order().is_err() {
            return false;
        }
        for node in self.nodes() {
            let mut specs = Vec::with_capacity(node.inputs().len());
            for input in node.inputs() {
                match self.spec_of(input.source()) {
                    Some(spec) => specs.push(spec.clone()),
                    None => return false,
                }
            }
            let Ok(inferred) = node.op().infer_outputs(&specs) else {
                return false;
            };
            if inferred.len() != node.outputs().len()
                || inferred
                    .iter()
                    .zip(node.outputs())
                    .any(|(spec, output)| !spec.is_compatible_with(output.spec()))
            {
                return false;
            }
        }
        true
    }
}
