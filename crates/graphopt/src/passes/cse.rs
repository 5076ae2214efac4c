use std::collections::HashMap;

use crate::graph::{Graph, NodeId, OutputRef};
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};
use crate::rt_info;

/// Common-subexpression elimination for pure operations.
///
/// Buckets nodes by `(kind, folding veto, inputs)` in topological order and replaces a
/// later node with the first earlier one whose operation reports
/// [`same_as`](crate::op::Operation::same_as). A vetoed node only merges with another
/// vetoed node, so its consumers never end up reading an unvetoed producer.
#[derive(Default)]
pub struct CommonSubexpressionEliminationPass;

impl CommonSubexpressionEliminationPass {
    const NAME: &'static str = "cse";
}

type Key = (String, bool, Vec<(OutputRef, bool)>);

impl GraphPass for CommonSubexpressionEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut OptimizeContext) -> PassResult {
        let mut stats = PassResult::default();
        let order = match graph.topological_order() {
            Ok(order) => order,
            Err(err) => {
                log::warn!("skipping cse: {err}");
                return stats;
            }
        };

        let mut seen: HashMap<Key, Vec<NodeId>> = HashMap::new();
        for id in order {
            let Some(node) = graph.node(id) else {
                continue;
            };
            stats.iterations = stats.iterations.saturating_add(1);
            if node.op().has_side_effects() {
                continue;
            }
            let key: Key = (
                node.kind().to_string(),
                rt_info::constant_folding_is_disabled(node.rt_info()),
                node.inputs()
                    .iter()
                    .map(|input| (input.source(), input.is_back_edge()))
                    .collect(),
            );

            let candidates = seen.entry(key).or_default();
            let existing = candidates.iter().copied().find(|candidate| {
                graph.node(*candidate).is_some_and(|candidate| {
                    candidate.outputs().len() == node.outputs().len()
                        && candidate.op().same_as(node.op())
                })
            });
            let Some(existing) = existing else {
                candidates.push(id);
                continue;
            };

            let outputs: Vec<OutputRef> = (0..node.outputs().len())
                .map(|port| existing.output(port))
                .collect();
            match graph.replace_node(id, &outputs) {
                Ok(()) => {
                    log::debug!("cse: node {id} merged into {existing}");
                    stats.rewrites_applied += 1;
                    stats.erased_nodes += 1;
                    stats.changed = true;
                }
                Err(err) => log::debug!("cse: keeping node {id}: {err}"),
            }
        }

        stats
    }
}
