use crate::graph::Graph;
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

/// Removes nodes that neither a graph result nor a side-effecting node depends on.
#[derive(Default)]
pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    const NAME: &'static str = "dce";
}

impl GraphPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut OptimizeContext) -> PassResult {
        let removed = graph.remove_unreachable();
        PassResult {
            changed: removed > 0,
            iterations: 1,
            erased_nodes: removed,
            ..PassResult::default()
        }
    }
}
