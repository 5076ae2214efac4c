use crate::graph::Graph;
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};
use crate::rt_info;

/// Marks every node of the given kinds so constant folding leaves it alone, e.g. to keep
/// shape computations symbolic for later passes.
#[derive(Debug, Clone, Default)]
pub struct DisableConstantFoldingPass {
    kinds: Vec<String>,
}

impl DisableConstantFoldingPass {
    const NAME: &'static str = "disable-constant-folding";

    pub fn new<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }
}

impl GraphPass for DisableConstantFoldingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut OptimizeContext) -> PassResult {
        let targets: Vec<_> = graph
            .nodes()
            .filter(|node| self.kinds.iter().any(|kind| kind == node.kind()))
            .filter(|node| !rt_info::constant_folding_is_disabled(node.rt_info()))
            .map(|node| node.id())
            .collect();

        for node in &targets {
            if let Some(rt_info) = graph.rt_info_mut(*node) {
                rt_info::disable_constant_folding(rt_info);
            }
        }

        PassResult {
            changed: !targets.is_empty(),
            iterations: 1,
            rewrites_applied: targets.len(),
            ..PassResult::default()
        }
    }
}
