use crate::alloc::Allocator;
use crate::graph::{Graph, NodeId, OutputRef};
use crate::optimizer::{run_rules_with, GraphPass, OptimizeContext, PassResult};
use crate::pattern::{Match, Pattern};
use crate::rewrite::{GraphRewriter, GreedyConfig, RewriteAction, RewriteRule, RuleSet};
use crate::rt_info;
use crate::tensor::Tensor;

fn folding_vetoed(graph: &Graph, node: NodeId) -> bool {
    graph
        .node(node)
        .is_some_and(|node| rt_info::constant_folding_is_disabled(node.rt_info()))
}

/// An evaluable, non-constant node whose inputs are all constants and that neither it nor
/// any of its producers vetoes folding.
fn foldable(graph: &Graph, value: OutputRef) -> bool {
    let Some(node) = graph.node(value.node) else {
        return false;
    };
    if node.op().is_constant() || !node.op().can_evaluate() || node.op().has_side_effects() {
        return false;
    }
    if folding_vetoed(graph, node.id()) {
        return false;
    }
    node.inputs().iter().all(|input| {
        let producer = input.source().node;
        !folding_vetoed(graph, producer)
            && graph
                .node(producer)
                .is_some_and(|producer| producer.op().is_constant())
    })
}

/// Replaces a node with constants holding its evaluated outputs.
pub struct FoldConstantNode {
    allocator: Allocator,
    pattern: Pattern,
}

impl FoldConstantNode {
    pub fn new(allocator: Allocator) -> Self {
        let mut builder = Pattern::builder();
        let any = builder.wildcard();
        let root = builder.predicate("foldable", any, foldable);
        let pattern = builder
            .finish(root)
            .expect("constant folding pattern is well formed");
        Self { allocator, pattern }
    }
}

impl RewriteRule for FoldConstantNode {
    fn name(&self) -> &str {
        "fold-constant-node"
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn rewrite(&self, matched: &Match, rewriter: &mut GraphRewriter<'_>) -> RewriteAction {
        let old = matched.root().node;
        let graph = rewriter.graph();
        let Some(node) = graph.node(old) else {
            return RewriteAction::NoChange;
        };
        // Re-check the veto; the pattern only guards the match.
        if rt_info::constant_folding_is_disabled(node.rt_info()) {
            return RewriteAction::Reject;
        }

        let mut inputs: Vec<Tensor> = Vec::with_capacity(node.inputs().len());
        for input in node.inputs() {
            let Some(value) = graph
                .node(input.source().node)
                .and_then(|producer| producer.op().constant_value())
            else {
                return RewriteAction::NoChange;
            };
            inputs.push(value.clone());
        }
        let op = node.shared_op();
        let input_refs: Vec<&Tensor> = inputs.iter().collect();
        let values = match op.evaluate(&input_refs, &self.allocator) {
            Ok(values) => values,
            Err(err) => {
                log::debug!("not folding node {old}: {err}");
                return RewriteAction::NoChange;
            }
        };

        let mut outputs = Vec::with_capacity(values.len());
        for value in values {
            let constant = match rewriter.add_constant(value) {
                Ok(constant) => constant,
                Err(err) => {
                    log::debug!("not folding node {old}: {err}");
                    return RewriteAction::NoChange;
                }
            };
            if let Err(err) = rewriter.copy_rt_info(&[old], constant) {
                log::debug!("not folding node {old}: {err}");
                return RewriteAction::NoChange;
            }
            outputs.push(constant.output(0));
        }
        RewriteAction::Replace { old, outputs }
    }
}

/// Evaluates constant sub-expressions, honouring the folding veto.
#[derive(Default)]
pub struct ConstantFoldingPass;

impl ConstantFoldingPass {
    const NAME: &'static str = "constant-folding";
}

impl GraphPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PassResult {
        let mut rules = RuleSet::new();
        rules.add(FoldConstantNode::new(cx.allocator().clone()));
        let frozen = rules.freeze();
        // Folding never deletes nodes; dead ones, vetoed or not, are left to the DCE pass.
        let cfg = GreedyConfig {
            enable_dce: false,
            ..cx.greedy_config()
        };
        run_rules_with(Self::NAME, graph, &frozen, &cfg, cx)
    }
}
