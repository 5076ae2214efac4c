//! Pass infrastructure: a context-aware pass trait, a greedy rewrite-pass adapter and a
//! pipeline builder with bounded fixed points.

mod context;
mod pipeline;

use thiserror::Error;

use crate::graph::{Graph, GraphError};
use crate::rewrite::{apply_rules_greedily, Diagnostic, FrozenRuleSet, GreedyConfig};

pub use context::{OptimizeConfig, OptimizeContext};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineReport, Step};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptimizeError {
    #[error("{pass} did not converge within {iterations} iterations")]
    BudgetExhausted { pass: String, iterations: usize },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Number of sweeps executed while applying the pass.
    pub iterations: usize,
    /// Total number of rewrites applied by the pass.
    pub rewrites_applied: usize,
    /// Nodes removed by the pass.
    pub erased_nodes: usize,
    /// Whether the pass stopped on its budget instead of a fixed point.
    pub budget_exhausted: bool,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_nodes: self.erased_nodes + other.erased_nodes,
            budget_exhausted: self.budget_exhausted || other.budget_exhausted,
        }
    }
}

/// Canonical interface implemented by optimization passes.
pub trait GraphPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PassResult;
}

/// Runs a frozen rule set through the greedy driver, forwarding diagnostics to the context.
pub fn run_rules(
    name: &str,
    graph: &mut Graph,
    rules: &FrozenRuleSet,
    cx: &mut OptimizeContext,
) -> PassResult {
    let cfg = cx.greedy_config();
    run_rules_with(name, graph, rules, &cfg, cx)
}

/// [`run_rules`] with an explicit driver configuration.
pub fn run_rules_with(
    name: &str,
    graph: &mut Graph,
    rules: &FrozenRuleSet,
    cfg: &GreedyConfig,
    cx: &mut OptimizeContext,
) -> PassResult {
    let report = apply_rules_greedily(graph, rules, cfg);
    let budget_exhausted = !report.converged();
    for diagnostic in report.diagnostics {
        let diagnostic = match diagnostic {
            Diagnostic::BudgetExhausted { iterations, .. } => Diagnostic::BudgetExhausted {
                pass: name.to_string(),
                iterations,
            },
            other => other,
        };
        cx.record(diagnostic);
    }
    PassResult {
        changed: report.applied > 0 || report.dce_removed > 0,
        iterations: report.iterations,
        rewrites_applied: report.applied,
        erased_nodes: report.dce_removed,
        budget_exhausted,
    }
}
