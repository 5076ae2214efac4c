use crate::graph::Graph;
use crate::optimizer::OptimizeError;
use crate::pattern::Matcher;

use super::{Diagnostic, FrozenRuleSet, GraphRewriter, RewriteAction};

#[derive(Debug, Clone)]
pub struct GreedyConfig {
    /// Maximum number of full sweeps over the graph. Zero is treated as one.
    pub max_iterations: usize,
    /// Sweep unreferenced nodes once rewriting stops.
    pub enable_dce: bool,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            max_iterations: crate::env::max_rewrite_iters(),
            enable_dce: true,
        }
    }
}

/// Lifecycle of one greedy rewrite pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    #[default]
    Pending,
    Scanning,
    Matched,
    Applying,
    Converged,
    BudgetExhausted,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RewriteReport {
    /// `Converged` or `BudgetExhausted` once the driver returns.
    pub state: PassState,
    /// Sweeps executed.
    pub iterations: usize,
    pub applied: usize,
    pub rejected: usize,
    pub dce_removed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl RewriteReport {
    pub fn changed(&self) -> bool {
        self.applied > 0 || self.dce_removed > 0
    }

    pub fn converged(&self) -> bool {
        self.state == PassState::Converged
    }

    /// Turns budget exhaustion into an error for callers that treat it as fatal.
    pub fn check_converged(&self, pass: &str) -> Result<(), OptimizeError> {
        match self.state {
            PassState::BudgetExhausted => Err(OptimizeError::BudgetExhausted {
                pass: pass.to_string(),
                iterations: self.iterations,
            }),
            _ => Ok(()),
        }
    }
}

fn transition(state: &mut PassState, next: PassState) {
    log::trace!("rewrite pass {state:?} -> {next:?}");
    *state = next;
}

/// Applies `rules` until a sweep changes nothing or the sweep budget runs out.
///
/// Anchors are visited in node-creation order; for each anchor the first rule whose pattern
/// matches decides the outcome. A replacement the graph refuses is rolled back and recorded
/// as a diagnostic. Exhausting the budget is not an error: the graph is left valid and the
/// report says `BudgetExhausted`.
pub fn apply_rules_greedily(
    graph: &mut Graph,
    rules: &FrozenRuleSet,
    cfg: &GreedyConfig,
) -> RewriteReport {
    let mut report = RewriteReport::default();
    let mut state = PassState::Pending;
    if rules.is_empty() {
        transition(&mut state, PassState::Converged);
        report.state = state;
        return report;
    }

    let max_iterations = cfg.max_iterations.max(1);
    loop {
        if report.iterations >= max_iterations {
            transition(&mut state, PassState::BudgetExhausted);
            log::warn!(
                "rewrite did not converge within {} sweeps; keeping the last valid graph",
                report.iterations
            );
            report.diagnostics.push(Diagnostic::BudgetExhausted {
                pass: "greedy rewrite".to_string(),
                iterations: report.iterations,
            });
            break;
        }
        report.iterations += 1;
        transition(&mut state, PassState::Scanning);

        let mut changed = false;
        for anchor in graph.node_ids() {
            let Some(node) = graph.node(anchor) else {
                continue;
            };
            let kind = node.kind().to_string();

            for (_, rule) in rules.matching(&kind) {
                let Some(matched) = Matcher::new(rule.pattern()).match_node(graph, anchor) else {
                    continue;
                };
                transition(&mut state, PassState::Matched);
                log::debug!("rule {} matched at node {anchor}", rule.name());

                let checkpoint = graph.checkpoint();
                let action = rule.rewrite(&matched, &mut GraphRewriter::new(graph));
                match action {
                    RewriteAction::Replace { old, outputs } => {
                        transition(&mut state, PassState::Applying);
                        match graph.replace_node(old, &outputs) {
                            Ok(()) => {
                                report.applied += 1;
                                changed = true;
                                log::debug!("rule {} replaced node {old}", rule.name());
                            }
                            Err(error) => {
                                graph.rollback(checkpoint);
                                log::warn!(
                                    "rule {} could not replace node {old}: {error}",
                                    rule.name()
                                );
                                report.diagnostics.push(Diagnostic::ReplacementFailed {
                                    rule: rule.name().to_string(),
                                    node: old,
                                    error,
                                });
                            }
                        }
                    }
                    RewriteAction::Reject => {
                        graph.rollback(checkpoint);
                        report.rejected += 1;
                    }
                    RewriteAction::NoChange => {
                        graph.rollback(checkpoint);
                    }
                }
                transition(&mut state, PassState::Scanning);
                break;
            }
        }

        if !changed {
            transition(&mut state, PassState::Converged);
            break;
        }
    }

    if cfg.enable_dce {
        report.dce_removed = graph.remove_dead_nodes();
    }
    report.state = state;
    report
}
