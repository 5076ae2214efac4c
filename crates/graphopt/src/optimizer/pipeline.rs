use std::sync::Arc;

use crate::graph::Graph;
use crate::passes::{
    CommonSubexpressionEliminationPass, ConstantFoldingPass, DeadCodeEliminationPass,
};
use crate::rewrite::Diagnostic;

use super::{GraphPass, OptimizeConfig, OptimizeContext, OptimizeError, PassResult};

pub enum Step {
    Pass(Arc<dyn GraphPass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

/// Collects passes in the order the caller declares them.
#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn GraphPass>) -> &mut Self {
        self.steps.push(Step::Pass(pass));
        self
    }

    /// Repeats the passes added by `build` until none of them changes the graph, at most
    /// `max_iters` times.
    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F) -> &mut Self
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
        self
    }

    pub fn finish(self) -> Pipeline {
        Pipeline { steps: self.steps }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PipelineReport {
    pub totals: PassResult,
    /// Per-pass results in execution order.
    pub passes: Vec<(&'static str, PassResult)>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PipelineReport {
    pub fn converged(&self) -> bool {
        !self
            .diagnostics
            .iter()
            .any(|diagnostic| matches!(diagnostic, Diagnostic::BudgetExhausted { .. }))
    }

    /// Turns the first budget exhaustion into an error for callers that treat it as fatal.
    pub fn check_converged(&self) -> Result<(), OptimizeError> {
        for diagnostic in &self.diagnostics {
            if let Diagnostic::BudgetExhausted { pass, iterations } = diagnostic {
                return Err(OptimizeError::BudgetExhausted {
                    pass: pass.clone(),
                    iterations: *iterations,
                });
            }
        }
        Ok(())
    }
}

/// Fixed sequence of passes and fixed-point groups.
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Folding, CSE and DCE repeated to a fixed point.
    pub fn standard(cfg: &OptimizeConfig) -> Self {
        let mut builder = PipelineBuilder::new();
        builder.fixed_point(cfg.fixed_point_iters, |p| {
            p.pass(Arc::new(ConstantFoldingPass));
            p.pass(Arc::new(CommonSubexpressionEliminationPass));
            p.pass(Arc::new(DeadCodeEliminationPass));
        });
        builder.finish()
    }

    pub fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PipelineReport {
        let mut report = PipelineReport::default();
        run_steps(&self.steps, graph, cx, &mut report);
        report.diagnostics = cx.take_diagnostics();
        report
    }
}

fn run_steps(
    steps: &[Step],
    graph: &mut Graph,
    cx: &mut OptimizeContext,
    report: &mut PipelineReport,
) -> bool {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let stats = pass.run(graph, cx);
                changed_any |= stats.changed;
                report.totals = report.totals.merge(stats);
                report.passes.push((pass.name(), stats));
                log_pass_stats(pass.name(), graph, stats, cx.config().log_pass_stats);
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        log::warn!("fixed-point group still changing after {iter} iterations");
                        cx.record(Diagnostic::BudgetExhausted {
                            pass: "fixed-point".to_string(),
                            iterations: iter,
                        });
                        break;
                    }
                    iter += 1;
                    let changed = run_steps(steps, graph, cx, report);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    changed_any
}

fn log_pass_stats(name: &str, graph: &Graph, stats: PassResult, enabled: bool) {
    let level = if enabled {
        log::Level::Info
    } else {
        log::Level::Debug
    };
    log::log!(
        level,
        "pass {name}: changed={} iterations={} rewrites={} erased={} nodes={}",
        stats.changed,
        stats.iterations,
        stats.rewrites_applied,
        stats.erased_nodes,
        graph.len()
    );
}
