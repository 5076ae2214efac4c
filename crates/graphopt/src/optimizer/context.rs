use crate::alloc::Allocator;
use crate::rewrite::{Diagnostic, GreedyConfig};

#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    pub max_rewrite_iters: usize,
    pub fixed_point_iters: usize,
    pub enable_dce: bool,
    pub log_pass_stats: bool,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            max_rewrite_iters: crate::env::max_rewrite_iters(),
            fixed_point_iters: crate::env::fixed_point_iters(),
            enable_dce: true,
            log_pass_stats: crate::env::pass_stats_enabled(),
        }
    }
}

/// State shared by every pass of one optimization run.
#[derive(Debug, Default)]
pub struct OptimizeContext {
    allocator: Allocator,
    cfg: OptimizeConfig,
    diagnostics: Vec<Diagnostic>,
}

impl OptimizeContext {
    pub fn new(allocator: Allocator, cfg: OptimizeConfig) -> Self {
        Self {
            allocator,
            cfg,
            diagnostics: Vec::new(),
        }
    }

    /// Allocator backing tensors produced by constant evaluation.
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn config(&self) -> &OptimizeConfig {
        &self.cfg
    }

    pub fn greedy_config(&self) -> GreedyConfig {
        GreedyConfig {
            max_iterations: self.cfg.max_rewrite_iters,
            enable_dce: self.cfg.enable_dce,
        }
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}
