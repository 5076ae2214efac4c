//! Pattern-driven graph rewriting.

mod driver;
mod rewriter;

use std::collections::BTreeSet;
use std::fmt;

use crate::graph::{GraphError, NodeId, OutputRef};
use crate::pattern::{Match, Pattern};

pub use driver::{apply_rules_greedily, GreedyConfig, PassState, RewriteReport};
pub use rewriter::GraphRewriter;

/// What a rule callback asks the engine to do with a structural match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteAction {
    /// Retarget every consumer of `old` to `outputs`, port by port.
    Replace { old: NodeId, outputs: Vec<OutputRef> },
    /// The match is structurally fine but ineligible (e.g. folding is vetoed).
    Reject,
    NoChange,
}

/// A (pattern, callback) pair.
pub trait RewriteRule: Send + Sync {
    fn name(&self) -> &str;

    fn pattern(&self) -> &Pattern;

    /// Inspects `matched` and optionally builds a replacement through `rewriter`.
    ///
    /// Nodes added through `rewriter` are discarded unless the returned action is a
    /// [`RewriteAction::Replace`] that the graph accepts.
    fn rewrite(&self, matched: &Match, rewriter: &mut GraphRewriter<'_>) -> RewriteAction;
}

/// Rule built from a closure, handy for one-off rewrites.
pub struct FnRule<F> {
    name: String,
    pattern: Pattern,
    callback: F,
}

impl<F> FnRule<F>
where
    F: Fn(&Match, &mut GraphRewriter<'_>) -> RewriteAction + Send + Sync,
{
    pub fn new(name: impl Into<String>, pattern: Pattern, callback: F) -> Self {
        Self {
            name: name.into(),
            pattern,
            callback,
        }
    }
}

impl<F> RewriteRule for FnRule<F>
where
    F: Fn(&Match, &mut GraphRewriter<'_>) -> RewriteAction + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn rewrite(&self, matched: &Match, rewriter: &mut GraphRewriter<'_>) -> RewriteAction {
        (self.callback)(matched, rewriter)
    }
}

/// Non-fatal problems recorded while rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The graph refused a rule's replacement; the attempt was rolled back.
    ReplacementFailed {
        rule: String,
        node: NodeId,
        error: GraphError,
    },
    /// A pass or fixed-point group stopped before reaching a fixed point.
    BudgetExhausted { pass: String, iterations: usize },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::ReplacementFailed { rule, node, error } => {
                write!(f, "rule {rule} could not replace node {node}: {error}")
            }
            Diagnostic::BudgetExhausted { pass, iterations } => {
                write!(f, "{pass} did not converge within {iterations} iterations")
            }
        }
    }
}

/// Mutable set that collects rewrite rules prior to freezing.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<R>(&mut self, rule: R) -> &mut Self
    where
        R: RewriteRule + 'static,
    {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn freeze(self) -> FrozenRuleSet {
        let anchors = self
            .rules
            .iter()
            .map(|rule| rule.pattern().root_kinds())
            .collect();
        FrozenRuleSet {
            rules: self.rules,
            anchors,
        }
    }
}

/// Immutable rules, indexed by the node kinds their pattern roots can anchor on.
pub struct FrozenRuleSet {
    rules: Vec<Box<dyn RewriteRule>>,
    anchors: Vec<Option<BTreeSet<String>>>,
}

impl FrozenRuleSet {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &dyn RewriteRule)> {
        self.rules.iter().enumerate().map(|(idx, rule)| (idx, &**rule))
    }

    /// Rules that may anchor on a node of `kind`, in registration order.
    pub fn matching<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = (usize, &'a dyn RewriteRule)> + 'a {
        self.iter().filter(move |(idx, _)| {
            self.anchors[*idx]
                .as_ref()
                .map_or(true, |kinds| kinds.contains(kind))
        })
    }
}
