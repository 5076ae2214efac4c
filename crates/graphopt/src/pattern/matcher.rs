use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{Pattern, PatternId, PatternNode};
use crate::graph::{Graph, NodeId, OutputRef};

/// Successful, fully resolved match of a pattern against a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    root: OutputRef,
    captures: BTreeMap<String, OutputRef>,
    matched: BTreeSet<NodeId>,
}

impl Match {
    /// Value the pattern root matched.
    pub fn root(&self) -> OutputRef {
        self.root
    }

    pub fn get(&self, label: &str) -> Option<OutputRef> {
        self.captures.get(label).copied()
    }

    pub fn node(&self, label: &str) -> Option<NodeId> {
        self.get(label).map(|value| value.node)
    }

    pub fn captures(&self) -> &BTreeMap<String, OutputRef> {
        &self.captures
    }

    /// Every graph node consumed by a structural pattern node, in creation order.
    pub fn matched_nodes(&self) -> &BTreeSet<NodeId> {
        &self.matched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Matched,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Obligation {
    target: PatternId,
    value: OutputRef,
}

/// Tentative bindings of one match attempt. Alternatives fork a clone and commit it only on
/// success, so a failed alternative never leaks bindings.
#[derive(Debug, Clone, Default)]
struct MatchState {
    captures: BTreeMap<String, OutputRef>,
    matched: BTreeSet<NodeId>,
    visited: HashMap<(PatternId, OutputRef), Visit>,
    obligations: Vec<Obligation>,
}

/// Backtracking matcher for one [`Pattern`].
///
/// A branch node succeeds immediately and leaves an obligation to match its target at the
/// same value. Obligations are discharged after the root match, consulting the visited set
/// first, which is what makes self-referential patterns terminate on recurrent graphs.
#[derive(Debug, Clone, Copy)]
pub struct Matcher<'p> {
    pattern: &'p Pattern,
}

impl<'p> Matcher<'p> {
    pub fn new(pattern: &'p Pattern) -> Self {
        Self { pattern }
    }

    pub fn pattern(&self) -> &'p Pattern {
        self.pattern
    }

    /// Matches the pattern root against `value`. All or nothing: either every obligation
    /// resolves and a [`Match`] is returned, or nothing is.
    pub fn match_value(&self, graph: &Graph, value: OutputRef) -> Option<Match> {
        graph.output(value)?;
        let mut state = MatchState::default();
        self.match_at(graph, self.pattern.root(), value, &mut state)?;
        self.resolve_obligations(graph, &mut state)?;
        log::trace!(
            "pattern matched at {value} covering {} nodes",
            state.matched.len()
        );
        Some(Match {
            root: value,
            captures: state.captures,
            matched: state.matched,
        })
    }

    /// Tries each output port of `node` in order and returns the first match.
    pub fn match_node(&self, graph: &Graph, node: NodeId) -> Option<Match> {
        let ports = graph.node(node)?.outputs().len();
        (0..ports).find_map(|port| self.match_value(graph, node.output(port)))
    }

    fn resolve_obligations(&self, graph: &Graph, state: &mut MatchState) -> Option<()> {
        let mut next = 0;
        while let Some(obligation) = state.obligations.get(next).copied() {
            next += 1;
            match state.visited.get(&(obligation.target, obligation.value)) {
                Some(Visit::Matched | Visit::InProgress) => continue,
                Some(Visit::Failed) => return None,
                None => self.match_at(graph, obligation.target, obligation.value, state)?,
            }
        }
        Some(())
    }

    fn match_at(
        &self,
        graph: &Graph,
        id: PatternId,
        value: OutputRef,
        state: &mut MatchState,
    ) -> Option<()> {
        let key = (id, value);
        match state.visited.get(&key) {
            // Re-entering an in-progress pair means the graph cycled back; assume success.
            Some(Visit::Matched | Visit::InProgress) => return Some(()),
            Some(Visit::Failed) => return None,
            None => {}
        }

        // Only `Or` and `Optional` fork; any other failure fails every enclosing node up to
        // the nearest fork or the whole attempt, so partial bindings are never observed.
        state.visited.insert(key, Visit::InProgress);
        if self.match_node_kind(graph, id, value, state).is_some() {
            state.visited.insert(key, Visit::Matched);
            Some(())
        } else {
            state.visited.insert(key, Visit::Failed);
            None
        }
    }

    fn match_node_kind(
        &self,
        graph: &Graph,
        id: PatternId,
        value: OutputRef,
        state: &mut MatchState,
    ) -> Option<()> {
        match self.pattern.node(id)? {
            PatternNode::Wildcard => {
                graph.output(value)?;
                state.matched.insert(value.node);
                Some(())
            }
            PatternNode::Op { kind, inputs } => {
                let node = graph.node(value.node)?;
                if kind.as_deref().is_some_and(|kind| kind != node.kind()) {
                    return None;
                }
                if node.inputs().len() != inputs.len() {
                    return None;
                }
                for (pattern_input, input) in inputs.iter().zip(node.inputs()) {
                    self.match_at(graph, *pattern_input, input.source(), state)?;
                }
                state.matched.insert(value.node);
                Some(())
            }
            PatternNode::Label { name, inner } => {
                if let Some(bound) = state.captures.get(name) {
                    if *bound != value {
                        return None;
                    }
                }
                self.match_at(graph, *inner, value, state)?;
                state.captures.insert(name.clone(), value);
                Some(())
            }
            PatternNode::Predicate { test, inner, .. } => {
                if !test(graph, value) {
                    return None;
                }
                self.match_at(graph, *inner, value, state)
            }
            PatternNode::Or(alternatives) => {
                for alternative in alternatives {
                    let mut fork = state.clone();
                    if self.match_at(graph, *alternative, value, &mut fork).is_some() {
                        *state = fork;
                        return Some(());
                    }
                }
                None
            }
            PatternNode::Optional(inner) => {
                let mut fork = state.clone();
                if self.match_at(graph, *inner, value, &mut fork).is_some() {
                    *state = fork;
                    return Some(());
                }
                match self.skip_target(*inner) {
                    Some(passthrough) => self.match_at(graph, passthrough, value, state),
                    None => Some(()),
                }
            }
            PatternNode::Branch { target, .. } => {
                let obligation = Obligation {
                    target: (*target)?,
                    value,
                };
                if !state.obligations.contains(&obligation) {
                    state.obligations.push(obligation);
                }
                Some(())
            }
        }
    }

    /// When an optional single-input operation is absent, its input pattern is matched
    /// against the same value instead.
    fn skip_target(&self, id: PatternId) -> Option<PatternId> {
        match self.pattern.node(id)? {
            PatternNode::Op { inputs, .. } if inputs.len() == 1 => inputs.first().copied(),
            PatternNode::Label { inner, .. } | PatternNode::Predicate { inner, .. } => {
                self.skip_target(*inner)
            }
            _ => None,
        }
    }
}
