//! Declarative sub-graph patterns.
//!
//! A [`Pattern`] is an arena of [`PatternNode`]s built once through [`PatternBuilder`] and
//! matched many times by [`Matcher`]. Patterns never reference a concrete graph.

mod matcher;
pub mod predicates;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::{Graph, OutputRef};

pub use matcher::{Match, Matcher};

/// Boolean test over a candidate value and the node producing it.
pub type NodePredicate = Arc<dyn Fn(&Graph, OutputRef) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternId(pub u32);

impl PatternId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern node {0:?} does not exist")]
    UnknownPattern(PatternId),
    #[error("branch {0:?} has no target pattern")]
    UnresolvedBranch(PatternId),
    #[error("pattern node {0:?} is not a branch")]
    NotABranch(PatternId),
    #[error("alternation needs at least one alternative")]
    EmptyAlternation,
}

#[derive(Clone)]
pub enum PatternNode {
    /// Any single node.
    Wildcard,
    /// A node of the given kind (any kind when `None`) whose inputs match `inputs` in order.
    Op {
        kind: Option<String>,
        inputs: Vec<PatternId>,
    },
    /// Binds the value matched by `inner` to `name`; a second binding must be the same value.
    Label { name: String, inner: PatternId },
    Predicate {
        name: String,
        test: NodePredicate,
        inner: PatternId,
    },
    /// First alternative that matches wins.
    Or(Vec<PatternId>),
    /// `inner`, or nothing at all; see [`Matcher`] for the skip rule.
    Optional(PatternId),
    /// Deferred reference to `target`, resolved after the surrounding match completes.
    Branch {
        id: BranchId,
        target: Option<PatternId>,
    },
}

impl fmt::Debug for PatternNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternNode::Wildcard => f.write_str("Wildcard"),
            PatternNode::Op { kind, inputs } => f
                .debug_struct("Op")
                .field("kind", kind)
                .field("inputs", inputs)
                .finish(),
            PatternNode::Label { name, inner } => f
                .debug_struct("Label")
                .field("name", name)
                .field("inner", inner)
                .finish(),
            PatternNode::Predicate { name, inner, .. } => f
                .debug_struct("Predicate")
                .field("name", name)
                .field("inner", inner)
                .finish(),
            PatternNode::Or(alternatives) => f.debug_tuple("Or").field(alternatives).finish(),
            PatternNode::Optional(inner) => f.debug_tuple("Optional").field(inner).finish(),
            PatternNode::Branch { id, target } => f
                .debug_struct("Branch")
                .field("id", id)
                .field("target", target)
                .finish(),
        }
    }
}

/// Immutable, shareable pattern graph with a designated root.
#[derive(Debug, Clone)]
pub struct Pattern {
    nodes: Vec<PatternNode>,
    root: PatternId,
}

impl Pattern {
    pub fn builder() -> PatternBuilder {
        PatternBuilder::new()
    }

    pub fn root(&self) -> PatternId {
        self.root
    }

    pub fn node(&self, id: PatternId) -> Option<&PatternNode> {
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kinds a root candidate must have, or `None` when any node may anchor a match.
    pub fn root_kinds(&self) -> Option<BTreeSet<String>> {
        self.kinds_of(self.root, &mut HashSet::new())
    }

    fn kinds_of(&self, id: PatternId, visiting: &mut HashSet<PatternId>) -> Option<BTreeSet<String>> {
        if !visiting.insert(id) {
            return None;
        }
        match self.node(id)? {
            PatternNode::Op {
                kind: Some(kind), ..
            } => Some(BTreeSet::from([kind.clone()])),
            PatternNode::Op { kind: None, .. }
            | PatternNode::Wildcard
            | PatternNode::Optional(_) => None,
            PatternNode::Label { inner, .. } | PatternNode::Predicate { inner, .. } => {
                self.kinds_of(*inner, visiting)
            }
            PatternNode::Or(alternatives) => {
                let mut kinds = BTreeSet::new();
                for alternative in alternatives {
                    kinds.extend(self.kinds_of(*alternative, visiting)?);
                }
                Some(kinds)
            }
            PatternNode::Branch { target, .. } => self.kinds_of((*target)?, visiting),
        }
    }
}

/// Incrementally assembles a [`Pattern`].
#[derive(Debug, Default)]
pub struct PatternBuilder {
    nodes: Vec<PatternNode>,
    next_branch: u32,
}

impl PatternBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: PatternNode) -> PatternId {
        let id = PatternId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn wildcard(&mut self) -> PatternId {
        self.push(PatternNode::Wildcard)
    }

    pub fn op(&mut self, kind: &str, inputs: impl Into<Vec<PatternId>>) -> PatternId {
        self.push(PatternNode::Op {
            kind: Some(kind.to_string()),
            inputs: inputs.into(),
        })
    }

    pub fn any_op(&mut self, inputs: impl Into<Vec<PatternId>>) -> PatternId {
        self.push(PatternNode::Op {
            kind: None,
            inputs: inputs.into(),
        })
    }

    pub fn label(&mut self, name: &str, inner: PatternId) -> PatternId {
        self.push(PatternNode::Label {
            name: name.to_string(),
            inner,
        })
    }

    pub fn predicate<F>(&mut self, name: &str, inner: PatternId, test: F) -> PatternId
    where
        F: Fn(&Graph, OutputRef) -> bool + Send + Sync + 'static,
    {
        self.push(PatternNode::Predicate {
            name: name.to_string(),
            test: Arc::new(test),
            inner,
        })
    }

    /// Wildcard restricted to constant-producing nodes.
    pub fn constant(&mut self) -> PatternId {
        let any = self.wildcard();
        self.predicate("is_constant", any, predicates::is_constant)
    }

    pub fn or(&mut self, alternatives: impl Into<Vec<PatternId>>) -> Result<PatternId, PatternError> {
        let alternatives = alternatives.into();
        if alternatives.is_empty() {
            return Err(PatternError::EmptyAlternation);
        }
        Ok(self.push(PatternNode::Or(alternatives)))
    }

    pub fn optional(&mut self, inner: PatternId) -> PatternId {
        self.push(PatternNode::Optional(inner))
    }

    /// Adds a branch whose target is set later with [`PatternBuilder::set_branch_target`],
    /// which lets a pattern refer to itself.
    pub fn branch(&mut self) -> PatternId {
        let id = BranchId(self.next_branch);
        self.next_branch += 1;
        self.push(PatternNode::Branch { id, target: None })
    }

    pub fn set_branch_target(
        &mut self,
        branch: PatternId,
        target: PatternId,
    ) -> Result<(), PatternError> {
        if target.index() >= self.nodes.len() {
            return Err(PatternError::UnknownPattern(target));
        }
        match self.nodes.get_mut(branch.index()) {
            Some(PatternNode::Branch { target: slot, .. }) => {
                *slot = Some(target);
                Ok(())
            }
            Some(_) => Err(PatternError::NotABranch(branch)),
            None => Err(PatternError::UnknownPattern(branch)),
        }
    }

    /// Validates references and branch targets, then freezes the pattern.
    pub fn finish(self, root: PatternId) -> Result<Pattern, PatternError> {
        let known = |id: &PatternId| id.index() < self.nodes.len();
        if !known(&root) {
            return Err(PatternError::UnknownPattern(root));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            let refs: Vec<PatternId> = match node {
                PatternNode::Wildcard => Vec::new(),
                PatternNode::Op { inputs, .. } => inputs.clone(),
                PatternNode::Label { inner, .. }
                | PatternNode::Predicate { inner, .. }
                | PatternNode::Optional(inner) => vec![*inner],
                PatternNode::Or(alternatives) => alternatives.clone(),
                PatternNode::Branch { target: None, .. } => {
                    return Err(PatternError::UnresolvedBranch(PatternId(index as u32)))
                }
                PatternNode::Branch {
                    target: Some(target),
                    ..
                } => vec![*target],
            };
            if let Some(missing) = refs.iter().find(|id| !known(id)) {
                return Err(PatternError::UnknownPattern(*missing));
            }
        }
        Ok(Pattern {
            nodes: self.nodes,
            root,
        })
    }
}
