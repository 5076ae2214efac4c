pub mod alloc;
mod env;
pub mod graph;
pub mod op;
pub mod ops;
pub mod optimizer;
pub mod passes;
pub mod pattern;
pub mod rewrite;
pub mod rt_info;
pub mod tensor;

pub use alloc::{AllocError, Allocator, AllocatorImpl};
pub use graph::{Graph, GraphError, NodeId, OutputRef};
pub use op::Operation;
pub use optimizer::{GraphPass, OptimizeContext, OptimizeError, Pipeline};
pub use pattern::{Match, Matcher, Pattern};
pub use rewrite::{apply_rules_greedily, RewriteAction, RewriteRule, RuleSet};
pub use tensor::{ElementType, Shape, Tensor, TensorSpec};
