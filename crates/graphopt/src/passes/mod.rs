//! Built-in graph passes.

mod constant_folding;
mod cse;
mod dce;
mod disable_constant_folding;

pub use constant_folding::{ConstantFoldingPass, FoldConstantNode};
pub use cse::CommonSubexpressionEliminationPass;
pub use dce::DeadCodeEliminationPass;
pub use disable_constant_folding::DisableConstantFoldingPass;
