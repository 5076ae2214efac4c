//! Small reference catalogue of operations.
//!
//! Enough to build, fold and rewrite realistic graphs without an external operator library.

mod elementwise;
mod source;

pub use elementwise::{Add, Less, Multiply, Relu};
pub use source::{Constant, Parameter};
