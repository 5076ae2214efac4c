//! Operation-descriptor interface consumed from the operator catalogue.

use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::alloc::Allocator;
use crate::tensor::{Tensor, TensorError, TensorSpec};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpError {
    #[error("{kind}: invalid inputs: {reason}")]
    InvalidInputs { kind: String, reason: String },
    #[error("{kind} cannot be evaluated as a constant")]
    NotEvaluable { kind: String },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl OpError {
    pub fn invalid_inputs(kind: &str, reason: impl Into<String>) -> Self {
        OpError::InvalidInputs {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

/// What the graph needs to know about one operation.
///
/// The ordered input ports of a node are its operands; the ordered output ports are whatever
/// [`Operation::infer_outputs`] reports for the operand specs.
pub trait Operation: fmt::Debug + Send + Sync + 'static {
    /// Kind tag used by pattern roots and diagnostics (e.g. `"Add"`).
    fn kind(&self) -> &str;

    /// Computes output port specs from input port specs, rejecting invalid operands.
    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>, OpError>;

    fn can_evaluate(&self) -> bool {
        false
    }

    /// Computes concrete outputs from concrete inputs, requesting storage from `allocator`.
    fn evaluate(&self, inputs: &[&Tensor], allocator: &Allocator) -> Result<Vec<Tensor>, OpError> {
        let _ = (inputs, allocator);
        Err(OpError::NotEvaluable {
            kind: self.kind().to_string(),
        })
    }

    /// Reports whether `other` computes the same function of its inputs as `self`.
    fn same_as(&self, other: &dyn Operation) -> bool {
        let _ = other;
        false
    }

    /// The value held by constant-producing operations.
    fn constant_value(&self) -> Option<&Tensor> {
        None
    }

    fn has_side_effects(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}

impl dyn Operation {
    pub fn downcast_ref<T: Operation>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is_constant(&self) -> bool {
        self.constant_value().is_some()
    }
}
