use std::any::Any;

use crate::alloc::Allocator;
use crate::op::{OpError, Operation};
use crate::tensor::{Tensor, TensorSpec};

/// Graph input. Never evaluable, never equal to another parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    spec: TensorSpec,
}

impl Parameter {
    pub const KIND: &'static str = "Parameter";

    pub fn new(spec: TensorSpec) -> Self {
        Self { spec }
    }
}

impl Operation for Parameter {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>, OpError> {
        if !inputs.is_empty() {
            return Err(OpError::invalid_inputs(Self::KIND, "takes no inputs"));
        }
        Ok(vec![self.spec.clone()])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Holds a pre-computed tensor.
#[derive(Debug, Clone)]
pub struct Constant {
    value: Tensor,
}

impl Constant {
    pub const KIND: &'static str = "Constant";

    pub fn new(value: Tensor) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }
}

impl Operation for Constant {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>, OpError> {
        if !inputs.is_empty() {
            return Err(OpError::invalid_inputs(Self::KIND, "takes no inputs"));
        }
        Ok(vec![self.value.spec().clone()])
    }

    fn can_evaluate(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        _inputs: &[&Tensor],
        _allocator: &Allocator,
    ) -> Result<Vec<Tensor>, OpError> {
        Ok(vec![self.value.clone()])
    }

    fn same_as(&self, other: &dyn Operation) -> bool {
        other
            .downcast_ref::<Constant>()
            .is_some_and(|other| self.value.same_contents(&other.value))
    }

    fn constant_value(&self) -> Option<&Tensor> {
        Some(&self.value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
