use std::any::Any;

use crate::alloc::Allocator;
use crate::op::{OpError, Operation};
use crate::tensor::{ElementType, Tensor, TensorSpec};

fn check_arithmetic(kind: &str, spec: &TensorSpec) -> Result<(), OpError> {
    match spec.element_type {
        ElementType::F32 | ElementType::I32 => Ok(()),
        other => Err(OpError::invalid_inputs(
            kind,
            format!("element type {other} is not arithmetic"),
        )),
    }
}

fn infer_binary(
    kind: &str,
    inputs: &[TensorSpec],
    output_type: Option<ElementType>,
) -> Result<Vec<TensorSpec>, OpError> {
    let [lhs, rhs] = inputs else {
        return Err(OpError::invalid_inputs(
            kind,
            format!("expected 2 inputs, got {}", inputs.len()),
        ));
    };
    check_arithmetic(kind, lhs)?;
    if !lhs.is_compatible_with(rhs) {
        return Err(OpError::invalid_inputs(
            kind,
            format!("operand specs {lhs} and {rhs} differ"),
        ));
    }
    let element_type = output_type.unwrap_or(lhs.element_type);
    Ok(vec![TensorSpec::new(element_type, lhs.shape.clone())])
}

fn binary_operands<'t>(
    kind: &str,
    inputs: &[&'t Tensor],
) -> Result<(&'t Tensor, &'t Tensor), OpError> {
    match inputs {
        [lhs, rhs] if lhs.spec() == rhs.spec() => Ok((*lhs, *rhs)),
        [lhs, rhs] => Err(OpError::invalid_inputs(
            kind,
            format!("operand specs {} and {} differ", lhs.spec(), rhs.spec()),
        )),
        _ => Err(OpError::invalid_inputs(
            kind,
            format!("expected 2 inputs, got {}", inputs.len()),
        )),
    }
}

/// Applies `f32_op`/`i32_op` element by element, producing values of the input type.
fn eval_arithmetic(
    kind: &str,
    inputs: &[&Tensor],
    allocator: &Allocator,
    f32_op: fn(f32, f32) -> f32,
    i32_op: fn(i32, i32) -> i32,
) -> Result<Vec<Tensor>, OpError> {
    let (lhs, rhs) = binary_operands(kind, inputs)?;
    let spec = lhs.spec().clone();
    let out = match spec.element_type {
        ElementType::F32 => {
            let values: Vec<f32> = lhs
                .as_slice::<f32>()?
                .iter()
                .zip(rhs.as_slice::<f32>()?)
                .map(|(a, b)| f32_op(*a, *b))
                .collect();
            Tensor::from_slice(allocator, spec, &values)?
        }
        ElementType::I32 => {
            let values: Vec<i32> = lhs
                .as_slice::<i32>()?
                .iter()
                .zip(rhs.as_slice::<i32>()?)
                .map(|(a, b)| i32_op(*a, *b))
                .collect();
            Tensor::from_slice(allocator, spec, &values)?
        }
        other => {
            return Err(OpError::invalid_inputs(
                kind,
                format!("element type {other} is not arithmetic"),
            ))
        }
    };
    Ok(vec![out])
}

macro_rules! stateless_op {
    ($name:ident) => {
        impl $name {
            pub const KIND: &'static str = stringify!($name);

            fn is_same(other: &dyn Operation) -> bool {
                other.downcast_ref::<$name>().is_some()
            }
        }
    };
}

/// Elementwise sum of two equally shaped tensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Add;
stateless_op!(Add);

impl Operation for Add {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>, OpError> {
        infer_binary(Self::KIND, inputs, None)
    }

    fn can_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor], allocator: &Allocator) -> Result<Vec<Tensor>, OpError> {
        eval_arithmetic(Self::KIND, inputs, allocator, |a, b| a + b, i32::wrapping_add)
    }

    fn same_as(&self, other: &dyn Operation) -> bool {
        Self::is_same(other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Elementwise product of two equally shaped tensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Multiply;
stateless_op!(Multiply);

impl Operation for Multiply {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>, OpError> {
        infer_binary(Self::KIND, inputs, None)
    }

    fn can_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor], allocator: &Allocator) -> Result<Vec<Tensor>, OpError> {
        eval_arithmetic(Self::KIND, inputs, allocator, |a, b| a * b, i32::wrapping_mul)
    }

    fn same_as(&self, other: &dyn Operation) -> bool {
        Self::is_same(other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Elementwise `lhs < rhs`, producing a boolean tensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Less;
stateless_op!(Less);

impl Operation for Less {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>, OpError> {
        infer_binary(Self::KIND, inputs, Some(ElementType::Boolean))
    }

    fn can_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor], allocator: &Allocator) -> Result<Vec<Tensor>, OpError> {
        let (lhs, rhs) = binary_operands(Self::KIND, inputs)?;
        let values: Vec<u8> = match lhs.element_type() {
            ElementType::F32 => lhs
                .as_slice::<f32>()?
                .iter()
                .zip(rhs.as_slice::<f32>()?)
                .map(|(a, b)| u8::from(a < b))
                .collect(),
            ElementType::I32 => lhs
                .as_slice::<i32>()?
                .iter()
                .zip(rhs.as_slice::<i32>()?)
                .map(|(a, b)| u8::from(a < b))
                .collect(),
            other => {
                return Err(OpError::invalid_inputs(
                    Self::KIND,
                    format!("element type {other} is not comparable"),
                ))
            }
        };
        let spec = TensorSpec::new(ElementType::Boolean, lhs.spec().shape.clone());
        Ok(vec![Tensor::from_slice(allocator, spec, &values)?])
    }

    fn same_as(&self, other: &dyn Operation) -> bool {
        Self::is_same(other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Elementwise `max(x, 0)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;
stateless_op!(Relu);

impl Operation for Relu {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>, OpError> {
        let [input] = inputs else {
            return Err(OpError::invalid_inputs(
                Self::KIND,
                format!("expected 1 input, got {}", inputs.len()),
            ));
        };
        check_arithmetic(Self::KIND, input)?;
        Ok(vec![input.clone()])
    }

    fn can_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor], allocator: &Allocator) -> Result<Vec<Tensor>, OpError> {
        let [input] = inputs else {
            return Err(OpError::invalid_inputs(
                Self::KIND,
                format!("expected 1 input, got {}", inputs.len()),
            ));
        };
        let spec = input.spec().clone();
        let out = match spec.element_type {
            ElementType::F32 => {
                let values: Vec<f32> = input
                    .as_slice::<f32>()?
                    .iter()
                    .map(|v| v.max(0.0))
                    .collect();
                Tensor::from_slice(allocator, spec, &values)?
            }
            ElementType::I32 => {
                let values: Vec<i32> = input
                    .as_slice::<i32>()?
                    .iter()
                    .map(|v| (*v).max(0))
                    .collect();
                Tensor::from_slice(allocator, spec, &values)?
            }
            other => {
                return Err(OpError::invalid_inputs(
                    Self::KIND,
                    format!("element type {other} is not arithmetic"),
                ))
            }
        };
        Ok(vec![out])
    }

    fn same_as(&self, other: &dyn Operation) -> bool {
        Self::is_same(other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
