//! Element types, (partially known) shapes and allocator-backed host tensors.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;

use crate::alloc::{request_buffer, AllocError, Allocator, Buffer};

/// Alignment used for tensor storage requested by constant evaluation.
pub const TENSOR_ALIGNMENT: usize = 64;

/// Scalar element types understood by the graph IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    I32,
    /// Stored as one byte per element, `0` or `1`.
    Boolean,
}

impl ElementType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::Boolean => 1,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::F32 => "f32",
            ElementType::I32 => "i32",
            ElementType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Names a symbolic dynamic dimension (e.g. `?B`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimSymbol(Arc<str>);

impl DimSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::<str>::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Represents a single axis extent in a tensor shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Static(usize),
    Dynamic(DimSymbol),
}

impl Dimension {
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self::Dynamic(DimSymbol::new(name))
    }

    /// A dynamic extent is compatible with anything; static extents must agree.
    pub fn is_compatible_with(&self, other: &Dimension) -> bool {
        match (self, other) {
            (Dimension::Static(a), Dimension::Static(b)) => a == b,
            _ => true,
        }
    }
}

impl From<usize> for Dimension {
    fn from(value: usize) -> Self {
        Self::Static(value)
    }
}

/// Tensor shape; the rank itself may be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Ranked(Vec<Dimension>),
    Unranked,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self::Ranked(dims.into())
    }

    pub fn from_static(dims: &[usize]) -> Self {
        Self::Ranked(dims.iter().copied().map(Dimension::Static).collect())
    }

    pub fn scalar() -> Self {
        Self::Ranked(Vec::new())
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Ranked(dims) => Some(dims.len()),
            Shape::Unranked => None,
        }
    }

    pub fn dims(&self) -> Option<&[Dimension]> {
        match self {
            Shape::Ranked(dims) => Some(dims),
            Shape::Unranked => None,
        }
    }

    /// Returns static dimensions when the rank and all dims are known.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.dims()?
            .iter()
            .map(|dim| match dim {
                Dimension::Static(value) => Some(*value),
                Dimension::Dynamic(_) => None,
            })
            .collect()
    }

    /// Returns element count when the shape is fully static.
    pub fn element_count(&self) -> Option<usize> {
        let mut count = 1usize;
        for dim in self.static_dims()? {
            count = count.checked_mul(dim)?;
        }
        Some(count)
    }

    pub fn is_compatible_with(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Ranked(lhs), Shape::Ranked(rhs)) => {
                lhs.len() == rhs.len()
                    && lhs
                        .iter()
                        .zip(rhs.iter())
                        .all(|(a, b)| a.is_compatible_with(b))
            }
            _ => true,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Unranked => f.write_str("[...]"),
            Shape::Ranked(dims) => {
                f.write_str("[")?;
                for (idx, dim) in dims.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    match dim {
                        Dimension::Static(value) => write!(f, "{value}")?,
                        Dimension::Dynamic(symbol) => write!(f, "?{}", symbol.as_str())?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

/// Tensor metadata coupling element type and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorSpec {
    pub element_type: ElementType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(element_type: ElementType, shape: Shape) -> Self {
        Self {
            element_type,
            shape,
        }
    }

    pub fn element_count(&self) -> Option<usize> {
        self.shape.element_count()
    }

    /// Returns total byte length when the shape is static.
    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?
            .checked_mul(self.element_type.size_in_bytes())
    }

    /// Element types must agree exactly; shapes only need to be compatible.
    pub fn is_compatible_with(&self, other: &TensorSpec) -> bool {
        self.element_type == other.element_type && self.shape.is_compatible_with(&other.shape)
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.element_type, self.shape)
    }
}

/// Dense host tensor whose storage comes from an [`Allocator`].
///
/// Clones share the underlying buffer.
#[derive(Debug, Clone)]
pub struct Tensor {
    spec: TensorSpec,
    buffer: Arc<Buffer>,
}

impl Tensor {
    /// Allocates zero-filled storage for a fully static `spec`.
    pub fn zeros(allocator: &Allocator, spec: TensorSpec) -> Result<Self, TensorError> {
        let bytes = spec
            .byte_len()
            .ok_or_else(|| TensorError::DynamicShape(spec.clone()))?;
        let buffer = request_buffer(allocator, bytes, TENSOR_ALIGNMENT)?;
        Ok(Self {
            spec,
            buffer: Arc::new(buffer),
        })
    }

    /// Copies `data` into freshly allocated storage.
    pub fn from_slice<T: Pod>(
        allocator: &Allocator,
        spec: TensorSpec,
        data: &[T],
    ) -> Result<Self, TensorError> {
        let expected = spec
            .byte_len()
            .ok_or_else(|| TensorError::DynamicShape(spec.clone()))?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() != expected {
            return Err(TensorError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let mut buffer = request_buffer(allocator, expected, TENSOR_ALIGNMENT)?;
        buffer.as_bytes_mut().copy_from_slice(bytes);
        Ok(Self {
            spec,
            buffer: Arc::new(buffer),
        })
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    pub fn element_type(&self) -> ElementType {
        self.spec.element_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    /// Reinterprets the storage as `T`, which must match the element width.
    pub fn as_slice<T: Pod>(&self) -> Result<&[T], TensorError> {
        if std::mem::size_of::<T>() != self.spec.element_type.size_in_bytes() {
            return Err(TensorError::ElementWidth {
                element_type: self.spec.element_type,
                requested: std::mem::size_of::<T>(),
            });
        }
        bytemuck::try_cast_slice(self.as_bytes()).map_err(|err| TensorError::Cast(err.to_string()))
    }

    pub fn to_vec<T: Pod>(&self) -> Result<Vec<T>, TensorError> {
        Ok(self.as_slice::<T>()?.to_vec())
    }

    pub fn allocator(&self) -> &Allocator {
        self.buffer.allocator()
    }

    /// Reports whether both tensors were allocated through equal allocators, which is the
    /// precondition for letting them alias memory.
    pub fn shares_allocator_with(&self, other: &Tensor) -> Result<bool, AllocError> {
        self.allocator().equals(other.allocator())
    }

    /// Byte-wise value equality (specs and contents).
    pub fn same_contents(&self, other: &Tensor) -> bool {
        self.spec == other.spec && self.as_bytes() == other.as_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TensorError {
    #[error("tensor spec {0} has no static byte length")]
    DynamicShape(TensorSpec),
    #[error("expected {expected} bytes of tensor data, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("cannot view {element_type} elements as a {requested}-byte type")]
    ElementWidth {
        element_type: ElementType,
        requested: usize,
    },
    #[error("tensor storage cast failed: {0}")]
    Cast(String),
    #[error(transparent)]
    Alloc(#[from] AllocError),
}
