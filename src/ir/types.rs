// IR Type System
//
// Unified tensor type with Shape metadata. Scalars are 0-d tensors,
// vectors are 1-d tensors, matrices are 2-d tensors; Scan sequences add
// one leading dimension to the per-step type.

use crate::ir::shape::{Dim, Shape};
use std::fmt;

/// IR value type - unified tensor representation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IRType {
    /// Tensor with element type and shape
    Tensor(ScalarType, Shape),
}

/// Scalar element types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl ScalarType {
    /// Get size in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            ScalarType::Bool => 1,
            ScalarType::Int32 => 4,
            ScalarType::Int64 => 8,
            ScalarType::Float32 => 4,
            ScalarType::Float64 => 8,
        }
    }

    /// Check if this is a floating-point type
    pub fn is_float(&self) -> bool {
        matches!(self, ScalarType::Float32 | ScalarType::Float64)
    }

    /// Check if this is an integer type
    pub fn is_integer(&self) -> bool {
        matches!(self, ScalarType::Int32 | ScalarType::Int64)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScalarType::Bool => write!(f, "bool"),
            ScalarType::Int32 => write!(f, "i32"),
            ScalarType::Int64 => write!(f, "i64"),
            ScalarType::Float32 => write!(f, "f32"),
            ScalarType::Float64 => write!(f, "f64"),
        }
    }
}

impl IRType {
    pub fn new(scalar_type: ScalarType, shape: Shape) -> Self {
        IRType::Tensor(scalar_type, shape)
    }

    pub fn scalar(scalar_type: ScalarType) -> Self {
        IRType::Tensor(scalar_type, Shape::scalar())
    }

    pub fn vector(scalar_type: ScalarType, size: usize) -> Self {
        IRType::Tensor(scalar_type, Shape::vector(size))
    }

    pub fn matrix(scalar_type: ScalarType, nrows: usize, ncols: usize) -> Self {
        IRType::Tensor(scalar_type, Shape::matrix(nrows, ncols))
    }

    /// Get the scalar element type
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            IRType::Tensor(st, _) => *st,
        }
    }

    /// Get the shape
    pub fn shape(&self) -> &Shape {
        match self {
            IRType::Tensor(_, shape) => shape,
        }
    }

    /// Get rank (number of dimensions)
    pub fn rank(&self) -> usize {
        self.shape().rank()
    }

    /// Same element type and unifiable shapes
    pub fn compatible_with(&self, other: &IRType) -> bool {
        self.scalar_type() == other.scalar_type() && self.shape().compatible_with(other.shape())
    }

    /// Type of a sequence of `len` values of this type
    pub fn sequence_of(&self, len: Dim) -> IRType {
        IRType::Tensor(self.scalar_type(), self.shape().prepend(len))
    }

    /// Type of one element of a sequence, with the sequence length
    pub fn element_of_sequence(&self) -> Option<(Dim, IRType)> {
        let (len, rest) = self.shape().split_leading()?;
        Some((len, IRType::Tensor(self.scalar_type(), rest)))
    }

    pub fn with_shape(&self, shape: Shape) -> IRType {
        IRType::Tensor(self.scalar_type(), shape)
    }
}

impl fmt::Display for IRType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IRType::Tensor(st, shape) => match shape.rank() {
                0 => write!(f, "scalar<{}>", st),
                1 => write!(f, "vector<{}>{}", st, shape),
                2 => write!(f, "matrix<{}>{}", st, shape),
                _ => write!(f, "tensor<{}>{}", st, shape),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_type_sizes() {
        assert_eq!(ScalarType::Bool.size_bytes(), 1);
        assert_eq!(ScalarType::Int32.size_bytes(), 4);
        assert_eq!(ScalarType::Float64.size_bytes(), 8);
    }

    #[test]
    fn test_type_predicates() {
        assert!(ScalarType::Float32.is_float());
        assert!(!ScalarType::Int32.is_float());
        assert!(ScalarType::Int32.is_integer());
        assert!(!ScalarType::Bool.is_integer());
    }

    #[test]
    fn test_sequence_types() {
        let step = IRType::vector(ScalarType::Float64, 4);
        let seq = step.sequence_of(Dim::Concrete(3));
        assert_eq!(seq, IRType::matrix(ScalarType::Float64, 3, 4));
        let (len, elem) = seq.element_of_sequence().unwrap();
        assert_eq!(len, Dim::Concrete(3));
        assert_eq!(elem, step);
        assert!(IRType::scalar(ScalarType::Float64)
            .element_of_sequence()
            .is_none());
    }

    #[test]
    fn test_compatibility_requires_dtype() {
        let a = IRType::vector(ScalarType::Float64, 4);
        let b = IRType::vector(ScalarType::Float32, 4);
        assert!(!a.compatible_with(&b));
        let sym = IRType::new(
            ScalarType::Float64,
            Shape::from_dims(vec![Dim::Symbolic("n".into())]),
        );
        assert!(a.compatible_with(&sym));
        assert_eq!(a.to_string(), "vector<f64>(4,)");
    }
}
