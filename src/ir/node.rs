// IR Node Types
//
// Variables are typed value edges, Apply nodes are operation instances.
// Both are addressed by stable integer ids; identity is the id, never the
// structure.

use crate::core::error::{GraphError, Result};
use crate::core::tensor::Tensor;
use crate::ir::shape::{Dim, Shape};
use crate::ir::types::IRType;
use crate::scan::op::ScanOp;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Unique variable identifier
pub type VarId = usize;

/// Unique apply node identifier
pub type ApplyId = usize;

/// Back-reference from an output variable to its producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    pub apply: ApplyId,
    /// Output position on the owning apply
    pub index: usize,
}

/// A typed value-producing edge
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub id: VarId,
    pub ty: IRType,
    /// Producing apply; `None` for graph inputs and constants
    pub owner: Option<Owner>,
    pub name: Option<String>,
    /// Literal value for constants
    pub constant: Option<Tensor>,
    /// Free-form debug metadata
    pub annotations: BTreeMap<String, String>,
}

impl Variable {
    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }

    /// Ownerless and not a constant
    pub fn is_free(&self) -> bool {
        self.owner.is_none() && self.constant.is_none()
    }

    /// Name for diagnostics: the user name or `%id`
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("%{}", self.id),
        }
    }
}

/// An operation instance
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyNode {
    pub id: ApplyId,
    pub op: Operation,
    pub inputs: Vec<VarId>,
    pub outputs: Vec<VarId>,
}

/// Operation descriptors
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Broadcasting binary elementwise operation
    Elemwise(BinaryOpKind),
    /// Unary elementwise operation
    Unary(UnaryOpKind),
    /// Inner product on rank 1 and 2 operands
    Dot,
    /// Matrix transpose
    Transpose,
    /// Select one entry along the leading axis
    Index { position: isize },
    /// Sum over one axis or all elements
    Sum { axis: Option<usize> },
    /// Loop whose body is a nested function graph
    Scan(Arc<ScanOp>),
}

/// Rewrite applicability tag for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Elemwise,
    Unary,
    Dot,
    Transpose,
    Index,
    Sum,
    Scan,
}

/// Binary operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
}

impl BinaryOpKind {
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOpKind::Add => a + b,
            BinaryOpKind::Sub => a - b,
            BinaryOpKind::Mul => a * b,
            BinaryOpKind::Div => a / b,
            BinaryOpKind::Maximum => a.max(b),
            BinaryOpKind::Minimum => a.min(b),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BinaryOpKind::Add => "add",
            BinaryOpKind::Sub => "sub",
            BinaryOpKind::Mul => "mul",
            BinaryOpKind::Div => "div",
            BinaryOpKind::Maximum => "maximum",
            BinaryOpKind::Minimum => "minimum",
        }
    }
}

/// Unary operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOpKind {
    Neg,
    Exp,
    Log,
    Tanh,
    Sigmoid,
    Sqr,
    Abs,
    Sqrt,
}

impl UnaryOpKind {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            UnaryOpKind::Neg => -x,
            UnaryOpKind::Exp => x.exp(),
            UnaryOpKind::Log => x.ln(),
            UnaryOpKind::Tanh => x.tanh(),
            UnaryOpKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            UnaryOpKind::Sqr => x * x,
            UnaryOpKind::Abs => x.abs(),
            UnaryOpKind::Sqrt => x.sqrt(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UnaryOpKind::Neg => "neg",
            UnaryOpKind::Exp => "exp",
            UnaryOpKind::Log => "log",
            UnaryOpKind::Tanh => "tanh",
            UnaryOpKind::Sigmoid => "sigmoid",
            UnaryOpKind::Sqr => "sqr",
            UnaryOpKind::Abs => "abs",
            UnaryOpKind::Sqrt => "sqrt",
        }
    }
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Elemwise(_) => OpKind::Elemwise,
            Operation::Unary(_) => OpKind::Unary,
            Operation::Dot => OpKind::Dot,
            Operation::Transpose => OpKind::Transpose,
            Operation::Index { .. } => OpKind::Index,
            Operation::Sum { .. } => OpKind::Sum,
            Operation::Scan(_) => OpKind::Scan,
        }
    }

    /// Short name used in errors and logs
    pub fn name(&self) -> String {
        match self {
            Operation::Elemwise(op) => op.name().to_string(),
            Operation::Unary(op) => op.name().to_string(),
            Operation::Dot => "dot".to_string(),
            Operation::Transpose => "transpose".to_string(),
            Operation::Index { .. } => "index".to_string(),
            Operation::Sum { .. } => "sum".to_string(),
            Operation::Scan(scan) => format!("scan<{}>", scan.name()),
        }
    }

    /// Number of inputs the operation accepts, if fixed
    pub fn arity(&self) -> Option<usize> {
        match self {
            Operation::Elemwise(_) | Operation::Dot => Some(2),
            Operation::Unary(_)
            | Operation::Transpose
            | Operation::Index { .. }
            | Operation::Sum { .. } => Some(1),
            Operation::Scan(scan) => Some(scan.signature().n_outer_inputs()),
        }
    }

    /// Validate input types and infer output types
    pub fn infer_output_types(&self, inputs: &[IRType]) -> Result<Vec<IRType>> {
        if let Some(arity) = self.arity() {
            if inputs.len() != arity {
                if let Operation::Scan(_) = self {
                    return Err(GraphError::Contract(format!(
                        "{} expects {} outer inputs, got {}",
                        self.name(),
                        arity,
                        inputs.len()
                    )));
                }
                return Err(GraphError::type_mismatch(
                    self.name(),
                    format!("expected {} inputs, got {}", arity, inputs.len()),
                ));
            }
        }

        match self {
            Operation::Elemwise(_) => {
                let (a, b) = (&inputs[0], &inputs[1]);
                self.same_dtype(a, b)?;
                let shape = Shape::broadcast(a.shape(), b.shape()).ok_or_else(|| {
                    GraphError::type_mismatch(
                        self.name(),
                        format!("cannot broadcast {} with {}", a.shape(), b.shape()),
                    )
                })?;
                Ok(vec![a.with_shape(shape)])
            }
            Operation::Unary(_) => Ok(vec![inputs[0].clone()]),
            Operation::Dot => {
                let (a, b) = (&inputs[0], &inputs[1]);
                self.same_dtype(a, b)?;
                let shape = Shape::dot(a.shape(), b.shape()).ok_or_else(|| {
                    GraphError::type_mismatch(
                        "dot",
                        format!("incompatible operands {} and {}", a.shape(), b.shape()),
                    )
                })?;
                Ok(vec![a.with_shape(shape)])
            }
            Operation::Transpose => {
                let a = &inputs[0];
                let shape = a.shape().transpose().ok_or_else(|| {
                    GraphError::type_mismatch(
                        "transpose",
                        format!("rank {} operand", a.rank()),
                    )
                })?;
                Ok(vec![a.with_shape(shape)])
            }
            Operation::Index { position } => {
                let a = &inputs[0];
                let (len, elem) = a.element_of_sequence().ok_or_else(|| {
                    GraphError::type_mismatch("index", "cannot index a scalar")
                })?;
                if let Dim::Concrete(n) = len {
                    let n = n as isize;
                    if *position >= n || *position < -n {
                        return Err(GraphError::type_mismatch(
                            "index",
                            format!("position {} out of bounds for length {}", position, n),
                        ));
                    }
                }
                Ok(vec![elem])
            }
            Operation::Sum { axis } => {
                let a = &inputs[0];
                let shape = match axis {
                    None => Shape::scalar(),
                    Some(axis) => a.shape().without_axis(*axis).ok_or_else(|| {
                        GraphError::type_mismatch(
                            "sum",
                            format!("axis {} out of range for rank {}", axis, a.rank()),
                        )
                    })?,
                };
                Ok(vec![a.with_shape(shape)])
            }
            Operation::Scan(scan) => scan.infer_outer_types(inputs),
        }
    }

    fn same_dtype(&self, a: &IRType, b: &IRType) -> Result<()> {
        if a.scalar_type() != b.scalar_type() {
            return Err(GraphError::type_mismatch(
                self.name(),
                format!(
                    "element types {} and {} differ",
                    a.scalar_type(),
                    b.scalar_type()
                ),
            ));
        }
        Ok(())
    }

    pub fn as_scan(&self) -> Option<&Arc<ScanOp>> {
        match self {
            Operation::Scan(scan) => Some(scan),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::Index { position } => write!(f, "index[{}]", position),
            Operation::Sum { axis: Some(axis) } => write!(f, "sum{{axis={}}}", axis),
            Operation::Sum { axis: None } => write!(f, "sum"),
            other => write!(f, "{}", other.name()),
        }
    }
}
