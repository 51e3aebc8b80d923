// IR Builder: Public API for composing computation graphs
//
// Provides a fluent interface over a NodeArena. Every method returns the
// output variable of the new node.

use crate::core::error::Result;
use crate::core::tensor::Tensor;
use crate::ir::arena::NodeArena;
use crate::ir::graph::FunctionGraph;
use crate::ir::node::{BinaryOpKind, Operation, UnaryOpKind, VarId};
use crate::ir::types::{IRType, ScalarType};
use crate::scan::op::ScanOp;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for constructing graphs
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    arena: NodeArena,
    /// Map from user-provided names to variables
    named_nodes: HashMap<String, VarId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named input placeholder
    pub fn input(&mut self, name: impl Into<String>, ty: IRType) -> VarId {
        let name = name.into();
        let var = self.arena.new_input(ty, Some(name.clone()));
        self.named_nodes.insert(name, var);
        var
    }

    /// Add an f64 constant
    pub fn constant(&mut self, value: Tensor) -> VarId {
        self.arena.new_constant(value, ScalarType::Float64)
    }

    pub fn constant_typed(&mut self, value: Tensor, dtype: ScalarType) -> VarId {
        self.arena.new_constant(value, dtype)
    }

    /// Look up a variable by the name given at creation or via `name`
    pub fn get_named(&self, name: &str) -> Option<VarId> {
        self.named_nodes.get(name).copied()
    }

    /// Attach a name to an existing variable
    pub fn name(&mut self, var: VarId, name: impl Into<String>) -> Result<VarId> {
        let name = name.into();
        self.arena.set_name(var, name.clone())?;
        self.named_nodes.insert(name, var);
        Ok(var)
    }

    fn single(&mut self, op: Operation, inputs: Vec<VarId>) -> Result<VarId> {
        let apply = self.arena.new_apply(op, inputs)?;
        self.arena.single_output(apply)
    }

    fn binary(&mut self, kind: BinaryOpKind, a: VarId, b: VarId) -> Result<VarId> {
        self.single(Operation::Elemwise(kind), vec![a, b])
    }

    fn unary(&mut self, kind: UnaryOpKind, a: VarId) -> Result<VarId> {
        self.single(Operation::Unary(kind), vec![a])
    }

    // ===== Element-wise Operations =====

    pub fn add(&mut self, a: VarId, b: VarId) -> Result<VarId> {
        self.binary(BinaryOpKind::Add, a, b)
    }

    pub fn sub(&mut self, a: VarId, b: VarId) -> Result<VarId> {
        self.binary(BinaryOpKind::Sub, a, b)
    }

    pub fn mul(&mut self, a: VarId, b: VarId) -> Result<VarId> {
        self.binary(BinaryOpKind::Mul, a, b)
    }

    pub fn div(&mut self, a: VarId, b: VarId) -> Result<VarId> {
        self.binary(BinaryOpKind::Div, a, b)
    }

    pub fn maximum(&mut self, a: VarId, b: VarId) -> Result<VarId> {
        self.binary(BinaryOpKind::Maximum, a, b)
    }

    pub fn minimum(&mut self, a: VarId, b: VarId) -> Result<VarId> {
        self.binary(BinaryOpKind::Minimum, a, b)
    }

    pub fn neg(&mut self, a: VarId) -> Result<VarId> {
        self.unary(UnaryOpKind::Neg, a)
    }

    pub fn exp(&mut self, a: VarId) -> Result<VarId> {
        self.unary(UnaryOpKind::Exp, a)
    }

    pub fn log(&mut self, a: VarId) -> Result<VarId> {
        self.unary(UnaryOpKind::Log, a)
    }

    pub fn tanh(&mut self, a: VarId) -> Result<VarId> {
        self.unary(UnaryOpKind::Tanh, a)
    }

    pub fn sigmoid(&mut self, a: VarId) -> Result<VarId> {
        self.unary(UnaryOpKind::Sigmoid, a)
    }

    pub fn sqr(&mut self, a: VarId) -> Result<VarId> {
        self.unary(UnaryOpKind::Sqr, a)
    }

    pub fn abs(&mut self, a: VarId) -> Result<VarId> {
        self.unary(UnaryOpKind::Abs, a)
    }

    pub fn sqrt(&mut self, a: VarId) -> Result<VarId> {
        self.unary(UnaryOpKind::Sqrt, a)
    }

    // ===== Linear Algebra and Structure =====

    pub fn dot(&mut self, a: VarId, b: VarId) -> Result<VarId> {
        self.single(Operation::Dot, vec![a, b])
    }

    pub fn transpose(&mut self, a: VarId) -> Result<VarId> {
        self.single(Operation::Transpose, vec![a])
    }

    /// Select one entry along the leading axis
    pub fn index(&mut self, a: VarId, position: isize) -> Result<VarId> {
        self.single(Operation::Index { position }, vec![a])
    }

    pub fn sum(&mut self, a: VarId, axis: Option<usize>) -> Result<VarId> {
        self.single(Operation::Sum { axis }, vec![a])
    }

    /// Apply a Scan to outer inputs `[sequences | initial states | non-sequences]`
    pub fn scan(&mut self, op: ScanOp, outer_inputs: Vec<VarId>) -> Result<Vec<VarId>> {
        let apply = self
            .arena
            .new_apply(Operation::Scan(Arc::new(op)), outer_inputs)?;
        Ok(self.arena.apply(apply)?.outputs.clone())
    }

    /// Wrap a subgraph in a FunctionGraph
    pub fn function_graph(&self, inputs: Vec<VarId>, outputs: Vec<VarId>) -> Result<FunctionGraph> {
        FunctionGraph::import(&self.arena, inputs, outputs)
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut NodeArena {
        &mut self.arena
    }

    pub fn var_type(&self, var: VarId) -> Result<&IRType> {
        Ok(&self.arena.variable(var)?.ty)
    }
}
