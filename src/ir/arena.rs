// Node Arena
//
// Owns every Variable and Apply node of one construction context, keyed by
// monotonic ids. Construction only ever adds nodes.

use crate::core::error::{GraphError, Result};
use crate::core::tensor::Tensor;
use crate::ir::node::{ApplyId, ApplyNode, Operation, Owner, VarId, Variable};
use crate::ir::shape::Shape;
use crate::ir::types::{IRType, ScalarType};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Storage for variables and apply nodes
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    variables: HashMap<VarId, Variable>,
    applies: HashMap<ApplyId, ApplyNode>,
    next_var: VarId,
    next_apply: ApplyId,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_variable(
        &mut self,
        ty: IRType,
        owner: Option<Owner>,
        name: Option<String>,
        constant: Option<Tensor>,
    ) -> VarId {
        let id = self.next_var;
        self.next_var += 1;
        self.variables.insert(
            id,
            Variable {
                id,
                ty,
                owner,
                name,
                constant,
                annotations: BTreeMap::new(),
            },
        );
        id
    }

    /// Create a free input variable
    pub fn new_input(&mut self, ty: IRType, name: Option<String>) -> VarId {
        self.alloc_variable(ty, None, name, None)
    }

    /// Create a constant; its shape is taken from the tensor
    pub fn new_constant(&mut self, value: Tensor, dtype: ScalarType) -> VarId {
        let ty = IRType::new(dtype, Shape::concrete(value.shape()));
        self.alloc_variable(ty, None, None, Some(value))
    }

    /// Create an apply node, validating inputs and inferring output types
    pub fn new_apply(&mut self, op: Operation, inputs: Vec<VarId>) -> Result<ApplyId> {
        let input_types = inputs
            .iter()
            .map(|&v| self.variable(v).map(|var| var.ty.clone()))
            .collect::<Result<Vec<_>>>()?;
        let output_types = op.infer_output_types(&input_types)?;

        let id = self.next_apply;
        self.next_apply += 1;

        let outputs = output_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| self.alloc_variable(ty, Some(Owner { apply: id, index }), None, None))
            .collect();

        log::trace!("New apply #{}: {} on {:?}", id, op, inputs);
        self.applies.insert(
            id,
            ApplyNode {
                id,
                op,
                inputs,
                outputs,
            },
        );
        Ok(id)
    }

    pub fn variable(&self, id: VarId) -> Result<&Variable> {
        self.variables
            .get(&id)
            .ok_or(GraphError::UnknownVariable(id))
    }

    pub fn apply(&self, id: ApplyId) -> Result<&ApplyNode> {
        self.applies.get(&id).ok_or(GraphError::UnknownApply(id))
    }

    pub(crate) fn apply_mut(&mut self, id: ApplyId) -> Result<&mut ApplyNode> {
        self.applies
            .get_mut(&id)
            .ok_or(GraphError::UnknownApply(id))
    }

    pub fn contains_variable(&self, id: VarId) -> bool {
        self.variables.contains_key(&id)
    }

    pub fn contains_apply(&self, id: ApplyId) -> bool {
        self.applies.contains_key(&id)
    }

    /// Attach debug metadata to a variable
    pub fn annotate(
        &mut self,
        var: VarId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        let variable = self
            .variables
            .get_mut(&var)
            .ok_or(GraphError::UnknownVariable(var))?;
        variable.annotations.insert(key.into(), value.into());
        Ok(())
    }

    pub fn set_name(&mut self, var: VarId, name: impl Into<String>) -> Result<()> {
        let variable = self
            .variables
            .get_mut(&var)
            .ok_or(GraphError::UnknownVariable(var))?;
        variable.name = Some(name.into());
        Ok(())
    }

    /// Single output of an apply; errors on multi-output ops
    pub fn single_output(&self, apply: ApplyId) -> Result<VarId> {
        let node = self.apply(apply)?;
        match node.outputs.as_slice() {
            [out] => Ok(*out),
            outs => Err(GraphError::InvalidValue(format!(
                "apply #{} ({}) has {} outputs",
                apply,
                node.op,
                outs.len()
            ))),
        }
    }

    /// Drop every node not listed
    pub(crate) fn retain(&mut self, variables: &HashSet<VarId>, applies: &HashSet<ApplyId>) {
        self.variables.retain(|id, _| variables.contains(id));
        self.applies.retain(|id, _| applies.contains(id));
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_applies(&self) -> usize {
        self.applies.len()
    }

    pub fn next_apply_id(&self) -> ApplyId {
        self.next_apply
    }

    pub fn next_variable_id(&self) -> VarId {
        self.next_var
    }
}
