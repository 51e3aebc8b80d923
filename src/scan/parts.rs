// Scan Decomposition
//
// Splits a Scan apply into role-tagged (inner, outer) pairs over an editable
// copy of its body. Rules edit the body and the parts, then `build`
// re-derives the body, re-checks the contract and creates the new apply.

use crate::core::error::{GraphError, Result};
use crate::ir::{ApplyId, Client, Dim, FunctionGraph, IRType, Operation, VarId};
use crate::optimizer::pass::Replacement;
use crate::scan::op::{ScanOp, ScanSignature, StoreMode};
use std::collections::HashSet;
use std::sync::Arc;

/// A sequence or non-sequence input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputPart {
    pub inner: VarId,
    pub outer: VarId,
}

/// A loop-carried state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrentPart {
    /// Previous-step state inside the body
    pub inner_in: VarId,
    /// Next-step state inside the body
    pub inner_out: VarId,
    /// Initial value outside
    pub init: VarId,
    pub mode: StoreMode,
    /// Outer output of the Scan being rewritten, if this part existed there
    pub old_outer: Option<VarId>,
}

/// A per-step output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPart {
    pub inner: VarId,
    pub mode: StoreMode,
    pub old_outer: Option<VarId>,
}

/// Role of a body input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerRole {
    Seq(usize),
    Recurrent(usize),
    NonSeq(usize),
}

/// Result of rebuilding a Scan
#[derive(Debug, Clone, Default)]
pub struct BuiltScan {
    /// `None` when no outputs remained and no Scan was created
    pub apply: Option<ApplyId>,
    /// New outer outputs, recurrent first
    pub outputs: Vec<VarId>,
    /// Old outer outputs still in use, paired with their new counterparts
    pub replacement: Replacement,
}

/// Editable view of one Scan apply
#[derive(Debug, Clone)]
pub struct ScanParts {
    pub apply: ApplyId,
    pub name: String,
    pub n_steps: Option<usize>,
    pub body: FunctionGraph,
    pub seqs: Vec<InputPart>,
    pub recurrent: Vec<RecurrentPart>,
    pub non_seqs: Vec<InputPart>,
    pub per_step: Vec<OutputPart>,
}

impl ScanParts {
    /// Decompose `apply`; `None` if it is not a Scan
    pub fn from_apply(fgraph: &FunctionGraph, apply: ApplyId) -> Result<Option<Self>> {
        let node = fgraph.apply(apply)?;
        let Operation::Scan(scan) = &node.op else {
            return Ok(None);
        };
        let sig = scan.signature();
        let body = scan.body().clone();
        let inner_in = body.inputs();
        let inner_out = body.outputs();

        let input_part = |k: usize| InputPart {
            inner: inner_in[k],
            outer: node.inputs[k],
        };
        let seqs = sig.seq_range().map(input_part).collect();
        let non_seqs = sig.non_seq_range().map(input_part).collect();
        let recurrent = (0..sig.n_recurrent)
            .map(|r| RecurrentPart {
                inner_in: inner_in[sig.n_seqs + r],
                inner_out: inner_out[r],
                init: node.inputs[sig.n_seqs + r],
                mode: sig.store_modes[r],
                old_outer: Some(node.outputs[r]),
            })
            .collect();
        let per_step = sig
            .per_step_range()
            .map(|k| OutputPart {
                inner: inner_out[k],
                mode: sig.store_modes[k],
                old_outer: Some(node.outputs[k]),
            })
            .collect();

        Ok(Some(Self {
            apply,
            name: scan.name().to_string(),
            n_steps: sig.n_steps,
            body,
            seqs,
            recurrent,
            non_seqs,
            per_step,
        }))
    }

    /// Role of a body input variable
    pub fn role_of(&self, inner: VarId) -> Option<InnerRole> {
        if let Some(i) = self.seqs.iter().position(|p| p.inner == inner) {
            return Some(InnerRole::Seq(i));
        }
        if let Some(i) = self.recurrent.iter().position(|p| p.inner_in == inner) {
            return Some(InnerRole::Recurrent(i));
        }
        self.non_seqs
            .iter()
            .position(|p| p.inner == inner)
            .map(InnerRole::NonSeq)
    }

    /// Non-sequence input or body constant
    pub fn is_invariant(&self, inner: VarId) -> bool {
        matches!(self.role_of(inner), Some(InnerRole::NonSeq(_)))
            || self.body.constant_value(inner).is_some()
    }

    /// Outer value of a loop-invariant body variable; constants are copied out
    pub fn outer_invariant(&self, fgraph: &mut FunctionGraph, inner: VarId) -> Result<Option<VarId>> {
        if let Some(InnerRole::NonSeq(i)) = self.role_of(inner) {
            return Ok(Some(self.non_seqs[i].outer));
        }
        match self.body.variable(inner)?.constant.clone() {
            Some(value) => {
                let dtype = self.body.var_type(inner)?.scalar_type();
                Ok(Some(fgraph.make_constant(value, dtype)))
            }
            None => Ok(None),
        }
    }

    pub fn inner_type(&self, inner: VarId) -> Result<&IRType> {
        self.body.var_type(inner)
    }

    /// Leading dimension of the outer sequence `i`
    pub fn seq_len(&self, fgraph: &FunctionGraph, i: usize) -> Result<Dim> {
        let ty = fgraph.var_type(self.seqs[i].outer)?;
        ty.shape()
            .dims()
            .first()
            .cloned()
            .ok_or_else(|| GraphError::Contract(format!("sequence {} of '{}' is a scalar", i, self.name)))
    }

    /// True when the loop provably visits every entry of sequence `i`
    ///
    /// The loop stops at the shortest sequence, so without an explicit step
    /// count every sequence must carry the same leading dimension.
    pub fn covers(&self, fgraph: &FunctionGraph, i: usize) -> Result<bool> {
        let len = self.seq_len(fgraph, i)?;
        if let Some(n) = self.n_steps {
            return Ok(len == Dim::Concrete(n));
        }
        for j in 0..self.seqs.len() {
            if self.seq_len(fgraph, j)? != len {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Declare a fresh body input; its role is decided by the part it is pushed into
    pub fn new_inner_input(&mut self, ty: IRType, name: Option<String>) -> VarId {
        self.body.add_input(ty, name)
    }

    /// Replace a body variable everywhere, including the output parts
    pub fn replace_inner(&mut self, old: VarId, new: VarId, reason: &str) -> Result<()> {
        self.body.replace(old, new, reason)?;
        for part in &mut self.recurrent {
            if part.inner_out == old {
                part.inner_out = new;
            }
        }
        for part in &mut self.per_step {
            if part.inner == old {
                part.inner = new;
            }
        }
        Ok(())
    }

    /// True when the only body consumers of `inner` are output slots
    pub fn only_used_as_output(&self, inner: VarId) -> bool {
        self.body
            .clients(inner)
            .iter()
            .all(|c| matches!(c, Client::Output(_)))
    }

    /// Body inputs reachable backward from `outputs`
    pub fn inputs_used_by(&self, outputs: &[VarId]) -> Result<HashSet<VarId>> {
        let mut seen = HashSet::new();
        let mut used = HashSet::new();
        let mut stack: Vec<VarId> = outputs.to_vec();
        while let Some(var) = stack.pop() {
            if !seen.insert(var) {
                continue;
            }
            match self.body.owner_of(var) {
                Some(node) => stack.extend(node.inputs.iter().copied()),
                None => {
                    used.insert(var);
                }
            }
        }
        Ok(used)
    }

    /// Inner outputs in signature order, recurrent first
    pub fn inner_outputs(&self) -> Vec<VarId> {
        self.recurrent
            .iter()
            .map(|p| p.inner_out)
            .chain(self.per_step.iter().map(|p| p.inner))
            .collect()
    }

    pub fn n_outputs(&self) -> usize {
        self.recurrent.len() + self.per_step.len()
    }

    /// Rebuild the body, re-check the contract and create the new Scan apply
    pub fn build(self, fgraph: &mut FunctionGraph) -> Result<BuiltScan> {
        if self.n_outputs() == 0 {
            return Ok(BuiltScan::default());
        }

        let inner_inputs: Vec<VarId> = self
            .seqs
            .iter()
            .map(|p| p.inner)
            .chain(self.recurrent.iter().map(|p| p.inner_in))
            .chain(self.non_seqs.iter().map(|p| p.inner))
            .collect();
        let inner_outputs = self.inner_outputs();
        let mut body = self.body.rebuild(inner_inputs, inner_outputs)?;
        body.collect_garbage();

        let store_modes = self
            .recurrent
            .iter()
            .map(|p| p.mode)
            .chain(self.per_step.iter().map(|p| p.mode))
            .collect();
        let signature = ScanSignature {
            n_seqs: self.seqs.len(),
            n_recurrent: self.recurrent.len(),
            n_non_seqs: self.non_seqs.len(),
            n_per_step: self.per_step.len(),
            store_modes,
            n_steps: self.n_steps,
        };
        let op = ScanOp::new(self.name, body, signature)?;

        let outer_inputs: Vec<VarId> = self
            .seqs
            .iter()
            .map(|p| p.outer)
            .chain(self.recurrent.iter().map(|p| p.init))
            .chain(self.non_seqs.iter().map(|p| p.outer))
            .collect();
        let apply = fgraph.make_apply(Operation::Scan(Arc::new(op)), outer_inputs)?;
        let outputs = fgraph.apply(apply)?.outputs.clone();

        let old_outputs = self
            .recurrent
            .iter()
            .map(|p| p.old_outer)
            .chain(self.per_step.iter().map(|p| p.old_outer));
        let replacement = old_outputs
            .zip(&outputs)
            .filter_map(|(old, &new)| old.map(|old| (old, new)))
            .filter(|&(old, _)| fgraph.contains_variable(old) && !fgraph.clients(old).is_empty())
            .collect();

        Ok(BuiltScan {
            apply: Some(apply),
            outputs,
            replacement,
        })
    }
}
