// Scan Operation
//
// A loop whose body is a nested FunctionGraph. The signature assigns every
// body input and output a role:
//
//   body inputs:  [sequence slices | previous recurrent states | non-sequences]
//   body outputs: [next recurrent states | per-step outputs]
//   outer inputs: [sequences | initial states | non-sequences]
//   outer outputs: one per body output, stacked along a new leading axis
//                  (AllSteps) or the value of the final step (LastStep)
//
// The contract is checked once, at construction.

use crate::core::error::{GraphError, Result};
use crate::ir::fingerprint::GraphFingerprint;
use crate::ir::graph::FunctionGraph;
use crate::ir::node::VarId;
use crate::ir::shape::Dim;
use crate::ir::types::IRType;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

/// How an outer output collects the per-step values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMode {
    /// Stack every step along a new leading axis
    AllSteps,
    /// Keep only the final step
    LastStep,
}

/// Role counts and output storage of a Scan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanSignature {
    pub n_seqs: usize,
    pub n_recurrent: usize,
    pub n_non_seqs: usize,
    pub n_per_step: usize,
    /// One entry per outer output, recurrent outputs first
    pub store_modes: Vec<StoreMode>,
    /// Fixed step count; required when there are no sequences
    pub n_steps: Option<usize>,
}

impl ScanSignature {
    /// Signature storing every step of every output
    pub fn new(n_seqs: usize, n_recurrent: usize, n_non_seqs: usize, n_per_step: usize) -> Self {
        Self {
            n_seqs,
            n_recurrent,
            n_non_seqs,
            n_per_step,
            store_modes: vec![StoreMode::AllSteps; n_recurrent + n_per_step],
            n_steps: None,
        }
    }

    pub fn with_n_steps(mut self, n_steps: usize) -> Self {
        self.n_steps = Some(n_steps);
        self
    }

    pub fn with_store_modes(mut self, store_modes: Vec<StoreMode>) -> Self {
        self.store_modes = store_modes;
        self
    }

    /// Keep only the final value of output `index`
    pub fn store_last(mut self, index: usize) -> Self {
        if let Some(mode) = self.store_modes.get_mut(index) {
            *mode = StoreMode::LastStep;
        }
        self
    }

    pub fn n_inner_inputs(&self) -> usize {
        self.n_seqs + self.n_recurrent + self.n_non_seqs
    }

    pub fn n_outer_inputs(&self) -> usize {
        self.n_inner_inputs()
    }

    pub fn n_outputs(&self) -> usize {
        self.n_recurrent + self.n_per_step
    }

    pub fn seq_range(&self) -> Range<usize> {
        0..self.n_seqs
    }

    pub fn recurrent_input_range(&self) -> Range<usize> {
        self.n_seqs..self.n_seqs + self.n_recurrent
    }

    pub fn non_seq_range(&self) -> Range<usize> {
        let start = self.n_seqs + self.n_recurrent;
        start..start + self.n_non_seqs
    }

    pub fn recurrent_output_range(&self) -> Range<usize> {
        0..self.n_recurrent
    }

    pub fn per_step_range(&self) -> Range<usize> {
        self.n_recurrent..self.n_recurrent + self.n_per_step
    }
}

/// Loop operation with a nested body graph
#[derive(Clone)]
pub struct ScanOp {
    name: String,
    signature: ScanSignature,
    body: FunctionGraph,
    body_digest: GraphFingerprint,
}

impl ScanOp {
    /// Create a Scan, checking the body against the signature
    pub fn new(name: impl Into<String>, body: FunctionGraph, signature: ScanSignature) -> Result<Self> {
        let name = name.into();
        let contract = |msg: String| GraphError::Contract(format!("scan '{}': {}", name, msg));

        if body.inputs().len() != signature.n_inner_inputs() {
            return Err(contract(format!(
                "body has {} inputs, roles declare {} ({} sequences + {} recurrent + {} non-sequences)",
                body.inputs().len(),
                signature.n_inner_inputs(),
                signature.n_seqs,
                signature.n_recurrent,
                signature.n_non_seqs
            )));
        }
        if body.outputs().len() != signature.n_outputs() {
            return Err(contract(format!(
                "body has {} outputs, roles declare {} ({} recurrent + {} per-step)",
                body.outputs().len(),
                signature.n_outputs(),
                signature.n_recurrent,
                signature.n_per_step
            )));
        }
        if signature.store_modes.len() != signature.n_outputs() {
            return Err(contract(format!(
                "{} store modes for {} outputs",
                signature.store_modes.len(),
                signature.n_outputs()
            )));
        }
        for r in 0..signature.n_recurrent {
            let state_in = body.var_type(body.inputs()[signature.n_seqs + r])?;
            let state_out = body.var_type(body.outputs()[r])?;
            if !state_in.compatible_with(state_out) {
                return Err(contract(format!(
                    "recurrent state {} enters as {} but leaves as {}",
                    r, state_in, state_out
                )));
            }
        }
        match signature.n_steps {
            Some(0) => return Err(contract("step count must be at least 1".to_string())),
            None if signature.n_seqs == 0 => {
                return Err(contract(
                    "a scan without sequences needs an explicit step count".to_string(),
                ))
            }
            _ => {}
        }

        let body_digest = GraphFingerprint::of(&body);
        Ok(Self {
            name,
            signature,
            body,
            body_digest,
        })
    }

    /// Same roles, new body (contract re-checked)
    pub fn with_body(&self, body: FunctionGraph) -> Result<Self> {
        ScanOp::new(self.name.clone(), body, self.signature.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &ScanSignature {
        &self.signature
    }

    pub fn body(&self) -> &FunctionGraph {
        &self.body
    }

    pub fn body_digest(&self) -> &GraphFingerprint {
        &self.body_digest
    }

    pub fn inner_seqs(&self) -> &[VarId] {
        &self.body.inputs()[self.signature.seq_range()]
    }

    pub fn inner_recurrent_inputs(&self) -> &[VarId] {
        &self.body.inputs()[self.signature.recurrent_input_range()]
    }

    pub fn inner_non_seqs(&self) -> &[VarId] {
        &self.body.inputs()[self.signature.non_seq_range()]
    }

    pub fn inner_recurrent_outputs(&self) -> &[VarId] {
        &self.body.outputs()[self.signature.recurrent_output_range()]
    }

    pub fn inner_per_step_outputs(&self) -> &[VarId] {
        &self.body.outputs()[self.signature.per_step_range()]
    }

    /// Step dimension implied by the outer input types
    pub fn step_dim(&self, outer: &[IRType]) -> Result<Dim> {
        if let Some(n) = self.signature.n_steps {
            for (i, ty) in outer[self.signature.seq_range()].iter().enumerate() {
                if let Some(Dim::Concrete(len)) = ty.shape().dims().first() {
                    if *len < n {
                        return Err(GraphError::type_mismatch(
                            self.op_name(),
                            format!("sequence {} has {} entries, scan runs {} steps", i, len, n),
                        ));
                    }
                }
            }
            return Ok(Dim::Concrete(n));
        }

        let mut step: Option<Dim> = None;
        for (i, ty) in outer[self.signature.seq_range()].iter().enumerate() {
            let Some(len) = ty.shape().dims().first() else {
                return Err(GraphError::type_mismatch(
                    self.op_name(),
                    format!("sequence {} is a scalar", i),
                ));
            };
            step = match step {
                None => Some(len.clone()),
                Some(prev) if !prev.compatible_with(len) => {
                    return Err(GraphError::type_mismatch(
                        self.op_name(),
                        format!("sequence lengths {} and {} differ", prev, len),
                    ))
                }
                // The loop stops at the shortest sequence, which a symbolic
                // length may be at run time
                Some(prev) if prev.is_concrete() && len.is_symbolic() => Some(len.clone()),
                Some(prev) => Some(prev),
            };
        }
        step.ok_or_else(|| GraphError::Contract(format!("scan '{}' has no step count", self.name)))
    }

    /// Validate outer input types and infer the outer output types
    pub fn infer_outer_types(&self, outer: &[IRType]) -> Result<Vec<IRType>> {
        let sig = &self.signature;
        if outer.len() != sig.n_outer_inputs() {
            return Err(GraphError::Contract(format!(
                "scan '{}' expects {} outer inputs, got {}",
                self.name,
                sig.n_outer_inputs(),
                outer.len()
            )));
        }

        let inner_inputs = self.body.inputs();
        for (i, ty) in outer.iter().enumerate() {
            let inner = self.body.var_type(inner_inputs[i])?;
            let element = if i < sig.n_seqs {
                match ty.element_of_sequence() {
                    Some((_, element)) => element,
                    None => {
                        return Err(GraphError::type_mismatch(
                            self.op_name(),
                            format!("sequence {} is a scalar", i),
                        ))
                    }
                }
            } else {
                ty.clone()
            };
            if !element.compatible_with(inner) {
                return Err(GraphError::type_mismatch(
                    self.op_name(),
                    format!("outer input {} ({}) does not match body input {}", i, ty, inner),
                ));
            }
        }

        let step = self.step_dim(outer)?;
        self.body
            .outputs()
            .iter()
            .zip(&sig.store_modes)
            .map(|(&out, mode)| {
                let ty = self.body.var_type(out)?;
                Ok(match mode {
                    StoreMode::AllSteps => ty.sequence_of(step.clone()),
                    StoreMode::LastStep => ty.clone(),
                })
            })
            .collect()
    }

    fn op_name(&self) -> String {
        format!("scan<{}>", self.name)
    }
}

impl PartialEq for ScanOp {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature && self.body_digest == other.body_digest
    }
}

impl Eq for ScanOp {}

impl Hash for ScanOp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature.hash(state);
        self.body_digest.hash(state);
    }
}

impl fmt::Debug for ScanOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ScanOp")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("body", &self.body_digest.to_hex())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::shape::Shape;
    use crate::ir::types::ScalarType;

    fn f64_vec(n: usize) -> IRType {
        IRType::vector(ScalarType::Float64, n)
    }

    /// h_t = tanh(x_t + h_prev)
    fn rnn_body() -> FunctionGraph {
        let mut b = GraphBuilder::new();
        let x_t = b.input("x_t", f64_vec(4));
        let h = b.input("h_prev", f64_vec(4));
        let s = b.add(x_t, h).unwrap();
        let h_next = b.tanh(s).unwrap();
        b.function_graph(vec![x_t, h], vec![h_next]).unwrap()
    }

    #[test]
    fn test_outer_types() {
        let scan = ScanOp::new("rnn", rnn_body(), ScanSignature::new(1, 1, 0, 0)).unwrap();
        let out = scan
            .infer_outer_types(&[IRType::matrix(ScalarType::Float64, 3, 4), f64_vec(4)])
            .unwrap();
        assert_eq!(out, vec![IRType::matrix(ScalarType::Float64, 3, 4)]);

        let last = ScanOp::new("rnn", rnn_body(), ScanSignature::new(1, 1, 0, 0).store_last(0)).unwrap();
        let out = last
            .infer_outer_types(&[IRType::matrix(ScalarType::Float64, 3, 4), f64_vec(4)])
            .unwrap();
        assert_eq!(out, vec![f64_vec(4)]);
    }

    #[test]
    fn test_mixed_lengths_keep_step_symbolic() {
        let mut b = GraphBuilder::new();
        let a_t = b.input("a_t", f64_vec(2));
        let b_t = b.input("b_t", f64_vec(2));
        let s = b.add(a_t, b_t).unwrap();
        let body = b.function_graph(vec![a_t, b_t], vec![s]).unwrap();
        let scan = ScanOp::new("zip", body, ScanSignature::new(2, 0, 0, 1)).unwrap();

        let n = Dim::Symbolic("n".to_string());
        let unknown = IRType::new(ScalarType::Float64, Shape::from_dims(vec![n.clone(), Dim::Concrete(2)]));
        let known = IRType::matrix(ScalarType::Float64, 3, 2);
        for outer in [[unknown.clone(), known.clone()], [known, unknown]] {
            assert_eq!(scan.step_dim(&outer).unwrap(), n);
        }
    }

    #[test]
    fn test_arity_contract() {
        let err = ScanOp::new("rnn", rnn_body(), ScanSignature::new(1, 0, 1, 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Contract);

        let err = ScanOp::new("rnn", rnn_body(), ScanSignature::new(2, 0, 0, 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Contract);
    }

    #[test]
    fn test_recurrent_type_contract() {
        let mut b = GraphBuilder::new();
        let h = b.input("h_prev", f64_vec(4));
        let s = b.sum(h, None).unwrap();
        let body = b.function_graph(vec![h], vec![s]).unwrap();
        let err = ScanOp::new("bad", body, ScanSignature::new(0, 1, 0, 0).with_n_steps(3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Contract);
    }

    #[test]
    fn test_step_count_contract() {
        let mut b = GraphBuilder::new();
        let h = b.input("h_prev", f64_vec(4));
        let e = b.exp(h).unwrap();
        let body = b.function_graph(vec![h], vec![e]).unwrap();
        let err = ScanOp::new("loop", body.clone(), ScanSignature::new(0, 1, 0, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Contract);
        let err = ScanOp::new("loop", body.clone(), ScanSignature::new(0, 1, 0, 0).with_n_steps(0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Contract);
        assert!(ScanOp::new("loop", body, ScanSignature::new(0, 1, 0, 0).with_n_steps(5)).is_ok());
    }

    #[test]
    fn test_outer_type_mismatch() {
        let scan = ScanOp::new("rnn", rnn_body(), ScanSignature::new(1, 1, 0, 0)).unwrap();
        let err = scan
            .infer_outer_types(&[IRType::matrix(ScalarType::Float64, 3, 5), f64_vec(4)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_structural_equality() {
        let a = ScanOp::new("a", rnn_body(), ScanSignature::new(1, 1, 0, 0)).unwrap();
        let b = ScanOp::new("b", rnn_body(), ScanSignature::new(1, 1, 0, 0)).unwrap();
        let c = ScanOp::new("c", rnn_body(), ScanSignature::new(1, 1, 0, 0).store_last(0)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
