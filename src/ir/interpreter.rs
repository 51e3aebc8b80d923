// Simple IR Interpreter for Testing
//
// Executes function graphs on dense tensors to produce actual results for
// validation. This is NOT a lowering backend - it's a reference
// implementation used as the numeric oracle and by constant folding.

use crate::core::error::{GraphError, Result};
use crate::core::tensor::Tensor;
use crate::ir::graph::FunctionGraph;
use crate::ir::node::{Operation, VarId};
use crate::ir::shape::Dim;
use crate::ir::types::IRType;
use crate::scan::op::{ScanOp, StoreMode};
use std::collections::HashMap;

/// Simple reference interpreter
#[derive(Debug, Default)]
pub struct Interpreter {
    /// Input values provided by user, keyed by input name
    inputs: HashMap<String, Tensor>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value to the graph input with this name
    pub fn set_input(&mut self, name: impl Into<String>, value: Tensor) {
        self.inputs.insert(name.into(), value);
    }

    /// Execute the graph with the named inputs and return output values
    pub fn execute(&self, fgraph: &FunctionGraph) -> Result<Vec<Tensor>> {
        let mut values = Vec::with_capacity(fgraph.inputs().len());
        for &input in fgraph.inputs() {
            let var = fgraph.variable(input)?;
            let name = var.name.as_deref().ok_or_else(|| {
                GraphError::Evaluation(format!("input %{} has no name to bind by", input))
            })?;
            let value = self.inputs.get(name).ok_or_else(|| {
                GraphError::Evaluation(format!("no value bound for input '{}'", name))
            })?;
            values.push(value.clone());
        }
        Self::run(fgraph, &values)
    }

    /// Execute the graph with positional inputs
    pub fn run(fgraph: &FunctionGraph, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        if inputs.len() != fgraph.inputs().len() {
            return Err(GraphError::Evaluation(format!(
                "graph takes {} inputs, got {}",
                fgraph.inputs().len(),
                inputs.len()
            )));
        }

        let mut values: HashMap<VarId, Tensor> = HashMap::new();
        for (&var, value) in fgraph.inputs().iter().zip(inputs) {
            check_value(fgraph.var_type(var)?, value, var)?;
            values.insert(var, value.clone());
        }

        for apply_id in fgraph.try_toposort()? {
            let node = fgraph.apply(apply_id)?;
            let args = node
                .inputs
                .iter()
                .map(|&v| lookup(fgraph, &values, v))
                .collect::<Result<Vec<_>>>()?;
            let results = Self::apply_op(&node.op, &args)?;
            if results.len() != node.outputs.len() {
                return Err(GraphError::Evaluation(format!(
                    "{} produced {} values for {} outputs",
                    node.op,
                    results.len(),
                    node.outputs.len()
                )));
            }
            for (&out, value) in node.outputs.iter().zip(results) {
                values.insert(out, value);
            }
        }

        fgraph
            .outputs()
            .iter()
            .map(|&v| lookup(fgraph, &values, v))
            .collect()
    }

    /// Evaluate one operation on concrete values
    pub fn apply_op(op: &Operation, args: &[Tensor]) -> Result<Vec<Tensor>> {
        let arg = |i: usize| {
            args.get(i).ok_or_else(|| {
                GraphError::Evaluation(format!("{} is missing argument {}", op, i))
            })
        };
        let value = match op {
            Operation::Elemwise(kind) => arg(0)?.zip_broadcast(arg(1)?, |a, b| kind.apply(a, b))?,
            Operation::Unary(kind) => arg(0)?.map(|x| kind.apply(x)),
            Operation::Dot => arg(0)?.dot(arg(1)?)?,
            Operation::Transpose => arg(0)?.transpose()?,
            Operation::Index { position } => arg(0)?.index_leading(*position)?,
            Operation::Sum { axis } => arg(0)?.sum(*axis)?,
            Operation::Scan(scan) => return run_scan(scan, args),
        };
        Ok(vec![value])
    }
}

fn lookup(fgraph: &FunctionGraph, values: &HashMap<VarId, Tensor>, var: VarId) -> Result<Tensor> {
    if let Some(value) = values.get(&var) {
        return Ok(value.clone());
    }
    fgraph
        .constant_value(var)
        .cloned()
        .ok_or_else(|| GraphError::Evaluation(format!("no value computed for %{}", var)))
}

/// Concrete dims of the declared type must match the value
fn check_value(ty: &IRType, value: &Tensor, var: VarId) -> Result<()> {
    let dims = ty.shape().dims();
    let matches = dims.len() == value.rank()
        && dims.iter().zip(value.shape()).all(|(d, &n)| match d {
            Dim::Concrete(m) => *m == n,
            Dim::Symbolic(_) => true,
        });
    if !matches {
        return Err(GraphError::Evaluation(format!(
            "value of shape {:?} does not fit input %{} of type {}",
            value.shape(),
            var,
            ty
        )));
    }
    Ok(())
}

fn run_scan(scan: &ScanOp, args: &[Tensor]) -> Result<Vec<Tensor>> {
    let sig = scan.signature();
    if args.len() != sig.n_outer_inputs() {
        return Err(GraphError::Evaluation(format!(
            "scan '{}' takes {} inputs, got {}",
            scan.name(),
            sig.n_outer_inputs(),
            args.len()
        )));
    }

    let seqs = &args[sig.seq_range()];
    let non_seqs = &args[sig.non_seq_range()];
    let mut states: Vec<Tensor> = args[sig.recurrent_input_range()].to_vec();

    let shortest = seqs.iter().map(|s| s.shape().first().copied().unwrap_or(0)).min();
    let steps = match (sig.n_steps, shortest) {
        (Some(n), Some(len)) if len < n => {
            return Err(GraphError::Evaluation(format!(
                "scan '{}' runs {} steps but a sequence has {} entries",
                scan.name(),
                n,
                len
            )))
        }
        (Some(n), _) => n,
        (None, Some(len)) => len,
        (None, None) => {
            return Err(GraphError::Evaluation(format!(
                "scan '{}' has no step count",
                scan.name()
            )))
        }
    };
    if steps == 0 {
        return Err(GraphError::Evaluation(format!(
            "scan '{}' has empty sequences",
            scan.name()
        )));
    }

    let mut history: Vec<Vec<Tensor>> = vec![Vec::new(); sig.n_outputs()];
    for t in 0..steps {
        let mut step_inputs = Vec::with_capacity(sig.n_inner_inputs());
        for seq in seqs {
            step_inputs.push(seq.index_leading(t as isize)?);
        }
        step_inputs.append(&mut states);
        step_inputs.extend(non_seqs.iter().cloned());

        let outs = Interpreter::run(scan.body(), &step_inputs)?;
        states = outs[sig.recurrent_output_range()].to_vec();
        for ((slot, out), mode) in history.iter_mut().zip(outs).zip(&sig.store_modes) {
            if *mode == StoreMode::LastStep {
                slot.clear();
            }
            slot.push(out);
        }
    }

    history
        .into_iter()
        .zip(&sig.store_modes)
        .map(|(mut values, mode)| match mode {
            StoreMode::AllSteps => Tensor::stack(&values),
            StoreMode::LastStep => values
                .pop()
                .ok_or_else(|| GraphError::Evaluation("scan produced no steps".to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::types::ScalarType;
    use crate::scan::op::ScanSignature;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_interpreter_dot() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", IRType::vector(ScalarType::Float64, 2));
        let w = b.input("w", IRType::matrix(ScalarType::Float64, 2, 2));
        let y = b.dot(x, w).unwrap();
        let fg = b.function_graph(vec![x, w], vec![y]).unwrap();

        let mut interp = Interpreter::new();
        interp.set_input("x", Tensor::vector(vec![1.0, 2.0]));
        interp.set_input("w", Tensor::matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap());
        let out = interp.execute(&fg).unwrap();
        assert_eq!(out[0].data(), &[7.0, 10.0]);
    }

    #[test]
    fn test_missing_binding() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", IRType::vector(ScalarType::Float64, 2));
        let y = b.exp(x).unwrap();
        let fg = b.function_graph(vec![x], vec![y]).unwrap();
        assert!(Interpreter::new().execute(&fg).is_err());
        assert!(Interpreter::run(&fg, &[Tensor::vector(vec![1.0])]).is_err());
    }

    #[test]
    fn test_scan_cumulative_sum() {
        // h_t = h_prev + x_t, storing every state
        let mut body = GraphBuilder::new();
        let x_t = body.input("x_t", IRType::scalar(ScalarType::Float64));
        let h = body.input("h", IRType::scalar(ScalarType::Float64));
        let h_next = body.add(h, x_t).unwrap();
        let body = body.function_graph(vec![x_t, h], vec![h_next]).unwrap();
        let scan = ScanOp::new("cumsum", body, ScanSignature::new(1, 1, 0, 0)).unwrap();

        let mut b = GraphBuilder::new();
        let xs = b.input("xs", IRType::vector(ScalarType::Float64, 4));
        let h0 = b.input("h0", IRType::scalar(ScalarType::Float64));
        let outs = b.scan(scan, vec![xs, h0]).unwrap();
        let fg = b.function_graph(vec![xs, h0], outs).unwrap();

        let result = Interpreter::run(
            &fg,
            &[Tensor::vector(vec![1.0, 2.0, 3.0, 4.0]), Tensor::scalar(10.0)],
        )
        .unwrap();
        assert_eq!(result[0].data(), &[11.0, 13.0, 16.0, 20.0]);
    }

    #[test]
    fn test_scan_fixed_steps_last_value() {
        // h_t = h_prev * 2 for 5 steps, final value only
        let mut body = GraphBuilder::new();
        let h = body.input("h", IRType::scalar(ScalarType::Float64));
        let two = body.constant(Tensor::scalar(2.0));
        let h_next = body.mul(h, two).unwrap();
        let body = body.function_graph(vec![h], vec![h_next]).unwrap();
        let sig = ScanSignature::new(0, 1, 0, 0).with_n_steps(5).store_last(0);
        let scan = ScanOp::new("double", body, sig).unwrap();

        let mut b = GraphBuilder::new();
        let h0 = b.input("h0", IRType::scalar(ScalarType::Float64));
        let outs = b.scan(scan, vec![h0]).unwrap();
        let fg = b.function_graph(vec![h0], outs).unwrap();

        let result = Interpreter::run(&fg, &[Tensor::scalar(1.5)]).unwrap();
        assert_abs_diff_eq!(result[0].data()[0], 48.0, epsilon = 1e-12);
    }
}
