// Canonicalizing Local Rewrites
//
// Identity eliminations and constant folding. Each rule only fires when the
// replacement keeps the output type.

use crate::core::error::Result;
use crate::ir::{
    ApplyId, BinaryOpKind, FunctionGraph, Interpreter, OpKind, Operation, UnaryOpKind, VarId,
};
use crate::optimizer::pass::{LocalRewriter, Replacement, RewriteContext};

/// True when `var` is a constant with every element equal to `value`
fn is_constant_fill(fgraph: &FunctionGraph, var: VarId, value: f64) -> bool {
    fgraph
        .constant_value(var)
        .is_some_and(|t| !t.is_empty() && t.all_equal(value))
}

/// Replace `out` with `keep` when the types agree
fn forward(fgraph: &FunctionGraph, out: VarId, keep: VarId) -> Result<Option<Replacement>> {
    if fgraph.var_type(keep)?.compatible_with(fgraph.var_type(out)?) {
        Ok(Some(vec![(out, keep)]))
    } else {
        Ok(None)
    }
}

/// x + 0, 0 + x, x - 0 -> x
pub struct LocalAddZero;

impl LocalRewriter for LocalAddZero {
    fn name(&self) -> &str {
        "local_add_zero"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Elemwise]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        _cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        let node = fgraph.apply(apply)?;
        let (a, b, out) = (node.inputs[0], node.inputs[1], node.outputs[0]);
        match node.op {
            Operation::Elemwise(BinaryOpKind::Add) if is_constant_fill(fgraph, b, 0.0) => {
                forward(fgraph, out, a)
            }
            Operation::Elemwise(BinaryOpKind::Add) if is_constant_fill(fgraph, a, 0.0) => {
                forward(fgraph, out, b)
            }
            Operation::Elemwise(BinaryOpKind::Sub) if is_constant_fill(fgraph, b, 0.0) => {
                forward(fgraph, out, a)
            }
            _ => Ok(None),
        }
    }
}

/// x * 1, 1 * x, x / 1 -> x
pub struct LocalMulOne;

impl LocalRewriter for LocalMulOne {
    fn name(&self) -> &str {
        "local_mul_one"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Elemwise]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        _cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        let node = fgraph.apply(apply)?;
        let (a, b, out) = (node.inputs[0], node.inputs[1], node.outputs[0]);
        match node.op {
            Operation::Elemwise(BinaryOpKind::Mul) if is_constant_fill(fgraph, b, 1.0) => {
                forward(fgraph, out, a)
            }
            Operation::Elemwise(BinaryOpKind::Mul) if is_constant_fill(fgraph, a, 1.0) => {
                forward(fgraph, out, b)
            }
            Operation::Elemwise(BinaryOpKind::Div) if is_constant_fill(fgraph, b, 1.0) => {
                forward(fgraph, out, a)
            }
            _ => Ok(None),
        }
    }
}

/// Match `outer(inner(x))` where both applies carry `op`; returns `(out, x)`
fn double_application(
    fgraph: &FunctionGraph,
    apply: ApplyId,
    op: &Operation,
) -> Result<Option<(VarId, VarId)>> {
    let node = fgraph.apply(apply)?;
    if node.op != *op {
        return Ok(None);
    }
    match fgraph.owner_of(node.inputs[0]) {
        Some(inner) if inner.op == *op => Ok(Some((node.outputs[0], inner.inputs[0]))),
        _ => Ok(None),
    }
}

/// -(-x) -> x
pub struct LocalNegNeg;

impl LocalRewriter for LocalNegNeg {
    fn name(&self) -> &str {
        "local_neg_neg"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Unary]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        _cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        match double_application(fgraph, apply, &Operation::Unary(UnaryOpKind::Neg))? {
            Some((out, x)) => forward(fgraph, out, x),
            None => Ok(None),
        }
    }
}

/// transpose(transpose(x)) -> x
pub struct LocalTransposeTranspose;

impl LocalRewriter for LocalTransposeTranspose {
    fn name(&self) -> &str {
        "local_transpose_transpose"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Transpose]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        _cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        match double_application(fgraph, apply, &Operation::Transpose)? {
            Some((out, x)) => forward(fgraph, out, x),
            None => Ok(None),
        }
    }
}

/// Evaluate applies whose inputs are all constants
pub struct ConstantFolding;

impl LocalRewriter for ConstantFolding {
    fn name(&self) -> &str {
        "constant_folding"
    }

    fn tracks(&self) -> &[OpKind] {
        &[
            OpKind::Elemwise,
            OpKind::Unary,
            OpKind::Dot,
            OpKind::Transpose,
            OpKind::Index,
            OpKind::Sum,
        ]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        _cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        let node = fgraph.apply(apply)?.clone();
        if matches!(node.op, Operation::Scan(_)) {
            return Ok(None);
        }
        let Some(args) = node
            .inputs
            .iter()
            .map(|&v| fgraph.constant_value(v).cloned())
            .collect::<Option<Vec<_>>>()
        else {
            return Ok(None);
        };

        let values = Interpreter::apply_op(&node.op, &args)?;
        let mut pairs = Vec::with_capacity(values.len());
        for (&out, value) in node.outputs.iter().zip(values) {
            let dtype = fgraph.var_type(out)?.scalar_type();
            let folded = fgraph.make_constant(value, dtype);
            pairs.push((out, folded));
        }
        Ok(Some(pairs))
    }
}
