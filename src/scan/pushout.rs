// Scan Pushout Rewrites
//
// Move work out of a Scan body:
// - scan_pushout_non_seqs: computations over loop-invariant inputs become
//   new non-sequence inputs computed once outside
// - scan_pushout_seqs: per-step elementwise ops and matrix products over
//   sequence slices become one batched op over whole sequences, fed back as
//   a new sequence
// - scan_pushout_add: a per-step output `dot(v, W)` with invariant `W`
//   becomes an output `v` and one matrix product outside; a last-step
//   accumulator `acc + x_t` becomes `init + sum(X)`, and sums of products
//   of slices are taken over whole sequences the same way
//
// Nothing that reads a previous-step state is ever hoisted.

use crate::core::error::{GraphError, Result};
use crate::ir::{ApplyId, ApplyNode, BinaryOpKind, FunctionGraph, OpKind, Operation, VarId};
use crate::optimizer::pass::{LocalRewriter, Replacement, RewriteContext};
use crate::scan::op::StoreMode;
use crate::scan::parts::{InnerRole, InputPart, ScanParts};

fn missing_invariant(var: VarId) -> GraphError {
    GraphError::Inconsistency(format!("body variable %{} has no outer value", var))
}

/// Hoist body computations that depend only on non-sequences and constants
pub struct ScanPushoutNonSeqs;

impl ScanPushoutNonSeqs {
    fn candidate(parts: &ScanParts) -> Option<ApplyNode> {
        parts.body.toposort().find_map(|id| {
            let node = parts.body.apply(id).ok()?;
            let hoistable = !matches!(node.op, Operation::Scan(_))
                && node.outputs.len() == 1
                && node.inputs.iter().all(|&v| parts.is_invariant(v))
                && node
                    .inputs
                    .iter()
                    .any(|&v| matches!(parts.role_of(v), Some(InnerRole::NonSeq(_))));
            hoistable.then(|| node.clone())
        })
    }
}

impl LocalRewriter for ScanPushoutNonSeqs {
    fn name(&self) -> &str {
        "scan_pushout_non_seqs"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Scan]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        _cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        let Some(mut parts) = ScanParts::from_apply(fgraph, apply)? else {
            return Ok(None);
        };
        let Some(node) = Self::candidate(&parts) else {
            return Ok(None);
        };

        let mut outer_args = Vec::with_capacity(node.inputs.len());
        for &v in &node.inputs {
            let outer = parts
                .outer_invariant(fgraph, v)?
                .ok_or_else(|| missing_invariant(v))?;
            outer_args.push(outer);
        }
        let hoisted = fgraph.make_node(node.op.clone(), outer_args)?;
        log::trace!("Hoisting {} out of scan '{}'", node.op, parts.name);

        let out = node.outputs[0];
        let ty = parts.inner_type(out)?.clone();
        let inner = parts.new_inner_input(ty, None);
        parts.replace_inner(out, inner, self.name())?;
        parts.non_seqs.push(InputPart {
            inner,
            outer: hoisted,
        });

        Ok(Some(parts.build(fgraph)?.replacement))
    }
}

/// An argument of a batched op
#[derive(Debug, Clone, Copy)]
enum Arg {
    Seq(usize),
    Invariant(VarId),
}

/// How a per-step apply is rewritten over whole sequences
#[derive(Debug, Clone)]
enum Batched {
    /// Same op, slices replaced by sequences
    Map { op: Operation, args: Vec<Arg> },
    /// dot(x_t, W) -> dot(X, W)
    RowTimesMatrix { seq: usize, matrix: VarId },
    /// dot(W, x_t) -> dot(X, transpose(W))
    MatrixTimesRow { seq: usize, matrix: VarId },
    /// dot(x_t, v) or dot(v, x_t) -> dot(X, v)
    Inner { seq: usize, vector: VarId },
}

/// Batch per-step computations over sequence slices
pub struct ScanPushoutSeqs;

impl ScanPushoutSeqs {
    fn plan(parts: &ScanParts, fgraph: &FunctionGraph, node: &ApplyNode) -> Result<Option<Batched>> {
        if node.outputs.len() != 1 {
            return Ok(None);
        }
        let out_rank = parts.inner_type(node.outputs[0])?.rank();

        match &node.op {
            Operation::Elemwise(_) | Operation::Unary(_) => {
                let mut args = Vec::with_capacity(node.inputs.len());
                let mut leading = None;
                for &v in &node.inputs {
                    if let Some(InnerRole::Seq(i)) = parts.role_of(v) {
                        // A lower-rank slice would broadcast against the step axis
                        if parts.inner_type(v)?.rank() != out_rank {
                            return Ok(None);
                        }
                        let len = parts.seq_len(fgraph, i)?;
                        match &leading {
                            Some(prev) if *prev != len => return Ok(None),
                            _ => leading = Some(len),
                        }
                        args.push(Arg::Seq(i));
                    } else if parts.is_invariant(v) {
                        args.push(Arg::Invariant(v));
                    } else {
                        return Ok(None);
                    }
                }
                if leading.is_none() {
                    return Ok(None);
                }
                Ok(Some(Batched::Map {
                    op: node.op.clone(),
                    args,
                }))
            }
            Operation::Dot => {
                let (a, b) = (node.inputs[0], node.inputs[1]);
                let rank_a = parts.inner_type(a)?.rank();
                let rank_b = parts.inner_type(b)?.rank();
                let batched = match (parts.role_of(a), parts.role_of(b)) {
                    (Some(InnerRole::Seq(seq)), _) if rank_a == 1 && parts.is_invariant(b) => {
                        match rank_b {
                            2 => Some(Batched::RowTimesMatrix { seq, matrix: b }),
                            1 => Some(Batched::Inner { seq, vector: b }),
                            _ => None,
                        }
                    }
                    (_, Some(InnerRole::Seq(seq))) if rank_b == 1 && parts.is_invariant(a) => {
                        match rank_a {
                            2 => Some(Batched::MatrixTimesRow { seq, matrix: a }),
                            1 => Some(Batched::Inner { seq, vector: a }),
                            _ => None,
                        }
                    }
                    _ => None,
                };
                Ok(batched)
            }
            _ => Ok(None),
        }
    }

    fn materialize(parts: &ScanParts, fgraph: &mut FunctionGraph, plan: Batched) -> Result<VarId> {
        let invariant = |fgraph: &mut FunctionGraph, v: VarId| -> Result<VarId> {
            parts
                .outer_invariant(fgraph, v)?
                .ok_or_else(|| missing_invariant(v))
        };
        match plan {
            Batched::Map { op, args } => {
                let mut outer = Vec::with_capacity(args.len());
                for arg in args {
                    outer.push(match arg {
                        Arg::Seq(i) => parts.seqs[i].outer,
                        Arg::Invariant(v) => invariant(fgraph, v)?,
                    });
                }
                fgraph.make_node(op, outer)
            }
            Batched::RowTimesMatrix { seq, matrix } => {
                let w = invariant(fgraph, matrix)?;
                fgraph.make_node(Operation::Dot, vec![parts.seqs[seq].outer, w])
            }
            Batched::MatrixTimesRow { seq, matrix } => {
                let w = invariant(fgraph, matrix)?;
                let wt = fgraph.make_node(Operation::Transpose, vec![w])?;
                fgraph.make_node(Operation::Dot, vec![parts.seqs[seq].outer, wt])
            }
            Batched::Inner { seq, vector } => {
                let v = invariant(fgraph, vector)?;
                fgraph.make_node(Operation::Dot, vec![parts.seqs[seq].outer, v])
            }
        }
    }
}

impl LocalRewriter for ScanPushoutSeqs {
    fn name(&self) -> &str {
        "scan_pushout_seqs"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Scan]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        _cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        let Some(mut parts) = ScanParts::from_apply(fgraph, apply)? else {
            return Ok(None);
        };

        let mut found = None;
        for id in parts.body.try_toposort()? {
            let node = parts.body.apply(id)?;
            if let Some(plan) = Self::plan(&parts, fgraph, node)? {
                found = Some((node.outputs[0], plan));
                break;
            }
        }
        let Some((out, plan)) = found else {
            return Ok(None);
        };

        let batched = Self::materialize(&parts, fgraph, plan)?;
        log::trace!("Batching %{} of scan '{}' over its sequences", out, parts.name);

        let ty = parts.inner_type(out)?.clone();
        let inner = parts.new_inner_input(ty, None);
        parts.replace_inner(out, inner, self.name())?;
        parts.seqs.push(InputPart {
            inner,
            outer: batched,
        });

        Ok(Some(parts.build(fgraph)?.replacement))
    }
}

/// Orientation of a per-step matrix-vector product
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Product {
    /// dot(v, W)
    VectorMatrix,
    /// dot(W, v)
    MatrixVector,
}

/// Per-step addend of a last-step accumulator
#[derive(Debug, Clone, Copy)]
enum Accumulated {
    /// acc + x_t -> init + sum(X, 0)
    Slices { seq: usize },
    /// acc + dot(a_t, b_t) over vector slices -> init + sum(A * B)
    InnerProducts { left: usize, right: usize },
    /// acc + dot(x_t, W) -> init + dot(sum(X, 0), W), and the mirrored form
    Linear { seq: usize, other: VarId, slice_first: bool },
}

impl Accumulated {
    fn sequences(&self) -> Vec<usize> {
        match *self {
            Accumulated::Slices { seq } | Accumulated::Linear { seq, .. } => vec![seq],
            Accumulated::InnerProducts { left, right } => vec![left, right],
        }
    }
}

/// Move matrix products applied to per-step outputs, and last-step
/// accumulators over sequences, after the loop
pub struct ScanPushoutAdd;

impl ScanPushoutAdd {
    /// Per-step output `p` computed as a product of a per-step vector and an
    /// invariant matrix that nothing else in the body consumes
    fn output_product(parts: &ScanParts, p: usize) -> Result<Option<(VarId, VarId, Product)>> {
        let out = parts.per_step[p].inner;
        let Some(node) = parts.body.owner_of(out) else {
            return Ok(None);
        };
        if node.op != Operation::Dot || parts.body.clients(out).len() != 1 {
            return Ok(None);
        }

        let (a, b) = (node.inputs[0], node.inputs[1]);
        let rank_a = parts.inner_type(a)?.rank();
        let rank_b = parts.inner_type(b)?.rank();
        let (v, w, product) = if rank_a == 1 && rank_b == 2 {
            (a, b, Product::VectorMatrix)
        } else if rank_a == 2 && rank_b == 1 {
            (b, a, Product::MatrixVector)
        } else {
            return Ok(None);
        };

        if !parts.is_invariant(w) || parts.is_invariant(v) {
            return Ok(None);
        }
        if matches!(parts.role_of(v), Some(InnerRole::Recurrent(_))) {
            return Ok(None);
        }
        Ok(Some((v, w, product)))
    }

    fn push_out_product(
        &self,
        fgraph: &mut FunctionGraph,
        mut parts: ScanParts,
    ) -> Result<Option<Replacement>> {
        let mut found = None;
        for p in 0..parts.per_step.len() {
            let used = parts.per_step[p]
                .old_outer
                .is_some_and(|old| !fgraph.clients(old).is_empty());
            if !used {
                continue;
            }
            if let Some(hit) = Self::output_product(&parts, p)? {
                found = Some((p, hit));
                break;
            }
        }
        let Some((p, (v, w, product))) = found else {
            return Ok(None);
        };

        let w_outer = parts
            .outer_invariant(fgraph, w)?
            .ok_or_else(|| missing_invariant(w))?;
        let index = parts.recurrent.len() + p;
        let mode = parts.per_step[p].mode;
        let Some(old) = parts.per_step[p].old_outer.take() else {
            return Ok(None);
        };
        parts.per_step[p].inner = v;

        let mut built = parts.build(fgraph)?;
        let stacked = built.outputs[index];
        let outside = match (mode, product) {
            (_, Product::VectorMatrix) => fgraph.make_node(Operation::Dot, vec![stacked, w_outer])?,
            (StoreMode::LastStep, Product::MatrixVector) => {
                fgraph.make_node(Operation::Dot, vec![w_outer, stacked])?
            }
            (StoreMode::AllSteps, Product::MatrixVector) => {
                let wt = fgraph.make_node(Operation::Transpose, vec![w_outer])?;
                fgraph.make_node(Operation::Dot, vec![stacked, wt])?
            }
        };
        built.replacement.push((old, outside));
        Ok(Some(built.replacement))
    }

    /// What a last-step state `r` accumulates, when it is `state + addend`
    /// and nothing else in the body reads the state
    fn accumulator(parts: &ScanParts, fgraph: &FunctionGraph, r: usize) -> Result<Option<Accumulated>> {
        let part = &parts.recurrent[r];
        if part.mode != StoreMode::LastStep || !parts.only_used_as_output(part.inner_out) {
            return Ok(None);
        }
        if parts.body.clients(part.inner_out).len() != 1 {
            return Ok(None);
        }
        let Some(node) = parts.body.owner_of(part.inner_out) else {
            return Ok(None);
        };
        if node.op != Operation::Elemwise(BinaryOpKind::Add) {
            return Ok(None);
        }
        let addend = if node.inputs[0] == part.inner_in {
            node.inputs[1]
        } else if node.inputs[1] == part.inner_in {
            node.inputs[0]
        } else {
            return Ok(None);
        };
        if addend == part.inner_in || parts.body.clients(part.inner_in).len() != 1 {
            return Ok(None);
        }
        if parts.inner_type(addend)? != parts.inner_type(part.inner_in)? {
            return Ok(None);
        }

        let found = match parts.role_of(addend) {
            Some(InnerRole::Seq(seq)) => Some(Accumulated::Slices { seq }),
            Some(_) => None,
            None => Self::accumulated_product(parts, addend)?,
        };
        let Some(found) = found else {
            return Ok(None);
        };

        // Summing whole sequences is only valid when the scan visits all of them
        for seq in found.sequences() {
            if !parts.covers(fgraph, seq)? {
                return Ok(None);
            }
        }
        Ok(Some(found))
    }

    /// `dot` addends that distribute over a sum of steps
    fn accumulated_product(parts: &ScanParts, addend: VarId) -> Result<Option<Accumulated>> {
        let Some(node) = parts.body.owner_of(addend) else {
            return Ok(None);
        };
        if node.op != Operation::Dot {
            return Ok(None);
        }
        let (a, b) = (node.inputs[0], node.inputs[1]);
        let found = match (parts.role_of(a), parts.role_of(b)) {
            (Some(InnerRole::Seq(left)), Some(InnerRole::Seq(right))) => {
                let vectors = parts.inner_type(a)?.rank() == 1 && parts.inner_type(b)?.rank() == 1;
                vectors.then_some(Accumulated::InnerProducts { left, right })
            }
            (Some(InnerRole::Seq(seq)), _) if parts.is_invariant(b) => Some(Accumulated::Linear {
                seq,
                other: b,
                slice_first: true,
            }),
            (_, Some(InnerRole::Seq(seq))) if parts.is_invariant(a) => Some(Accumulated::Linear {
                seq,
                other: a,
                slice_first: false,
            }),
            _ => None,
        };
        Ok(found)
    }

    /// Sum over all steps of what the accumulator adds, built outside the loop
    fn total(parts: &ScanParts, fgraph: &mut FunctionGraph, found: Accumulated) -> Result<VarId> {
        let sum_steps = Operation::Sum { axis: Some(0) };
        match found {
            Accumulated::Slices { seq } => fgraph.make_node(sum_steps, vec![parts.seqs[seq].outer]),
            Accumulated::InnerProducts { left, right } => {
                let products = fgraph.make_node(
                    Operation::Elemwise(BinaryOpKind::Mul),
                    vec![parts.seqs[left].outer, parts.seqs[right].outer],
                )?;
                fgraph.make_node(Operation::Sum { axis: None }, vec![products])
            }
            Accumulated::Linear {
                seq,
                other,
                slice_first,
            } => {
                let other = parts
                    .outer_invariant(fgraph, other)?
                    .ok_or_else(|| missing_invariant(other))?;
                let summed = fgraph.make_node(sum_steps, vec![parts.seqs[seq].outer])?;
                let args = if slice_first {
                    vec![summed, other]
                } else {
                    vec![other, summed]
                };
                fgraph.make_node(Operation::Dot, args)
            }
        }
    }

    fn push_out_accumulator(
        &self,
        fgraph: &mut FunctionGraph,
        mut parts: ScanParts,
    ) -> Result<Option<Replacement>> {
        let mut found = None;
        for r in 0..parts.recurrent.len() {
            let used = parts.recurrent[r]
                .old_outer
                .is_some_and(|old| !fgraph.clients(old).is_empty());
            if !used {
                continue;
            }
            if let Some(acc) = Self::accumulator(&parts, fgraph, r)? {
                found = Some((r, acc));
                break;
            }
        }
        let Some((r, acc)) = found else {
            return Ok(None);
        };

        let Some(old) = parts.recurrent[r].old_outer else {
            return Ok(None);
        };
        let total = Self::total(&parts, fgraph, acc)?;
        let part = parts.recurrent.remove(r);
        let outside = fgraph.make_node(
            Operation::Elemwise(BinaryOpKind::Add),
            vec![part.init, total],
        )?;
        log::trace!("Replacing accumulator {} of scan '{}' with a sum", r, parts.name);

        let mut built = parts.build(fgraph)?;
        built.replacement.push((old, outside));
        Ok(Some(built.replacement))
    }
}

impl LocalRewriter for ScanPushoutAdd {
    fn name(&self) -> &str {
        "scan_pushout_add"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Scan]
    }

    fn transform(
        &self,
        fgraph: &mut FunctionGraph,
        apply: ApplyId,
        _cx: &RewriteContext,
    ) -> Result<Option<Replacement>> {
        let Some(parts) = ScanParts::from_apply(fgraph, apply)? else {
            return Ok(None);
        };
        if let Some(pairs) = self.push_out_product(fgraph, parts.clone())? {
            return Ok(Some(pairs));
        }
        self.push_out_accumulator(fgraph, parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tensor::Tensor;
    use crate::ir::{GraphBuilder, IRType, Interpreter, ScalarType};
    use crate::optimizer::db::RewriteDb;
    use crate::optimizer::profile::RewriteProfile;
    use crate::scan::op::{ScanOp, ScanSignature};

    fn f64_vec(n: usize) -> IRType {
        IRType::vector(ScalarType::Float64, n)
    }

    fn f64_mat(m: usize, n: usize) -> IRType {
        IRType::matrix(ScalarType::Float64, m, n)
    }

    fn run_rule(rule: &dyn LocalRewriter, fg: &mut FunctionGraph) -> bool {
        let db = RewriteDb::new();
        let profile = RewriteProfile::none();
        let cx = RewriteContext::new(&db, &profile);
        let Some(scan) = fg
            .toposort()
            .find(|&a| matches!(fg.apply(a).unwrap().op, Operation::Scan(_)))
        else {
            return false;
        };
        match rule.transform(fg, scan, &cx).unwrap() {
            Some(pairs) => {
                fg.replace_all(&pairs, rule.name()).unwrap();
                true
            }
            None => false,
        }
    }

    fn scan_body(fg: &FunctionGraph) -> Option<FunctionGraph> {
        fg.toposort()
            .find_map(|a| fg.apply(a).unwrap().op.as_scan().map(|s| s.body().clone()))
    }

    fn has_op(fg: &FunctionGraph, op: &Operation) -> bool {
        fg.apply_nodes().any(|a| fg.apply(a).unwrap().op == *op)
    }

    fn inputs() -> Vec<Tensor> {
        let xs = Tensor::new(vec![3, 4], (0..12).map(|i| i as f64 * 0.1).collect()).unwrap();
        let w = Tensor::new(vec![4, 4], (0..16).map(|i| (i as f64 - 8.0) * 0.05).collect()).unwrap();
        let h0 = Tensor::vector(vec![0.5, -0.5, 0.25, 0.0]);
        vec![xs, w, h0]
    }

    /// h_t = tanh(dot(h_prev, exp(W)) + dot(x_t, W)), y_t = dot(h_t, W)
    fn rnn() -> FunctionGraph {
        let mut body = GraphBuilder::new();
        let x_t = body.input("x_t", f64_vec(4));
        let h = body.input("h", f64_vec(4));
        let w = body.input("w", f64_mat(4, 4));
        let ew = body.exp(w).unwrap();
        let rec = body.dot(h, ew).unwrap();
        let inp = body.dot(x_t, w).unwrap();
        let s = body.add(rec, inp).unwrap();
        let h_next = body.tanh(s).unwrap();
        let y = body.dot(h_next, w).unwrap();
        let body = body
            .function_graph(vec![x_t, h, w], vec![h_next, y])
            .unwrap();
        let scan = ScanOp::new("rnn", body, ScanSignature::new(1, 1, 1, 1)).unwrap();

        let mut b = GraphBuilder::new();
        let xs = b.input("xs", f64_mat(3, 4));
        let w = b.input("w", f64_mat(4, 4));
        let h0 = b.input("h0", f64_vec(4));
        let outs = b.scan(scan, vec![xs, h0, w]).unwrap();
        b.function_graph(vec![xs, w, h0], outs).unwrap()
    }

    fn assert_same(before: &[Tensor], after: &[Tensor]) {
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after) {
            assert_eq!(a.shape(), b.shape());
            assert!(a.allclose(b, 1e-9, 1e-12), "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_pushout_non_seqs() {
        let mut fg = rnn();
        let expected = Interpreter::run(&fg, &inputs()).unwrap();
        assert!(run_rule(&ScanPushoutNonSeqs, &mut fg));

        let exp = Operation::Unary(crate::ir::UnaryOpKind::Exp);
        assert!(has_op(&fg, &exp));
        assert!(!has_op(&scan_body(&fg).unwrap(), &exp));
        assert!(!run_rule(&ScanPushoutNonSeqs, &mut fg));
        assert_same(&expected, &Interpreter::run(&fg, &inputs()).unwrap());
    }

    #[test]
    fn test_pushout_seqs_batches_input_projection() {
        let mut fg = rnn();
        let expected = Interpreter::run(&fg, &inputs()).unwrap();
        assert!(run_rule(&ScanPushoutSeqs, &mut fg));

        let body = scan_body(&fg).unwrap();
        // dot(h, exp(W)) reads the state and stays; dot(h_t, W) reads the new state
        let dots = body
            .apply_nodes()
            .filter(|&a| body.apply(a).unwrap().op == Operation::Dot)
            .count();
        assert_eq!(dots, 2);
        assert!(has_op(&fg, &Operation::Dot));
        assert_same(&expected, &Interpreter::run(&fg, &inputs()).unwrap());
    }

    #[test]
    fn test_pushout_add_moves_output_product() {
        let mut fg = rnn();
        let expected = Interpreter::run(&fg, &inputs()).unwrap();
        assert!(run_rule(&ScanPushoutAdd, &mut fg));

        let body = scan_body(&fg).unwrap();
        assert_eq!(body.outputs()[0], body.outputs()[1]);
        assert_same(&expected, &Interpreter::run(&fg, &inputs()).unwrap());
    }

    #[test]
    fn test_state_products_not_hoisted() {
        let mut body = GraphBuilder::new();
        let h = body.input("h", f64_vec(4));
        let w = body.input("w", f64_mat(4, 4));
        let d = body.dot(h, w).unwrap();
        let h_next = body.tanh(d).unwrap();
        let body = body.function_graph(vec![h, w], vec![h_next, d]).unwrap();
        let scan = ScanOp::new("power", body, ScanSignature::new(0, 1, 1, 1).with_n_steps(3)).unwrap();

        let mut b = GraphBuilder::new();
        let h0 = b.input("h0", f64_vec(4));
        let w = b.input("w", f64_mat(4, 4));
        let outs = b.scan(scan, vec![h0, w]).unwrap();
        let mut fg = b.function_graph(vec![h0, w], outs).unwrap();

        assert!(!run_rule(&ScanPushoutNonSeqs, &mut fg));
        assert!(!run_rule(&ScanPushoutSeqs, &mut fg));
        // d also feeds the next state
        assert!(!run_rule(&ScanPushoutAdd, &mut fg));
    }

    #[test]
    fn test_accumulator_becomes_sum() {
        let mut body = GraphBuilder::new();
        let x_t = body.input("x_t", f64_vec(4));
        let acc = body.input("acc", f64_vec(4));
        let next = body.add(acc, x_t).unwrap();
        let body = body.function_graph(vec![x_t, acc], vec![next]).unwrap();
        let sig = ScanSignature::new(1, 1, 0, 0).store_last(0);
        let scan = ScanOp::new("total", body, sig).unwrap();

        let mut b = GraphBuilder::new();
        let xs = b.input("xs", f64_mat(3, 4));
        let a0 = b.input("a0", f64_vec(4));
        let outs = b.scan(scan, vec![xs, a0]).unwrap();
        let mut fg = b.function_graph(vec![xs, a0], outs).unwrap();

        let args = vec![inputs()[0].clone(), inputs()[2].clone()];
        let expected = Interpreter::run(&fg, &args).unwrap();
        assert!(run_rule(&ScanPushoutAdd, &mut fg));
        assert!(scan_body(&fg).is_none());
        assert_same(&expected, &Interpreter::run(&fg, &args).unwrap());
    }

    #[test]
    fn test_accumulated_inner_products_become_sum() {
        // acc_t = acc_{t-1} + dot(a_t, b_t)
        let mut body = GraphBuilder::new();
        let a_t = body.input("a_t", f64_vec(4));
        let b_t = body.input("b_t", f64_vec(4));
        let acc = body.input("acc", IRType::scalar(ScalarType::Float64));
        let d = body.dot(a_t, b_t).unwrap();
        let next = body.add(acc, d).unwrap();
        let body = body.function_graph(vec![a_t, b_t, acc], vec![next]).unwrap();
        let sig = ScanSignature::new(2, 1, 0, 0).store_last(0);
        let scan = ScanOp::new("inner", body, sig).unwrap();

        let mut b = GraphBuilder::new();
        let xs = b.input("xs", f64_mat(3, 4));
        let ys = b.input("ys", f64_mat(3, 4));
        let a0 = b.input("a0", IRType::scalar(ScalarType::Float64));
        let outs = b.scan(scan, vec![xs, ys, a0]).unwrap();
        let mut fg = b.function_graph(vec![xs, ys, a0], outs).unwrap();

        let args = vec![inputs()[0].clone(), inputs()[0].clone(), Tensor::scalar(1.5)];
        let expected = Interpreter::run(&fg, &args).unwrap();
        assert!(run_rule(&ScanPushoutAdd, &mut fg));
        assert!(scan_body(&fg).is_none());
        assert!(has_op(&fg, &Operation::Sum { axis: None }));
        assert_same(&expected, &Interpreter::run(&fg, &args).unwrap());
    }

    #[test]
    fn test_accumulated_projection_sums_first() {
        // acc_t = acc_{t-1} + dot(W, x_t) becomes init + dot(W, sum(X))
        let mut body = GraphBuilder::new();
        let x_t = body.input("x_t", f64_vec(4));
        let acc = body.input("acc", f64_vec(4));
        let w = body.input("w", f64_mat(4, 4));
        let d = body.dot(w, x_t).unwrap();
        let next = body.add(d, acc).unwrap();
        let body = body.function_graph(vec![x_t, acc, w], vec![next]).unwrap();
        let sig = ScanSignature::new(1, 1, 1, 0).store_last(0);
        let scan = ScanOp::new("project", body, sig).unwrap();

        let mut b = GraphBuilder::new();
        let xs = b.input("xs", f64_mat(3, 4));
        let w = b.input("w", f64_mat(4, 4));
        let h0 = b.input("h0", f64_vec(4));
        let outs = b.scan(scan, vec![xs, h0, w]).unwrap();
        let mut fg = b.function_graph(vec![xs, w, h0], outs).unwrap();

        let expected = Interpreter::run(&fg, &inputs()).unwrap();
        assert!(run_rule(&ScanPushoutAdd, &mut fg));
        assert!(scan_body(&fg).is_none());
        assert!(has_op(&fg, &Operation::Sum { axis: Some(0) }));
        assert_same(&expected, &Interpreter::run(&fg, &inputs()).unwrap());
    }

    #[test]
    fn test_accumulator_needs_covered_sequences() {
        // Only the first two rows of xs are visited
        let mut body = GraphBuilder::new();
        let x_t = body.input("x_t", f64_vec(4));
        let acc = body.input("acc", f64_vec(4));
        let next = body.add(acc, x_t).unwrap();
        let body = body.function_graph(vec![x_t, acc], vec![next]).unwrap();
        let sig = ScanSignature::new(1, 1, 0, 0).store_last(0).with_n_steps(2);
        let scan = ScanOp::new("prefix", body, sig).unwrap();

        let mut b = GraphBuilder::new();
        let xs = b.input("xs", f64_mat(3, 4));
        let a0 = b.input("a0", f64_vec(4));
        let outs = b.scan(scan, vec![xs, a0]).unwrap();
        let mut fg = b.function_graph(vec![xs, a0], outs).unwrap();
        assert!(!run_rule(&ScanPushoutAdd, &mut fg));
    }
}
