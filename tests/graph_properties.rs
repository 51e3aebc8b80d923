// Property-based tests for the function graph and the rewrite engine
//
// Random DAGs of elementwise operations over three vector inputs.

use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::HashMap;
use symgraph::ir::{FunctionGraph, GraphBuilder, IRType, Interpreter, ScalarType, VarId};
use symgraph::{compile, GraphFingerprint, RewriteProfile, Tensor};

// ===== Strategies for generating test data =====

type Step = (u8, Index, Index);

fn arb_steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec((0u8..10, any::<Index>(), any::<Index>()), 1..24)
}

fn arb_values() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-2.0f64..2.0, 9)
}

/// Build a graph from steps; returns the builder, inputs and outputs
fn build(steps: &[Step]) -> (GraphBuilder, Vec<VarId>, Vec<VarId>) {
    let ty = IRType::vector(ScalarType::Float64, 3);
    let mut b = GraphBuilder::new();
    let inputs: Vec<VarId> = ["x", "y", "z"].iter().map(|n| b.input(*n, ty.clone())).collect();
    let mut pool = inputs.clone();

    for (op, ia, ib) in steps {
        let a = pool[ia.index(pool.len())];
        let c = pool[ib.index(pool.len())];
        let var = match op {
            0 => b.add(a, c),
            1 => b.sub(a, c),
            2 => b.mul(a, c),
            3 => b.maximum(a, c),
            4 => b.tanh(a),
            5 => b.neg(a),
            6 => b.sigmoid(a),
            7 => b.abs(a),
            8 => {
                let zero = b.constant(Tensor::zeros(vec![3]));
                b.add(a, zero)
            }
            _ => {
                let one = b.constant(Tensor::full(vec![3], 1.0));
                b.mul(one, a)
            }
        }
        .unwrap();
        pool.push(var);
    }

    let outputs = pool.iter().rev().take(3).copied().collect();
    (b, inputs, outputs)
}

fn tensors(values: &[f64]) -> Vec<Tensor> {
    values.chunks(3).map(|c| Tensor::vector(c.to_vec())).collect()
}

fn close(a: &[Tensor], b: &[Tensor]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.allclose(y, 1e-9, 1e-12))
}

// ===== Property Tests =====

proptest! {
    /// Property: the topological order lists every apply after its producers
    #[test]
    fn prop_toposort_respects_dependencies(steps in arb_steps()) {
        let (b, inputs, outputs) = build(&steps);
        let fg = b.function_graph(inputs, outputs).unwrap();
        let order = fg.try_toposort().unwrap();
        prop_assert_eq!(order.len(), fg.num_applies());

        let position: HashMap<_, _> = order.iter().enumerate().map(|(i, &a)| (a, i)).collect();
        for &apply in &order {
            for &input in &fg.apply(apply).unwrap().inputs {
                if let Some(owner) = fg.variable(input).unwrap().owner {
                    prop_assert!(position[&owner.apply] < position[&apply]);
                }
            }
        }
    }

    /// Property: any sequence of replacements leaves a consistent DAG, and a
    /// rejected one leaves the graph untouched
    #[test]
    fn prop_replace_keeps_dag(
        steps in arb_steps(),
        swaps in prop::collection::vec((any::<Index>(), any::<Index>()), 1..12),
    ) {
        let (b, inputs, outputs) = build(&steps);
        let mut fg = b.function_graph(inputs, outputs).unwrap();

        for (io, inew) in swaps {
            let vars: Vec<VarId> = fg.variables().collect();
            let old = vars[io.index(vars.len())];
            let new = vars[inew.index(vars.len())];
            if old == new {
                continue;
            }
            let before = fg.to_string();
            if fg.replace(old, new, "prop").is_err() {
                prop_assert_eq!(fg.to_string(), before);
            }
            prop_assert!(fg.check_integrity().is_ok());
            prop_assert!(fg.try_toposort().is_ok());
        }
    }

    /// Property: compiling keeps the output signature and the values
    #[test]
    fn prop_compile_preserves_semantics(steps in arb_steps(), values in arb_values()) {
        let (b, inputs, outputs) = build(&steps);
        let original = b.function_graph(inputs.clone(), outputs.clone()).unwrap();
        let compiled = compile(b.arena(), inputs, outputs, &RewriteProfile::default()).unwrap();
        prop_assert!(compiled.converged());

        prop_assert_eq!(original.outputs().len(), compiled.fgraph.outputs().len());
        for (&o, &n) in original.outputs().iter().zip(compiled.fgraph.outputs()) {
            prop_assert_eq!(original.var_type(o).unwrap(), compiled.fgraph.var_type(n).unwrap());
        }

        let args = tensors(&values);
        let expected = Interpreter::run(&original, &args).unwrap();
        let actual = compiled.evaluate(&args).unwrap();
        prop_assert!(close(&expected, &actual));
    }

    /// Property: compile is deterministic and a second compile changes nothing
    #[test]
    fn prop_compile_is_idempotent(steps in arb_steps()) {
        let (b, inputs, outputs) = build(&steps);
        let profile = RewriteProfile::default();
        let first = compile(b.arena(), inputs.clone(), outputs.clone(), &profile).unwrap();
        let again = compile(b.arena(), inputs, outputs, &profile).unwrap();
        prop_assert_eq!(first.fingerprint(), again.fingerprint());
        prop_assert_eq!(first.fgraph.to_string(), again.fgraph.to_string());

        let fg: &FunctionGraph = &first.fgraph;
        let second = compile(fg.arena(), fg.inputs().to_vec(), fg.outputs().to_vec(), &profile).unwrap();
        prop_assert_eq!(second.report.total_applied(), 0);
        prop_assert_eq!(GraphFingerprint::of(&second.fgraph), first.fingerprint());
    }
}
