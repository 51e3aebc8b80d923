// Compile Pipeline Integration Tests
//
// Profiles, the iteration cap, evaluation plans and error reporting through
// the public entry points.

use approx::assert_abs_diff_eq;
use std::collections::HashSet;
use symgraph::ir::{ApplyId, FunctionGraph, GraphBuilder, IRType, OpKind, Operation, ScalarType, UnaryOpKind};
use symgraph::optimizer::{LocalRewriter, Replacement, RewriteContext};
use symgraph::{compile, Compiler, ErrorKind, RewriteDb, RewriteProfile, Result, Tensor};

fn vector(n: usize) -> IRType {
    IRType::vector(ScalarType::Float64, n)
}

/// exp(x + 0) * exp(x) + tanh(transpose(transpose(x)))
fn redundant() -> (GraphBuilder, symgraph::VarId, symgraph::VarId) {
    let mut b = GraphBuilder::new();
    let x = b.input("x", vector(3));
    let zero = b.constant(Tensor::zeros(vec![3]));
    let a = b.add(x, zero).unwrap();
    let e1 = b.exp(a).unwrap();
    let e2 = b.exp(x).unwrap();
    let m = b.mul(e1, e2).unwrap();
    let t1 = b.transpose(x).unwrap();
    let t2 = b.transpose(t1).unwrap();
    let th = b.tanh(t2).unwrap();
    let y = b.add(m, th).unwrap();
    (b, x, y)
}

fn count(fg: &FunctionGraph, op: &Operation) -> usize {
    fg.apply_nodes().filter(|&a| fg.apply(a).unwrap().op == *op).count()
}

#[test]
fn test_fast_run_vs_fast_compile() {
    let (b, x, y) = redundant();
    let exp = Operation::Unary(UnaryOpKind::Exp);

    let fast_compile = compile(b.arena(), vec![x], vec![y], &RewriteProfile::named("fast_compile").unwrap()).unwrap();
    // Merge alone cannot see through x + 0
    assert_eq!(count(&fast_compile.fgraph, &exp), 2);
    assert_eq!(count(&fast_compile.fgraph, &Operation::Transpose), 2);

    let fast_run = compile(b.arena(), vec![x], vec![y], &RewriteProfile::default()).unwrap();
    assert_eq!(count(&fast_run.fgraph, &exp), 1);
    assert_eq!(count(&fast_run.fgraph, &Operation::Transpose), 0);
    assert_eq!(fast_run.fgraph.num_applies(), 4);
    assert!(fast_run.report.applied_count("local_add_zero") >= 1);
    assert!(fast_run.report.applied_count("merge") >= 1);

    let args = [Tensor::vector(vec![-1.0, 0.0, 0.5])];
    let a = fast_compile.evaluate(&args).unwrap();
    let r = fast_run.evaluate(&args).unwrap();
    for (p, q) in a[0].data().iter().zip(r[0].data()) {
        assert_abs_diff_eq!(*p, *q, epsilon = 1e-12);
    }
    assert_abs_diff_eq!(r[0].data()[2], 1f64.exp() + 0.5f64.tanh(), epsilon = 1e-12);
}

#[test]
fn test_parsed_profile() {
    let (b, x, y) = redundant();
    let profile: RewriteProfile = "fast_run,-canonicalize".parse().unwrap();
    let compiled = compile(b.arena(), vec![x], vec![y], &profile).unwrap();
    assert_eq!(compiled.report.applied_count("local_add_zero"), 0);
    assert_eq!(count(&compiled.fgraph, &Operation::Transpose), 2);

    let err = "fastest".parse::<RewriteProfile>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownProfile);
}

#[test]
fn test_plan_is_topological() {
    let (b, x, y) = redundant();
    let compiled = compile(b.arena(), vec![x], vec![y], &RewriteProfile::default()).unwrap();
    let plan = compiled.plan().unwrap();
    assert_eq!(plan.inputs, vec![x]);
    assert_eq!(plan.steps.len(), compiled.fgraph.num_applies());

    let mut ready: HashSet<_> = plan.inputs.iter().copied().collect();
    for step in &plan.steps {
        for input in &step.inputs {
            assert!(ready.contains(input) || compiled.fgraph.constant_value(*input).is_some());
        }
        ready.extend(step.outputs.iter().copied());
    }
    assert!(plan.outputs.iter().all(|o| ready.contains(o)));
}

/// Rebuilds tanh nodes forever
struct Rebuild;

impl LocalRewriter for Rebuild {
    fn name(&self) -> &str {
        "rebuild_tanh"
    }

    fn tracks(&self) -> &[OpKind] {
        &[OpKind::Unary]
    }

    fn transform(&self, fgraph: &mut FunctionGraph, apply: ApplyId, _cx: &RewriteContext) -> Result<Option<Replacement>> {
        let node = fgraph.apply(apply)?.clone();
        if node.op != Operation::Unary(UnaryOpKind::Tanh) {
            return Ok(None);
        }
        let fresh = fgraph.make_node(node.op.clone(), node.inputs.clone())?;
        Ok(Some(vec![(node.outputs[0], fresh)]))
    }
}

#[test]
fn test_iteration_cap_is_reported() {
    let mut db = RewriteDb::standard().unwrap();
    db.register_local(Box::new(Rebuild), &["unstable"], 100).unwrap();
    let compiler = Compiler::with_db(db);
    let profile = RewriteProfile::default().including("unstable").with_max_iterations(3);

    let (b, x, y) = redundant();
    let compiled = compiler.compile(b.arena(), vec![x], vec![y], &profile).unwrap();
    assert!(!compiled.converged());
    assert_eq!(compiled.warnings().len(), 1);
    assert_eq!(compiled.report.passes, 3);
    compiled.fgraph.check_integrity().unwrap();

    let out = compiled.evaluate(&[Tensor::vector(vec![0.0, 0.0, 0.0])]).unwrap();
    assert_eq!(out[0].data(), &[1.0, 1.0, 1.0]);
}

#[test]
fn test_outputs_may_be_inputs() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", vector(2));
    let n1 = b.neg(x).unwrap();
    let n2 = b.neg(n1).unwrap();
    let compiled = compile(b.arena(), vec![x], vec![n2, x], &RewriteProfile::default()).unwrap();
    assert_eq!(compiled.fgraph.num_applies(), 0);
    assert_eq!(compiled.fgraph.outputs(), &[x, x]);
}

#[test]
fn test_compile_errors() {
    let (b, x, y) = redundant();
    assert_eq!(
        compile(b.arena(), vec![], vec![y], &RewriteProfile::default()).unwrap_err().kind(),
        ErrorKind::MissingInput
    );
    assert_eq!(
        compile(b.arena(), vec![x, x], vec![y], &RewriteProfile::default()).unwrap_err().kind(),
        ErrorKind::InvalidValue
    );
    assert_eq!(
        compile(b.arena(), vec![x], vec![9999], &RewriteProfile::default()).unwrap_err().kind(),
        ErrorKind::UnknownVariable
    );
}
