// Compile: the single entry point from a built graph to a rewritten one
//
// import -> record output signature -> equilibrium rewrite -> verify the
// signature -> collect garbage. The result carries the engine report and
// lowers to an evaluation plan of topologically ordered applies.

use crate::compiler::cache::{CacheKey, CompileCache};
use crate::core::error::{GraphError, Result};
use crate::core::tensor::Tensor;
use crate::ir::{
    ApplyId, FunctionGraph, GraphFingerprint, IRType, Interpreter, NodeArena, Operation, VarId,
};
use crate::optimizer::db::RewriteDb;
use crate::optimizer::engine::{EquilibriumEngine, RewriteReport};
use crate::optimizer::profile::RewriteProfile;
use std::sync::Arc;

/// One step of an evaluation plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub apply: ApplyId,
    pub op: Operation,
    pub inputs: Vec<VarId>,
    pub outputs: Vec<VarId>,
}

/// What a lowering stage consumes
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationPlan {
    pub inputs: Vec<VarId>,
    pub outputs: Vec<VarId>,
    /// Applies in an order where every input is computed before use
    pub steps: Vec<PlanStep>,
}

/// A graph after rewriting, with the engine's report
#[derive(Debug, Clone)]
pub struct RewrittenGraph {
    pub fgraph: FunctionGraph,
    pub report: RewriteReport,
}

impl RewrittenGraph {
    /// False when the iteration cap stopped the rewrite early
    pub fn converged(&self) -> bool {
        self.report.converged
    }

    pub fn warnings(&self) -> &[String] {
        &self.report.warnings
    }

    pub fn plan(&self) -> Result<EvaluationPlan> {
        let steps = self
            .fgraph
            .try_toposort()?
            .into_iter()
            .map(|id| {
                let node = self.fgraph.apply(id)?;
                Ok(PlanStep {
                    apply: id,
                    op: node.op.clone(),
                    inputs: node.inputs.clone(),
                    outputs: node.outputs.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(EvaluationPlan {
            inputs: self.fgraph.inputs().to_vec(),
            outputs: self.fgraph.outputs().to_vec(),
            steps,
        })
    }

    pub fn fingerprint(&self) -> GraphFingerprint {
        GraphFingerprint::of(&self.fgraph)
    }

    /// Run the graph on positional inputs with the reference interpreter
    pub fn evaluate(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        Interpreter::run(&self.fgraph, inputs)
    }
}

/// Rewrite database plus a cache of earlier results
pub struct Compiler {
    db: RewriteDb,
    cache: CompileCache,
}

impl Compiler {
    /// Compiler over the built-in rules
    pub fn new() -> Result<Self> {
        Ok(Self::with_db(RewriteDb::standard()?))
    }

    pub fn with_db(db: RewriteDb) -> Self {
        Self {
            db,
            cache: CompileCache::default(),
        }
    }

    pub fn db(&self) -> &RewriteDb {
        &self.db
    }

    pub fn cache(&self) -> &CompileCache {
        &self.cache
    }

    /// Import `outputs` from `arena`, rewrite under `profile` and verify
    /// the output signature survived
    pub fn compile(
        &self,
        arena: &NodeArena,
        inputs: Vec<VarId>,
        outputs: Vec<VarId>,
        profile: &RewriteProfile,
    ) -> Result<RewrittenGraph> {
        let mut fgraph = FunctionGraph::import(arena, inputs, outputs)?;
        let key = CacheKey::new(&fgraph, profile);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.as_ref().clone());
        }

        log::info!(
            "Compiling graph {} ({} applies) with profile {}",
            key.fingerprint(),
            fgraph.num_applies(),
            profile
        );
        let signature = output_signature(&fgraph)?;

        let report = EquilibriumEngine::new(&self.db, profile).rewrite(&mut fgraph)?;
        check_signature(&signature, &fgraph)?;
        fgraph.collect_garbage();

        log::info!(
            "Compiled graph {}: {} applies after {} rewrites in {} passes{}",
            key.fingerprint(),
            fgraph.num_applies(),
            report.total_applied(),
            report.passes,
            if report.converged { "" } else { " (not converged)" }
        );

        let rewritten = RewrittenGraph { fgraph, report };
        self.cache.insert(key, Arc::new(rewritten.clone()));
        Ok(rewritten)
    }
}

fn output_signature(fgraph: &FunctionGraph) -> Result<Vec<IRType>> {
    fgraph
        .outputs()
        .iter()
        .map(|&v| fgraph.var_type(v).cloned())
        .collect()
}

fn check_signature(before: &[IRType], fgraph: &FunctionGraph) -> Result<()> {
    let after = output_signature(fgraph)?;
    if after.len() != before.len() {
        return Err(GraphError::Inconsistency(format!(
            "rewriting changed the output count from {} to {}",
            before.len(),
            after.len()
        )));
    }
    for (i, (old, new)) in before.iter().zip(&after).enumerate() {
        if !new.compatible_with(old) {
            return Err(GraphError::Inconsistency(format!(
                "rewriting changed output {} from {} to {}",
                i, old, new
            )));
        }
    }
    Ok(())
}

/// Compile with the built-in rules
pub fn compile(
    arena: &NodeArena,
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
    profile: &RewriteProfile,
) -> Result<RewrittenGraph> {
    Compiler::new()?.compile(arena, inputs, outputs, profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::ir::{GraphBuilder, ScalarType};

    fn chain() -> (GraphBuilder, VarId, VarId) {
        let mut b = GraphBuilder::new();
        let x = b.input("x", IRType::vector(ScalarType::Float64, 2));
        let zero = b.constant(Tensor::zeros(vec![2]));
        let a = b.add(x, zero).unwrap();
        let e1 = b.exp(a).unwrap();
        let e2 = b.exp(x).unwrap();
        let y = b.mul(e1, e2).unwrap();
        (b, x, y)
    }

    #[test]
    fn test_compile_simplifies() {
        let (b, x, y) = chain();
        let compiled = compile(b.arena(), vec![x], vec![y], &RewriteProfile::default()).unwrap();
        assert!(compiled.converged());
        assert!(compiled.warnings().is_empty());
        // x + 0 vanishes, then both exps merge
        assert_eq!(compiled.fgraph.num_applies(), 2);

        let plan = compiled.plan().unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].op, Operation::Unary(crate::ir::UnaryOpKind::Exp));
        assert_eq!(plan.outputs, compiled.fgraph.outputs());

        let out = compiled.evaluate(&[Tensor::vector(vec![0.0, 1.0])]).unwrap();
        assert!((out[0].data()[1] - 2f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn test_none_profile_keeps_graph() {
        let (b, x, y) = chain();
        let compiled = compile(b.arena(), vec![x], vec![y], &RewriteProfile::none()).unwrap();
        assert_eq!(compiled.fgraph.num_applies(), 4);
        assert_eq!(compiled.report.total_applied(), 0);
    }

    #[test]
    fn test_missing_input() {
        let (b, _, y) = chain();
        let err = compile(b.arena(), vec![], vec![y], &RewriteProfile::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingInput);
    }

    #[test]
    fn test_cache_reuse() {
        let compiler = Compiler::new().unwrap();
        let (b, x, y) = chain();
        let profile = RewriteProfile::default();
        let first = compiler.compile(b.arena(), vec![x], vec![y], &profile).unwrap();
        let second = compiler.compile(b.arena(), vec![x], vec![y], &profile).unwrap();
        assert_eq!(compiler.cache().len(), 1);
        assert_eq!(first.fgraph.to_string(), second.fgraph.to_string());
    }
}
