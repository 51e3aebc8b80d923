// symgraph: symbolic expression graphs with an equilibrium rewrite engine
//
// Numerical computations are directed acyclic graphs of typed operations.
// A compile request imports the graph, rewrites it to a fixpoint under a
// rule profile and hands back a graph with the same output signature.
//
// Architecture:
// - core: errors and dense reference values
// - ir: node model, function graph, fingerprints, reference interpreter
// - optimizer: rule traits, rule database, profiles, equilibrium engine
// - scan: the loop construct and the rewrites that see through its body
// - compiler: the compile entry point and its result cache

pub mod core;
pub mod ir;
pub mod optimizer;
pub mod scan;
pub mod compiler;

// Re-export commonly used items for convenience
pub use crate::core::{ErrorKind, GraphError, Result, Tensor};
pub use compiler::{compile, Compiler, EvaluationPlan, RewrittenGraph};
pub use ir::{FunctionGraph, GraphBuilder, GraphFingerprint, IRType, Interpreter, ScalarType, VarId};
pub use optimizer::{EquilibriumEngine, RewriteDb, RewriteProfile, RewriteReport};
pub use scan::{ScanOp, ScanSignature, StoreMode};
