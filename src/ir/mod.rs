// IR Module: symbolic expression graphs
//
// Node model, arena storage, the mutable FunctionGraph and a reference
// interpreter.

pub mod arena;
pub mod builder;
pub mod fingerprint;
pub mod graph;
pub mod interpreter;
pub mod node;
pub mod shape;
pub mod toposort;
pub mod types;

// Re-exports
pub use arena::NodeArena;
pub use builder::GraphBuilder;
pub use fingerprint::GraphFingerprint;
pub use graph::{Client, FunctionGraph};
pub use interpreter::Interpreter;
pub use node::{
    ApplyId, ApplyNode, BinaryOpKind, OpKind, Operation, Owner, UnaryOpKind, VarId, Variable,
};
pub use shape::{Dim, Shape};
pub use toposort::Toposort;
pub use types::{IRType, ScalarType};
