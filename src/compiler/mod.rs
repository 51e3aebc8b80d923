// Compiler Module: compile entry point and result cache

pub mod cache;
pub mod compile;

// Re-exports
pub use cache::{CacheKey, CompileCache};
pub use compile::{compile, Compiler, EvaluationPlan, PlanStep, RewrittenGraph};
